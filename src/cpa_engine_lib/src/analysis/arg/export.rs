//! Export of the ARG in the DOT format of Graphviz.

use super::*;
use crate::cfa::Cfa;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::Path;

/// Render the ARG as a DOT graph.
///
/// Each state becomes a node labelled with its serial number and location.
/// Target states are drawn red, covered states dashed.
/// Edges are labelled with the code of their CFA edge (if a CFA is given) or with the summarized block.
/// Covering relations are drawn as dashed edges from the covered to the covering state.
pub fn to_dot<S: AbstractState, P>(arg: &Arg<S, P>, cfa: Option<&Cfa>) -> String {
    let mut dot = String::from("digraph ARG {\n  node [shape=box];\n");
    let mut states: Vec<StateId> = arg.states().collect();
    states.sort_by_key(|id| arg.serial(*id));
    for id in &states {
        let node = &arg.graph[*id];
        let location = node.state.location();
        let location_label = match cfa {
            Some(cfa) => format!("{} ({})", location.index(), cfa.node(location).label),
            None => location.index().to_string(),
        };
        let mut attributes = String::new();
        if node.is_target() {
            attributes.push_str(", color=red");
        }
        if node.is_covered() {
            attributes.push_str(", style=dashed");
        }
        let _ = writeln!(
            dot,
            "  {} [label=\"#{} @ N{}\"{}];",
            node.serial,
            node.serial,
            escape(&location_label),
            attributes
        );
    }
    for id in &states {
        let serial = arg.serial(*id);
        for child in arg.children(*id) {
            let label = match arg.edge_label(*id, child) {
                Some(ArgEdge::Cfa(edge)) => match cfa {
                    Some(cfa) => cfa.edge(*edge).code.clone(),
                    None => format!("edge {}", edge.index()),
                },
                Some(ArgEdge::Summary(summary)) => format!("summary of block {}", summary.block.0),
                None => String::new(),
            };
            let _ = writeln!(
                dot,
                "  {} -> {} [label=\"{}\"];",
                serial,
                arg.serial(child),
                escape(&label)
            );
        }
        if let Some(covering) = arg.graph[*id].covered_by() {
            let _ = writeln!(
                dot,
                "  {} -> {} [style=dashed, label=\"covered by\"];",
                serial,
                arg.serial(covering)
            );
        }
    }
    dot.push_str("}\n");
    dot
}

/// Write the DOT rendering of the ARG to a file.
pub fn write_dot<S: AbstractState, P>(
    arg: &Arg<S, P>,
    cfa: Option<&Cfa>,
    path: &Path,
) -> Result<(), Error> {
    std::fs::write(path, to_dot(arg, cfa))
        .with_context(|| format!("could not write ARG to {}", path.display()))
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
