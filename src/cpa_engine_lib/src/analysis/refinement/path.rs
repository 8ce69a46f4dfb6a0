use crate::analysis::arg::{ArgEdge, StateId};
use crate::analysis::bam::{BlockSummary, EntryId};
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;
use petgraph::graph::EdgeIndex;
use std::sync::Arc;

/// Where the state of a path element lives.
#[derive(Debug)]
pub enum PathOrigin<S, P> {
    /// A state of the main reached set.
    Main(StateId),
    /// A state of the reached set of a block summary.
    Block {
        /// The state of the main reached set that was expanded from the outermost summary.
        /// Removing the element means removing this state.
        cut: StateId,
        /// The cache entries of all summaries enclosing the state, outermost first.
        entries: Vec<EntryId>,
        /// The reached set the state belongs to.
        reached: Arc<ReachedSet<S, P>>,
        state: StateId,
    },
}

impl<S, P> Clone for PathOrigin<S, P> {
    fn clone(&self) -> Self {
        match self {
            PathOrigin::Main(id) => PathOrigin::Main(*id),
            PathOrigin::Block {
                cut,
                entries,
                reached,
                state,
            } => PathOrigin::Block {
                cut: *cut,
                entries: entries.clone(),
                reached: reached.clone(),
                state: *state,
            },
        }
    }
}

/// One state of a counterexample path.
#[derive(Debug, Clone)]
pub struct PathElement<S, P> {
    pub state: S,
    pub precision: P,
    pub serial: u64,
    /// The CFA edge leading to this element. `None` for the first element.
    pub edge: Option<EdgeIndex>,
    pub origin: PathOrigin<S, P>,
}

impl<S, P> PathElement<S, P> {
    /// The state of the main reached set that has to be removed to remove this element.
    pub fn cut_state(&self) -> StateId {
        match &self.origin {
            PathOrigin::Main(id) => *id,
            PathOrigin::Block { cut, .. } => *cut,
        }
    }

    pub fn is_in_block(&self) -> bool {
        matches!(self.origin, PathOrigin::Block { .. })
    }
}

/// A path of the ARG from the initial state to a target state,
/// where every summary edge is replaced by the path through the block that it summarizes.
/// Consecutive elements are connected by exactly one CFA edge.
#[derive(Debug, Clone)]
pub struct ArgPath<S, P> {
    elements: Vec<PathElement<S, P>>,
}

/// The enclosing summaries while a summary edge is expanded.
struct Context {
    cut: StateId,
    entries: Vec<EntryId>,
}

impl<S: AbstractState, P: Precision> ArgPath<S, P> {
    /// Compute a path from a root of the ARG of `reached` to `target`.
    pub fn from_target(
        reached: &ReachedSet<S, P>,
        target: StateId,
    ) -> Result<ArgPath<S, P>, AnalysisError> {
        let arg = reached.arg();
        let mut path = None;
        for root in arg.roots() {
            if let Ok(found) = arg.extract_path(root, target, |_| true) {
                path = Some(found);
                break;
            }
        }
        let Some(path) = path else {
            return Err(AnalysisError::NoPath {
                from: 0,
                to: arg.serial(target),
            });
        };

        let mut elements = vec![main_element(reached, path[0], None)?];
        for pair in path.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            let label = arg.edge_label(parent, child).ok_or_else(|| {
                AnalysisError::Inconsistent(format!(
                    "no edge between states {} and {}",
                    arg.serial(parent),
                    arg.serial(child)
                ))
            })?;
            let context = Context {
                cut: child,
                entries: Vec::new(),
            };
            let edge = expand_edge(&mut elements, label, &context)?;
            elements.push(main_element(reached, child, edge)?);
        }
        Ok(ArgPath { elements })
    }

    pub fn elements(&self) -> &[PathElement<S, P>] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> Option<&PathElement<S, P>> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The CFA edges along the path.
    pub fn edges(&self) -> Vec<EdgeIndex> {
        self.elements
            .iter()
            .filter_map(|element| element.edge)
            .collect()
    }

    /// The last element of the path.
    pub fn target(&self) -> Option<&PathElement<S, P>> {
        self.elements.last()
    }
}

fn main_element<S: AbstractState, P: Precision>(
    reached: &ReachedSet<S, P>,
    id: StateId,
    edge: Option<EdgeIndex>,
) -> Result<PathElement<S, P>, AnalysisError> {
    let precision = reached.precision(id).cloned().ok_or_else(|| {
        AnalysisError::Inconsistent(format!(
            "path state {} is not reached",
            reached.arg().serial(id)
        ))
    })?;
    Ok(PathElement {
        state: reached.arg().state(id).clone(),
        precision,
        serial: reached.arg().serial(id),
        edge,
        origin: PathOrigin::Main(id),
    })
}

/// Append the elements strictly between the source and the target of an ARG edge
/// and return the CFA edge leading into the target.
fn expand_edge<S: AbstractState, P: Precision>(
    elements: &mut Vec<PathElement<S, P>>,
    label: &ArgEdge<S, P>,
    context: &Context,
) -> Result<Option<EdgeIndex>, AnalysisError> {
    match label {
        ArgEdge::Cfa(edge) => Ok(Some(*edge)),
        ArgEdge::Summary(summary) => expand_summary(elements, summary, context),
    }
}

fn expand_summary<S: AbstractState, P: Precision>(
    elements: &mut Vec<PathElement<S, P>>,
    summary: &Arc<BlockSummary<S, P>>,
    context: &Context,
) -> Result<Option<EdgeIndex>, AnalysisError> {
    let inner = &summary.reached;
    let arg = inner.arg();
    let root = match inner.first_state() {
        Some(root) if arg.contains(summary.exit) => root,
        _ => {
            return Err(AnalysisError::MissingBlockSummary {
                state: context_serial(elements),
            })
        }
    };
    let path = arg.extract_path(root, summary.exit, |_| true)?;
    let mut entries = context.entries.clone();
    entries.push(summary.entry);
    let inner_context = Context {
        cut: context.cut,
        entries,
    };

    let mut edge_into_exit = None;
    for pair in path.windows(2) {
        let (parent, child) = (pair[0], pair[1]);
        let label = arg.edge_label(parent, child).ok_or_else(|| {
            AnalysisError::Inconsistent(format!(
                "no edge between block states {} and {}",
                arg.serial(parent),
                arg.serial(child)
            ))
        })?;
        let edge = expand_edge(elements, label, &inner_context)?;
        if child == summary.exit {
            edge_into_exit = edge;
            break;
        }
        let precision = inner
            .precision(child)
            .cloned()
            .ok_or(AnalysisError::MissingBlockSummary {
                state: arg.serial(child),
            })?;
        elements.push(PathElement {
            state: arg.state(child).clone(),
            precision,
            serial: arg.serial(child),
            edge,
            origin: PathOrigin::Block {
                cut: inner_context.cut,
                entries: inner_context.entries.clone(),
                reached: inner.clone(),
                state: child,
            },
        });
    }
    Ok(edge_into_exit)
}

/// The serial of the last element, i.e. of the state at the block entry.
fn context_serial<S, P>(elements: &[PathElement<S, P>]) -> u64 {
    elements.last().map_or(0, |element| element.serial)
}
