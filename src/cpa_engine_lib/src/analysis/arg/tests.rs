use super::*;
use crate::analysis::mock_domain::{MockPrecision, MockState};

type MockArg = Arg<MockState, MockPrecision>;

fn state(location: usize, x: Option<i64>) -> MockState {
    MockState::new(NodeIndex::new(location), "main").with_x(x)
}

fn edge(index: usize) -> ArgEdge<MockState, MockPrecision> {
    ArgEdge::Cfa(EdgeIndex::new(index))
}

/// root -> a -> b, root -> c
fn small_arg() -> (MockArg, [StateId; 4]) {
    let mut arg = MockArg::new();
    let root = arg.add_root(state(0, Some(0)));
    let a = arg.add_child(root, state(1, Some(1)), edge(0)).unwrap();
    let b = arg.add_child(a, state(2, Some(1)), edge(1)).unwrap();
    let c = arg.add_child(root, state(3, Some(0)), edge(2)).unwrap();
    (arg, [root, a, b, c])
}

#[test]
fn add_child() {
    let (arg, [root, a, b, c]) = small_arg();
    assert_eq!(arg.len(), 4);
    assert_eq!(arg.children(root), vec![a, c]);
    assert_eq!(arg.parents(b), vec![a]);
    assert_eq!(arg.roots(), vec![root]);
    assert!(arg.serial(root) < arg.serial(a));
    assert!(arg.serial(a) < arg.serial(b));
    assert_eq!(arg.state_with_serial(arg.serial(b)), Some(b));
    assert!(matches!(arg.edge_label(a, b), Some(ArgEdge::Cfa(e)) if e.index() == 1));
    assert!(arg.edge_label(b, a).is_none());
    assert!(!arg.is_cyclic());
}

#[test]
fn cycle_is_rejected() {
    let (mut arg, [root, a, b, c]) = small_arg();
    assert!(matches!(
        arg.add_edge(b, root, edge(3)),
        Err(AnalysisError::ArgCycle { .. })
    ));
    assert!(matches!(
        arg.add_edge(a, a, edge(3)),
        Err(AnalysisError::ArgCycle { .. })
    ));
    // A second parent is fine as long as no cycle is closed.
    arg.add_edge(c, b, edge(3)).unwrap();
    assert_eq!(arg.parents(b), vec![a, c]);
    // Connecting already connected states does nothing.
    arg.add_edge(c, b, edge(4)).unwrap();
    assert_eq!(arg.parents(b), vec![a, c]);
    assert!(!arg.is_cyclic());
}

#[test]
fn covering() {
    let (mut arg, [root, _a, b, _c]) = small_arg();
    let covered = arg.add_child(root, state(2, Some(1)), edge(5)).unwrap();
    arg.mark_covered(covered, b).unwrap();
    assert_eq!(arg.get(covered).unwrap().covered_by(), Some(b));
    assert!(arg.get(covered).unwrap().is_covered());
    assert_eq!(
        arg.get(b).unwrap().covered_states().collect::<Vec<_>>(),
        vec![covered]
    );

    arg.uncover(covered);
    assert!(!arg.get(covered).unwrap().is_covered());
    assert_eq!(arg.get(b).unwrap().covered_states().count(), 0);

    // x = 0 is not less or equal to x = 1
    let other = arg.add_child(root, state(2, Some(0)), edge(6)).unwrap();
    assert!(matches!(
        arg.mark_covered(other, b),
        Err(AnalysisError::InvalidCovering { .. })
    ));
    assert!(!arg.get(other).unwrap().is_covered());
}

#[test]
fn subgraph() {
    let (mut arg, [root, a, b, c]) = small_arg();
    arg.add_edge(c, b, edge(3)).unwrap();
    assert_eq!(arg.subgraph(a), BTreeSet::from([a, b]));
    assert_eq!(arg.subgraph(c), BTreeSet::from([c, b]));
    assert_eq!(arg.subgraph(root).len(), 4);
}

#[test]
fn remove_from_graph() {
    let (mut arg, [root, a, b, c]) = small_arg();
    let covered = arg.add_child(c, state(2, Some(1)), edge(5)).unwrap();
    arg.mark_covered(covered, b).unwrap();
    let serial = arg.serial(b);

    let removed = arg.remove_from_graph(b).unwrap();
    assert_eq!(removed.state(), &state(2, Some(1)));
    assert!(arg.is_destroyed(b));
    assert!(arg.children(a).is_empty());
    assert_eq!(arg.state_with_serial(serial), None);
    assert!(!arg.get(covered).unwrap().is_covered());
    assert!(arg.remove_from_graph(b).is_none());

    // Not recursive: the children of a removed state stay.
    arg.remove_from_graph(c);
    assert!(arg.contains(covered));
    assert!(arg.parents(covered).is_empty());
    assert_eq!(arg.roots(), vec![root, covered]);
}

#[test]
fn replace_with() {
    let (mut arg, [root, a, b, c]) = small_arg();
    let covered = arg.add_child(c, state(1, Some(1)), edge(5)).unwrap();
    arg.mark_covered(covered, a).unwrap();

    let new = arg.add_root(state(1, None));
    arg.replace_with(a, new).unwrap();
    assert!(arg.is_destroyed(a));
    assert_eq!(arg.parents(new), vec![root]);
    assert_eq!(arg.children(new), vec![b]);
    assert_eq!(arg.parents(b), vec![new]);
    assert_eq!(arg.get(covered).unwrap().covered_by(), Some(new));
    assert!(matches!(arg.edge_label(root, new), Some(ArgEdge::Cfa(e)) if e.index() == 0));
}

#[test]
fn extract_path() {
    let (mut arg, [root, a, b, c]) = small_arg();
    arg.add_edge(c, b, edge(3)).unwrap();
    assert_eq!(arg.extract_path(root, b, |_| true).unwrap(), vec![root, a, b]);
    assert_eq!(
        arg.extract_path(root, b, |id| id != a).unwrap(),
        vec![root, c, b]
    );
    assert_eq!(arg.extract_path(b, b, |_| true).unwrap(), vec![b]);
    assert!(matches!(
        arg.extract_path(c, a, |_| true),
        Err(AnalysisError::NoPath { .. })
    ));
    assert!(matches!(
        arg.extract_path(root, b, |id| id == root),
        Err(AnalysisError::NoPath { .. })
    ));
}

#[test]
fn dot_export() {
    let (mut arg, [root, _a, b, c]) = small_arg();
    let target = arg
        .add_child(c, MockState { error: true, ..state(4, Some(0)) }, edge(7))
        .unwrap();
    let covered = arg.add_child(c, state(2, Some(1)), edge(5)).unwrap();
    arg.mark_covered(covered, b).unwrap();

    let dot = to_dot(&arg, None);
    assert!(dot.starts_with("digraph ARG {"));
    assert!(dot.contains(&format!(
        "  {} [label=\"#{} @ N0\"];",
        arg.serial(root),
        arg.serial(root)
    )));
    assert!(dot.contains(&format!(
        "  {} [label=\"#{} @ N4\", color=red];",
        arg.serial(target),
        arg.serial(target)
    )));
    assert!(dot.contains(&format!(
        "  {} -> {} [label=\"edge 7\"];",
        arg.serial(c),
        arg.serial(target)
    )));
    assert!(dot.contains(&format!(
        "  {} -> {} [style=dashed, label=\"covered by\"];",
        arg.serial(covered),
        arg.serial(b)
    )));
    assert!(dot.trim_end().ends_with('}'));
}
