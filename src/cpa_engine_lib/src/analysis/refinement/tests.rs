use super::*;
use crate::analysis::algorithm::AlgorithmStatus;
use crate::analysis::arg::StateId;
use crate::analysis::bam::BamCacheSynchronized;
use crate::analysis::mock_domain::*;
use crate::analysis::reached_set::{ReachedSet, SubgraphReachedSetView};
use crate::analysis::Analysis;
use crate::cfa::Cfa;
use crate::config::Config;
use std::sync::Arc;

const STRATEGIES: [RemovalStrategy; 2] = [RemovalStrategy::InPlace, RemovalStrategy::CopyOnWrite];

/// main: x = 1; if (x == 2) error;
fn spurious_cfa() -> Arc<Cfa> {
    Arc::new(main_cfa(&[
        ("entry", "a", "x = 1"),
        ("a", "err", "assume x == 2"),
        ("err", "target", "error"),
        ("a", "exit", "assume x != 2"),
    ]))
}

/// main calls f, f calls g, g fails if x == 2.
fn nested_spurious_cfa() -> Arc<Cfa> {
    let mut cfa = main_cfa(&[("entry", "after", "call f"), ("after", "exit", "skip")]);
    add_function_edges(
        &mut cfa,
        "f",
        &[
            ("entry", "mid", "x = 1"),
            ("mid", "ret", "call g"),
            ("ret", "exit", "skip"),
        ],
    );
    add_function_edges(
        &mut cfa,
        "g",
        &[("entry", "err", "assume x == 2"), ("err", "exit", "error")],
    );
    Arc::new(cfa)
}

/// main: x = 1; if (x == 2) error; if (x == 3) error;
fn two_targets_cfa() -> Arc<Cfa> {
    Arc::new(main_cfa(&[
        ("entry", "a", "x = 1"),
        ("a", "err1", "assume x == 2"),
        ("err1", "target1", "error"),
        ("a", "err2", "assume x == 3"),
        ("err2", "target2", "error"),
    ]))
}

/// Two call sites of f share one summary. f is only left if x == 2, after the first call main fails.
fn shared_spurious_cfa() -> Arc<Cfa> {
    let mut cfa = main_cfa(&[
        ("entry", "b1", "skip"),
        ("entry", "b2", "noise = 3"),
        ("b1", "r1", "call f"),
        ("r1", "target", "error"),
        ("b2", "r2", "call f"),
        ("r2", "exit", "skip"),
    ]);
    add_function_edges(
        &mut cfa,
        "f",
        &[("entry", "mid", "x = 1"), ("mid", "exit", "assume x == 2")],
    );
    Arc::new(cfa)
}

fn config(strategy: RemovalStrategy) -> Config {
    let mut config = Config::default();
    config.refinement.strategy = strategy;
    config
}

fn run_to_target(
    analysis: &Analysis<MockState, MockPrecision>,
    cfa: &Cfa,
) -> (ReachedSet<MockState, MockPrecision>, StateId) {
    let mut reached = analysis.initial_reached_set(initial_state(cfa), MockPrecision::coarse());
    let AlgorithmStatus::TargetReached(target) = analysis.run(&mut reached).unwrap() else {
        panic!("target not reached");
    };
    (reached, target)
}

/// Run without stopping at targets and return the paths to all targets, ordered by target location.
fn run_to_all_targets(
    analysis: &Analysis<MockState, MockPrecision>,
    cfa: &Cfa,
) -> (ReachedSet<MockState, MockPrecision>, Vec<ArgPath<MockState, MockPrecision>>) {
    let mut reached = analysis.initial_reached_set(initial_state(cfa), MockPrecision::coarse());
    assert_eq!(analysis.run(&mut reached).unwrap(), AlgorithmStatus::Finished);
    let mut targets: Vec<StateId> = reached
        .states()
        .into_iter()
        .filter(|id| reached.arg().state(*id).error)
        .collect();
    targets.sort_by_key(|id| reached.arg().state(*id).location);
    let paths = targets
        .into_iter()
        .map(|target| analysis.counterexample(&reached, target).unwrap())
        .collect();
    (reached, paths)
}

fn codes(cfa: &Cfa, path: &ArgPath<MockState, MockPrecision>) -> Vec<String> {
    path.edges()
        .into_iter()
        .map(|edge| cfa.edge(edge).code.clone())
        .collect()
}

#[test]
fn counterexample_path() {
    let cfa = spurious_cfa();
    let analysis = mock_analysis(&cfa, mock_cpa(), Config::default());
    let (reached, target) = run_to_target(&analysis, &cfa);
    let path = analysis.counterexample(&reached, target).unwrap();
    assert_eq!(path.len(), 4);
    assert!(path.elements()[0].edge.is_none());
    assert_eq!(codes(&cfa, &path), vec!["x = 1", "assume x == 2", "error"]);
    assert!(path.target().unwrap().state.is_target());
    assert_eq!(path.target().unwrap().cut_state(), target);
    assert!(path.elements().iter().all(|element| !element.is_in_block()));
    assert_eq!(
        path.get(1).unwrap().serial,
        reached.arg().serial(path.get(1).unwrap().cut_state())
    );

    let refiner = MockRefiner { cfa: cfa.clone() };
    let view = SubgraphReachedSetView::with_target_precision(&reached, target);
    assert_eq!(
        refiner.refine(&path, &view).unwrap(),
        RefinementResult::Spurious {
            infeasible_at: 1,
            precision: MockPrecision::tracking()
        }
    );
}

#[test]
fn counterexample_through_nested_blocks() {
    let cfa = nested_spurious_cfa();
    let cache = Arc::new(BamCacheSynchronized::new(None));
    let analysis = mock_bam_analysis(&cfa, Config::default(), cache.clone());
    let (reached, target) = run_to_target(&analysis, &cfa);
    assert_eq!(reached.arg().state(target).location, location(&cfa, "g", "exit"));
    assert_eq!(cache.len(), 2);

    let path = analysis.counterexample(&reached, target).unwrap();
    assert_eq!(
        codes(&cfa, &path),
        vec!["call f", "x = 1", "call g", "assume x == 2", "error"]
    );
    let elements = path.elements();
    assert_eq!(elements.len(), 6);
    assert!(matches!(elements[1].origin, PathOrigin::Main(_)));
    let PathOrigin::Block { entries, cut, .. } = &elements[2].origin else {
        panic!("element inside f expected");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(*cut, target);
    let PathOrigin::Block { entries: inner_entries, .. } = &elements[4].origin else {
        panic!("element inside g expected");
    };
    assert_eq!(inner_entries.len(), 2);
    assert_eq!(inner_entries[0], entries[0]);
    assert_eq!(elements[4].state.stack, CallStack::new(["g"]));
    assert!(matches!(elements[5].origin, PathOrigin::Main(id) if id == target));
}

#[test]
fn subtree_removal_is_complete() {
    for strategy in STRATEGIES {
        let cfa = spurious_cfa();
        let analysis = mock_analysis(&cfa, mock_cpa(), Config::default());
        let (mut reached, target) = run_to_target(&analysis, &cfa);
        let path = analysis.counterexample(&reached, target).unwrap();
        let cut = path.get(1).unwrap().cut_state();
        let removed = reached.subtree_with_covered(cut);
        let root = path.get(0).unwrap().cut_state();

        let remover = subtree_remover(strategy, None);
        let summary = remover
            .remove_subtree(&mut reached, &path, 1, &MockPrecision::tracking())
            .unwrap();
        assert_eq!(summary.removed, removed.len());
        assert_eq!(summary.readded, 1);
        assert!(summary.invalidated.is_empty());
        for id in removed {
            assert!(reached.arg().is_destroyed(id));
            assert!(!reached.contains(id));
            assert!(!reached.is_waiting(id));
        }
        assert!(reached.is_waiting(root));
        assert_eq!(reached.precision(root), Some(&MockPrecision::tracking()));
        assert_eq!(reached.states(), vec![root]);
        assert!(reached.arg().children(root).is_empty());
    }
}

#[test]
fn removal_invalidates_enclosing_entries() {
    for strategy in STRATEGIES {
        let cfa = nested_spurious_cfa();
        let cache = Arc::new(BamCacheSynchronized::new(None));
        let analysis = mock_bam_analysis(&cfa, Config::default(), cache.clone());
        let (mut reached, target) = run_to_target(&analysis, &cfa);
        let path = analysis.counterexample(&reached, target).unwrap();
        let PathOrigin::Block { entries, .. } = &path.get(4).unwrap().origin else {
            panic!("element inside g expected");
        };
        let mut entries = entries.clone();
        entries.sort();
        let f_entry = states_at(&reached, location(&cfa, "f", "entry"))[0].0;

        let remover = subtree_remover(strategy, Some(cache.clone()));
        let summary = remover
            .remove_subtree(&mut reached, &path, 4, &MockPrecision::tracking())
            .unwrap();
        assert_eq!(summary.invalidated, entries);
        assert!(cache.is_empty());
        assert!(reached.arg().is_destroyed(target));
        assert!(reached.is_waiting(f_entry));
        assert_eq!(reached.precision(f_entry), Some(&MockPrecision::tracking()));
    }
}

#[test]
fn removal_keeps_unrelated_entries() {
    let cfa = nested_spurious_cfa();
    let cache = Arc::new(BamCacheSynchronized::new(None));
    let analysis = mock_bam_analysis(&cfa, Config::default(), cache.clone());
    let (mut reached, target) = run_to_target(&analysis, &cfa);
    let path = analysis.counterexample(&reached, target).unwrap();
    // The assignment inside f does not belong to the summary of g.
    let remover = subtree_remover(RemovalStrategy::InPlace, Some(cache.clone()));
    let summary = remover
        .remove_subtree(&mut reached, &path, 2, &MockPrecision::tracking())
        .unwrap();
    assert_eq!(summary.invalidated.len(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn removal_cuts_every_usage_of_an_invalidated_summary() {
    for strategy in STRATEGIES {
        let cfa = shared_spurious_cfa();
        let cache = Arc::new(BamCacheSynchronized::new(None));
        let analysis = mock_bam_analysis(&cfa, Config::default(), cache.clone());
        let (mut reached, target) = run_to_target(&analysis, &cfa);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.statistics().hits, 1);
        let path = analysis.counterexample(&reached, target).unwrap();
        assert_eq!(
            codes(&cfa, &path),
            vec!["skip", "call f", "x = 1", "assume x == 2", "return from f", "error"]
        );
        let PathOrigin::Block { entries, .. } = &path.get(3).unwrap().origin else {
            panic!("element inside f expected");
        };
        let entries = entries.clone();
        let f_exit = location(&cfa, "f", "exit");
        let f_entries = states_at(&reached, location(&cfa, "f", "entry"));
        assert_eq!(f_entries.len(), 2);
        assert_eq!(states_at(&reached, f_exit).len(), 2);

        let remover = subtree_remover(strategy, Some(cache.clone()));
        let summary = remover
            .remove_subtree(&mut reached, &path, 3, &MockPrecision::tracking())
            .unwrap();
        assert_eq!(summary.invalidated, entries);
        assert!(cache.is_empty());
        // Both exits of f, the states after them and the target.
        assert_eq!(summary.removed, 6);
        assert_eq!(summary.readded, 2);
        // The second call site used the same summary and has to be recomputed as well.
        assert!(states_at(&reached, f_exit).is_empty());
        assert!(states_at(&reached, location(&cfa, "main", "r2")).is_empty());
        for (id, _) in f_entries {
            assert!(reached.is_waiting(id));
            assert_eq!(reached.precision(id), Some(&MockPrecision::tracking()));
        }
    }
}

#[test]
fn cegar_with_shared_summary() {
    for strategy in STRATEGIES {
        let cfa = shared_spurious_cfa();
        let cache = Arc::new(BamCacheSynchronized::new(None));
        let analysis = mock_bam_analysis(&cfa, config(strategy), cache.clone());
        let refiner = MockRefiner { cfa: cfa.clone() };
        let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
        let result = CegarAlgorithm::new(&analysis, &refiner)
            .run(&mut reached)
            .unwrap();
        assert!(matches!(result, CegarResult::Safe));
        // f never returns with x = 1, at neither call site.
        assert!(states_at(&reached, location(&cfa, "main", "r1")).is_empty());
        assert!(states_at(&reached, location(&cfa, "main", "r2")).is_empty());
        assert!(!reached.has_waiting_state());
    }
}

#[test]
#[should_panic(expected = "does not belong to the reached set")]
fn in_place_removal_invalidates_other_paths() {
    let cfa = two_targets_cfa();
    let mut config = Config::default();
    config.algorithm.stop_on_target = false;
    let analysis = mock_analysis(&cfa, mock_cpa(), config);
    let (mut reached, paths) = run_to_all_targets(&analysis, &cfa);
    assert_eq!(paths.len(), 2);
    let remover = subtree_remover(RemovalStrategy::InPlace, None);
    remover
        .remove_subtree(&mut reached, &paths[0], 1, &MockPrecision::tracking())
        .unwrap();
    // The shared prefix of the second path is gone.
    let _ = remover.remove_subtree(&mut reached, &paths[1], 1, &MockPrecision::tracking());
}

#[test]
fn copy_on_write_refines_paths_of_the_same_reached_set() {
    let cfa = two_targets_cfa();
    let mut config = Config::default();
    config.algorithm.stop_on_target = false;
    let analysis = mock_analysis(&cfa, mock_cpa(), config);
    let (original, paths) = run_to_all_targets(&analysis, &cfa);
    assert_eq!(paths.len(), 2);
    let root = paths[0].get(0).unwrap().cut_state();
    let remover = CopyOnWriteSubtreeRemover { cache: None };

    let (mut reached, first) = remover
        .removed_copy(&original, &paths[0], 1, &MockPrecision::tracking())
        .unwrap();
    assert_eq!(first.removed, 5);
    assert_eq!(first.readded, 1);
    assert_eq!(reached.states(), vec![root]);
    // The reached set the paths were extracted from is unchanged.
    assert_eq!(original.arg().len(), 6);
    for path in &paths {
        assert!(path
            .elements()
            .iter()
            .all(|element| original.contains(element.cut_state())));
    }

    // The second path shares the removed prefix, so nothing is left to remove.
    let second = remover
        .remove_subtree(&mut reached, &paths[1], 1, &MockPrecision::tracking())
        .unwrap();
    assert_eq!(second, RemovalSummary::default());
    assert_eq!(reached.states(), vec![root]);
    assert!(reached.is_waiting(root));

    // A removal that is not subsumed by the first one still applies to the original.
    let (other, summary) = remover
        .removed_copy(&original, &paths[1], 2, &MockPrecision::tracking())
        .unwrap();
    assert_eq!(summary.removed, 2);
    assert_eq!(summary.readded, 1);
    assert_eq!(other.arg().len(), 4);
    assert!(!other.contains(paths[1].target().unwrap().cut_state()));
    assert!(other.contains(paths[0].target().unwrap().cut_state()));
}

#[test]
fn removing_the_root_fails() {
    for strategy in STRATEGIES {
        let cfa = spurious_cfa();
        let analysis = mock_analysis(&cfa, mock_cpa(), Config::default());
        let (mut reached, target) = run_to_target(&analysis, &cfa);
        let path = analysis.counterexample(&reached, target).unwrap();
        let states = reached.states();
        let remover = subtree_remover(strategy, None);
        let error = remover
            .remove_subtree(&mut reached, &path, 0, &MockPrecision::tracking())
            .unwrap_err();
        assert!(matches!(error, AnalysisError::RefinementFailed(_)));
        assert_eq!(reached.states(), states);
    }
}

#[test]
#[should_panic]
fn removal_outside_of_path_panics() {
    let cfa = spurious_cfa();
    let analysis = mock_analysis(&cfa, mock_cpa(), Config::default());
    let (mut reached, target) = run_to_target(&analysis, &cfa);
    let path = analysis.counterexample(&reached, target).unwrap();
    let remover = subtree_remover(RemovalStrategy::InPlace, None);
    let _ = remover.remove_subtree(&mut reached, &path, path.len(), &MockPrecision::tracking());
}

#[test]
fn cegar_proves_safety() {
    for strategy in STRATEGIES {
        let cfa = spurious_cfa();
        let analysis = mock_analysis(&cfa, mock_cpa(), config(strategy));
        let refiner = MockRefiner { cfa: cfa.clone() };
        let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
        let result = CegarAlgorithm::new(&analysis, &refiner)
            .run(&mut reached)
            .unwrap();
        assert!(matches!(result, CegarResult::Safe));
        let a = states_at(&reached, location(&cfa, "main", "a"));
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].1.x, Some(1));
        assert!(states_at(&reached, location(&cfa, "main", "target")).is_empty());
    }
}

#[test]
fn cegar_finds_feasible_counterexample() {
    let cfa = Arc::new(main_cfa(&[
        ("entry", "a", "x = 2"),
        ("a", "err", "assume x == 2"),
        ("err", "target", "error"),
    ]));
    let analysis = mock_analysis(&cfa, mock_cpa(), Config::default());
    let refiner = MockRefiner { cfa: cfa.clone() };
    let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
    let CegarResult::Unsafe(path) = CegarAlgorithm::new(&analysis, &refiner)
        .run(&mut reached)
        .unwrap()
    else {
        panic!("feasible counterexample expected");
    };
    assert_eq!(path.len(), 4);
    assert!(path.target().unwrap().state.error);
}

#[test]
fn cegar_with_block_abstraction() {
    for strategy in STRATEGIES {
        let cfa = nested_spurious_cfa();
        let cache = Arc::new(BamCacheSynchronized::new(None));
        let analysis = mock_bam_analysis(&cfa, config(strategy), cache.clone());
        let refiner = MockRefiner { cfa: cfa.clone() };
        let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
        let result = CegarAlgorithm::new(&analysis, &refiner)
            .run(&mut reached)
            .unwrap();
        assert!(matches!(result, CegarResult::Safe));
        // g is never left with x = 1, so main does not reach its exit either.
        assert!(states_at(&reached, location(&cfa, "main", "exit")).is_empty());
        let f_entry = states_at(&reached, location(&cfa, "f", "entry"));
        assert_eq!(f_entry.len(), 1);
        assert_eq!(
            reached.precision(f_entry[0].0),
            Some(&MockPrecision::tracking())
        );
        assert!(!reached.has_waiting_state());
    }
}

#[test]
fn refinement_limit() {
    let cfa = spurious_cfa();
    let mut config = Config::default();
    config.refinement.max_refinements = Some(0);
    let analysis = mock_analysis(&cfa, mock_cpa(), config);
    let refiner = MockRefiner { cfa: cfa.clone() };
    let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
    let result = CegarAlgorithm::new(&analysis, &refiner)
        .run(&mut reached)
        .unwrap();
    assert!(matches!(result, CegarResult::RefinementLimitReached));
}

#[test]
fn cegar_reports_incomplete_runs() {
    let cfa = spurious_cfa();
    let mut config = Config::default();
    config.algorithm.max_steps = Some(1);
    let analysis = mock_analysis(&cfa, mock_cpa(), config);
    let refiner = MockRefiner { cfa: cfa.clone() };
    let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
    let result = CegarAlgorithm::new(&analysis, &refiner)
        .run(&mut reached)
        .unwrap();
    assert!(matches!(
        result,
        CegarResult::Unknown(AlgorithmStatus::StepLimitReached)
    ));
}

#[test]
fn cegar_without_stop_on_target() {
    let cfa = spurious_cfa();
    let mut config = Config::default();
    config.algorithm.stop_on_target = false;
    let analysis = mock_analysis(&cfa, mock_cpa(), config);
    let refiner = MockRefiner { cfa: cfa.clone() };
    let mut reached = analysis.initial_reached_set(initial_state(&cfa), MockPrecision::coarse());
    let result = CegarAlgorithm::new(&analysis, &refiner)
        .run(&mut reached)
        .unwrap();
    assert!(matches!(result, CegarResult::Safe));
}
