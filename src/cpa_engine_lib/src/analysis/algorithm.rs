//! The CPA algorithm, i.e. the waitlist-driven fixpoint loop of the analysis.
//!
//! In each iteration the algorithm takes a state from the waitlist of the reached set and computes its successors.
//! Each successor is handled as follows:
//! 1. The precision adjustment may change the successor and its precision, discard it,
//!    or request to stop the analysis after the successor was added.
//! 2. The successor is merged with each reached state at the same location.
//!    If the merge operator returns a state different from the reached state,
//!    the merged state replaces the reached state and gets an edge from the parent of the successor.
//! 3. If the stop operator reports the successor as covered by the reached states after the merges,
//!    the successor is not added to the reached set.
//!    Without a preceding merge it is added to the ARG as a leaf covered by a covering state (if one exists).
//! 4. Otherwise the successor is added to the reached set, the waitlist and the ARG.
//!
//! Successors of target states are not computed.
//! Where successors come from is defined by a [`SuccessorComputation`]:
//! either directly from the transfer relation ([`CfaSuccessors`])
//! or through block summaries (see the [`bam`](crate::analysis::bam) module).

use crate::analysis::arg::{ArgEdge, StateId};
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::cfa::Cfa;
use crate::config::AlgorithmConfig;
use crate::cpa::{AbstractState, Action, Adjusted, Cpa, Precision};
use crate::prelude::*;
use crate::utils::log::{LogMessage, LogThreadMsg};
use crate::utils::shutdown::ShutdownNotifier;

/// A successor of a state together with the label of its ARG edge.
#[derive(Debug, Clone)]
pub struct Successor<S, P> {
    pub state: S,
    pub edge: ArgEdge<S, P>,
    /// The precision of the successor.
    /// If `None`, the successor inherits the precision of its parent.
    pub precision: Option<P>,
}

/// Computes the successors of reached states.
pub trait SuccessorComputation<S: AbstractState, P: Precision> {
    fn successors(
        &self,
        reached: &ReachedSet<S, P>,
        state: StateId,
        precision: &P,
    ) -> Result<Vec<Successor<S, P>>, AnalysisError>;
}

/// Computes successors along the CFA edges leaving the location of a state.
pub struct CfaSuccessors<'a, S: AbstractState, P: Precision> {
    pub cpa: &'a Cpa<S, P>,
    pub cfa: &'a Cfa,
}

impl<'a, S: AbstractState, P: Precision> CfaSuccessors<'a, S, P> {
    /// Compute the successors of an abstract state along all leaving CFA edges.
    pub fn of_state(&self, state: &S, precision: &P) -> Result<Vec<Successor<S, P>>, AnalysisError> {
        let location = state.location();
        let mut successors = Vec::new();
        for edge in self.cfa.leaving_edges(location) {
            let states = self
                .cpa
                .transfer
                .successors(state, precision, edge)
                .map_err(|source| AnalysisError::Transfer { location, source })?;
            successors.extend(states.into_iter().map(|state| Successor {
                state,
                edge: ArgEdge::Cfa(edge.index),
                precision: None,
            }));
        }
        Ok(successors)
    }
}

impl<'a, S: AbstractState, P: Precision> SuccessorComputation<S, P> for CfaSuccessors<'a, S, P> {
    fn successors(
        &self,
        reached: &ReachedSet<S, P>,
        state: StateId,
        precision: &P,
    ) -> Result<Vec<Successor<S, P>>, AnalysisError> {
        self.of_state(reached.arg().state(state), precision)
    }
}

/// Why the algorithm stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmStatus {
    /// The waitlist is empty, the reached set is a fixpoint.
    Finished,
    /// A target state was added to the reached set.
    TargetReached(StateId),
    /// The precision adjustment requested to stop.
    Break,
    /// The configured maximum number of steps was reached.
    StepLimitReached,
    /// A shutdown was requested.
    Interrupted,
}

impl AlgorithmStatus {
    /// Returns `true` if the reached set is complete, i.e. a fixpoint.
    pub fn is_precise(&self) -> bool {
        matches!(self, AlgorithmStatus::Finished)
    }
}

/// What happened to a successor.
enum Handled {
    Added(StateId),
    Merged,
    Covered,
    Discarded,
    /// The successor was added and the analysis has to stop.
    Break,
    /// The parent state was removed from the ARG while merging.
    ParentRemoved,
}

/// The CPA algorithm.
pub struct CpaAlgorithm<'a, S: AbstractState, P: Precision> {
    cpa: &'a Cpa<S, P>,
    successors: &'a dyn SuccessorComputation<S, P>,
    config: &'a AlgorithmConfig,
    shutdown: &'a ShutdownNotifier,
    log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    /// The name of the analysis in log messages.
    name: String,
}

impl<'a, S: AbstractState, P: Precision> CpaAlgorithm<'a, S, P> {
    pub fn new(
        cpa: &'a Cpa<S, P>,
        successors: &'a dyn SuccessorComputation<S, P>,
        config: &'a AlgorithmConfig,
        shutdown: &'a ShutdownNotifier,
        log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    ) -> Self {
        CpaAlgorithm {
            cpa,
            successors,
            config,
            shutdown,
            log_sender,
            name: "CPA Algorithm".to_string(),
        }
    }

    /// Set the name of the analysis used in log messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn log(&self, message: LogMessage) {
        let _ = self.log_sender.send(message.source(self.name.clone()).into());
    }

    /// Run the analysis until the waitlist is empty or one of the stop conditions holds.
    ///
    /// If the run stops early, the reached set stays consistent
    /// and the analysis can be resumed by calling this function again.
    pub fn run(&self, reached: &mut ReachedSet<S, P>) -> Result<AlgorithmStatus, AnalysisError> {
        let mut steps: u64 = 0;
        loop {
            if self.shutdown.is_shutdown_requested() {
                self.log(LogMessage::new_debug("Analysis interrupted."));
                return Ok(AlgorithmStatus::Interrupted);
            }
            let Some(item) = reached.pop_from_waitlist() else {
                return Ok(AlgorithmStatus::Finished);
            };
            if let Some(max_steps) = self.config.max_steps {
                if steps >= max_steps {
                    reached.readd_item(item);
                    self.log(LogMessage::new_debug(format!(
                        "Stopped after {steps} steps."
                    )));
                    return Ok(AlgorithmStatus::StepLimitReached);
                }
            }
            steps += 1;
            let Some(precision) = reached.precision(item.state).cloned() else {
                return Err(AnalysisError::Inconsistent(format!(
                    "waiting state {} is not reached",
                    item.state.index()
                )));
            };
            if reached.arg().state(item.state).is_target() {
                continue;
            }

            let successors = match self.successors.successors(reached, item.state, &precision) {
                Ok(successors) => successors,
                Err(AnalysisError::Interrupted) => {
                    reached.readd_item(item);
                    self.log(LogMessage::new_debug("Analysis interrupted."));
                    return Ok(AlgorithmStatus::Interrupted);
                }
                Err(err) => return Err(err),
            };

            let parent = item.state;
            let count = successors.len();
            for (index, successor) in successors.into_iter().enumerate() {
                match self.handle_successor(reached, parent, &precision, successor)? {
                    Handled::Added(id) => {
                        if self.config.stop_on_target && reached.arg().state(id).is_target() {
                            self.log(
                                LogMessage::new_info("Target state reached.")
                                    .state(reached.arg().serial(id)),
                            );
                            if index + 1 < count {
                                reached.readd_item(item);
                            }
                            return Ok(AlgorithmStatus::TargetReached(id));
                        }
                    }
                    Handled::Break => {
                        if index + 1 < count {
                            reached.readd_item(item);
                        }
                        return Ok(AlgorithmStatus::Break);
                    }
                    Handled::ParentRemoved => break,
                    Handled::Merged | Handled::Covered | Handled::Discarded => (),
                }
            }
        }
    }

    fn handle_successor(
        &self,
        reached: &mut ReachedSet<S, P>,
        parent: StateId,
        parent_precision: &P,
        successor: Successor<S, P>,
    ) -> Result<Handled, AnalysisError> {
        let parent_serial = reached.arg().serial(parent);
        let precision = successor
            .precision
            .unwrap_or_else(|| parent_precision.clone());
        let adjusted = self
            .cpa
            .precision_adjustment
            .adjust(&successor.state, &precision, &*reached)
            .map_err(AnalysisError::operator("precision adjustment", parent_serial))?;
        let Some(Adjusted {
            state,
            precision,
            action,
        }) = adjusted
        else {
            return Ok(Handled::Discarded);
        };
        let edge = successor.edge;

        if action == Action::Break {
            if self.is_covered(reached, &state, &precision, parent_serial)? {
                return self.add_covered(reached, parent, state, edge);
            }
            reached.add(parent, state, edge, precision)?;
            return Ok(Handled::Break);
        }

        let mut merged_into = Vec::new();
        for reached_id in reached.reached(state.location()) {
            if reached.precision(reached_id).is_none() {
                continue;
            }
            let reached_state = reached.arg().state(reached_id);
            let merged = self
                .cpa
                .merge
                .merge(&state, reached_state, &precision)
                .map_err(AnalysisError::operator("merge", parent_serial))?;
            if &merged != reached_state {
                let new_id = reached.replace(reached_id, merged, precision.clone())?;
                self.log(
                    LogMessage::new_debug("Merged successor into reached state.")
                        .state(reached.arg().serial(new_id)),
                );
                merged_into.push(new_id);
            }
        }
        let any_merged = !merged_into.is_empty();
        if any_merged {
            if !reached.arg().contains(parent) {
                return Ok(Handled::ParentRemoved);
            }
            for merged_id in merged_into {
                if reached.arg().contains(merged_id) {
                    reached.arg_mut().add_edge(parent, merged_id, edge.clone())?;
                }
            }
        }

        // The stop check runs against the partition as updated by the merges.
        if self.is_covered(reached, &state, &precision, parent_serial)? {
            if any_merged {
                return Ok(Handled::Merged);
            }
            return self.add_covered(reached, parent, state, edge);
        }
        let id = reached.add(parent, state, edge, precision)?;
        Ok(Handled::Added(id))
    }

    fn is_covered(
        &self,
        reached: &ReachedSet<S, P>,
        state: &S,
        precision: &P,
        parent_serial: u64,
    ) -> Result<bool, AnalysisError> {
        let partition = reached.reached(state.location());
        let partition_states: Vec<&S> = partition
            .iter()
            .map(|id| reached.arg().state(*id))
            .collect();
        self.cpa
            .stop
            .stop(state, &partition_states, precision)
            .map_err(AnalysisError::operator("stop", parent_serial))
    }

    /// Add a covered successor as a leaf of the ARG.
    /// If no single reached state covers the successor, it is not added at all.
    fn add_covered(
        &self,
        reached: &mut ReachedSet<S, P>,
        parent: StateId,
        state: S,
        edge: ArgEdge<S, P>,
    ) -> Result<Handled, AnalysisError> {
        let covering = reached
            .reached(state.location())
            .into_iter()
            .find(|id| state.is_less_or_equal(reached.arg().state(*id)));
        if let Some(covering) = covering {
            let id = reached.arg_mut().add_child(parent, state, edge)?;
            reached.arg_mut().mark_covered(id, covering)?;
        }
        Ok(Handled::Covered)
    }
}
