use super::{subtree_remover, ArgPath, RefinementResult, Refiner, SubtreeRemover};
use crate::analysis::algorithm::AlgorithmStatus;
use crate::analysis::reached_set::{ReachedSet, SubgraphReachedSetView, UnmodifiableReachedSet};
use crate::analysis::Analysis;
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;
use crate::utils::log::LogMessage;

/// The outcome of a CEGAR run.
#[derive(Debug, Clone)]
pub enum CegarResult<S, P> {
    /// The analysis finished without reaching a target state.
    Safe,
    /// A target state is reachable along a feasible path.
    Unsafe(ArgPath<S, P>),
    /// The analysis stopped before the reached set was complete.
    Unknown(AlgorithmStatus),
    /// The configured maximum number of refinements was reached.
    RefinementLimitReached,
}

/// Alternates between running the analysis and refining spurious counterexamples.
pub struct CegarAlgorithm<'a, S: AbstractState, P: Precision> {
    analysis: &'a Analysis<S, P>,
    refiner: &'a dyn Refiner<S, P>,
    remover: Box<dyn SubtreeRemover<S, P>>,
}

impl<'a, S: AbstractState, P: Precision> CegarAlgorithm<'a, S, P> {
    /// Use the removal strategy from the configuration of the analysis.
    pub fn new(analysis: &'a Analysis<S, P>, refiner: &'a dyn Refiner<S, P>) -> Self {
        let remover = subtree_remover(
            analysis.config().refinement.strategy,
            analysis
                .block_abstraction()
                .map(|bam| bam.cache().clone()),
        );
        CegarAlgorithm {
            analysis,
            refiner,
            remover,
        }
    }

    fn log(&self, message: LogMessage) {
        let _ = self
            .analysis
            .log_sender()
            .send(message.source("CEGAR").into());
    }

    /// Run the analysis and refine until a feasible counterexample is found,
    /// the reached set is complete without target states, or a limit is hit.
    pub fn run(&self, reached: &mut ReachedSet<S, P>) -> Result<CegarResult<S, P>, AnalysisError> {
        let max_refinements = self.analysis.config().refinement.max_refinements;
        let mut refinements: u64 = 0;
        loop {
            let status = self.analysis.run(reached)?;
            let target = match status {
                AlgorithmStatus::TargetReached(target) => target,
                AlgorithmStatus::Finished => {
                    let target = reached
                        .states()
                        .into_iter()
                        .find(|id| reached.arg().state(*id).is_target());
                    match target {
                        Some(target) => target,
                        None => return Ok(CegarResult::Safe),
                    }
                }
                status => return Ok(CegarResult::Unknown(status)),
            };

            let path = self.analysis.counterexample(reached, target)?;
            let result = {
                let view = SubgraphReachedSetView::with_target_precision(reached, target);
                self.refiner
                    .refine(&path, &view)
                    .map_err(AnalysisError::RefinementFailed)?
            };
            let (infeasible_at, precision) = match result {
                RefinementResult::Feasible => {
                    self.log(
                        LogMessage::new_info("Found feasible counterexample.")
                            .state(reached.arg().serial(target)),
                    );
                    return Ok(CegarResult::Unsafe(path));
                }
                RefinementResult::Spurious {
                    infeasible_at,
                    precision,
                } => (infeasible_at, precision),
            };
            if max_refinements.map_or(false, |max| refinements >= max) {
                self.log(LogMessage::new_info(format!(
                    "Stopped after {refinements} refinements."
                )));
                return Ok(CegarResult::RefinementLimitReached);
            }
            refinements += 1;
            let summary = self
                .remover
                .remove_subtree(reached, &path, infeasible_at, &precision)?;
            self.log(LogMessage::new_debug(format!(
                "Refinement {refinements}: removed {} states, readded {} states, invalidated {} cache entries.",
                summary.removed,
                summary.readded,
                summary.invalidated.len()
            )));
        }
    }
}
