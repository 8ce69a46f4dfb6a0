//! Standard implementations of the merge, stop and precision adjustment operators.

use super::*;

/// Never merge, i.e. keep every successor as a separate state.
pub struct MergeSep;

impl<S: AbstractState, P: Precision> MergeOperator<S, P> for MergeSep {
    fn merge(&self, _successor: &S, reached: &S, _precision: &P) -> Result<S, Error> {
        Ok(reached.clone())
    }
}

/// Domains with a join operation.
pub trait Join {
    /// Compute an upper bound of both values.
    fn join(&self, other: &Self) -> Self;
}

/// Merge a successor into a reached state by joining both.
pub struct MergeJoin;

impl<S: AbstractState + Join, P: Precision> MergeOperator<S, P> for MergeJoin {
    fn merge(&self, successor: &S, reached: &S, _precision: &P) -> Result<S, Error> {
        Ok(successor.join(reached))
    }
}

/// Stop if a single reached state is greater or equal to the candidate.
pub struct StopSep;

impl<S: AbstractState, P: Precision> StopOperator<S, P> for StopSep {
    fn stop(&self, candidate: &S, partition: &[&S], _precision: &P) -> Result<bool, Error> {
        Ok(partition
            .iter()
            .any(|reached| candidate.is_less_or_equal(reached)))
    }
}

/// Never stop, i.e. explore every successor.
/// Only terminates for domains with finitely many paths.
pub struct StopNever;

impl<S: AbstractState, P: Precision> StopOperator<S, P> for StopNever {
    fn stop(&self, _candidate: &S, _partition: &[&S], _precision: &P) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Keep states and precisions unchanged.
pub struct StaticPrecisionAdjustment;

impl<S: AbstractState, P: Precision> PrecisionAdjustment<S, P> for StaticPrecisionAdjustment {
    fn adjust(
        &self,
        state: &S,
        precision: &P,
        _reached: &dyn UnmodifiableReachedSet<S, P>,
    ) -> Result<Option<Adjusted<S, P>>, Error> {
        Ok(Some(Adjusted {
            state: state.clone(),
            precision: precision.clone(),
            action: Action::Continue,
        }))
    }
}
