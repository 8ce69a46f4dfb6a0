//! Counterexample-guided abstraction refinement.
//!
//! A path from the initial state to a target state is handed to a [`Refiner`].
//! If the refiner finds the path to be infeasible,
//! it names the first path element whose abstraction was too coarse together with a refined precision.
//! A [`SubtreeRemover`] then removes that element and everything computed from it,
//! including the block summaries the element was part of and every state computed from them,
//! and puts the remaining frontier back into the waitlist with the refined precision.

use crate::analysis::reached_set::UnmodifiableReachedSet;
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;

mod cegar;
mod path;
mod remover;

pub use cegar::*;
pub use path::*;
pub use remover::*;

/// How a subtree removal modifies the reached set.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStrategy {
    /// Modify the reached set directly.
    /// Paths extracted before a removal must not be refined afterwards.
    InPlace,
    /// Modify a copy of the reached set and replace the original afterwards.
    /// Several paths extracted from the same reached set can be refined one after the other.
    #[default]
    CopyOnWrite,
}

/// The verdict of a refiner on a counterexample path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementResult<P> {
    /// The path corresponds to a real execution.
    Feasible,
    /// The path is infeasible.
    Spurious {
        /// The index of the path element to remove.
        infeasible_at: usize,
        /// The precision for the states from which the removed part is recomputed.
        precision: P,
    },
}

/// Checks counterexample paths for feasibility.
pub trait Refiner<S: AbstractState, P: Precision> {
    /// Check the path to a target state.
    /// `reached` is a view on the part of the reached set leading to the target.
    fn refine(
        &self,
        path: &ArgPath<S, P>,
        reached: &dyn UnmodifiableReachedSet<S, P>,
    ) -> Result<RefinementResult<P>, Error>;
}

#[cfg(test)]
mod tests;
