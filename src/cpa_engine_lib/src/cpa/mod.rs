//! The interface between the analysis engine and an abstract domain.
//!
//! A configurable program analysis (CPA) consists of
//! - the abstract states and precisions of the domain ([`AbstractState`], [`Precision`]),
//! - a [`TransferRelation`] computing the abstract successors of a state along a CFA edge,
//! - a [`MergeOperator`] combining a new successor with an already reached state at the same location,
//! - a [`StopOperator`] deciding whether a new successor is covered by the already reached states,
//! - a [`PrecisionAdjustment`] that may change or discard a successor before it is merged.
//!
//! The operators are bundled into a [`Cpa`].
//! For block-abstraction memoization the domain additionally has to provide a [`Reducer`].
//!
//! All operators have to be pure functions of their arguments.
//! Errors of operators are fatal for the analysis run.
//! An infeasible edge is not an error, the transfer relation simply returns no successors for it.

use crate::analysis::reached_set::UnmodifiableReachedSet;
use crate::cfa::{Block, EdgeRef};
use crate::prelude::*;
use std::fmt::Debug;
use std::hash::Hash;

mod operators;
pub use operators::*;

/// An abstract state of the analyzed domain.
pub trait AbstractState: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// The partial order of the domain.
    fn is_less_or_equal(&self, other: &Self) -> bool;

    /// Returns `true` if the state represents a property violation.
    fn is_target(&self) -> bool {
        false
    }

    /// The program location of the state.
    /// The reached set is partitioned by location.
    fn location(&self) -> Location;

    /// The call stack of the state.
    /// Only used for scheduling states per function block.
    fn call_stack(&self) -> CallStack {
        CallStack::default()
    }
}

/// The precision of an analysis, i.e. how much information the abstraction keeps.
pub trait Precision: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> Precision for T {}

/// Computes the abstract successors of a state.
pub trait TransferRelation<S: AbstractState, P: Precision>: Send + Sync {
    /// Compute the successors of `state` along the given CFA edge.
    /// Returns an empty vector if the edge is infeasible for the state.
    fn successors(&self, state: &S, precision: &P, edge: EdgeRef<'_>) -> Result<Vec<S>, Error>;
}

/// Combines a new successor with a reached state of the same location.
pub trait MergeOperator<S: AbstractState, P: Precision>: Send + Sync {
    /// Return the result of merging `successor` into `reached`.
    /// If the result equals `reached`, the reached state is kept unchanged.
    fn merge(&self, successor: &S, reached: &S, precision: &P) -> Result<S, Error>;
}

/// Decides whether a new successor needs further exploration.
pub trait StopOperator<S: AbstractState, P: Precision>: Send + Sync {
    /// Returns `true` if the candidate is covered by the given reached states of the same location.
    fn stop(&self, candidate: &S, partition: &[&S], precision: &P) -> Result<bool, Error>;
}

/// What the analysis should do after adding a successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Add the successor and stop the analysis afterwards.
    Break,
}

/// The result of a precision adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjusted<S, P> {
    pub state: S,
    pub precision: P,
    pub action: Action,
}

/// Adjusts a successor and its precision before it is merged into the reached set.
pub trait PrecisionAdjustment<S: AbstractState, P: Precision>: Send + Sync {
    /// Returns `None` if the successor should be discarded.
    fn adjust(
        &self,
        state: &S,
        precision: &P,
        reached: &dyn UnmodifiableReachedSet<S, P>,
    ) -> Result<Option<Adjusted<S, P>>, Error>;
}

/// Maps states and precisions between the context of a caller and the context-free view inside a block.
///
/// All methods have to be deterministic:
/// two states that reduce to equal values share the same block summary.
pub trait Reducer<S: AbstractState, P: Precision>: Send + Sync {
    /// Remove all information from the state and precision at the block entry
    /// that is irrelevant for the analysis of the block.
    fn reduce(&self, state: &S, precision: &P, block: &Block) -> (S, P);

    /// Re-add the information of the caller context `root`,
    /// which was removed when reducing it to `reduced_root`,
    /// to a state `reduced_result` reached inside the block.
    fn expand(&self, root: &S, reduced_root: &S, reduced_result: &S, block: &Block) -> S;

    /// Compute the precision used for an expanded state in the caller context.
    fn expand_precision(&self, root_precision: &P, _reduced_precision: &P, _block: &Block) -> P {
        root_precision.clone()
    }

    /// Adjust an expanded state at a block exit to the context of the call.
    /// `caller` is the state before the call edge, `entry` the state at the block entry.
    /// If merges gave the entry state several predecessors along call edges,
    /// `caller` is the one with the lowest serial number, i.e. the one reached first.
    fn rebuild_after_call(&self, _caller: &S, _entry: &S, expanded_exit: S, _exit: Location) -> S {
        expanded_exit
    }
}

/// A reducer that keeps all information.
/// Block summaries can then only be reused for identical entry states.
pub struct IdentityReducer;

impl<S: AbstractState, P: Precision> Reducer<S, P> for IdentityReducer {
    fn reduce(&self, state: &S, precision: &P, _block: &Block) -> (S, P) {
        (state.clone(), precision.clone())
    }

    fn expand(&self, _root: &S, _reduced_root: &S, reduced_result: &S, _block: &Block) -> S {
        reduced_result.clone()
    }
}

/// The operators of a configurable program analysis.
pub struct Cpa<S: AbstractState, P: Precision> {
    pub transfer: Box<dyn TransferRelation<S, P>>,
    pub merge: Box<dyn MergeOperator<S, P>>,
    pub stop: Box<dyn StopOperator<S, P>>,
    pub precision_adjustment: Box<dyn PrecisionAdjustment<S, P>>,
}

impl<S: AbstractState, P: Precision> Cpa<S, P> {
    /// Create a CPA with the given transfer relation
    /// that never merges ([`MergeSep`]), stops if a single reached state covers the successor ([`StopSep`])
    /// and never changes precisions ([`StaticPrecisionAdjustment`]).
    pub fn new(transfer: impl TransferRelation<S, P> + 'static) -> Self {
        Cpa {
            transfer: Box::new(transfer),
            merge: Box::new(MergeSep),
            stop: Box::new(StopSep),
            precision_adjustment: Box::new(StaticPrecisionAdjustment),
        }
    }

    pub fn with_merge(mut self, merge: impl MergeOperator<S, P> + 'static) -> Self {
        self.merge = Box::new(merge);
        self
    }

    pub fn with_stop(mut self, stop: impl StopOperator<S, P> + 'static) -> Self {
        self.stop = Box::new(stop);
        self
    }

    pub fn with_precision_adjustment(
        mut self,
        precision_adjustment: impl PrecisionAdjustment<S, P> + 'static,
    ) -> Self {
        self.precision_adjustment = Box::new(precision_adjustment);
        self
    }
}
