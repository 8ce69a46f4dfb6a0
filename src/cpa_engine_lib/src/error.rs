//! The errors an analysis run can fail with.
//!
//! Infeasible CFA edges are not errors, the transfer relation simply returns no successors for them.
//! Cooperative cancellation is not an error either:
//! the algorithm reports it through [`AlgorithmStatus::Interrupted`](crate::analysis::algorithm::AlgorithmStatus).
//! The [`AnalysisError::Interrupted`] variant only carries the cancellation signal out of nested block analyses.

use crate::cfa::Location;
use thiserror::Error;

/// A fatal error aborting an analysis run.
///
/// Where a specific ARG state is responsible for the error,
/// the error contains its serial number (see [`ArgState::serial`](crate::analysis::arg::ArgState::serial)).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transfer relation failed on edge leaving {location:?}: {source}")]
    Transfer {
        location: Location,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operator} failed for state #{serial}: {source}")]
    Operator {
        operator: &'static str,
        serial: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("adding an edge from state #{parent} to state #{child} would create a cycle in the ARG")]
    ArgCycle { parent: u64, child: u64 },

    #[error("state #{covered} is not less or equal to its covering state #{covering}")]
    InvalidCovering { covered: u64, covering: u64 },

    #[error("reducer is not deterministic: block '{block}' has two different summaries for the same key")]
    ReducerNonDeterminism { block: String },

    #[error("block '{block}' was entered again while its own summary is computed")]
    RecursiveBlock { block: String },

    #[error("block summary at state #{state} refers to an incomplete sub reached set")]
    MissingBlockSummary { state: u64 },

    #[error("no path from state #{from} to state #{to} in the ARG")]
    NoPath { from: u64, to: u64 },

    #[error("refinement failed: {0}")]
    RefinementFailed(#[source] anyhow::Error),

    #[error("inconsistent reached set: {0}")]
    Inconsistent(String),

    #[error("the analysis was interrupted")]
    Interrupted,
}

impl AnalysisError {
    /// Wrap the error of a CPA operator (merge, stop, precision adjustment, ...).
    pub fn operator(operator: &'static str, serial: u64) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| AnalysisError::Operator {
            operator,
            serial,
            source,
        }
    }
}
