//! The analysis engine.
//!
//! An [`Analysis`] bundles everything an analysis run needs:
//! the CFA, the operators of the domain, the configuration,
//! optionally the block abstraction used for block-abstraction memoization,
//! the shutdown notifier and the sender for log messages.
//! The reached sets of the analysis are owned by the caller,
//! so that an interrupted run can be resumed and refinements can modify them between runs.

use crate::cfa::{BlockId, BlockPartitioning, Cfa};
use crate::config::Config;
use crate::cpa::{AbstractState, Cpa, Precision, Reducer};
use crate::prelude::*;
use crate::utils::log::{LogMessage, LogThreadMsg};
use crate::utils::shutdown::ShutdownNotifier;
use std::sync::Arc;

pub mod algorithm;
pub mod arg;
pub mod bam;
pub mod reached_set;
pub mod refinement;
pub mod waitlist;

#[cfg(test)]
pub mod mock_domain;

use algorithm::{AlgorithmStatus, CfaSuccessors, CpaAlgorithm, SuccessorComputation};
use arg::StateId;
use bam::{BamCacheSynchronized, BamSuccessors, BlockAbstraction, CacheEntry};
use reached_set::ReachedSet;
use refinement::ArgPath;
use waitlist::{create_waitlist, Waitlist};

/// The configuration of an analysis run.
pub struct Analysis<S: AbstractState, P: Precision> {
    cfa: Arc<Cfa>,
    cpa: Cpa<S, P>,
    bam: Option<BlockAbstraction<S, P>>,
    config: Config,
    /// An empty waitlist, cloned for every new reached set.
    waitlist: Box<dyn Waitlist>,
    shutdown: ShutdownNotifier,
    log_sender: crossbeam_channel::Sender<LogThreadMsg>,
}

impl<S: AbstractState, P: Precision> Analysis<S, P> {
    /// Create an analysis without block abstraction.
    /// Returns an error if the waitlist configuration is invalid.
    pub fn new(
        cfa: Arc<Cfa>,
        cpa: Cpa<S, P>,
        config: Config,
        log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    ) -> Result<Analysis<S, P>, Error> {
        let waitlist = create_waitlist(&config.waitlist, &cfa)?;
        Ok(Analysis {
            cfa,
            cpa,
            bam: None,
            config,
            waitlist,
            shutdown: ShutdownNotifier::new(),
            log_sender,
        })
    }

    /// Summarize each function except the main function as a block.
    /// The cache may be shared with analyses running in other threads.
    pub fn with_block_abstraction(
        mut self,
        reducer: impl Reducer<S, P> + 'static,
        cache: Arc<BamCacheSynchronized<S, P>>,
    ) -> Self {
        let partitioning = BlockPartitioning::function_blocks(&self.cfa);
        self.bam = Some(BlockAbstraction::new(
            partitioning,
            Box::new(reducer),
            cache,
        ));
        self
    }

    /// Create an empty cache with the size bound from the configuration.
    pub fn new_cache(&self) -> Arc<BamCacheSynchronized<S, P>> {
        Arc::new(BamCacheSynchronized::new(self.config.bam.max_cache_entries))
    }

    pub fn with_shutdown_notifier(mut self, shutdown: ShutdownNotifier) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn cfa(&self) -> &Cfa {
        &self.cfa
    }

    pub fn cpa(&self) -> &Cpa<S, P> {
        &self.cpa
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn block_abstraction(&self) -> Option<&BlockAbstraction<S, P>> {
        self.bam.as_ref()
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    pub fn log_sender(&self) -> &crossbeam_channel::Sender<LogThreadMsg> {
        &self.log_sender
    }

    /// Create an empty reached set with the configured waitlist.
    pub fn new_reached_set(&self) -> ReachedSet<S, P> {
        ReachedSet::new(self.waitlist.boxed_clone())
    }

    /// Create a reached set containing only the given initial state.
    pub fn initial_reached_set(&self, state: S, precision: P) -> ReachedSet<S, P> {
        let mut reached = self.new_reached_set();
        reached.add_root(state, precision);
        reached
    }

    pub(crate) fn algorithm<'a>(
        &'a self,
        successors: &'a dyn SuccessorComputation<S, P>,
    ) -> CpaAlgorithm<'a, S, P> {
        CpaAlgorithm::new(
            &self.cpa,
            successors,
            &self.config.algorithm,
            &self.shutdown,
            self.log_sender.clone(),
        )
    }

    /// Run the analysis on the reached set until the waitlist is empty or a stop condition holds.
    pub fn run(&self, reached: &mut ReachedSet<S, P>) -> Result<AlgorithmStatus, AnalysisError> {
        let status = match &self.bam {
            Some(bam) => {
                let successors = BamSuccessors::new(self, bam);
                self.algorithm(&successors).run(reached)?
            }
            None => {
                let successors = CfaSuccessors {
                    cpa: &self.cpa,
                    cfa: &self.cfa,
                };
                self.algorithm(&successors).run(reached)?
            }
        };
        if reached.waitlist().resource_exhausted() {
            let _ = self.log_sender.send(
                LogMessage::new_info("Block resource limit reached, some blocks were deferred.")
                    .source("CPA Algorithm")
                    .into(),
            );
        }
        Ok(status)
    }

    /// Get the summary of a block for a state at the block entry,
    /// computing it if the cache contains no precise entry for the reduced state.
    pub fn block_summary(
        &self,
        block: BlockId,
        state: &S,
        precision: &P,
    ) -> Result<CacheEntry<S, P>, AnalysisError> {
        let Some(bam) = &self.bam else {
            return Err(AnalysisError::Inconsistent(
                "block summaries require block abstraction".to_string(),
            ));
        };
        let block = bam.partitioning().block(block);
        let (_, entry) = BamSuccessors::new(self, bam).summary(block, state, precision)?;
        Ok(entry)
    }

    /// Compute the path from the initial state to a target state,
    /// with all block summaries on the way expanded.
    pub fn counterexample(
        &self,
        reached: &ReachedSet<S, P>,
        target: StateId,
    ) -> Result<ArgPath<S, P>, AnalysisError> {
        ArgPath::from_target(reached, target)
    }
}
