//! Block-abstraction memoization (BAM).
//!
//! The CFA is partitioned into blocks, one per function except the main function.
//! When the analysis reaches the entry of a block with a state that is not the root of the current analysis,
//! the state and its precision are *reduced* to the information relevant inside the block
//! (see [`Reducer`](crate::cpa::Reducer)).
//! The block is then analyzed once for this reduced entry state with a separate reached set,
//! and the result is stored in the [`BamCacheSynchronized`] cache.
//! Every other state reducing to the same key reuses the cached result.
//!
//! The exit states of the block analysis are *expanded* back into the context of the entering state
//! and become its successors in the outer analysis.
//! The ARG edge to such a successor is a [`BlockSummary`],
//! which keeps the reached set of the block analysis alive
//! so that counterexample paths can be expanded through the block.
//!
//! The analysis of a block stops at the exits of the block.
//! Calls inside a block are handled by nested block analyses.
//! Entering a block while a summary for the same key is being computed is an error,
//! i.e. recursion is not supported.

use crate::analysis::algorithm::{AlgorithmStatus, CfaSuccessors, Successor, SuccessorComputation};
use crate::analysis::arg::{ArgEdge, StateId};
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::analysis::Analysis;
use crate::cfa::{Block, BlockId, BlockPartitioning, CfaEdgeKind};
use crate::cpa::{AbstractState, Precision, Reducer};
use crate::prelude::*;
use crate::utils::log::LogMessage;
use std::sync::Arc;

mod cache;
pub use cache::*;

/// The label of an ARG edge from a block entry state to an expanded exit state of the block.
#[derive(Debug)]
pub struct BlockSummary<S, P> {
    pub block: BlockId,
    /// The cache entry the summary was taken from.
    pub entry: EntryId,
    /// The reached set of the block analysis.
    pub reached: Arc<ReachedSet<S, P>>,
    /// The (reduced) exit state in `reached` the successor was expanded from.
    pub exit: StateId,
}

/// The block partitioning, the reducer and the cache used for block-abstraction memoization.
pub struct BlockAbstraction<S, P> {
    partitioning: BlockPartitioning,
    reducer: Box<dyn Reducer<S, P>>,
    cache: Arc<BamCacheSynchronized<S, P>>,
}

impl<S: AbstractState, P: Precision> BlockAbstraction<S, P> {
    pub fn new(
        partitioning: BlockPartitioning,
        reducer: Box<dyn Reducer<S, P>>,
        cache: Arc<BamCacheSynchronized<S, P>>,
    ) -> Self {
        BlockAbstraction {
            partitioning,
            reducer,
            cache,
        }
    }

    pub fn partitioning(&self) -> &BlockPartitioning {
        &self.partitioning
    }

    pub fn reducer(&self) -> &dyn Reducer<S, P> {
        self.reducer.as_ref()
    }

    pub fn cache(&self) -> &Arc<BamCacheSynchronized<S, P>> {
        &self.cache
    }
}

/// A block whose summary is being computed, linked to the scope of the enclosing analysis.
struct BlockScope<'a, S, P> {
    block: &'a Block,
    key: &'a CacheKey<S, P>,
    parent: Option<&'a BlockScope<'a, S, P>>,
}

/// Computes successors for an analysis using block summaries.
pub struct BamSuccessors<'a, S: AbstractState, P: Precision> {
    analysis: &'a Analysis<S, P>,
    bam: &'a BlockAbstraction<S, P>,
    /// `None` for the outermost analysis.
    scope: Option<&'a BlockScope<'a, S, P>>,
}

impl<'a, S: AbstractState, P: Precision> BamSuccessors<'a, S, P> {
    /// The successor computation of the outermost analysis.
    pub fn new(analysis: &'a Analysis<S, P>, bam: &'a BlockAbstraction<S, P>) -> Self {
        BamSuccessors {
            analysis,
            bam,
            scope: None,
        }
    }

    fn log(&self, message: LogMessage) {
        let _ = self
            .analysis
            .log_sender()
            .send(message.source("BAM").into());
    }

    /// Returns `true` if the summary for the key is being computed by this or an enclosing analysis.
    fn is_analyzing(&self, key: &CacheKey<S, P>) -> bool {
        let mut scope = self.scope;
        while let Some(current) = scope {
            if current.key == key {
                return true;
            }
            scope = current.parent;
        }
        false
    }

    /// Get the summary of a block for a state at the block entry,
    /// either from the cache or by analyzing the block.
    pub fn summary(
        &self,
        block: &Block,
        state: &S,
        precision: &P,
    ) -> Result<(CacheKey<S, P>, CacheEntry<S, P>), AnalysisError> {
        let (reduced_state, reduced_precision) = self.bam.reducer.reduce(state, precision, block);
        let key = CacheKey {
            state: reduced_state,
            precision: reduced_precision,
            block: block.id,
        };
        if self.is_analyzing(&key) {
            return Err(AnalysisError::RecursiveBlock {
                block: block.name.clone(),
            });
        }
        match self.bam.cache.get(&key) {
            Some(entry) if entry.precise => {
                self.log(LogMessage::new_debug(format!(
                    "Reusing summary of block {}.",
                    block.name
                )));
                Ok((key, entry))
            }
            _ => {
                let entry = self.analyze_block(block, &key)?;
                Ok((key, entry))
            }
        }
    }

    /// Analyze a block for a cache key and store the result in the cache.
    fn analyze_block(
        &self,
        block: &Block,
        key: &CacheKey<S, P>,
    ) -> Result<CacheEntry<S, P>, AnalysisError> {
        self.log(LogMessage::new_debug(format!(
            "Computing summary of block {}.",
            block.name
        )));
        let mut reached = self.analysis.new_reached_set();
        reached.add_root(key.state.clone(), key.precision.clone());
        let scope = BlockScope {
            block,
            key,
            parent: self.scope,
        };
        let nested = BamSuccessors {
            analysis: self.analysis,
            bam: self.bam,
            scope: Some(&scope),
        };
        let status = self
            .analysis
            .algorithm(&nested)
            .with_name(format!("BAM block {}", block.name))
            .run(&mut reached)?;
        if status == AlgorithmStatus::Interrupted {
            return Err(AnalysisError::Interrupted);
        }
        if reached.waitlist().resource_exhausted() {
            self.log(LogMessage::new_info(format!(
                "Resource limit hit while analyzing block {}.",
                block.name
            )));
        }
        let entry = self
            .bam
            .cache
            .put(key.clone(), block, reached, status.is_precise())?;
        if !entry.precise {
            self.log(LogMessage::new_debug(format!(
                "Summary of block {} is partial ({status:?}).",
                block.name
            )));
        }
        Ok(entry)
    }

    /// The state before the call edge into the block entry state `id`.
    /// A merged entry state can have several of them, then the one with the lowest serial number is used.
    /// Without a call edge into the entry state, the entry state itself is returned.
    fn caller<'r>(&self, reached: &'r ReachedSet<S, P>, id: StateId) -> &'r S {
        let arg = reached.arg();
        arg.parents(id)
            .into_iter()
            .filter(|parent| match arg.edge_label(*parent, id) {
                Some(ArgEdge::Cfa(edge)) => matches!(
                    self.analysis.cfa().edge(*edge).kind,
                    CfaEdgeKind::FunctionCall { .. }
                ),
                _ => false,
            })
            .min_by_key(|parent| arg.serial(*parent))
            .map_or(arg.state(id), |parent| arg.state(parent))
    }

    /// Compute the successors of a state at a block entry from the summary of the block.
    fn enter_block(
        &self,
        reached: &ReachedSet<S, P>,
        id: StateId,
        precision: &P,
        block: &Block,
    ) -> Result<Vec<Successor<S, P>>, AnalysisError> {
        let arg = reached.arg();
        let root = arg.state(id);
        let (key, entry) = self.summary(block, root, precision)?;
        let caller = self.caller(reached, id);
        let reducer = self.bam.reducer.as_ref();
        let mut successors = Vec::new();
        for exit in &entry.exit_states {
            let reduced_exit = entry.reached.arg().state(*exit);
            let mut expanded = reducer.expand(root, &key.state, reduced_exit, block);
            if block.is_exit(reduced_exit.location()) {
                expanded =
                    reducer.rebuild_after_call(caller, root, expanded, reduced_exit.location());
            }
            let reduced_precision = entry.reached.precision(*exit).unwrap_or(&key.precision);
            let expanded_precision = reducer.expand_precision(precision, reduced_precision, block);
            successors.push(Successor {
                state: expanded,
                edge: ArgEdge::Summary(Arc::new(BlockSummary {
                    block: block.id,
                    entry: entry.id,
                    reached: entry.reached.clone(),
                    exit: *exit,
                })),
                precision: Some(expanded_precision),
            });
        }
        Ok(successors)
    }
}

impl<'a, S: AbstractState, P: Precision> SuccessorComputation<S, P> for BamSuccessors<'a, S, P> {
    fn successors(
        &self,
        reached: &ReachedSet<S, P>,
        state: StateId,
        precision: &P,
    ) -> Result<Vec<Successor<S, P>>, AnalysisError> {
        let abstract_state = reached.arg().state(state);
        let location = abstract_state.location();
        if let Some(scope) = self.scope {
            if scope.block.is_exit(location) {
                return Ok(Vec::new());
            }
        }
        if reached.first_state() != Some(state) {
            if let Some(block) = self.bam.partitioning.block_for_entry(location) {
                return self.enter_block(reached, state, precision, block);
            }
        }
        CfaSuccessors {
            cpa: self.analysis.cpa(),
            cfa: self.analysis.cfa(),
        }
        .of_state(abstract_state, precision)
    }
}
