/*!
The main library of the CPA engine, a configurable reachability analysis with block-abstraction memoization.

# What is the CPA engine

The engine explores the abstract state space of a program given as a control flow automaton ([`cfa::Cfa`]).
What an abstract state is, how successors are computed, when states get merged and
when exploration of a state can stop is defined by a *configurable program analysis* (CPA),
i.e. by implementations of the traits in the [`cpa`] module.
The engine itself only knows the generic parts of the analysis:

- the waitlist-driven fixpoint loop ([`analysis::algorithm`]),
- the reached set and the abstract reachability graph (ARG) recording the exploration history
  ([`analysis::reached_set`], [`analysis::arg`]),
- block-abstraction memoization (BAM, [`analysis::bam`]), which summarizes function blocks once per reduced entry state
  and reuses the summaries at every call site with an equivalent reduced entry state,
- counterexample-guided abstraction refinement (CEGAR, [`analysis::refinement`]),
  which removes spurious parts of the ARG together with the block summaries they were computed from.

# Usage

Build a [`cfa::Cfa`], bundle the operators of your domain into a [`cpa::Cpa`]
and create an [`analysis::Analysis`] from them together with a [`config::Config`].
Add block abstraction with [`analysis::Analysis::with_block_abstraction`] if function blocks should be summarized.
Log messages are sent to a [`utils::log::LogThread`].

```ignore
let log_thread = LogThread::spawn(LogThread::collect_and_deduplicate);
let analysis = Analysis::new(cfa, cpa, Config::default(), log_thread.get_msg_sender())?
    .with_block_abstraction(reducer, Arc::new(BamCacheSynchronized::new(None)));
let mut reached = analysis.initial_reached_set(initial_state, initial_precision);
let outcome = CegarAlgorithm::new(&analysis, &refiner).run(&mut reached)?;
let logs = log_thread.collect();
```
*/

pub mod analysis;
pub mod cfa;
pub mod config;
pub mod cpa;
pub mod error;
pub mod utils;

mod prelude {
    pub use serde::{Deserialize, Serialize};

    pub use crate::cfa::{CallStack, Location};
    pub use crate::error::AnalysisError;
    pub use anyhow::{anyhow, Error};
}
