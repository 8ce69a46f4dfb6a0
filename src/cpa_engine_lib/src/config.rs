//! Configuration of an analysis run.
//!
//! The configuration is deserialized from JSON.
//! Every field has a default value, so a configuration file only needs to contain the options that differ from it.
//! The file `config.json` next to this module lists all options with their default values.

use crate::analysis::refinement::RemovalStrategy;
use crate::analysis::waitlist::WaitlistOrder;
use crate::prelude::*;
use anyhow::Context;
use std::path::Path;

/// The complete configuration of an analysis run.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Which waitlist the reached sets use.
    pub waitlist: WaitlistConfig,
    /// Options of the fixpoint loop.
    pub algorithm: AlgorithmConfig,
    /// Options of block-abstraction memoization.
    pub bam: BamConfig,
    /// Options of the refinement loop.
    pub refinement: RefinementConfig,
}

impl Config {
    /// Parse the configuration from a JSON value.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Config, Error> {
        serde_json::from_value(value.clone()).context("invalid analysis configuration")
    }

    /// Read and parse the configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Config, Error> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("configuration file {} is not valid JSON", path.display()))?;
        Config::from_json_value(&value)
    }
}

/// Configuration of the waitlist.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct WaitlistConfig {
    /// The traversal order of the waitlist
    /// (or of the sub-waitlists, if the block waitlist is enabled).
    pub order: WaitlistOrder,
    /// If set, states are scheduled per function block.
    /// A function starts a new block if its name fully matches this regular expression.
    pub block_pattern: Option<String>,
    /// The number of states a block may receive before it gets deactivated.
    pub block_resource_limit: usize,
}

impl Default for WaitlistConfig {
    fn default() -> Self {
        WaitlistConfig {
            order: WaitlistOrder::DepthFirst,
            block_pattern: None,
            block_resource_limit: 1000,
        }
    }
}

/// Configuration of the fixpoint loop.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Stop the analysis as soon as a target state was added to the reached set.
    pub stop_on_target: bool,
    /// Stop the analysis after this many states were popped from the waitlist.
    /// Nested block analyses count their own steps.
    pub max_steps: Option<u64>,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        AlgorithmConfig {
            stop_on_target: true,
            max_steps: None,
        }
    }
}

/// Configuration of block-abstraction memoization.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct BamConfig {
    /// Maximum number of cache entries.
    /// Block summaries computed while the cache is full are used once and not stored.
    pub max_cache_entries: Option<usize>,
}

/// Configuration of the refinement loop.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct RefinementConfig {
    /// How spurious subtrees are removed from the reached set.
    pub strategy: RemovalStrategy,
    /// Give up after this many refinements.
    pub max_refinements: Option<u64>,
}
