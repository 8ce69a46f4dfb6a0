//! A small call-stack aware domain tracking one integer variable `x`, used in tests.
//!
//! The code of CFA edges is one of
//! `x = N`, `x += N`, `assume x == N`, `assume x != N`, `noise = N`, `error`, `skip` or the empty string.
//! `x` is only tracked if the precision says so, otherwise assignments make it unknown.
//! `noise` is a value that the reducer removes at block entries,
//! so that states differing only in `noise` share block summaries.

use crate::analysis::arg::StateId;
use crate::analysis::bam::BamCacheSynchronized;
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::analysis::refinement::{ArgPath, RefinementResult, Refiner};
use crate::analysis::Analysis;
use crate::cfa::{Block, Cfa, CfaEdgeKind, EdgeRef};
use crate::config::Config;
use crate::cpa::{AbstractState, Cpa, Join, MergeJoin, Reducer, TransferRelation};
use crate::prelude::*;
use crate::utils::log::LogThread;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockState {
    pub location: Location,
    pub stack: CallStack,
    pub return_sites: Vec<Location>,
    pub x: Option<i64>,
    pub noise: u32,
    pub error: bool,
}

impl MockState {
    pub fn new(location: Location, function: &str) -> MockState {
        MockState {
            location,
            stack: CallStack::new([function]),
            return_sites: Vec::new(),
            x: Some(0),
            noise: 0,
            error: false,
        }
    }

    pub fn with_x(mut self, x: Option<i64>) -> MockState {
        self.x = x;
        self
    }

    pub fn with_noise(mut self, noise: u32) -> MockState {
        self.noise = noise;
        self
    }

    fn same_context(&self, other: &MockState) -> bool {
        self.location == other.location
            && self.stack == other.stack
            && self.return_sites == other.return_sites
            && self.noise == other.noise
            && self.error == other.error
    }
}

impl AbstractState for MockState {
    fn is_less_or_equal(&self, other: &Self) -> bool {
        self.same_context(other) && (other.x.is_none() || other.x == self.x)
    }

    fn is_target(&self) -> bool {
        self.error
    }

    fn location(&self) -> Location {
        self.location
    }

    fn call_stack(&self) -> CallStack {
        self.stack.clone()
    }
}

impl Join for MockState {
    fn join(&self, other: &Self) -> Self {
        if !self.same_context(other) {
            return other.clone();
        }
        let mut joined = other.clone();
        if self.x != other.x {
            joined.x = None;
        }
        joined
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockPrecision {
    pub track_x: bool,
}

impl MockPrecision {
    pub fn tracking() -> MockPrecision {
        MockPrecision { track_x: true }
    }

    pub fn coarse() -> MockPrecision {
        MockPrecision { track_x: false }
    }
}

/// The operation of a CFA edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Assign(i64),
    Add(i64),
    AssumeEq(i64),
    AssumeNe(i64),
    Noise(u32),
    Error,
    Skip,
}

impl Op {
    pub fn parse(code: &str) -> Result<Op, Error> {
        let code = code.trim();
        if code.is_empty() || code == "skip" {
            return Ok(Op::Skip);
        }
        if code == "error" {
            return Ok(Op::Error);
        }
        if let Some(value) = code.strip_prefix("x += ") {
            return Ok(Op::Add(value.parse()?));
        }
        if let Some(value) = code.strip_prefix("x = ") {
            return Ok(Op::Assign(value.parse()?));
        }
        if let Some(value) = code.strip_prefix("assume x == ") {
            return Ok(Op::AssumeEq(value.parse()?));
        }
        if let Some(value) = code.strip_prefix("assume x != ") {
            return Ok(Op::AssumeNe(value.parse()?));
        }
        if let Some(value) = code.strip_prefix("noise = ") {
            return Ok(Op::Noise(value.parse()?));
        }
        Err(anyhow!("Unknown operation: {}", code))
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self, Op::Assign(_) | Op::Add(_))
    }
}

pub struct MockTransfer;

impl TransferRelation<MockState, MockPrecision> for MockTransfer {
    fn successors(
        &self,
        state: &MockState,
        precision: &MockPrecision,
        edge: EdgeRef<'_>,
    ) -> Result<Vec<MockState>, Error> {
        let mut successor = state.clone();
        successor.location = edge.target;
        match edge.edge.kind {
            CfaEdgeKind::FunctionCall { return_site } => {
                successor.stack = state.stack.push(&edge.target_node.function);
                successor.return_sites.push(return_site);
                return Ok(vec![successor]);
            }
            CfaEdgeKind::FunctionReturn => {
                if state.return_sites.last() != Some(&edge.target) {
                    return Ok(Vec::new());
                }
                successor.return_sites.pop();
                successor.stack = state.stack.pop();
                return Ok(vec![successor]);
            }
            CfaEdgeKind::Statement | CfaEdgeKind::Assume | CfaEdgeKind::Blank => (),
        }
        match Op::parse(&edge.edge.code)? {
            Op::Assign(value) => {
                successor.x = precision.track_x.then_some(value);
            }
            Op::Add(value) => {
                successor.x = match state.x {
                    Some(x) if precision.track_x => Some(x + value),
                    _ => None,
                };
            }
            Op::AssumeEq(value) => {
                if state.x.map_or(false, |x| x != value) {
                    return Ok(Vec::new());
                }
            }
            Op::AssumeNe(value) => {
                if state.x == Some(value) {
                    return Ok(Vec::new());
                }
            }
            Op::Noise(value) => successor.noise = value,
            Op::Error => successor.error = true,
            Op::Skip => (),
        }
        Ok(vec![successor])
    }
}

/// Removes the caller context and the noise at block entries.
pub struct MockReducer;

impl Reducer<MockState, MockPrecision> for MockReducer {
    fn reduce(
        &self,
        state: &MockState,
        precision: &MockPrecision,
        block: &Block,
    ) -> (MockState, MockPrecision) {
        let mut reduced = state.clone();
        reduced.stack = CallStack::new([block.name.as_str()]);
        reduced.return_sites = Vec::new();
        reduced.noise = 0;
        (reduced, *precision)
    }

    fn expand(
        &self,
        root: &MockState,
        _reduced_root: &MockState,
        reduced_result: &MockState,
        _block: &Block,
    ) -> MockState {
        let mut expanded = root.clone();
        expanded.stack = CallStack::new(
            root.stack
                .iter()
                .chain(reduced_result.stack.iter().skip(1))
                .cloned(),
        );
        expanded
            .return_sites
            .extend(reduced_result.return_sites.iter().copied());
        expanded.location = reduced_result.location;
        expanded.x = reduced_result.x;
        expanded.error = reduced_result.error;
        expanded
    }
}

/// Replays the path with concrete values of `x`, starting from `x = 0`.
pub struct MockRefiner {
    pub cfa: Arc<Cfa>,
}

impl Refiner<MockState, MockPrecision> for MockRefiner {
    fn refine(
        &self,
        path: &ArgPath<MockState, MockPrecision>,
        _reached: &dyn UnmodifiableReachedSet<MockState, MockPrecision>,
    ) -> Result<RefinementResult<MockPrecision>, Error> {
        let mut x: i64 = 0;
        let mut first_imprecise = None;
        for (index, element) in path.elements().iter().enumerate() {
            let Some(edge) = element.edge else {
                continue;
            };
            let edge = self.cfa.edge(edge);
            if !matches!(
                edge.kind,
                CfaEdgeKind::Statement | CfaEdgeKind::Assume | CfaEdgeKind::Blank
            ) {
                continue;
            }
            let op = Op::parse(&edge.code)?;
            if op.is_assignment() && !element.precision.track_x && first_imprecise.is_none() {
                first_imprecise = Some(index);
            }
            let feasible = match op {
                Op::Assign(value) => {
                    x = value;
                    true
                }
                Op::Add(value) => {
                    x += value;
                    true
                }
                Op::AssumeEq(value) => x == value,
                Op::AssumeNe(value) => x != value,
                Op::Noise(_) | Op::Error | Op::Skip => true,
            };
            if !feasible {
                let infeasible_at = first_imprecise
                    .ok_or_else(|| anyhow!("Infeasible path without imprecise assignment"))?;
                return Ok(RefinementResult::Spurious {
                    infeasible_at,
                    precision: MockPrecision::tracking(),
                });
            }
        }
        Ok(RefinementResult::Feasible)
    }
}

pub fn mock_cpa() -> Cpa<MockState, MockPrecision> {
    Cpa::new(MockTransfer)
}

pub fn mock_join_cpa() -> Cpa<MockState, MockPrecision> {
    Cpa::new(MockTransfer).with_merge(MergeJoin)
}

/// An analysis without block abstraction whose log messages are discarded.
pub fn mock_analysis(
    cfa: &Arc<Cfa>,
    cpa: Cpa<MockState, MockPrecision>,
    config: Config,
) -> Analysis<MockState, MockPrecision> {
    Analysis::new(
        cfa.clone(),
        cpa,
        config,
        LogThread::create_disconnected_sender(),
    )
    .unwrap()
}

/// An analysis with function blocks and the given cache.
pub fn mock_bam_analysis(
    cfa: &Arc<Cfa>,
    config: Config,
    cache: Arc<BamCacheSynchronized<MockState, MockPrecision>>,
) -> Analysis<MockState, MockPrecision> {
    mock_analysis(cfa, mock_cpa(), config).with_block_abstraction(MockReducer, cache)
}

/// The initial state at the entry of the main function.
pub fn initial_state(cfa: &Cfa) -> MockState {
    MockState::new(cfa.main_entry(), cfa.main_function())
}

/// Build a CFA from a list of `(source, target, code)` edges of the main function.
/// Locations are created on demand by their label, `"entry"` and `"exit"` are the entry and exit of main.
pub fn main_cfa(edges: &[(&str, &str, &str)]) -> Cfa {
    let mut cfa = Cfa::new("main");
    add_function_edges(&mut cfa, "main", edges);
    cfa
}

/// Add edges of a function, creating locations by their label like [`main_cfa`].
/// An edge with the code `call f` is a call of `f` from its source returning to its target.
pub fn add_function_edges(cfa: &mut Cfa, function: &str, edges: &[(&str, &str, &str)]) {
    let nodes = cfa.add_function(function);
    let mut locations = std::collections::BTreeMap::new();
    locations.insert("entry".to_string(), nodes.entry);
    locations.insert("exit".to_string(), nodes.exit);
    let mut get_location = |cfa: &mut Cfa, label: &str| {
        *locations
            .entry(label.to_string())
            .or_insert_with(|| cfa.add_location(function, label))
    };
    for (source, target, code) in edges {
        let source = get_location(cfa, source);
        let target = get_location(cfa, target);
        if let Some(callee) = code.strip_prefix("call ") {
            cfa.add_call(source, callee, target);
        } else if code.starts_with("assume") {
            cfa.add_edge(source, target, CfaEdgeKind::Assume, code);
        } else {
            cfa.add_edge(source, target, CfaEdgeKind::Statement, code);
        }
    }
}

/// The location of a function with the given label, `"entry"` and `"exit"` included.
pub fn location(cfa: &Cfa, function: &str, label: &str) -> Location {
    let nodes = cfa.function(function).unwrap();
    match label {
        "entry" => return nodes.entry,
        "exit" => return nodes.exit,
        _ => (),
    }
    cfa.graph()
        .node_indices()
        .find(|location| {
            let node = cfa.node(*location);
            node.function == function && node.label == label
        })
        .unwrap()
}

/// The abstract states of the reached set at a location, ordered by their serial number.
pub fn states_at(
    reached: &ReachedSet<MockState, MockPrecision>,
    location: Location,
) -> Vec<(StateId, MockState)> {
    reached
        .reached(location)
        .into_iter()
        .map(|id| (id, reached.arg().state(id).clone()))
        .collect()
}
