//! The abstract reachability graph (ARG).
//!
//! The ARG records how the analysis reached each abstract state.
//! Its nodes are the explored states, its edges connect a state to its successors
//! and are labelled either with the CFA edge the successor was computed along
//! or with the summary of a block whose analysis produced the successor.
//! Additionally a state that was not explored further because another state covers it
//! is linked to its covering state.
//!
//! The ARG is an arena based on a `petgraph::stable_graph::StableDiGraph`,
//! so the index of a state stays valid when other states are removed.
//! The ARG has to stay acyclic, adding an edge that would close a cycle is an error.
//!
//! Besides the arena index every state has a serial number that is unique for the whole process.
//! Serial numbers identify states across copies of an ARG and across the sub-ARGs of block summaries,
//! e.g. in log messages and when invalidating cached block summaries.

use crate::analysis::bam::{BlockSummary, EntryId};
use crate::cpa::AbstractState;
use crate::prelude::*;
use fnv::{FnvHashMap, FnvHashSet};
use petgraph::graph::EdgeIndex;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod export;
pub use export::*;

/// The index of a state in its ARG.
pub type StateId = NodeIndex;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(0);

fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// A node of the ARG.
#[derive(Debug, Clone)]
pub struct ArgState<S> {
    state: S,
    serial: u64,
    covered_by: Option<StateId>,
    covering: BTreeSet<StateId>,
}

impl<S: AbstractState> ArgState<S> {
    fn new(state: S) -> ArgState<S> {
        ArgState {
            state,
            serial: next_serial(),
            covered_by: None,
            covering: BTreeSet::new(),
        }
    }

    /// The abstract state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The serial number of the state.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The state covering this state.
    pub fn covered_by(&self) -> Option<StateId> {
        self.covered_by
    }

    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    /// The states covered by this state.
    pub fn covered_states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.covering.iter().copied()
    }

    pub fn is_target(&self) -> bool {
        self.state.is_target()
    }
}

/// The label of an ARG edge.
#[derive(Debug)]
pub enum ArgEdge<S, P> {
    /// The child was computed along this CFA edge.
    Cfa(EdgeIndex),
    /// The child is an exit state of a block summary.
    Summary(Arc<BlockSummary<S, P>>),
}

impl<S, P> Clone for ArgEdge<S, P> {
    fn clone(&self) -> Self {
        match self {
            ArgEdge::Cfa(edge) => ArgEdge::Cfa(*edge),
            ArgEdge::Summary(summary) => ArgEdge::Summary(summary.clone()),
        }
    }
}

/// An abstract reachability graph.
#[derive(Debug)]
pub struct Arg<S, P> {
    graph: StableDiGraph<ArgState<S>, ArgEdge<S, P>>,
    serials: FnvHashMap<u64, StateId>,
}

impl<S: Clone, P> Clone for Arg<S, P> {
    fn clone(&self) -> Self {
        Arg {
            graph: self.graph.clone(),
            serials: self.serials.clone(),
        }
    }
}

impl<S: AbstractState, P> Default for Arg<S, P> {
    fn default() -> Self {
        Arg::new()
    }
}

impl<S: AbstractState, P> Arg<S, P> {
    pub fn new() -> Arg<S, P> {
        Arg {
            graph: StableDiGraph::default(),
            serials: FnvHashMap::default(),
        }
    }

    /// Add a state without parents.
    pub fn add_root(&mut self, state: S) -> StateId {
        let node = ArgState::new(state);
        let serial = node.serial;
        let id = self.graph.add_node(node);
        self.serials.insert(serial, id);
        id
    }

    /// Add a new state as a child of `parent`.
    pub fn add_child(
        &mut self,
        parent: StateId,
        state: S,
        edge: ArgEdge<S, P>,
    ) -> Result<StateId, AnalysisError> {
        self.check_contains(parent)?;
        let id = self.add_root(state);
        self.graph.add_edge(parent, id, edge);
        Ok(id)
    }

    /// Add an edge between two existing states.
    /// Nothing happens if the states are already connected.
    /// Returns an error if the edge would close a cycle.
    pub fn add_edge(
        &mut self,
        parent: StateId,
        child: StateId,
        edge: ArgEdge<S, P>,
    ) -> Result<(), AnalysisError> {
        self.check_contains(parent)?;
        self.check_contains(child)?;
        if self.graph.find_edge(parent, child).is_some() {
            return Ok(());
        }
        if parent == child
            || petgraph::algo::has_path_connecting(&self.graph, child, parent, None)
        {
            return Err(AnalysisError::ArgCycle {
                parent: self.graph[parent].serial,
                child: self.graph[child].serial,
            });
        }
        self.graph.add_edge(parent, child, edge);
        Ok(())
    }

    fn check_contains(&self, id: StateId) -> Result<(), AnalysisError> {
        if self.graph.contains_node(id) {
            Ok(())
        } else {
            Err(AnalysisError::Inconsistent(format!(
                "state {} is not part of the ARG",
                id.index()
            )))
        }
    }

    /// Mark `state` as covered by `covering`.
    /// Returns an error if `state` is not less or equal to `covering`.
    pub fn mark_covered(&mut self, state: StateId, covering: StateId) -> Result<(), AnalysisError> {
        self.check_contains(state)?;
        self.check_contains(covering)?;
        if !self.graph[state]
            .state
            .is_less_or_equal(&self.graph[covering].state)
        {
            return Err(AnalysisError::InvalidCovering {
                covered: self.graph[state].serial,
                covering: self.graph[covering].serial,
            });
        }
        self.uncover(state);
        self.graph[state].covered_by = Some(covering);
        self.graph[covering].covering.insert(state);
        Ok(())
    }

    /// Remove the covering relation of the state, if there is one.
    pub fn uncover(&mut self, state: StateId) {
        let Some(covering) = self.graph.node_weight_mut(state).and_then(|node| node.covered_by.take())
        else {
            return;
        };
        if let Some(node) = self.graph.node_weight_mut(covering) {
            node.covering.remove(&state);
        }
    }

    /// Get a state of the ARG.
    /// Returns `None` if the state was removed.
    pub fn get(&self, id: StateId) -> Option<&ArgState<S>> {
        self.graph.node_weight(id)
    }

    /// Get the abstract state of an ARG state.
    ///
    /// Panics if the state was removed from the ARG.
    pub fn state(&self, id: StateId) -> &S {
        &self.graph[id].state
    }

    /// Get the serial number of an ARG state.
    ///
    /// Panics if the state was removed from the ARG.
    pub fn serial(&self, id: StateId) -> u64 {
        self.graph[id].serial
    }

    /// Find a state by its serial number.
    pub fn state_with_serial(&self, serial: u64) -> Option<StateId> {
        self.serials.get(&serial).copied()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.graph.contains_node(id)
    }

    /// Returns `true` if the state was removed from the ARG.
    pub fn is_destroyed(&self, id: StateId) -> bool {
        !self.contains(id)
    }

    /// The number of states in the ARG.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All states of the ARG.
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.graph.node_indices()
    }

    /// The neighbors of a state in the given direction, ordered by the time the connecting edges were added.
    fn neighbors(&self, id: StateId, direction: Direction) -> Vec<(StateId, EdgeIndex)> {
        let mut neighbors: Vec<(StateId, EdgeIndex)> = self
            .graph
            .edges_directed(id, direction)
            .filter_map(|edge| {
                let (source, target) = self.graph.edge_endpoints(edge.id())?;
                let neighbor = if direction == Direction::Incoming {
                    source
                } else {
                    target
                };
                Some((neighbor, edge.id()))
            })
            .collect();
        neighbors.sort_by_key(|(_, edge)| *edge);
        neighbors
    }

    /// The parents of a state, in the order in which they were connected to the state.
    pub fn parents(&self, id: StateId) -> Vec<StateId> {
        self.neighbors(id, Direction::Incoming)
            .into_iter()
            .map(|(parent, _)| parent)
            .collect()
    }

    /// The children of a state, in the order in which they were added.
    pub fn children(&self, id: StateId) -> Vec<StateId> {
        self.neighbors(id, Direction::Outgoing)
            .into_iter()
            .map(|(child, _)| child)
            .collect()
    }

    /// The label of the edge from `parent` to `child`.
    pub fn edge_label(&self, parent: StateId, child: StateId) -> Option<&ArgEdge<S, P>> {
        self.graph
            .find_edge(parent, child)
            .map(|edge| &self.graph[edge])
    }

    /// The states computed from the summaries of the given cache entries.
    pub fn summary_usages(&self, entries: &FnvHashSet<EntryId>) -> BTreeSet<StateId> {
        self.graph
            .edge_references()
            .filter(|edge| {
                matches!(edge.weight(), ArgEdge::Summary(summary) if entries.contains(&summary.entry))
            })
            .map(|edge| edge.target())
            .collect()
    }

    /// The states without parents.
    pub fn roots(&self) -> Vec<StateId> {
        self.graph
            .node_indices()
            .filter(|id| {
                self.graph
                    .neighbors_directed(*id, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// The state and all its descendants.
    pub fn subgraph(&self, id: StateId) -> BTreeSet<StateId> {
        let mut subgraph = BTreeSet::new();
        if !self.contains(id) {
            return subgraph;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if subgraph.insert(current) {
                stack.extend(self.graph.neighbors_directed(current, Direction::Outgoing));
            }
        }
        subgraph
    }

    /// Remove the state from the ARG.
    /// All edges and covering relations of the state are removed, its children stay in the ARG.
    /// Returns the removed state, or `None` if it was already removed.
    pub fn remove_from_graph(&mut self, id: StateId) -> Option<ArgState<S>> {
        self.uncover(id);
        let covered: Vec<StateId> = self.graph.node_weight(id)?.covering.iter().copied().collect();
        for state in covered {
            if let Some(node) = self.graph.node_weight_mut(state) {
                node.covered_by = None;
            }
        }
        let mut removed = self.graph.remove_node(id)?;
        removed.covering.clear();
        self.serials.remove(&removed.serial);
        Some(removed)
    }

    /// Replace `old` by `new` in the ARG:
    /// the parents, children and covered states of `old` are moved to `new`, then `old` is removed.
    /// Returns an error if this would close a cycle.
    pub fn replace_with(&mut self, old: StateId, new: StateId) -> Result<(), AnalysisError> {
        self.check_contains(old)?;
        self.check_contains(new)?;
        for (parent, edge) in self.neighbors(old, Direction::Incoming) {
            if parent != new {
                let label = self.graph[edge].clone();
                self.add_edge(parent, new, label)?;
            }
        }
        for (child, edge) in self.neighbors(old, Direction::Outgoing) {
            if child != new {
                let label = self.graph[edge].clone();
                self.add_edge(new, child, label)?;
            }
        }
        let covered: Vec<StateId> = self.graph[old].covering.iter().copied().collect();
        for state in covered {
            self.graph[state].covered_by = Some(new);
            self.graph[new].covering.insert(state);
        }
        self.graph[old].covering.clear();
        self.remove_from_graph(old);
        Ok(())
    }

    /// Find a path from `from` to `to` by a backward depth-first search starting at `to`.
    /// Only parents accepted by `predicate` are visited; parents are tried in the order they were connected.
    /// The returned path starts with `from` and ends with `to`.
    pub fn extract_path(
        &self,
        from: StateId,
        to: StateId,
        predicate: impl Fn(StateId) -> bool,
    ) -> Result<Vec<StateId>, AnalysisError> {
        self.check_contains(from)?;
        self.check_contains(to)?;
        let candidates = |id: StateId| -> Vec<StateId> {
            let mut parents: Vec<StateId> = self
                .parents(id)
                .into_iter()
                .filter(|parent| predicate(*parent))
                .collect();
            parents.reverse();
            parents
        };
        let mut path = vec![to];
        let mut visited: FnvHashSet<StateId> = FnvHashSet::default();
        visited.insert(to);
        let mut pending = vec![candidates(to)];
        while let Some(current) = path.last().copied() {
            if current == from {
                path.reverse();
                return Ok(path);
            }
            let next = pending.last_mut().and_then(|candidates| candidates.pop());
            match next {
                Some(parent) => {
                    if visited.insert(parent) {
                        path.push(parent);
                        pending.push(candidates(parent));
                    }
                }
                None => {
                    path.pop();
                    pending.pop();
                }
            }
        }
        Err(AnalysisError::NoPath {
            from: self.graph[from].serial,
            to: self.graph[to].serial,
        })
    }

    /// Returns `true` if the ARG contains a cycle.
    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}

#[cfg(test)]
mod tests;
