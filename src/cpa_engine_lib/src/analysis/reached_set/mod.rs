//! The reached set, i.e. all states explored by an analysis together with their precisions.
//!
//! A [`ReachedSet`] owns
//! - the [`Arg`] of the analysis,
//! - the precision of each reached state,
//! - an index of the reached states by location (the *partitions*),
//! - the [`Waitlist`] of reached states whose successors still have to be computed.
//!
//! States covered by other states are part of the ARG but not of the reached set.
//! Every state in the waitlist is part of the reached set,
//! and removing a state from the reached set also removes it from the waitlist.
//!
//! Read-only access for precision adjustments and refiners goes through the [`UnmodifiableReachedSet`] trait.

use crate::analysis::arg::{Arg, ArgEdge, StateId};
use crate::analysis::waitlist::{Waitlist, WorkItem};
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;
use fnv::FnvHashMap;
use std::collections::{BTreeMap, BTreeSet};

mod view;
pub use view::SubgraphReachedSetView;

/// Read-only access to a reached set.
pub trait UnmodifiableReachedSet<S: AbstractState, P: Precision> {
    /// The ARG the reached states are part of.
    fn arg(&self) -> &Arg<S, P>;

    /// All reached states in the order they were added.
    fn states(&self) -> Vec<StateId>;

    /// The reached states at the given location in the order they were added.
    fn reached(&self, location: Location) -> Vec<StateId>;

    fn contains(&self, state: StateId) -> bool;

    fn precision_of(&self, state: StateId) -> Option<P>;

    /// The first state added to the reached set, usually the initial state.
    fn first_state(&self) -> Option<StateId>;

    /// The state added last.
    fn last_state(&self) -> Option<StateId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct ReachedEntry<P> {
    precision: P,
    serial: u64,
    location: Location,
}

/// The set of reached states of an analysis.
pub struct ReachedSet<S, P> {
    arg: Arg<S, P>,
    entries: FnvHashMap<StateId, ReachedEntry<P>>,
    /// The reached states ordered by their serial number, i.e. by the time they were created.
    order: BTreeMap<u64, StateId>,
    partitions: FnvHashMap<Location, Vec<StateId>>,
    first: Option<StateId>,
    last: Option<StateId>,
    waitlist: Box<dyn Waitlist>,
}

impl<S: Clone, P: Clone> Clone for ReachedSet<S, P> {
    fn clone(&self) -> Self {
        ReachedSet {
            arg: self.arg.clone(),
            entries: self.entries.clone(),
            order: self.order.clone(),
            partitions: self.partitions.clone(),
            first: self.first,
            last: self.last,
            waitlist: self.waitlist.boxed_clone(),
        }
    }
}

impl<S, P> std::fmt::Debug for ReachedSet<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachedSet")
            .field("states", &self.entries.len())
            .field("waiting", &self.waitlist.len())
            .field("first", &self.first)
            .field("last", &self.last)
            .finish()
    }
}

impl<S: AbstractState, P: Precision> ReachedSet<S, P> {
    /// Create an empty reached set using the given (empty) waitlist.
    pub fn new(waitlist: Box<dyn Waitlist>) -> ReachedSet<S, P> {
        ReachedSet {
            arg: Arg::new(),
            entries: FnvHashMap::default(),
            order: BTreeMap::new(),
            partitions: FnvHashMap::default(),
            first: None,
            last: None,
            waitlist,
        }
    }

    /// Add a state without ARG parents, usually the initial state of the analysis.
    pub fn add_root(&mut self, state: S, precision: P) -> StateId {
        let id = self.arg.add_root(state);
        self.insert(id, precision);
        id
    }

    /// Add a successor of `parent` to the reached set, the ARG and the waitlist.
    pub fn add(
        &mut self,
        parent: StateId,
        state: S,
        edge: ArgEdge<S, P>,
        precision: P,
    ) -> Result<StateId, AnalysisError> {
        let id = self.arg.add_child(parent, state, edge)?;
        self.insert(id, precision);
        Ok(id)
    }

    /// Add several successors of `parent`.
    pub fn add_all(
        &mut self,
        parent: StateId,
        successors: impl IntoIterator<Item = (S, ArgEdge<S, P>, P)>,
    ) -> Result<Vec<StateId>, AnalysisError> {
        successors
            .into_iter()
            .map(|(state, edge, precision)| self.add(parent, state, edge, precision))
            .collect()
    }

    /// Insert a state of the ARG into the reached set and the waitlist.
    fn insert(&mut self, id: StateId, precision: P) {
        let state = self.arg.state(id);
        let location = state.location();
        let item = WorkItem::new(id, state);
        let serial = self.arg.serial(id);
        self.entries.insert(
            id,
            ReachedEntry {
                precision,
                serial,
                location,
            },
        );
        self.order.insert(serial, id);
        self.partitions.entry(location).or_default().push(id);
        if self.first.is_none() {
            self.first = Some(id);
        }
        self.last = Some(id);
        self.waitlist.add(item);
    }

    /// Remove a state from the reached set and the waitlist. The ARG is not changed.
    /// Returns `false` if the state was not part of the reached set.
    pub fn remove(&mut self, id: StateId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        self.order.remove(&entry.serial);
        if let Some(partition) = self.partitions.get_mut(&entry.location) {
            partition.retain(|state| *state != id);
            if partition.is_empty() {
                self.partitions.remove(&entry.location);
            }
        }
        self.waitlist.remove(id);
        if self.first == Some(id) {
            self.first = self.order.values().next().copied();
        }
        if self.last == Some(id) {
            self.last = self.order.values().next_back().copied();
        }
        true
    }

    pub fn remove_all(&mut self, states: impl IntoIterator<Item = StateId>) {
        for id in states {
            self.remove(id);
        }
    }

    /// The precision of a reached state.
    pub fn precision(&self, id: StateId) -> Option<&P> {
        self.entries.get(&id).map(|entry| &entry.precision)
    }

    /// Put a reached state back into the waitlist with a new precision.
    /// Returns `false` if the state is not part of the reached set.
    pub fn readd_to_waitlist(&mut self, id: StateId, precision: P) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.precision = precision;
        if !self.waitlist.contains(id) {
            self.waitlist.add(WorkItem::new(id, self.arg.state(id)));
        }
        true
    }

    /// Put a popped work item back into the waitlist.
    pub(crate) fn readd_item(&mut self, item: WorkItem) {
        if self.entries.contains_key(&item.state) && !self.waitlist.contains(item.state) {
            self.waitlist.add(item);
        }
    }

    /// Replace the reached state `old` by a new state `merged`.
    ///
    /// The new state takes over the parents of `old`.
    /// The successors of `old` and the states covered by it were computed from a state that no longer exists,
    /// so they are removed, and the parents of the removed states are put back into the waitlist.
    /// Returns the ID of the new state, which is added to the waitlist.
    pub fn replace(&mut self, old: StateId, merged: S, precision: P) -> Result<StateId, AnalysisError> {
        if !self.contains_state(old) {
            return Err(AnalysisError::Inconsistent(format!(
                "replaced state {} is not reached",
                old.index()
            )));
        }
        let mut requeue = BTreeSet::new();
        for child in self.arg.children(old) {
            requeue.extend(self.remove_subtree(child));
        }
        let covered: Vec<StateId> = match self.arg.get(old) {
            Some(node) => node.covered_states().collect(),
            None => Vec::new(),
        };
        for state in covered {
            requeue.extend(self.remove_subtree(state));
        }
        requeue.remove(&old);

        let new = self.arg.add_root(merged);
        self.arg.replace_with(old, new)?;
        self.remove(old);
        self.insert(new, precision);
        for state in requeue {
            if let Some(precision) = self.precision(state).cloned() {
                self.readd_to_waitlist(state, precision);
            }
        }
        Ok(new)
    }

    /// Remove `root`, all its descendants and all states covered by them from the reached set and the ARG.
    /// Returns the parents of removed states that were not removed themselves, ordered by their index.
    pub fn remove_subtree(&mut self, root: StateId) -> Vec<StateId> {
        let removed = self.subtree_with_covered(root);
        let mut outside_parents = BTreeSet::new();
        for id in &removed {
            for parent in self.arg.parents(*id) {
                if !removed.contains(&parent) {
                    outside_parents.insert(parent);
                }
            }
        }
        for id in &removed {
            self.remove(*id);
            self.arg.remove_from_graph(*id);
        }
        outside_parents.into_iter().collect()
    }

    /// The subgraph of `root` together with all states covered by a state of the subgraph.
    pub fn subtree_with_covered(&self, root: StateId) -> BTreeSet<StateId> {
        let mut subtree = self.arg.subgraph(root);
        let covered: Vec<StateId> = subtree
            .iter()
            .filter_map(|id| self.arg.get(*id))
            .flat_map(|node| node.covered_states())
            .collect();
        subtree.extend(covered);
        subtree
    }

    pub(crate) fn arg_mut(&mut self) -> &mut Arg<S, P> {
        &mut self.arg
    }

    fn contains_state(&self, id: StateId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Take the next state from the waitlist.
    pub fn pop_from_waitlist(&mut self) -> Option<WorkItem> {
        self.waitlist.pop()
    }

    pub fn has_waiting_state(&self) -> bool {
        !self.waitlist.is_empty()
    }

    pub fn waitlist_len(&self) -> usize {
        self.waitlist.len()
    }

    pub fn waitlist(&self) -> &dyn Waitlist {
        self.waitlist.as_ref()
    }

    /// Returns `true` if the given state is waiting in the waitlist.
    pub fn is_waiting(&self, id: StateId) -> bool {
        self.waitlist.contains(id)
    }
}

impl<S: AbstractState, P: Precision> UnmodifiableReachedSet<S, P> for ReachedSet<S, P> {
    fn arg(&self) -> &Arg<S, P> {
        &self.arg
    }

    fn states(&self) -> Vec<StateId> {
        self.order.values().copied().collect()
    }

    fn reached(&self, location: Location) -> Vec<StateId> {
        self.partitions.get(&location).cloned().unwrap_or_default()
    }

    fn contains(&self, state: StateId) -> bool {
        self.contains_state(state)
    }

    fn precision_of(&self, state: StateId) -> Option<P> {
        self.precision(state).cloned()
    }

    fn first_state(&self) -> Option<StateId> {
        self.first
    }

    fn last_state(&self) -> Option<StateId> {
        self.last
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
