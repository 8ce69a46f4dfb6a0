//! Waitlists of states whose successors still have to be computed.
//!
//! The order in which states are taken from the waitlist determines the traversal order of the analysis.
//! Besides the simple [breadth-first and depth-first](SimpleWaitlist) orders
//! the [`TopologicalWaitlist`] prefers states at locations early in a weak topological order of the CFA.
//! The [`BlockWaitlist`] schedules states per function block and bounds the work spent in each block.

use crate::analysis::arg::StateId;
use crate::cfa::Cfa;
use crate::config::WaitlistConfig;
use crate::cpa::AbstractState;
use crate::prelude::*;
use fnv::FnvHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

mod block;
pub use block::BlockWaitlist;

/// A state waiting for the computation of its successors.
///
/// The precision of the state is stored in the reached set owning the waitlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub state: StateId,
    pub location: Location,
    pub call_stack: CallStack,
}

impl WorkItem {
    pub fn new<S: AbstractState>(id: StateId, state: &S) -> WorkItem {
        WorkItem {
            state: id,
            location: state.location(),
            call_stack: state.call_stack(),
        }
    }
}

/// An ordered collection of work items.
pub trait Waitlist: Send + Sync {
    fn add(&mut self, item: WorkItem);

    /// Remove the next item according to the strategy of the waitlist.
    fn pop(&mut self) -> Option<WorkItem>;

    fn contains(&self, state: StateId) -> bool;

    /// Remove the item of the given state. Returns `true` if the state was contained in the waitlist.
    fn remove(&mut self, state: StateId) -> bool;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    fn clear(&mut self);

    /// Returns `true` if the waitlist stopped prioritizing some states because a resource limit was hit.
    fn resource_exhausted(&self) -> bool {
        false
    }

    /// Clone the waitlist including its items.
    fn boxed_clone(&self) -> Box<dyn Waitlist>;
}

impl Clone for Box<dyn Waitlist> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Creates empty waitlists.
pub type WaitlistFactory = Arc<dyn Fn() -> Box<dyn Waitlist> + Send + Sync>;

/// The traversal order of a waitlist.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistOrder {
    BreadthFirst,
    DepthFirst,
    Topological,
}

/// Get a factory for empty waitlists of the given order.
pub fn waitlist_factory(order: WaitlistOrder, cfa: &Cfa) -> WaitlistFactory {
    match order {
        WaitlistOrder::BreadthFirst => Arc::new(|| Box::new(SimpleWaitlist::breadth_first())),
        WaitlistOrder::DepthFirst => Arc::new(|| Box::new(SimpleWaitlist::depth_first())),
        WaitlistOrder::Topological => {
            let priorities = Arc::new(cfa.topological_priorities());
            Arc::new(move || Box::new(TopologicalWaitlist::new(priorities.clone())))
        }
    }
}

/// Create an empty waitlist as configured.
/// Returns an error if the block pattern is not a valid regular expression.
pub fn create_waitlist(config: &WaitlistConfig, cfa: &Cfa) -> Result<Box<dyn Waitlist>, Error> {
    let factory = waitlist_factory(config.order, cfa);
    match &config.block_pattern {
        Some(pattern) => Ok(Box::new(BlockWaitlist::new(
            factory,
            pattern,
            config.block_resource_limit,
        )?)),
        None => Ok(factory()),
    }
}

/// A breadth-first (FIFO) or depth-first (LIFO) waitlist.
#[derive(Debug, Clone)]
pub struct SimpleWaitlist {
    items: VecDeque<WorkItem>,
    depth_first: bool,
}

impl SimpleWaitlist {
    pub fn breadth_first() -> SimpleWaitlist {
        SimpleWaitlist {
            items: VecDeque::new(),
            depth_first: false,
        }
    }

    pub fn depth_first() -> SimpleWaitlist {
        SimpleWaitlist {
            items: VecDeque::new(),
            depth_first: true,
        }
    }
}

impl Waitlist for SimpleWaitlist {
    fn add(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        if self.depth_first {
            self.items.pop_back()
        } else {
            self.items.pop_front()
        }
    }

    fn contains(&self, state: StateId) -> bool {
        self.items.iter().any(|item| item.state == state)
    }

    fn remove(&mut self, state: StateId) -> bool {
        let len = self.items.len();
        self.items.retain(|item| item.state != state);
        self.items.len() != len
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear()
    }

    fn boxed_clone(&self) -> Box<dyn Waitlist> {
        Box::new(self.clone())
    }
}

/// A waitlist preferring states whose location has a higher topological priority.
/// States with the same priority are taken in insertion order.
#[derive(Debug, Clone)]
pub struct TopologicalWaitlist {
    priorities: Arc<FnvHashMap<Location, usize>>,
    buckets: BTreeMap<usize, VecDeque<WorkItem>>,
    len: usize,
}

impl TopologicalWaitlist {
    /// Locations without a priority get the lowest priority.
    pub fn new(priorities: Arc<FnvHashMap<Location, usize>>) -> TopologicalWaitlist {
        TopologicalWaitlist {
            priorities,
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    fn priority(&self, location: Location) -> usize {
        self.priorities.get(&location).copied().unwrap_or(0)
    }
}

impl Waitlist for TopologicalWaitlist {
    fn add(&mut self, item: WorkItem) {
        let priority = self.priority(item.location);
        self.buckets.entry(priority).or_default().push_back(item);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<WorkItem> {
        let mut bucket = self.buckets.last_entry()?;
        let item = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        if item.is_some() {
            self.len -= 1;
        }
        item
    }

    fn contains(&self, state: StateId) -> bool {
        self.buckets
            .values()
            .any(|bucket| bucket.iter().any(|item| item.state == state))
    }

    fn remove(&mut self, state: StateId) -> bool {
        let mut removed = false;
        self.buckets.retain(|_, bucket| {
            let len = bucket.len();
            bucket.retain(|item| item.state != state);
            removed |= bucket.len() != len;
            !bucket.is_empty()
        });
        if removed {
            self.len -= 1;
        }
        removed
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    fn boxed_clone(&self) -> Box<dyn Waitlist> {
        Box::new(self.clone())
    }
}
