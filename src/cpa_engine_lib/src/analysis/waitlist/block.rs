use super::*;
use regex::Regex;

/// The name of the block of states without a call stack.
pub const ENTRY_BLOCK_NAME: &str = "main";

/// The states of one function block.
struct WaitBlock {
    name: String,
    /// States entering or staying in the block.
    main: Box<dyn Waitlist>,
    /// States returning into the block from a deeper block.
    /// They are taken before the states in `main`.
    extra: Box<dyn Waitlist>,
    /// The number of states added to the block since it was (re)activated.
    resources: usize,
    /// The call stack of the last state added to `main`.
    last_call_stack: Option<CallStack>,
    is_entry: bool,
}

impl WaitBlock {
    fn new(name: &str, is_entry: bool, factory: &WaitlistFactory) -> WaitBlock {
        WaitBlock {
            name: name.to_string(),
            main: factory(),
            extra: factory(),
            resources: 0,
            last_call_stack: None,
            is_entry,
        }
    }

    fn add_to_main(&mut self, item: WorkItem) {
        self.resources += 1;
        self.last_call_stack = Some(item.call_stack.clone());
        self.main.add(item);
    }

    fn add_to_extra(&mut self, item: WorkItem) {
        self.resources += 1;
        self.extra.add(item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        self.extra.pop().or_else(|| self.main.pop())
    }

    fn contains(&self, state: StateId) -> bool {
        self.main.contains(state) || self.extra.contains(state)
    }

    fn remove(&mut self, state: StateId) -> bool {
        self.main.remove(state) || self.extra.remove(state)
    }

    fn is_empty(&self) -> bool {
        self.main.is_empty() && self.extra.is_empty()
    }
}

impl Clone for WaitBlock {
    fn clone(&self) -> Self {
        WaitBlock {
            name: self.name.clone(),
            main: self.main.boxed_clone(),
            extra: self.extra.boxed_clone(),
            resources: self.resources,
            last_call_stack: self.last_call_stack.clone(),
            is_entry: self.is_entry,
        }
    }
}

/// A waitlist scheduling states per function block.
///
/// A function starts a new block if its name matches the block pattern.
/// The active blocks form a chain from the entry block to the current (innermost) block.
/// States are always taken from the current block, so the analysis finishes a function block
/// before it continues with the states of its callers.
///
/// Each block counts the states it receives.
/// When the count reaches the resource limit, the block gets *inactive*:
/// it leaves the active chain but still collects the states of its function.
/// Only when the active chain is empty are inactive blocks reactivated, oldest first.
/// The entry block is named after the function of the first state it receives
/// and is never deactivated.
///
/// The sub-waitlists of each block are created by the factory of the secondary waitlist order.
#[derive(Clone)]
pub struct BlockWaitlist {
    factory: WaitlistFactory,
    pattern: Regex,
    resource_limit: usize,
    /// The active chain, the current block is the last one.
    active: Vec<WaitBlock>,
    /// The inactive blocks, the oldest first.
    inactive: Vec<WaitBlock>,
    size: usize,
    exhausted: bool,
}

impl BlockWaitlist {
    /// Create an empty block waitlist.
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn new(
        factory: WaitlistFactory,
        pattern: &str,
        resource_limit: usize,
    ) -> Result<BlockWaitlist, Error> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|err| anyhow!("invalid block pattern {pattern}: {err}"))?;
        Ok(BlockWaitlist {
            factory,
            pattern,
            resource_limit,
            active: Vec::new(),
            inactive: Vec::new(),
            size: 0,
            exhausted: false,
        })
    }

    fn is_block_function(&self, function: &str) -> bool {
        self.pattern.is_match(function)
    }

    /// The names of the active blocks, the current block last.
    pub fn active_blocks(&self) -> Vec<&str> {
        self.active.iter().map(|block| block.name.as_str()).collect()
    }

    /// The names of the inactive blocks, the oldest first.
    pub fn inactive_blocks(&self) -> Vec<&str> {
        self.inactive.iter().map(|block| block.name.as_str()).collect()
    }

    /// The name of the block containing the state
    /// and whether the state is in the extra waitlist of the block.
    pub fn block_of(&self, state: StateId) -> Option<(&str, bool)> {
        self.active
            .iter()
            .chain(self.inactive.iter())
            .find(|block| block.contains(state))
            .map(|block| (block.name.as_str(), block.extra.contains(state)))
    }

    /// Deactivate the current block if it reached the resource limit.
    fn check_current_block(&mut self) {
        let hit_limit = match self.active.last() {
            Some(block) => !block.is_entry && block.resources >= self.resource_limit,
            None => false,
        };
        if hit_limit {
            if let Some(block) = self.active.pop() {
                self.inactive.push(block);
                self.exhausted = true;
            }
        }
    }

    /// Remove empty blocks from the end of the active chain.
    fn unlink_empty_blocks(&mut self) {
        while self.active.last().map_or(false, |block| block.is_empty()) {
            self.active.pop();
        }
    }

    /// Move the oldest non-empty inactive block back into the active chain.
    /// Returns `false` if there is no such block.
    fn reactivate(&mut self) -> bool {
        self.inactive.retain(|block| !block.is_empty());
        if self.inactive.is_empty() {
            return false;
        }
        let mut block = self.inactive.remove(0);
        block.resources = 0;
        self.active.push(block);
        true
    }

    fn inactive_block_mut(&mut self, function: &str) -> Option<&mut WaitBlock> {
        self.inactive.iter_mut().find(|block| block.name == function)
    }

    fn add_to_new_block(&mut self, function: &str, item: WorkItem) {
        let mut block = WaitBlock::new(function, false, &self.factory);
        block.add_to_main(item);
        self.active.push(block);
    }
}

impl Waitlist for BlockWaitlist {
    fn add(&mut self, item: WorkItem) {
        self.size += 1;
        let function = item
            .call_stack
            .current_function()
            .unwrap_or(ENTRY_BLOCK_NAME)
            .to_string();
        let Some(current) = self.active.len().checked_sub(1) else {
            if let Some(block) = self.inactive_block_mut(&function) {
                block.add_to_main(item);
            } else {
                let mut block = WaitBlock::new(&function, true, &self.factory);
                block.add_to_main(item);
                self.active.push(block);
            }
            return;
        };
        // A state returning into the previous block.
        if current > 0
            && self.active[current - 1].last_call_stack.as_ref() == Some(&item.call_stack)
        {
            self.active[current - 1].add_to_extra(item);
            return;
        }
        if function == self.active[current].name || !self.is_block_function(&function) {
            self.active[current].add_to_main(item);
            self.check_current_block();
            return;
        }
        if let Some(block) = self.inactive_block_mut(&function) {
            block.add_to_main(item);
            return;
        }
        if let Some(block) = self.active.iter_mut().find(|block| block.name == function) {
            block.add_to_main(item);
            return;
        }
        self.add_to_new_block(&function, item);
    }

    fn pop(&mut self) -> Option<WorkItem> {
        loop {
            self.unlink_empty_blocks();
            match self.active.last_mut() {
                Some(block) => {
                    if let Some(item) = block.pop() {
                        self.size -= 1;
                        self.unlink_empty_blocks();
                        return Some(item);
                    }
                }
                None => {
                    if !self.reactivate() {
                        return None;
                    }
                }
            }
        }
    }

    fn contains(&self, state: StateId) -> bool {
        self.block_of(state).is_some()
    }

    fn remove(&mut self, state: StateId) -> bool {
        let removed = self
            .active
            .iter_mut()
            .chain(self.inactive.iter_mut())
            .any(|block| block.remove(state));
        if removed {
            self.size -= 1;
            self.unlink_empty_blocks();
            self.inactive.retain(|block| !block.is_empty());
        }
        removed
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn len(&self) -> usize {
        self.size
    }

    fn clear(&mut self) {
        self.active.clear();
        self.inactive.clear();
        self.size = 0;
    }

    fn resource_exhausted(&self) -> bool {
        self.exhausted
    }

    fn boxed_clone(&self) -> Box<dyn Waitlist> {
        Box::new(self.clone())
    }
}
