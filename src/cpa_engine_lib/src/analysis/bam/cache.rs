//! The cache of block summaries.

use crate::analysis::arg::StateId;
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::cfa::{Block, BlockId};
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;
use fnv::{FnvHashMap, FnvHashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(0);

/// The unique ID of a cache entry.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl EntryId {
    fn fresh() -> EntryId {
        EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The key of a block summary: the reduced entry state and precision and the block.
/// Keys are compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey<S, P> {
    pub state: S,
    pub precision: P,
    pub block: BlockId,
}

/// The summary of a block for one cache key.
#[derive(Debug)]
pub struct CacheEntry<S, P> {
    pub id: EntryId,
    /// The reached set of the analysis of the block.
    pub reached: Arc<ReachedSet<S, P>>,
    /// The states of `reached` at block exits and the target states of `reached`.
    pub exit_states: Vec<StateId>,
    pub last_state: Option<StateId>,
    /// `false` if the analysis of the block stopped before reaching a fixpoint.
    pub precise: bool,
}

impl<S, P> Clone for CacheEntry<S, P> {
    fn clone(&self) -> Self {
        CacheEntry {
            id: self.id,
            reached: self.reached.clone(),
            exit_states: self.exit_states.clone(),
            last_state: self.last_state,
            precise: self.precise,
        }
    }
}

impl<S: AbstractState, P: Precision> CacheEntry<S, P> {
    /// Returns `true` if the reached set of the entry contains a state with one of the given serial numbers.
    pub fn contains_any(&self, serials: &FnvHashSet<u64>) -> bool {
        serials
            .iter()
            .any(|serial| self.reached.arg().state_with_serial(*serial).is_some())
    }

    /// Returns `true` if the reached set of the entry uses the summary of one of the given entries.
    pub fn uses_any(&self, ids: &FnvHashSet<EntryId>) -> bool {
        !self.reached.arg().summary_usages(ids).is_empty()
    }

    /// The abstract states at the exits of the entry.
    pub fn exit_values(&self) -> FnvHashSet<&S> {
        self.exit_states
            .iter()
            .map(|id| self.reached.arg().state(*id))
            .collect()
    }
}

/// Counters of cache operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Lookups returning a precise entry.
    pub hits: u64,
    /// Lookups without a precise entry.
    pub misses: u64,
    /// Stored entries.
    pub puts: u64,
    /// Summaries that were not stored because the cache was full.
    pub uncached: u64,
    /// Entries removed by refinements.
    pub removed: u64,
}

/// The cache of block summaries.
pub struct BamCache<S, P> {
    entries: FnvHashMap<CacheKey<S, P>, CacheEntry<S, P>>,
    keys: FnvHashMap<EntryId, CacheKey<S, P>>,
    max_entries: Option<usize>,
    statistics: CacheStatistics,
}

impl<S: AbstractState, P: Precision> BamCache<S, P> {
    /// Create an empty cache holding at most `max_entries` entries.
    pub fn new(max_entries: Option<usize>) -> Self {
        BamCache {
            entries: FnvHashMap::default(),
            keys: FnvHashMap::default(),
            max_entries,
            statistics: CacheStatistics::default(),
        }
    }

    /// Look up the entry for a key.
    /// Partial entries are returned as well, but count as a miss.
    pub fn get(&mut self, key: &CacheKey<S, P>) -> Option<CacheEntry<S, P>> {
        let entry = self.entries.get(key).cloned();
        match &entry {
            Some(entry) if entry.precise => self.statistics.hits += 1,
            _ => self.statistics.misses += 1,
        }
        entry
    }

    pub fn contains_precise_key(&self, key: &CacheKey<S, P>) -> bool {
        self.entries.get(key).map_or(false, |entry| entry.precise)
    }

    /// Store the result of analyzing `block` for `key`.
    ///
    /// A partial entry for the key is replaced.
    /// If a precise entry with the same exit states already exists, that entry is kept and returned.
    /// A precise entry with different exit states means the reducer is not deterministic, which is an error.
    /// If the cache is full, the returned entry is not stored.
    pub fn put(
        &mut self,
        key: CacheKey<S, P>,
        block: &Block,
        reached: ReachedSet<S, P>,
        precise: bool,
    ) -> Result<CacheEntry<S, P>, AnalysisError> {
        let exit_states: Vec<StateId> = reached
            .states()
            .into_iter()
            .filter(|id| {
                let state = reached.arg().state(*id);
                block.is_exit(state.location()) || state.is_target()
            })
            .collect();
        let entry = CacheEntry {
            id: EntryId::fresh(),
            last_state: reached.last_state(),
            reached: Arc::new(reached),
            exit_states,
            precise,
        };
        if let Some(existing) = self.entries.get(&key) {
            if existing.precise {
                if precise && existing.exit_values() != entry.exit_values() {
                    return Err(AnalysisError::ReducerNonDeterminism {
                        block: block.name.clone(),
                    });
                }
                return Ok(existing.clone());
            }
        } else if self.max_entries.map_or(false, |max| self.entries.len() >= max) {
            self.statistics.uncached += 1;
            return Ok(entry);
        }
        self.statistics.puts += 1;
        if let Some(old) = self.entries.insert(key.clone(), entry.clone()) {
            self.keys.remove(&old.id);
        }
        self.keys.insert(entry.id, key);
        Ok(entry)
    }

    /// Remove the entries with the given IDs. Returns the number of removed entries.
    pub fn remove_entries(&mut self, ids: &[EntryId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(key) = self.keys.remove(id) {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        self.statistics.removed += removed as u64;
        removed
    }

    /// The entries that become invalid together with the entries `ids`:
    /// the entries `ids` themselves, the stored entries containing a state with one of the given serial numbers,
    /// and transitively every stored entry whose reached set uses the summary of an invalid entry.
    /// The cache is not modified.
    pub fn dependent_entries(&self, ids: &[EntryId], serials: &FnvHashSet<u64>) -> BTreeSet<EntryId> {
        let mut invalid: FnvHashSet<EntryId> = ids.iter().copied().collect();
        invalid.extend(
            self.entries
                .values()
                .filter(|entry| entry.contains_any(serials))
                .map(|entry| entry.id),
        );
        loop {
            let users: Vec<EntryId> = self
                .entries
                .values()
                .filter(|entry| !invalid.contains(&entry.id) && entry.uses_any(&invalid))
                .map(|entry| entry.id)
                .collect();
            if users.is_empty() {
                break;
            }
            invalid.extend(users);
        }
        invalid.into_iter().collect()
    }

    /// The IDs of all entries.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.keys.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.statistics
    }
}

/// A [`BamCache`] that can be shared between threads.
///
/// Every operation locks the cache for its own duration only.
/// In particular, the cache is not locked while a block is analyzed.
pub struct BamCacheSynchronized<S, P> {
    cache: Mutex<BamCache<S, P>>,
}

impl<S: AbstractState, P: Precision> BamCacheSynchronized<S, P> {
    pub fn new(max_entries: Option<usize>) -> Self {
        BamCacheSynchronized {
            cache: Mutex::new(BamCache::new(max_entries)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BamCache<S, P>> {
        // The cache is consistent after each operation, so a panic in another thread does not corrupt it.
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey<S, P>) -> Option<CacheEntry<S, P>> {
        self.lock().get(key)
    }

    pub fn contains_precise_key(&self, key: &CacheKey<S, P>) -> bool {
        self.lock().contains_precise_key(key)
    }

    pub fn put(
        &self,
        key: CacheKey<S, P>,
        block: &Block,
        reached: ReachedSet<S, P>,
        precise: bool,
    ) -> Result<CacheEntry<S, P>, AnalysisError> {
        self.lock().put(key, block, reached, precise)
    }

    pub fn remove_entries(&self, ids: &[EntryId]) -> usize {
        self.lock().remove_entries(ids)
    }

    pub fn dependent_entries(&self, ids: &[EntryId], serials: &FnvHashSet<u64>) -> BTreeSet<EntryId> {
        self.lock().dependent_entries(ids, serials)
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.lock().entry_ids()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.lock().statistics()
    }
}
