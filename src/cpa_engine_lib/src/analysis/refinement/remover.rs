use super::{ArgPath, PathElement, PathOrigin, RemovalStrategy};
use crate::analysis::arg::StateId;
use crate::analysis::bam::{BamCacheSynchronized, EntryId};
use crate::analysis::reached_set::{ReachedSet, UnmodifiableReachedSet};
use crate::cpa::{AbstractState, Precision};
use crate::prelude::*;
use fnv::FnvHashSet;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What a subtree removal did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalSummary {
    /// The number of states removed from the ARG.
    pub removed: usize,
    /// The number of states put back into the waitlist.
    pub readded: usize,
    /// The invalidated cache entries.
    pub invalidated: Vec<EntryId>,
}

/// Removes the part of the reached set that depends on an infeasible path element.
pub trait SubtreeRemover<S: AbstractState, P: Precision> {
    /// Remove the element at `index` of `path`, all states computed from it
    /// and all cache entries that contain it or a removed state.
    /// States computed from the summary of an invalidated cache entry are removed as well,
    /// at every place the summary was used.
    /// The parents of removed states that were not removed are put back into the waitlist with `precision`.
    ///
    /// Panics if `index` is not an index of `path`.
    fn remove_subtree(
        &self,
        reached: &mut ReachedSet<S, P>,
        path: &ArgPath<S, P>,
        index: usize,
        precision: &P,
    ) -> Result<RemovalSummary, AnalysisError>;
}

/// Create the subtree remover for the given strategy.
pub fn subtree_remover<S: AbstractState, P: Precision>(
    strategy: RemovalStrategy,
    cache: Option<Arc<BamCacheSynchronized<S, P>>>,
) -> Box<dyn SubtreeRemover<S, P>> {
    match strategy {
        RemovalStrategy::InPlace => Box::new(InPlaceSubtreeRemover { cache }),
        RemovalStrategy::CopyOnWrite => Box::new(CopyOnWriteSubtreeRemover { cache }),
    }
}

fn checked_element<S: AbstractState, P: Precision>(path: &ArgPath<S, P>, index: usize) -> &PathElement<S, P> {
    assert!(
        index < path.len(),
        "path element {index} out of bounds for a path of length {}",
        path.len()
    );
    &path.elements()[index]
}

/// The serial number of the main state that has to be removed to remove the element at `index`.
/// For an element inside a block summary this is the next element outside of all summaries.
fn cut_serial<S: AbstractState, P: Precision>(path: &ArgPath<S, P>, index: usize) -> Option<u64> {
    path.elements()[index..]
        .iter()
        .find(|element| !element.is_in_block())
        .map(|element| element.serial)
}

/// The states and cache entries a removal affects.
struct RemovalPlan {
    removed: BTreeSet<StateId>,
    outside_parents: BTreeSet<StateId>,
    invalidated: Vec<EntryId>,
}

impl RemovalPlan {
    /// Plan the removal of `cut` for the element at `index` of `path`.
    /// Without a cut state only the summaries enclosing the element and their usages are removed.
    fn new<S: AbstractState, P: Precision>(
        reached: &ReachedSet<S, P>,
        path: &ArgPath<S, P>,
        index: usize,
        cut: Option<StateId>,
        cache: Option<&Arc<BamCacheSynchronized<S, P>>>,
    ) -> Result<RemovalPlan, AnalysisError> {
        let arg = reached.arg();
        if let Some(cut) = cut {
            if arg.parents(cut).is_empty() {
                return Err(AnalysisError::RefinementFailed(anyhow!(
                    "cannot remove the root state #{}",
                    arg.serial(cut)
                )));
            }
        }

        let mut entries = Vec::new();
        let mut discarded_serials = FnvHashSet::default();
        if let PathOrigin::Block {
            entries: enclosing,
            reached: inner,
            state,
            ..
        } = &path.elements()[index].origin
        {
            entries = enclosing.clone();
            discarded_serials.extend(
                inner
                    .subtree_with_covered(*state)
                    .into_iter()
                    .map(|id| inner.arg().serial(id)),
            );
        }
        let invalidated: BTreeSet<EntryId> = match cache {
            Some(cache) => cache.dependent_entries(&entries, &discarded_serials),
            None => entries.into_iter().collect(),
        };

        let mut cut_states: BTreeSet<StateId> = cut.into_iter().collect();
        let invalid: FnvHashSet<EntryId> = invalidated.iter().copied().collect();
        cut_states.extend(arg.summary_usages(&invalid));
        let mut removed = BTreeSet::new();
        for state in cut_states {
            removed.extend(reached.subtree_with_covered(state));
        }
        let mut outside_parents = BTreeSet::new();
        for id in &removed {
            for parent in arg.parents(*id) {
                if !removed.contains(&parent) {
                    outside_parents.insert(parent);
                }
            }
        }
        Ok(RemovalPlan {
            removed,
            outside_parents,
            invalidated: invalidated.into_iter().collect(),
        })
    }

    /// Remove the planned states from the reached set and the ARG
    /// and put their outside parents back into the waitlist.
    fn apply<S: AbstractState, P: Precision>(
        &self,
        reached: &mut ReachedSet<S, P>,
        precision: &P,
    ) -> (usize, usize) {
        for id in &self.removed {
            reached.remove(*id);
            reached.arg_mut().remove_from_graph(*id);
        }
        let readded = self
            .outside_parents
            .iter()
            .filter(|parent| reached.readd_to_waitlist(**parent, precision.clone()))
            .count();
        (self.removed.len(), readded)
    }

    fn invalidate<S: AbstractState, P: Precision>(
        &self,
        cache: Option<&Arc<BamCacheSynchronized<S, P>>>,
    ) -> Vec<EntryId> {
        if let Some(cache) = cache {
            cache.remove_entries(&self.invalidated);
        }
        self.invalidated.clone()
    }
}

/// Removes subtrees directly from the reached set.
///
/// Path elements are resolved through their state IDs,
/// so the path has to be extracted from the current reached set.
/// A removal invalidates all paths extracted before it.
pub struct InPlaceSubtreeRemover<S, P> {
    pub cache: Option<Arc<BamCacheSynchronized<S, P>>>,
}

impl<S: AbstractState, P: Precision> SubtreeRemover<S, P> for InPlaceSubtreeRemover<S, P> {
    /// Panics if the element does not belong to `reached`.
    fn remove_subtree(
        &self,
        reached: &mut ReachedSet<S, P>,
        path: &ArgPath<S, P>,
        index: usize,
        precision: &P,
    ) -> Result<RemovalSummary, AnalysisError> {
        let cut = checked_element(path, index).cut_state();
        assert!(
            reached.arg().contains(cut),
            "path element {index} does not belong to the reached set"
        );
        let plan = RemovalPlan::new(reached, path, index, Some(cut), self.cache.as_ref())?;
        let invalidated = plan.invalidate(self.cache.as_ref());
        let (removed, readded) = plan.apply(reached, precision);
        Ok(RemovalSummary {
            removed,
            readded,
            invalidated,
        })
    }
}

/// Applies the removal to a copy of the reached set.
///
/// Path elements are resolved through the serial numbers of their states,
/// so several paths extracted from the same reached set can be refined one after the other:
/// a part of a path that an earlier removal already discarded is skipped,
/// while the summaries enclosing it are still invalidated.
/// If planning the removal fails, neither the reached set nor the cache are changed.
pub struct CopyOnWriteSubtreeRemover<S, P> {
    pub cache: Option<Arc<BamCacheSynchronized<S, P>>>,
}

impl<S: AbstractState, P: Precision> CopyOnWriteSubtreeRemover<S, P> {
    /// Return a copy of `reached` with the element at `index` of `path` removed.
    /// `reached` itself is not changed and stays valid for the paths extracted from it,
    /// but the invalidated cache entries are removed from the cache.
    pub fn removed_copy(
        &self,
        reached: &ReachedSet<S, P>,
        path: &ArgPath<S, P>,
        index: usize,
        precision: &P,
    ) -> Result<(ReachedSet<S, P>, RemovalSummary), AnalysisError> {
        checked_element(path, index);
        let cut = cut_serial(path, index).and_then(|serial| reached.arg().state_with_serial(serial));
        let plan = RemovalPlan::new(reached, path, index, cut, self.cache.as_ref())?;
        let mut copy = reached.clone();
        let (removed, readded) = plan.apply(&mut copy, precision);
        let invalidated = plan.invalidate(self.cache.as_ref());
        Ok((
            copy,
            RemovalSummary {
                removed,
                readded,
                invalidated,
            },
        ))
    }
}

impl<S: AbstractState, P: Precision> SubtreeRemover<S, P> for CopyOnWriteSubtreeRemover<S, P> {
    fn remove_subtree(
        &self,
        reached: &mut ReachedSet<S, P>,
        path: &ArgPath<S, P>,
        index: usize,
        precision: &P,
    ) -> Result<RemovalSummary, AnalysisError> {
        let (copy, summary) = self.removed_copy(reached, path, index, precision)?;
        *reached = copy;
        Ok(summary)
    }
}
