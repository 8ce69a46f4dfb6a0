use super::*;
use fnv::FnvHashSet;

/// A read-only view on the part of a reached set from which a target state is backward reachable in the ARG.
///
/// The precisions of the visible states are computed by a substitution function,
/// e.g. to present the whole path to the target with the precision of the target.
pub struct SubgraphReachedSetView<'a, S: AbstractState, P: Precision> {
    reached: &'a ReachedSet<S, P>,
    target: StateId,
    /// The visible states ordered by their serial number.
    states: Vec<StateId>,
    members: FnvHashSet<StateId>,
    precision_of: Box<dyn Fn(StateId) -> Option<P> + 'a>,
}

impl<'a, S: AbstractState, P: Precision> SubgraphReachedSetView<'a, S, P> {
    /// Create a view on the states of `reached` from which `target` is reachable.
    pub fn new(
        reached: &'a ReachedSet<S, P>,
        target: StateId,
        precision_of: impl Fn(StateId) -> Option<P> + 'a,
    ) -> Self {
        let mut members = FnvHashSet::default();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if reached.arg.contains(id) && members.insert(id) {
                stack.extend(reached.arg.parents(id));
            }
        }
        let mut states: Vec<StateId> = members
            .iter()
            .copied()
            .filter(|id| reached.contains_state(*id))
            .collect();
        states.sort_by_key(|id| reached.arg.serial(*id));
        members.retain(|id| reached.contains_state(*id));
        SubgraphReachedSetView {
            reached,
            target,
            states,
            members,
            precision_of: Box::new(precision_of),
        }
    }

    /// Create a view in which every state has the precision of the target state.
    pub fn with_target_precision(reached: &'a ReachedSet<S, P>, target: StateId) -> Self {
        let precision = reached.precision(target).cloned();
        SubgraphReachedSetView::new(reached, target, move |_| precision.clone())
    }

    pub fn target(&self) -> StateId {
        self.target
    }
}

impl<'a, S: AbstractState, P: Precision> UnmodifiableReachedSet<S, P>
    for SubgraphReachedSetView<'a, S, P>
{
    fn arg(&self) -> &Arg<S, P> {
        &self.reached.arg
    }

    fn states(&self) -> Vec<StateId> {
        self.states.clone()
    }

    fn reached(&self, location: Location) -> Vec<StateId> {
        self.reached
            .reached(location)
            .into_iter()
            .filter(|id| self.members.contains(id))
            .collect()
    }

    fn contains(&self, state: StateId) -> bool {
        self.members.contains(&state)
    }

    fn precision_of(&self, state: StateId) -> Option<P> {
        if self.members.contains(&state) {
            (self.precision_of)(state)
        } else {
            None
        }
    }

    fn first_state(&self) -> Option<StateId> {
        self.states.first().copied()
    }

    fn last_state(&self) -> Option<StateId> {
        self.states.last().copied()
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}
