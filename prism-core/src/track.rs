/*! Resource state tracking.
 *
 * A tracker is either in aggregate mode, holding one state for the whole
 * resource, or in sparse mode, holding a map of (mip, layer) overrides
 * plus a state histogram. The histogram notices the moment every cell
 * agrees again and collapses the tracker back to aggregate mode, so
 * whole-resource transitions stay O(1) and partial mip/layer transitions
 * stay exact.
 *
 * Each resource owns two kinds of trackers on different timelines: the
 * global one, authoritative across submissions, and short-lived local
 * ones owned by recording command lists. Only submission is allowed to
 * reconcile the two.
!*/

use crate::resource::Resource;

use fxhash::FxHashMap;
use pmt::{ResourceState, SubresourceRange};

use std::{ops::Range, sync::Arc};

/// State timeline of one resource's subresource grid.
#[derive(Clone, Debug)]
pub struct ResourceStateTracker {
    aggregate: ResourceState,
    subresources: FxHashMap<(u32, u32), ResourceState>,
    state_counts: FxHashMap<ResourceState, u32>,
    mip_level_count: u32,
    array_layer_count: u32,
}

impl ResourceStateTracker {
    pub fn new(initial: ResourceState, mip_level_count: u32, array_layer_count: u32) -> Self {
        Self {
            aggregate: initial,
            subresources: FxHashMap::default(),
            state_counts: FxHashMap::default(),
            mip_level_count,
            array_layer_count,
        }
    }

    /// True while no subresource diverges from the aggregate state.
    pub fn has_resource_state(&self) -> bool {
        self.subresources.is_empty()
    }

    /// The aggregate state. Only meaningful in aggregate mode.
    pub fn resource_state(&self) -> ResourceState {
        debug_assert!(self.has_resource_state());
        self.aggregate
    }

    /// Moves the whole grid to `state`, dropping any sparse entries.
    pub fn set_resource_state(&mut self, state: ResourceState) {
        self.subresources.clear();
        self.state_counts.clear();
        self.aggregate = state;
    }

    pub fn subresource_state(&self, mip_level: u32, array_layer: u32) -> ResourceState {
        match self.subresources.get(&(mip_level, array_layer)) {
            Some(&state) => state,
            None => self.aggregate,
        }
    }

    pub fn set_subresource_state(&mut self, mip_level: u32, array_layer: u32, state: ResourceState) {
        if self.has_resource_state() && self.aggregate == state {
            return;
        }
        let key = (mip_level, array_layer);
        if let Some(&old) = self.subresources.get(&key) {
            if let Some(count) = self.state_counts.get_mut(&old) {
                *count -= 1;
                if *count == 0 {
                    self.state_counts.remove(&old);
                }
            }
        }
        self.subresources.insert(key, state);
        *self.state_counts.entry(state).or_insert(0) += 1;

        // Collapse once one state spans every cell of the grid.
        if self.state_counts.len() == 1 {
            if let Some((&uniform, &count)) = self.state_counts.iter().next() {
                if count == self.mip_level_count * self.array_layer_count {
                    self.set_resource_state(uniform);
                }
            }
        }
    }

    /// Folds the states another tracker ended on into this one.
    ///
    /// Cells the other tracker never saw stay untouched here.
    pub fn merge(&mut self, other: &ResourceStateTracker) {
        debug_assert_eq!(self.mip_level_count, other.mip_level_count);
        debug_assert_eq!(self.array_layer_count, other.array_layer_count);
        if other.has_resource_state() {
            let state = other.resource_state();
            if !state.is_unknown() {
                self.set_resource_state(state);
            }
        } else {
            for mip_level in 0..other.mip_level_count {
                for array_layer in 0..other.array_layer_count {
                    let state = other.subresource_state(mip_level, array_layer);
                    if !state.is_unknown() {
                        self.set_subresource_state(mip_level, array_layer, state);
                    }
                }
            }
        }
    }
}

/// A transition recorded without a known entry state, waiting for the
/// submission order to provide one.
///
/// Produced during recording, consumed exactly once by submission.
pub(crate) struct PendingTransition<A: hal::Api> {
    pub resource: Arc<Resource<A>>,
    pub range: SubresourceRange,
    /// `states.start` is the entry state the recorded commands assumed,
    /// or `UNKNOWN` if the caller declared none.
    pub states: Range<ResourceState>,
}
