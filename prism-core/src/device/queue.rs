/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::{
    command::{encode_transitions, CommandList, ResolvedTransition},
    device::Device,
    track::PendingTransition,
};

use smallvec::SmallVec;

use pmt::SubresourceRange;

use std::sync::Arc;

use hal::{CommandList as _, Device as _, Fence as _, Queue as _};

enum Entry {
    Patch(usize),
    List(usize),
}

impl<A: hal::Api> Device<A> {
    /// Submits `lists` in recording order, resolving queued transitions
    /// against each resource's global tracker first.
    ///
    /// Transitions queued with a known entry state promise that the list
    /// itself moves the resource from that state to the target; a patch is
    /// only inserted when the global state disagrees with the promise.
    /// Transitions queued without one are performed entirely here, global
    /// state to target. Patches for a list are recorded into a scratch
    /// list spliced immediately before it, so earlier lists in the same
    /// submission observe none of this. After a list's transitions are
    /// resolved its local tracker is folded into the global ones.
    ///
    /// Everything models a single queue with one total submission order.
    /// Concurrent queues (async compute or copy) would need per-queue
    /// trackers reconciled through explicit fences; that extension is not
    /// attempted here.
    pub fn execute_command_lists(&mut self, lists: &mut [CommandList<A>]) {
        profiling::scope!("Device::execute_command_lists");

        for list in lists.iter() {
            assert!(
                !list.is_recording(),
                "list `{}` submitted while still recording",
                list.label(),
            );
        }

        let mut patches = Vec::new();
        let mut sequence = Vec::with_capacity(lists.len());

        for (index, list) in lists.iter_mut().enumerate() {
            let mut resolved = SmallVec::<[ResolvedTransition<A>; 8]>::new();
            for transition in list.drain_pending() {
                resolve_lazy(&transition, &mut resolved);
            }
            for (_, local) in list.drain_local_trackers() {
                local.resource.state_tracker().merge(&local.tracker);
            }
            if !resolved.is_empty() {
                log::trace!(
                    "stitching {} patch transitions in front of `{}`",
                    resolved.len(),
                    list.label(),
                );
                let mut patch = self.acquire_patch_list();
                encode_transitions::<A>(&mut patch, &resolved);
                unsafe { patch.end() };
                patches.push(patch);
                sequence.push(Entry::Patch(patches.len() - 1));
            }
            sequence.push(Entry::List(index));
        }

        let raw_lists = sequence
            .iter()
            .map(|entry| match *entry {
                Entry::Patch(index) => &patches[index],
                Entry::List(index) => lists[index].raw(),
            })
            .collect::<Vec<_>>();
        unsafe { self.queue.submit(&raw_lists) };

        // Used patch lists go back to the pool once the GPU is done with
        // this submission; without patches there is nothing to track.
        if !patches.is_empty() {
            self.fence_value += 1;
            unsafe { self.queue.signal(&self.fence, self.fence_value) };
            for patch in patches {
                self.patch_pool.push_back((self.fence_value, patch));
            }
        }
    }

    /// Pops a finished scratch list off the pool, or makes a fresh one.
    /// Never blocks on the fence.
    fn acquire_patch_list(&mut self) -> A::CommandList {
        if let Some(&(ready_at, _)) = self.patch_pool.front() {
            if unsafe { self.fence.completed_value() } >= ready_at {
                if let Some((_, mut list)) = self.patch_pool.pop_front() {
                    unsafe {
                        list.reset();
                        list.begin();
                    }
                    return list;
                }
            }
        }
        match unsafe { self.raw.create_command_list() } {
            Ok(mut list) => {
                unsafe { list.begin() };
                list
            }
            Err(error) => {
                log::error!("failed to create a barrier patch list: {}", error);
                panic!("out of command list memory");
            }
        }
    }
}

fn resolve_lazy<A: hal::Api>(
    transition: &PendingTransition<A>,
    patches: &mut SmallVec<[ResolvedTransition<A>; 8]>,
) {
    let resource = &transition.resource;
    let declared = transition.states.start;
    let target = transition.states.end;
    let full = resource.full_range();
    let mut tracker = resource.state_tracker();

    if transition.range == full && tracker.has_resource_state() {
        let global = tracker.resource_state();
        if global.is_unknown() {
            panic!(
                "resource `{}` has no known state to transition from",
                resource.label(),
            );
        }
        let expected = if declared.is_unknown() { target } else { declared };
        if global != expected {
            patches.push(ResolvedTransition {
                resource: Arc::clone(resource),
                range: full,
                states: global..expected,
            });
        }
        tracker.set_resource_state(target);
    } else {
        for mip in transition.range.mips.clone() {
            for layer in transition.range.layers.clone() {
                let global = tracker.subresource_state(mip, layer);
                if global.is_unknown() {
                    panic!(
                        "subresource ({}, {}) of `{}` has no known state to transition from",
                        mip,
                        layer,
                        resource.label(),
                    );
                }
                let expected = if declared.is_unknown() { target } else { declared };
                if global != expected {
                    patches.push(ResolvedTransition {
                        resource: Arc::clone(resource),
                        range: SubresourceRange {
                            mips: mip..mip + 1,
                            layers: layer..layer + 1,
                        },
                        states: global..expected,
                    });
                }
                tracker.set_subresource_state(mip, layer, target);
            }
        }
    }
}
