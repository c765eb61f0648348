/*! Command list recording.
 *
 * Recording is single-writer and sees only its own list. Barrier
 * requests consult a command-local tracker: transitions whose entry
 * state the list has already established are encoded right here, while
 * transitions that depend on cross-list history become pending
 * transitions, handed to submission as an ordered message list. The
 * resource's global tracker is never read or written during recording,
 * which is what lets independent lists record on separate threads.
!*/

use crate::{
    resource::{RawResource, Resource, ResourceId, View},
    track::{PendingTransition, ResourceStateTracker},
};

use fxhash::FxHashMap;
use hal::CommandList as _;
use pmt::{ResourceState, SubresourceRange};
use smallvec::SmallVec;

use std::{iter, ops::Range, sync::Arc};

/// One caller barrier request.
#[derive(Debug)]
pub struct BarrierRequest<'a, A: hal::Api> {
    pub resource: &'a Arc<Resource<A>>,
    /// Covered subresource window. `None` covers the whole grid.
    pub range: Option<SubresourceRange>,
    /// Entry state the recorded commands assume, or `UNKNOWN` to let the
    /// trackers decide.
    pub state_before: ResourceState,
    pub state_after: ResourceState,
}

/// A transition with both states known, ready for the backend.
pub(crate) struct ResolvedTransition<A: hal::Api> {
    pub resource: Arc<Resource<A>>,
    pub range: SubresourceRange,
    pub states: Range<ResourceState>,
}

pub(crate) struct LocalState<A: hal::Api> {
    pub resource: Arc<Resource<A>>,
    pub tracker: ResourceStateTracker,
}

/// A recorded or recording command list.
///
/// Dropping a recorded list without submitting it is the one way to
/// cancel its work.
pub struct CommandList<A: hal::Api> {
    raw: A::CommandList,
    label: String,
    trackers: FxHashMap<ResourceId, LocalState<A>>,
    pending: Vec<PendingTransition<A>>,
    recording: bool,
}

impl<A: hal::Api> CommandList<A> {
    /// Wraps a raw list that is already open for recording.
    pub(crate) fn new(raw: A::CommandList, label: String) -> Self {
        Self {
            raw,
            label,
            trackers: FxHashMap::default(),
            pending: Vec::new(),
            recording: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub(crate) fn raw(&self) -> &A::CommandList {
        &self.raw
    }

    /// Records state transitions, deferring the ones whose entry state
    /// this list cannot know yet.
    pub fn resource_barrier(&mut self, requests: &[BarrierRequest<'_, A>]) {
        profiling::scope!("CommandList::resource_barrier");
        assert!(
            self.recording,
            "barrier recorded on closed list `{}`",
            self.label
        );
        let mut staged = SmallVec::<[ResolvedTransition<A>; 8]>::new();

        for request in requests {
            assert!(
                !request.state_after.is_unknown(),
                "barrier on `{}` must name a target state",
                request.resource.label()
            );
            if let RawResource::Sampler(..) = *request.resource.raw() {
                panic!(
                    "sampler `{}` has no state timeline to transition",
                    request.resource.label()
                );
            }

            let full = request.resource.full_range();
            let range = match request.range {
                Some(ref range) => {
                    debug_assert!(
                        range.mips.end <= full.mips.end && range.layers.end <= full.layers.end,
                        "barrier range exceeds the grid of `{}`",
                        request.resource.label()
                    );
                    range.clone()
                }
                None => full.clone(),
            };

            let local = self
                .trackers
                .entry(request.resource.id())
                .or_insert_with(|| LocalState {
                    resource: Arc::clone(request.resource),
                    tracker: ResourceStateTracker::new(
                        ResourceState::UNKNOWN,
                        request.resource.level_count(),
                        request.resource.layer_count(),
                    ),
                });

            if range == full && local.tracker.has_resource_state() {
                // Whole grid against an aggregate local tracker: one entry.
                let before = local.tracker.resource_state();
                if before.is_unknown() {
                    self.pending.push(PendingTransition {
                        resource: Arc::clone(request.resource),
                        range,
                        states: request.state_before..request.state_after,
                    });
                } else if before != request.state_after {
                    staged.push(ResolvedTransition {
                        resource: Arc::clone(request.resource),
                        range,
                        states: before..request.state_after,
                    });
                }
                local.tracker.set_resource_state(request.state_after);
            } else {
                for mip_level in range.mips.clone() {
                    for array_layer in range.layers.clone() {
                        let before = local.tracker.subresource_state(mip_level, array_layer);
                        let cell = SubresourceRange {
                            mips: mip_level..mip_level + 1,
                            layers: array_layer..array_layer + 1,
                        };
                        if before.is_unknown() {
                            self.pending.push(PendingTransition {
                                resource: Arc::clone(request.resource),
                                range: cell,
                                states: request.state_before..request.state_after,
                            });
                        } else if before != request.state_after {
                            staged.push(ResolvedTransition {
                                resource: Arc::clone(request.resource),
                                range: cell,
                                states: before..request.state_after,
                            });
                        }
                        local.tracker.set_subresource_state(
                            mip_level,
                            array_layer,
                            request.state_after,
                        );
                    }
                }
            }
        }

        if !staged.is_empty() {
            encode_transitions(&mut self.raw, &staged);
        }
    }

    /// Transitions exactly the subresource window a view covers.
    pub fn view_barrier(&mut self, view: &View<A>, state_after: ResourceState) {
        self.resource_barrier(&[BarrierRequest {
            resource: view.resource(),
            range: Some(view.range().clone()),
            state_before: ResourceState::UNKNOWN,
            state_after,
        }]);
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &Arc<Resource<A>>,
        src_offset: pmt::BufferAddress,
        dst: &Arc<Resource<A>>,
        dst_offset: pmt::BufferAddress,
        size: pmt::BufferSize,
    ) {
        self.resource_barrier(&[
            BarrierRequest {
                resource: src,
                range: None,
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_SOURCE,
            },
            BarrierRequest {
                resource: dst,
                range: None,
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_DEST,
            },
        ]);
        unsafe {
            self.raw.copy_buffer_to_buffer(
                src.expect_buffer(),
                dst.expect_buffer(),
                iter::once(hal::BufferCopy {
                    src_offset,
                    dst_offset,
                    size,
                }),
            );
        }
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Arc<Resource<A>>,
        buffer_offset: pmt::BufferAddress,
        dst: &Arc<Resource<A>>,
        mip_level: u32,
        array_layer: u32,
        size: pmt::Extent3d,
    ) {
        self.resource_barrier(&[
            BarrierRequest {
                resource: src,
                range: None,
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_SOURCE,
            },
            BarrierRequest {
                resource: dst,
                range: Some(SubresourceRange {
                    mips: mip_level..mip_level + 1,
                    layers: array_layer..array_layer + 1,
                }),
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_DEST,
            },
        ]);
        unsafe {
            self.raw.copy_buffer_to_texture(
                src.expect_buffer(),
                dst.expect_texture(),
                iter::once(hal::BufferTextureCopy {
                    buffer_offset,
                    mip_level,
                    array_layer,
                    size,
                }),
            );
        }
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Arc<Resource<A>>,
        mip_level: u32,
        array_layer: u32,
        dst: &Arc<Resource<A>>,
        buffer_offset: pmt::BufferAddress,
        size: pmt::Extent3d,
    ) {
        self.resource_barrier(&[
            BarrierRequest {
                resource: src,
                range: Some(SubresourceRange {
                    mips: mip_level..mip_level + 1,
                    layers: array_layer..array_layer + 1,
                }),
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_SOURCE,
            },
            BarrierRequest {
                resource: dst,
                range: None,
                state_before: ResourceState::UNKNOWN,
                state_after: ResourceState::COPY_DEST,
            },
        ]);
        unsafe {
            self.raw.copy_texture_to_buffer(
                src.expect_texture(),
                dst.expect_buffer(),
                iter::once(hal::BufferTextureCopy {
                    buffer_offset,
                    mip_level,
                    array_layer,
                    size,
                }),
            );
        }
    }

    /// Ends recording. The list can then be submitted.
    pub fn close(&mut self) {
        assert!(self.recording, "list `{}` is already closed", self.label);
        unsafe { self.raw.end() };
        self.recording = false;
    }

    /// Drops all recorded work and reopens the list for recording.
    pub fn reset(&mut self) {
        self.trackers.clear();
        self.pending.clear();
        unsafe {
            self.raw.reset();
            self.raw.begin();
        }
        self.recording = true;
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<PendingTransition<A>> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn drain_local_trackers(&mut self) -> FxHashMap<ResourceId, LocalState<A>> {
        std::mem::take(&mut self.trackers)
    }
}

/// Splits resolved transitions by resource flavor and encodes them.
pub(crate) fn encode_transitions<A: hal::Api>(
    raw: &mut A::CommandList,
    transitions: &[ResolvedTransition<A>],
) {
    let buffers = transitions.iter().filter_map(|transition| {
        match *transition.resource.raw() {
            RawResource::Buffer(ref raw_buffer) => Some(hal::BufferBarrier {
                buffer: raw_buffer,
                states: transition.states.clone(),
            }),
            RawResource::Texture(..) | RawResource::Sampler(..) => None,
        }
    });
    unsafe { raw.transition_buffers(buffers) };

    let textures = transitions.iter().filter_map(|transition| {
        match *transition.resource.raw() {
            RawResource::Texture(ref raw_texture) => Some(hal::TextureBarrier {
                texture: raw_texture,
                range: transition.range.clone(),
                states: transition.states.clone(),
            }),
            RawResource::Buffer(..) | RawResource::Sampler(..) => None,
        }
    });
    unsafe { raw.transition_textures(textures) };
}
