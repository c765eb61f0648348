/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::{
    binding_model::{
        BindingSet, BindingSetEntry, BindingSetLayout, BindingSetLayoutEntry,
        CreateBindingSetError, CreateBindingSetLayoutError,
    },
    command::CommandList,
    descriptor::DescriptorPool,
    resource::{CreateViewError, Resource, ResourceId, View, ViewDescriptor},
};

use hal::{CommandList as _, Device as _, Fence as _, Queue as _};

use pmt::ResourceState;

use std::{
    collections::VecDeque,
    ptr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

mod queue;

/// A logical device over one backend device and one submission queue.
///
/// The device hands out resources, views, command lists, and binding sets,
/// and is the only place global resource state advances: submission takes
/// `&mut self`, so command lists may record on any thread but every
/// submission is serialized through here.
pub struct Device<A: hal::Api> {
    raw: Arc<A::Device>,
    queue: A::Queue,
    fence: A::Fence,
    /// Value of the last signal enqueued on the queue.
    fence_value: hal::FenceValue,
    /// Scratch lists used for barrier patching, keyed by the fence value
    /// whose completion makes each one safe to reuse.
    patch_pool: VecDeque<(hal::FenceValue, A::CommandList)>,
    descriptors: DescriptorPool<A>,
    resource_ids: AtomicU64,
}

impl<A: hal::Api> Device<A> {
    pub fn new(open: hal::OpenDevice<A>) -> Result<Self, hal::DeviceError> {
        let raw = Arc::new(open.device);
        let fence = unsafe { raw.create_fence(0)? };
        let descriptors = DescriptorPool::new(&raw);
        Ok(Self {
            raw,
            queue: open.queue,
            fence,
            fence_value: 0,
            patch_pool: VecDeque::new(),
            descriptors,
            resource_ids: AtomicU64::new(1),
        })
    }

    pub fn queue(&self) -> &A::Queue {
        &self.queue
    }

    /// The shader-visible descriptor pool backing binding sets.
    pub fn descriptors(&self) -> &DescriptorPool<A> {
        &self.descriptors
    }

    /// Highest fence value the backend reports as finished.
    pub fn last_completed(&self) -> hal::FenceValue {
        unsafe { self.fence.completed_value() }
    }

    fn next_id(&self) -> ResourceId {
        ResourceId(self.resource_ids.fetch_add(1, Ordering::Relaxed))
    }

    pub fn create_buffer(
        &self,
        desc: &pmt::BufferDescriptor<hal::Label<'_>>,
    ) -> Result<Arc<Resource<A>>, hal::DeviceError> {
        let raw = unsafe { self.raw.create_buffer(desc)? };
        // Upload buffers are born CPU-visible and readable by everything;
        // readback buffers exist to receive copies.
        let initial = match desc.memory {
            pmt::MemoryKind::Default => ResourceState::COMMON,
            pmt::MemoryKind::Upload => ResourceState::GENERIC_READ,
            pmt::MemoryKind::Readback => ResourceState::COPY_DEST,
        };
        let label = desc.label.unwrap_or("").to_string();
        log::trace!("created buffer `{}` of {} bytes", label, desc.size);
        Ok(Arc::new(Resource::new_buffer(
            raw,
            self.next_id(),
            label,
            desc.memory,
            desc.size,
            initial,
        )))
    }

    pub fn create_texture(
        &self,
        desc: &pmt::TextureDescriptor<hal::Label<'_>>,
    ) -> Result<Arc<Resource<A>>, hal::DeviceError> {
        let raw = unsafe { self.raw.create_texture(desc)? };
        let initial = if desc.back_buffer {
            ResourceState::PRESENT
        } else {
            desc.initial_state
        };
        let label = desc.label.unwrap_or("").to_string();
        log::trace!(
            "created texture `{}`, {} mips x {} layers",
            label,
            desc.mip_level_count,
            desc.array_layer_count(),
        );
        Ok(Arc::new(Resource::new_texture(
            raw,
            self.next_id(),
            label,
            desc.mip_level_count,
            desc.array_layer_count(),
            desc.back_buffer,
            initial,
        )))
    }

    pub fn create_sampler(
        &self,
        desc: &pmt::SamplerDescriptor<hal::Label<'_>>,
    ) -> Result<Arc<Resource<A>>, hal::DeviceError> {
        let raw = unsafe { self.raw.create_sampler(desc)? };
        let label = desc.label.unwrap_or("").to_string();
        Ok(Arc::new(Resource::new_sampler(raw, self.next_id(), label)))
    }

    pub fn create_view(
        &self,
        resource: &Arc<Resource<A>>,
        desc: &ViewDescriptor,
    ) -> Result<Arc<View<A>>, CreateViewError> {
        View::new(Arc::clone(resource), desc).map(Arc::new)
    }

    /// Creates a command list and opens it for recording.
    pub fn create_command_list(
        &self,
        label: hal::Label<'_>,
    ) -> Result<CommandList<A>, hal::DeviceError> {
        let mut raw = unsafe { self.raw.create_command_list()? };
        unsafe { raw.begin() };
        Ok(CommandList::new(raw, label.unwrap_or("").to_string()))
    }

    pub fn create_binding_set_layout(
        &self,
        entries: Vec<BindingSetLayoutEntry>,
    ) -> Result<Arc<BindingSetLayout>, CreateBindingSetLayoutError> {
        BindingSetLayout::new(entries).map(Arc::new)
    }

    /// Resolves `entries` against `layout` into a written binding set.
    ///
    /// Allocates one descriptor range per heap kind the layout populates,
    /// writes each provided view at its table slot, and materializes the
    /// layout's constant blocks as a shared upload buffer whose per-block
    /// descriptors are written here, once. Bindless keys and attachment
    /// kinds get no writes.
    pub fn create_binding_set(
        &self,
        layout: &Arc<BindingSetLayout>,
        entries: &[BindingSetEntry<A>],
    ) -> Result<BindingSet<A>, CreateBindingSetError> {
        profiling::scope!("Device::create_binding_set");
        let mut ranges = arrayvec::ArrayVec::new();
        for &(kind, count) in layout.heap_counts() {
            ranges.push((kind, self.descriptors.allocate(kind, count)));
        }
        let mut set = BindingSet {
            layout: Arc::clone(layout),
            ranges,
            constants: None,
            views: Vec::with_capacity(entries.len()),
        };

        if layout.constants_size() > 0 {
            let buffer = self.create_buffer(&pmt::BufferDescriptor {
                label: Some("binding set constants"),
                size: layout.constants_size(),
                memory: pmt::MemoryKind::Upload,
            })?;
            for (_, slot) in layout.constant_slots() {
                let size = match pmt::BufferSize::new(slot.size) {
                    Some(size) => size,
                    None => continue,
                };
                let view = View::new(
                    Arc::clone(&buffer),
                    &ViewDescriptor {
                        offset: slot.offset,
                        size: Some(size),
                        ..ViewDescriptor::new(pmt::ViewKind::ConstantBuffer)
                    },
                )?;
                if let Some(range) = set.gpu_range(pmt::DescriptorHeapKind::Resource) {
                    range.write(slot.table_offset, &view);
                }
            }
            set.constants = Some(buffer);
        }

        for entry in entries {
            let view = match entry.view {
                Some(ref view) => view,
                // Absent views leave their slots untouched.
                None => continue,
            };
            if !layout.contains(&entry.key) {
                return Err(CreateBindingSetError::KeyNotInLayout(entry.key));
            }
            if view.kind() != entry.key.kind {
                return Err(CreateBindingSetError::ViewKindMismatch {
                    key: entry.key,
                    view: view.kind(),
                });
            }
            if let Some(slot) = layout.table_slot(&entry.key) {
                if let Some(range) = set.gpu_range(slot.heap) {
                    range.write(slot.offset, view);
                }
            }
            set.views.push(Arc::clone(view));
        }
        Ok(set)
    }

    /// Copies `data` into an upload buffer at `offset`.
    pub fn write_buffer(
        &self,
        buffer: &Resource<A>,
        offset: pmt::BufferAddress,
        data: &[u8],
    ) -> Result<(), hal::DeviceError> {
        assert_eq!(
            buffer.memory(),
            pmt::MemoryKind::Upload,
            "buffer `{}` is not CPU-writable",
            buffer.label(),
        );
        assert!(
            offset + data.len() as pmt::BufferAddress <= buffer.size(),
            "write of {} bytes at {} overruns buffer `{}` of {} bytes",
            data.len(),
            offset,
            buffer.label(),
            buffer.size(),
        );
        if data.is_empty() {
            return Ok(());
        }
        let raw = buffer.expect_buffer();
        unsafe {
            let mapping = self
                .raw
                .map_buffer(raw, offset..offset + data.len() as pmt::BufferAddress)?;
            ptr::copy_nonoverlapping(data.as_ptr(), mapping.as_ptr(), data.len());
            self.raw.unmap_buffer(raw);
        }
        Ok(())
    }

    /// Blocks until every submission made so far has finished.
    pub fn wait_idle(&mut self) {
        profiling::scope!("Device::wait_idle");
        self.fence_value += 1;
        unsafe {
            self.queue.signal(&self.fence, self.fence_value);
            self.fence.wait(self.fence_value);
        }
    }
}

impl<A: hal::Api> Drop for Device<A> {
    fn drop(&mut self) {
        // Scratch lists in the patch pool may still be owned by in-flight
        // submissions; do not let them die early.
        if self.fence_value > 0 {
            unsafe { self.fence.wait(self.fence_value) };
        }
    }
}
