/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/*! This library describes the internal unsafe backend abstraction of the
 *  prism rendering interface, with the following properties:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Mapping is persistent, with explicit synchronization.
 *  - Resource transitions are explicit, with both states spelled out.
 */

#![allow(
    // We use loops for getting early-out of scope without closures.
    clippy::never_loop,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod null;

use std::{fmt, ops::Range, ptr::NonNull};

use thiserror::Error;

pub type Label<'a> = Option<&'a str>;
pub type MemoryRange = Range<pmt::BufferAddress>;
/// Monotonic value on a fence timeline.
pub type FenceValue = u64;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
}

pub struct OpenDevice<A: Api> {
    pub device: A::Device,
    pub queue: A::Queue,
}

pub trait Api: Clone + Sized {
    type Device: Device<Self>;
    type Queue: Queue<Self>;
    type CommandList: CommandList<Self>;
    type Fence: Fence + Send + Sync;

    type Buffer: fmt::Debug + Send + Sync + 'static;
    type Texture: fmt::Debug + Send + Sync + 'static;
    type Sampler: fmt::Debug + Send + Sync;
    type DescriptorHeap: DescriptorHeap + fmt::Debug + Send + Sync;
}

pub trait Device<A: Api> {
    /// Creates a new buffer. Host-visible buffers are persistently mappable.
    unsafe fn create_buffer(
        &self,
        desc: &pmt::BufferDescriptor<Label<'_>>,
    ) -> Result<A::Buffer, DeviceError>;
    unsafe fn map_buffer(
        &self,
        buffer: &A::Buffer,
        range: MemoryRange,
    ) -> Result<NonNull<u8>, DeviceError>;
    unsafe fn unmap_buffer(&self, buffer: &A::Buffer);

    unsafe fn create_texture(
        &self,
        desc: &pmt::TextureDescriptor<Label<'_>>,
    ) -> Result<A::Texture, DeviceError>;
    unsafe fn create_sampler(
        &self,
        desc: &pmt::SamplerDescriptor<Label<'_>>,
    ) -> Result<A::Sampler, DeviceError>;

    unsafe fn create_command_list(&self) -> Result<A::CommandList, DeviceError>;

    /// Creates a fence whose timeline starts at `initial`.
    unsafe fn create_fence(&self, initial: FenceValue) -> Result<A::Fence, DeviceError>;

    /// Creates a shader-visible descriptor heap with `capacity` slots.
    ///
    /// `capacity` must be non-zero: some backends reject empty
    /// shader-visible heaps.
    unsafe fn create_descriptor_heap(
        &self,
        kind: pmt::DescriptorHeapKind,
        capacity: u32,
    ) -> Result<A::DescriptorHeap, DeviceError>;
    unsafe fn write_descriptor(
        &self,
        heap: &A::DescriptorHeap,
        slot: u32,
        write: DescriptorWrite<'_, A>,
    );
    /// Copies `count` descriptors across heaps of the same kind.
    unsafe fn copy_descriptors(
        &self,
        dst: &A::DescriptorHeap,
        dst_base: u32,
        src: &A::DescriptorHeap,
        src_base: u32,
        count: u32,
    );
}

pub trait Queue<A: Api> {
    /// Submits the lists for execution in slice order.
    unsafe fn submit(&mut self, command_lists: &[&A::CommandList]);
    /// Signals `value` on `fence` once prior submissions complete.
    unsafe fn signal(&mut self, fence: &A::Fence, value: FenceValue);
}

pub trait CommandList<A: Api> {
    unsafe fn begin(&mut self);
    unsafe fn end(&mut self);
    /// Returns a finished list to the recordable state, dropping its
    /// recorded commands.
    unsafe fn reset(&mut self);

    unsafe fn transition_buffers<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = BufferBarrier<'a, A>>;

    unsafe fn transition_textures<'a, T>(&mut self, barriers: T)
    where
        T: Iterator<Item = TextureBarrier<'a, A>>;

    /// Note: `src` has to be in `COPY_SOURCE` state, `dst` in `COPY_DEST`.
    unsafe fn copy_buffer_to_buffer<T>(&mut self, src: &A::Buffer, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferCopy>;

    unsafe fn copy_buffer_to_texture<T>(&mut self, src: &A::Buffer, dst: &A::Texture, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;

    unsafe fn copy_texture_to_buffer<T>(&mut self, src: &A::Texture, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;
}

pub trait Fence {
    /// Latest value the timeline has reached.
    unsafe fn completed_value(&self) -> FenceValue;
    /// Blocks until the timeline reaches `value`.
    unsafe fn wait(&self, value: FenceValue);
}

pub trait DescriptorHeap {
    /// Returns the GPU-visible address of `slot`.
    ///
    /// Handles are tied to the heap's placement. They go stale if the
    /// content migrates to another heap and need to be re-fetched.
    unsafe fn gpu_handle(&self, slot: u32) -> GpuDescriptorHandle;
}

/// GPU-visible address of one descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle(pub u64);

#[derive(Debug)]
pub enum DescriptorWrite<'a, A: Api> {
    Buffer {
        buffer: &'a A::Buffer,
        offset: pmt::BufferAddress,
        size: pmt::BufferAddress,
    },
    Texture {
        texture: &'a A::Texture,
        range: pmt::SubresourceRange,
    },
    Sampler(&'a A::Sampler),
}

#[derive(Debug)]
pub struct BufferBarrier<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub states: Range<pmt::ResourceState>,
}

#[derive(Debug)]
pub struct TextureBarrier<'a, A: Api> {
    pub texture: &'a A::Texture,
    pub range: pmt::SubresourceRange,
    pub states: Range<pmt::ResourceState>,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferCopy {
    pub src_offset: pmt::BufferAddress,
    pub dst_offset: pmt::BufferAddress,
    pub size: pmt::BufferSize,
}

#[derive(Clone, Debug)]
pub struct BufferTextureCopy {
    pub buffer_offset: pmt::BufferAddress,
    pub mip_level: u32,
    pub array_layer: u32,
    pub size: pmt::Extent3d,
}
