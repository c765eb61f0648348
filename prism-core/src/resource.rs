use crate::track::ResourceStateTracker;

use parking_lot::{Mutex, MutexGuard};
use pmt::{ResourceState, SubresourceRange, ViewKind};
use thiserror::Error;

use std::{fmt, num::NonZeroU32, sync::Arc};

/// Identity of a resource within its device, used to key local trackers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) u64);

pub enum RawResource<A: hal::Api> {
    Buffer(A::Buffer),
    Texture(A::Texture),
    Sampler(A::Sampler),
}

impl<A: hal::Api> fmt::Debug for RawResource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RawResource::Buffer(ref raw) => f.debug_tuple("Buffer").field(raw).finish(),
            RawResource::Texture(ref raw) => f.debug_tuple("Texture").field(raw).finish(),
            RawResource::Sampler(ref raw) => f.debug_tuple("Sampler").field(raw).finish(),
        }
    }
}

/// One GPU allocation together with its authoritative state timeline.
///
/// The global tracker inside is only ever advanced by submission, in
/// submission order. Recording never touches it.
pub struct Resource<A: hal::Api> {
    raw: RawResource<A>,
    id: ResourceId,
    label: String,
    mip_level_count: u32,
    array_layer_count: u32,
    back_buffer: bool,
    memory: pmt::MemoryKind,
    size: pmt::BufferAddress,
    state: Mutex<ResourceStateTracker>,
}

impl<A: hal::Api> Resource<A> {
    pub(crate) fn new_buffer(
        raw: A::Buffer,
        id: ResourceId,
        label: String,
        memory: pmt::MemoryKind,
        size: pmt::BufferAddress,
        initial: ResourceState,
    ) -> Self {
        Self {
            raw: RawResource::Buffer(raw),
            id,
            label,
            mip_level_count: 1,
            array_layer_count: 1,
            back_buffer: false,
            memory,
            size,
            state: Mutex::new(ResourceStateTracker::new(initial, 1, 1)),
        }
    }

    pub(crate) fn new_texture(
        raw: A::Texture,
        id: ResourceId,
        label: String,
        mip_level_count: u32,
        array_layer_count: u32,
        back_buffer: bool,
        initial: ResourceState,
    ) -> Self {
        Self {
            raw: RawResource::Texture(raw),
            id,
            label,
            mip_level_count,
            array_layer_count,
            back_buffer,
            memory: pmt::MemoryKind::Default,
            size: 0,
            state: Mutex::new(ResourceStateTracker::new(
                initial,
                mip_level_count,
                array_layer_count,
            )),
        }
    }

    pub(crate) fn new_sampler(raw: A::Sampler, id: ResourceId, label: String) -> Self {
        Self {
            raw: RawResource::Sampler(raw),
            id,
            label,
            mip_level_count: 1,
            array_layer_count: 1,
            back_buffer: false,
            memory: pmt::MemoryKind::Default,
            size: 0,
            state: Mutex::new(ResourceStateTracker::new(ResourceState::UNKNOWN, 1, 1)),
        }
    }

    pub fn raw(&self) -> &RawResource<A> {
        &self.raw
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn layer_count(&self) -> u32 {
        self.array_layer_count
    }

    pub fn is_back_buffer(&self) -> bool {
        self.back_buffer
    }

    pub fn memory(&self) -> pmt::MemoryKind {
        self.memory
    }

    /// Byte size for buffers, zero otherwise.
    pub fn size(&self) -> pmt::BufferAddress {
        self.size
    }

    /// The global state tracker. Lock order: one resource at a time.
    pub fn state_tracker(&self) -> MutexGuard<'_, ResourceStateTracker> {
        self.state.lock()
    }

    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange {
            mips: 0..self.mip_level_count,
            layers: 0..self.array_layer_count,
        }
    }

    pub(crate) fn expect_buffer(&self) -> &A::Buffer {
        match self.raw {
            RawResource::Buffer(ref raw) => raw,
            RawResource::Texture(..) | RawResource::Sampler(..) => {
                panic!("resource `{}` is not a buffer", self.label)
            }
        }
    }

    pub(crate) fn expect_texture(&self) -> &A::Texture {
        match self.raw {
            RawResource::Texture(ref raw) => raw,
            RawResource::Buffer(..) | RawResource::Sampler(..) => {
                panic!("resource `{}` is not a texture", self.label)
            }
        }
    }
}

impl<A: hal::Api> fmt::Debug for Resource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("raw", &self.raw)
            .finish()
    }
}

/// Describes a view over a resource.
///
/// Mip and layer counts of `None` select everything from the base up.
#[derive(Clone, Debug)]
pub struct ViewDescriptor {
    pub kind: ViewKind,
    pub base_mip_level: u32,
    pub mip_level_count: Option<NonZeroU32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<NonZeroU32>,
    /// Bindless views manage their own descriptor slots.
    pub bindless: bool,
    /// Byte offset into a buffer resource.
    pub offset: pmt::BufferAddress,
    /// Viewed byte size of a buffer resource, `None` for the remainder.
    pub size: Option<pmt::BufferSize>,
}

impl ViewDescriptor {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
            bindless: false,
            offset: 0,
            size: None,
        }
    }
}

/// A typed window over one resource.
pub struct View<A: hal::Api> {
    resource: Arc<Resource<A>>,
    kind: ViewKind,
    range: SubresourceRange,
    bindless: bool,
    offset: pmt::BufferAddress,
    size: pmt::BufferAddress,
}

impl<A: hal::Api> View<A> {
    pub(crate) fn new(
        resource: Arc<Resource<A>>,
        desc: &ViewDescriptor,
    ) -> Result<Self, CreateViewError> {
        let kind_fits = match resource.raw {
            RawResource::Buffer(..) => match desc.kind {
                ViewKind::ConstantBuffer
                | ViewKind::Buffer
                | ViewKind::RWBuffer
                | ViewKind::StructuredBuffer
                | ViewKind::RWStructuredBuffer
                | ViewKind::AccelerationStructure => true,
                _ => false,
            },
            RawResource::Texture(..) => match desc.kind {
                ViewKind::Texture
                | ViewKind::RWTexture
                | ViewKind::RenderTarget
                | ViewKind::DepthStencil
                | ViewKind::ShadingRateSource => true,
                _ => false,
            },
            RawResource::Sampler(..) => match desc.kind {
                ViewKind::Sampler => true,
                _ => false,
            },
        };
        if !kind_fits {
            return Err(CreateViewError::KindMismatch(desc.kind));
        }

        let mip_end = match desc.mip_level_count {
            Some(count) => desc.base_mip_level + count.get(),
            None => resource.level_count(),
        };
        if desc.base_mip_level >= mip_end || mip_end > resource.level_count() {
            return Err(CreateViewError::MipRangeOutOfBounds {
                base: desc.base_mip_level,
                end: mip_end,
                total: resource.level_count(),
            });
        }
        let layer_end = match desc.array_layer_count {
            Some(count) => desc.base_array_layer + count.get(),
            None => resource.layer_count(),
        };
        if desc.base_array_layer >= layer_end || layer_end > resource.layer_count() {
            return Err(CreateViewError::LayerRangeOutOfBounds {
                base: desc.base_array_layer,
                end: layer_end,
                total: resource.layer_count(),
            });
        }

        let size = match resource.raw {
            RawResource::Buffer(..) => {
                let size = match desc.size {
                    Some(size) => size.get(),
                    None => resource.size().saturating_sub(desc.offset),
                };
                if desc.offset + size > resource.size() {
                    return Err(CreateViewError::ByteRangeOutOfBounds {
                        offset: desc.offset,
                        size,
                        total: resource.size(),
                    });
                }
                size
            }
            RawResource::Texture(..) | RawResource::Sampler(..) => 0,
        };

        Ok(Self {
            resource,
            kind: desc.kind,
            range: SubresourceRange {
                mips: desc.base_mip_level..mip_end,
                layers: desc.base_array_layer..layer_end,
            },
            bindless: desc.bindless,
            offset: desc.offset,
            size,
        })
    }

    pub fn resource(&self) -> &Arc<Resource<A>> {
        &self.resource
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn range(&self) -> &SubresourceRange {
        &self.range
    }

    pub fn is_bindless(&self) -> bool {
        self.bindless
    }

    pub fn offset(&self) -> pmt::BufferAddress {
        self.offset
    }

    pub fn size(&self) -> pmt::BufferAddress {
        self.size
    }
}

impl<A: hal::Api> fmt::Debug for View<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("resource", &self.resource.id)
            .field("kind", &self.kind)
            .field("range", &self.range)
            .finish()
    }
}

#[derive(Clone, Debug, Error)]
pub enum CreateViewError {
    #[error("view kind {0:?} does not apply to the resource")]
    KindMismatch(ViewKind),
    #[error("mip range {base}..{end} exceeds the resource's {total} levels")]
    MipRangeOutOfBounds { base: u32, end: u32, total: u32 },
    #[error("layer range {base}..{end} exceeds the resource's {total} layers")]
    LayerRangeOutOfBounds { base: u32, end: u32, total: u32 },
    #[error("byte window of {size} at offset {offset} exceeds the buffer's {total} bytes")]
    ByteRangeOutOfBounds { offset: u64, size: u64, total: u64 },
}
