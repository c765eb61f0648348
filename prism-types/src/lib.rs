/*! This library describes the API surface of the prism rendering interface
 *  that is agnostic of the backend.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, unsafe_op_in_unsafe_fn)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{num::NonZeroU64, ops::Range};

/// Integral type used for buffer offsets and sizes.
pub type BufferAddress = u64;
/// Integral type used for non-zero buffer sizes.
pub type BufferSize = NonZeroU64;

/// Alignment of constant buffer bindings, in bytes.
///
/// Offsets handed to the shader-visible side are always multiples of this.
pub const BIND_BUFFER_ALIGNMENT: BufferAddress = 256;

/// Binding array size that marks a binding as unbounded.
///
/// A [`BindKey`] whose `count` equals this value describes a bindless range
/// whose descriptors are managed by the application, not the binding set.
pub const UNBOUNDED_BINDING_COUNT: u32 = !0;

bitflags::bitflags! {
    /// Combined state of a resource or subresource on a timeline.
    ///
    /// The empty set is the "unknown" sentinel: a tracker that has not yet
    /// seen the subresource reports it, and barriers must never reach a
    /// backend with it on either side.
    #[repr(transparent)]
    pub struct ResourceState: u32 {
        /// State is not known to the tracker.
        const UNKNOWN = 0;
        /// Common/general state, valid entry point for most transitions.
        const COMMON = 1 << 0;
        /// Vertex buffer or constant buffer read.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 1;
        /// Index buffer read.
        const INDEX_BUFFER = 1 << 2;
        /// Color attachment write.
        const RENDER_TARGET = 1 << 3;
        /// Unordered (read/write) shader access.
        const UNORDERED_ACCESS = 1 << 4;
        /// Depth-stencil attachment write.
        const DEPTH_STENCIL_WRITE = 1 << 5;
        /// Depth-stencil attachment read.
        const DEPTH_STENCIL_READ = 1 << 6;
        /// Shader resource read from non-pixel stages.
        const NON_PIXEL_SHADER_RESOURCE = 1 << 7;
        /// Shader resource read from the pixel stage.
        const PIXEL_SHADER_RESOURCE = 1 << 8;
        /// Indirect command argument read.
        const INDIRECT_ARGUMENT = 1 << 9;
        /// Destination of a copy.
        const COPY_DEST = 1 << 10;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 11;
        /// Acceleration structure storage.
        const RAYTRACING_ACCELERATION_STRUCTURE = 1 << 12;
        /// Shading-rate image read.
        const SHADING_RATE_SOURCE = 1 << 13;
        /// Presentable state for swap chain images.
        const PRESENT = 1 << 14;
        /// Contents are undefined and may be discarded by the next transition.
        const UNDEFINED = 1 << 15;
        /// Union of all read-only states an upload resource can serve.
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits
            | Self::INDEX_BUFFER.bits
            | Self::COPY_SOURCE.bits
            | Self::NON_PIXEL_SHADER_RESOURCE.bits
            | Self::PIXEL_SHADER_RESOURCE.bits
            | Self::INDIRECT_ARGUMENT.bits;
    }
}

impl ResourceState {
    /// Returns true if this is the "unknown" sentinel.
    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }
}

#[cfg(feature = "serde")]
impl Serialize for ResourceState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ResourceState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(value))
    }
}

/// Shader stage a binding is visible to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Pixel (fragment) shader.
    Pixel,
    /// Geometry shader.
    Geometry,
    /// Compute shader.
    Compute,
    /// Amplification (task) shader.
    Amplification,
    /// Mesh shader.
    Mesh,
    /// Shader library, for ray tracing pipelines.
    Library,
}

/// Kind of view through which a resource is bound.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ViewKind {
    /// Constant buffer view.
    ConstantBuffer,
    /// Sampler.
    Sampler,
    /// Sampled texture.
    Texture,
    /// Read/write storage texture.
    RWTexture,
    /// Typed buffer read.
    Buffer,
    /// Typed buffer read/write.
    RWBuffer,
    /// Structured buffer read.
    StructuredBuffer,
    /// Structured buffer read/write.
    RWStructuredBuffer,
    /// Ray tracing acceleration structure.
    AccelerationStructure,
    /// Shading-rate image.
    ShadingRateSource,
    /// Color attachment.
    RenderTarget,
    /// Depth-stencil attachment.
    DepthStencil,
}

impl ViewKind {
    /// The shader-visible descriptor heap this view kind lives in, if any.
    ///
    /// Attachment kinds and shading-rate images are bound through dedicated
    /// backend paths instead of a shader-visible heap and return `None`.
    pub fn heap_kind(self) -> Option<DescriptorHeapKind> {
        match self {
            Self::Sampler => Some(DescriptorHeapKind::Sampler),
            Self::RenderTarget | Self::DepthStencil | Self::ShadingRateSource => None,
            Self::ConstantBuffer
            | Self::Texture
            | Self::RWTexture
            | Self::Buffer
            | Self::RWBuffer
            | Self::StructuredBuffer
            | Self::RWStructuredBuffer
            | Self::AccelerationStructure => Some(DescriptorHeapKind::Resource),
        }
    }
}

/// Kind of shader-visible descriptor heap.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorHeapKind {
    /// Heap holding constant buffer, shader resource, and storage views.
    Resource,
    /// Heap holding samplers.
    Sampler,
}

/// Identity of one binding slot in a shader interface.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BindKey {
    /// Stage the binding is visible to.
    pub stage: ShaderStage,
    /// View kind expected at this slot.
    pub kind: ViewKind,
    /// Register slot.
    pub slot: u32,
    /// Register space.
    pub space: u32,
    /// Array size of the binding. [`UNBOUNDED_BINDING_COUNT`] marks a
    /// bindless range.
    pub count: u32,
}

impl BindKey {
    /// Returns true if this key describes a bindless range.
    pub fn is_bindless(&self) -> bool {
        self.count == UNBOUNDED_BINDING_COUNT
    }
}

/// Contiguous block of mip levels and array layers within a texture.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubresourceRange {
    /// Covered mip levels.
    pub mips: Range<u32>,
    /// Covered array layers.
    pub layers: Range<u32>,
}

impl SubresourceRange {
    /// Number of (mip, layer) cells the range covers.
    pub fn cell_count(&self) -> u32 {
        (self.mips.end - self.mips.start) * (self.layers.end - self.layers.start)
    }
}

/// Memory domain a buffer is allocated from.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryKind {
    /// Device-local memory, not host visible.
    Default,
    /// Host-visible memory for CPU to GPU traffic.
    Upload,
    /// Host-visible memory for GPU to CPU traffic.
    Readback,
}

/// Texel format of a texture.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    R32Sint,
    Depth32Float,
    Depth24PlusStencil8,
}

/// Extent of a texture or texture slice.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels, or number of array layers.
    pub depth_or_array_layers: u32,
}

/// Describes a buffer to be created.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferDescriptor<L> {
    /// Debug label of the buffer.
    pub label: L,
    /// Size in bytes.
    pub size: BufferAddress,
    /// Memory domain to allocate from.
    pub memory: MemoryKind,
}

impl<L> BufferDescriptor<L> {
    /// Takes a closure and maps the label of the descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> BufferDescriptor<K> {
        BufferDescriptor {
            label: fun(&self.label),
            size: self.size,
            memory: self.memory,
        }
    }
}

/// Describes a texture to be created.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureDescriptor<L> {
    /// Debug label of the texture.
    pub label: L,
    /// Size of the texture.
    pub size: Extent3d,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Sample count, 1 unless multisampled.
    pub sample_count: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Whether the texture backs a swap chain entry. Back buffers always
    /// start their state timeline in [`ResourceState::PRESENT`].
    pub back_buffer: bool,
    /// State the texture starts its timeline in, unless it is a back buffer.
    pub initial_state: ResourceState,
}

impl<L> TextureDescriptor<L> {
    /// Takes a closure and maps the label of the descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> TextureDescriptor<K> {
        TextureDescriptor {
            label: fun(&self.label),
            size: self.size,
            mip_level_count: self.mip_level_count,
            sample_count: self.sample_count,
            format: self.format,
            back_buffer: self.back_buffer,
            initial_state: self.initial_state,
        }
    }

    /// Number of array layers the texture carries.
    pub fn array_layer_count(&self) -> u32 {
        self.size.depth_or_array_layers
    }
}

/// Texel filtering mode of a sampler.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Filter {
    /// Anisotropic filtering.
    Anisotropic,
    /// Linear min/mag/mip filtering.
    MinMagMipLinear,
    /// Linear comparison filtering.
    ComparisonMinMagMipLinear,
}

/// How a sampler resolves coordinates outside [0, 1].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressMode {
    /// Repeat the texture.
    Wrap,
    /// Clamp to the edge texel.
    Clamp,
}

/// Comparison applied by comparison samplers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ComparisonFunc {
    /// Comparison never passes.
    Never,
    /// Comparison always passes.
    Always,
    /// Passes when the reference is less than the sampled value.
    Less,
}

/// Describes a sampler to be created.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SamplerDescriptor<L> {
    /// Debug label of the sampler.
    pub label: L,
    /// Texel filtering mode.
    pub filter: Filter,
    /// Addressing of out-of-range coordinates.
    pub address_mode: AddressMode,
    /// Comparison function, for comparison samplers.
    pub comparison_func: ComparisonFunc,
}

impl<L> SamplerDescriptor<L> {
    /// Takes a closure and maps the label of the descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> SamplerDescriptor<K> {
        SamplerDescriptor {
            label: fun(&self.label),
            filter: self.filter,
            address_mode: self.address_mode,
            comparison_func: self.comparison_func,
        }
    }
}
