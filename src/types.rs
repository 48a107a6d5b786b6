//! Resource Descriptors and Shared Types
//!
//! Plain data consumed by the public API: creation descriptors, state and
//! binding flags, formats, handles, and the receipts returned by submission.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::core::pool::Handle;

// ============================================================================
// Handles
// ============================================================================

/// Marker for texture handles.
#[derive(Debug)]
pub enum Texture {}
/// Marker for buffer handles.
#[derive(Debug)]
pub enum Buffer {}
/// Marker for shader handles.
#[derive(Debug)]
pub enum Shader {}
/// Marker for graphics pipeline state handles.
#[derive(Debug)]
pub enum GraphicsPipeline {}
/// Marker for compute pipeline state handles.
#[derive(Debug)]
pub enum ComputePipeline {}
/// Marker for timer query handles.
#[derive(Debug)]
pub enum TimerQuery {}

pub type TextureHandle = Handle<Texture>;
pub type BufferHandle = Handle<Buffer>;
pub type ShaderHandle = Handle<Shader>;
pub type GraphicsPipelineHandle = Handle<GraphicsPipeline>;
pub type ComputePipelineHandle = Handle<ComputePipeline>;
pub type TimerQueryHandle = Handle<TimerQuery>;

// ============================================================================
// Queues & Submission
// ============================================================================

/// The independent GPU timelines. Each owns its own fence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Copy,
}

impl QueueType {
    pub const COUNT: usize = 3;
    pub const ALL: [QueueType; Self::COUNT] = [Self::Graphics, Self::Compute, Self::Copy];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Identifies one submission: the fence value its queue signals on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionReceipt {
    pub fence_value: u64,
    pub queue: QueueType,
}

/// Creation parameters of a command list.
#[derive(Debug, Clone, Default)]
pub struct CommandListDesc {
    pub queue_type: QueueType,
    pub debug_name: String,
}

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Resource states used by transition barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON              = 0;
        const CONSTANT_BUFFER     = 1 << 0;
        const VERTEX_BUFFER       = 1 << 1;
        const INDEX_BUFFER        = 1 << 2;
        const INDIRECT_ARGUMENT   = 1 << 3;
        const SHADER_RESOURCE     = 1 << 4;
        const UNORDERED_ACCESS    = 1 << 5;
        const RENDER_TARGET       = 1 << 6;
        const DEPTH_WRITE         = 1 << 7;
        const DEPTH_READ          = 1 << 8;
        const STREAM_OUT          = 1 << 9;
        const COPY_DEST           = 1 << 10;
        const COPY_SOURCE         = 1 << 11;
        const RESOLVE_DEST        = 1 << 12;
        const RESOLVE_SOURCE      = 1 << 13;
        const PRESENT             = 1 << 14;
        const SHADING_RATE_SOURCE = 1 << 15;

        const GENERIC_READ = Self::VERTEX_BUFFER.bits()
            | Self::CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

impl Default for ResourceStates {
    fn default() -> Self {
        Self::COMMON
    }
}

bitflags! {
    /// Which views a resource is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingFlags: u32 {
        const VERTEX_BUFFER    = 1 << 0;
        const INDEX_BUFFER     = 1 << 1;
        const CONSTANT_BUFFER  = 1 << 2;
        const SHADER_RESOURCE  = 1 << 3;
        const RENDER_TARGET    = 1 << 4;
        const DEPTH_STENCIL    = 1 << 5;
        const UNORDERED_ACCESS = 1 << 6;
        const SHADING_RATE     = 1 << 7;
    }
}

bitflags! {
    /// How a buffer is viewed by shaders.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferMiscFlags: u32 {
        const BINDLESS   = 1 << 0;
        const RAW        = 1 << 1;
        const STRUCTURED = 1 << 2;
        const TYPED      = 1 << 3;
    }
}

bitflags! {
    /// Optional hardware features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceCapabilities: u32 {
        const TIMESTAMP_QUERY       = 1 << 0;
        const PUSH_CONSTANTS        = 1 << 1;
        const BINDLESS              = 1 << 2;
        const INDIRECT_DRAW         = 1 << 3;
        const VARIABLE_RATE_SHADING = 1 << 4;
        const MESH_SHADING          = 1 << 5;
        const RAYTRACING            = 1 << 6;
        const VIEW_INSTANCING       = 1 << 7;
    }
}

/// CPU access pattern of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    /// GPU-local memory.
    #[default]
    Default,
    /// CPU-writable, GPU-readable.
    Upload,
    /// GPU-writable, CPU-readable.
    ReadBack,
}

/// The kind of view a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubresourceType {
    Srv,
    Uav,
    Rtv,
    Dsv,
}

// ============================================================================
// Formats
// ============================================================================

/// Texel and vertex attribute formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R16Uint,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Uint,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    D16Unorm,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

impl Format {
    /// Size of one texel or element in bytes, `0` for [`Format::Unknown`].
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Uint | Self::R16Float | Self::D16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Rg16Float
            | Self::R32Uint
            | Self::R32Float
            | Self::D32Float
            | Self::D24UnormS8Uint => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::D32FloatS8Uint => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Float => 16,
        }
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D32Float | Self::D24UnormS8Uint | Self::D32FloatS8Uint
        )
    }

    #[must_use]
    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    /// The native texture format, if this format can back a texture.
    #[must_use]
    pub const fn to_wgpu_texture(self) -> Option<wgpu::TextureFormat> {
        use wgpu::TextureFormat as F;
        Some(match self {
            Self::R8Unorm => F::R8Unorm,
            Self::Rg8Unorm => F::Rg8Unorm,
            Self::Rgba8Unorm => F::Rgba8Unorm,
            Self::Rgba8UnormSrgb => F::Rgba8UnormSrgb,
            Self::Bgra8Unorm => F::Bgra8Unorm,
            Self::R16Uint => F::R16Uint,
            Self::R16Float => F::R16Float,
            Self::Rg16Float => F::Rg16Float,
            Self::Rgba16Float => F::Rgba16Float,
            Self::R32Uint => F::R32Uint,
            Self::R32Float => F::R32Float,
            Self::Rg32Float => F::Rg32Float,
            Self::Rgba32Float => F::Rgba32Float,
            Self::D16Unorm => F::Depth16Unorm,
            Self::D32Float => F::Depth32Float,
            Self::D24UnormS8Uint => F::Depth24PlusStencil8,
            Self::D32FloatS8Uint => F::Depth32FloatStencil8,
            Self::Unknown | Self::Rgb32Float => return None,
        })
    }

    /// The native vertex attribute format, if this format can feed a vertex input.
    #[must_use]
    pub const fn to_wgpu_vertex(self) -> Option<wgpu::VertexFormat> {
        use wgpu::VertexFormat as V;
        Some(match self {
            Self::Rgba8Unorm => V::Unorm8x4,
            Self::Rg16Float => V::Float16x2,
            Self::Rgba16Float => V::Float16x4,
            Self::R32Uint => V::Uint32,
            Self::R32Float => V::Float32,
            Self::Rg32Float => V::Float32x2,
            Self::Rgb32Float => V::Float32x3,
            Self::Rgba32Float => V::Float32x4,
            _ => return None,
        })
    }

    /// The native index format. Only 16 and 32 bit unsigned formats qualify.
    #[must_use]
    pub const fn to_wgpu_index(self) -> Option<wgpu::IndexFormat> {
        match self {
            Self::R16Uint => Some(wgpu::IndexFormat::Uint16),
            Self::R32Uint => Some(wgpu::IndexFormat::Uint32),
            _ => None,
        }
    }
}

// ============================================================================
// Clear Values & Geometry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Optimized clear value recorded at texture creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(Color),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels, `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            min_x: 0,
            min_y: 0,
            max_x: width,
            max_y: height,
        }
    }
}

// ============================================================================
// Textures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    Texture1D,
    Texture1DArray,
    #[default]
    Texture2D,
    Texture2DArray,
    Texture2DMS,
    Texture2DMSArray,
    TextureCube,
    TextureCubeArray,
    Texture3D,
}

impl TextureDimension {
    #[must_use]
    pub const fn is_array(self) -> bool {
        matches!(
            self,
            Self::Texture1DArray
                | Self::Texture2DArray
                | Self::Texture2DMSArray
                | Self::TextureCube
                | Self::TextureCubeArray
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub binding_flags: BindingFlags,
    pub dimension: TextureDimension,
    pub initial_state: ResourceStates,
    pub format: Format,
    pub is_typeless: bool,
    /// Allocate a bindless index for the shader-resource view.
    pub is_bindless: bool,
    pub width: u32,
    pub height: u32,
    /// Array size, or depth for 3D textures. Cube textures count six per cube.
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub optimized_clear_value: Option<ClearValue>,
    pub debug_name: String,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            binding_flags: BindingFlags::SHADER_RESOURCE,
            dimension: TextureDimension::Texture2D,
            initial_state: ResourceStates::COMMON,
            format: Format::Rgba8Unorm,
            is_typeless: false,
            is_bindless: true,
            width: 1,
            height: 1,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            optimized_clear_value: None,
            debug_name: String::new(),
        }
    }
}

impl TextureDesc {
    /// Number of (mip, slice) subresources.
    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        let slices = if self.dimension == TextureDimension::Texture3D {
            1
        } else {
            self.array_size.max(1)
        };
        self.mip_levels.max(1) * slices
    }

    /// Flat subresource index, mip-major within each slice.
    #[must_use]
    pub fn subresource_index(&self, mip: u32, slice: u32) -> u32 {
        slice * self.mip_levels.max(1) + mip
    }

    /// Length of the full mip chain down to 1x1.
    #[must_use]
    pub fn max_mip_levels(&self) -> u32 {
        let mut extent = self.width.max(self.height);
        if self.dimension == TextureDimension::Texture3D {
            extent = extent.max(self.array_size);
        }
        u32::BITS - extent.max(1).leading_zeros()
    }

    /// Extent of a mip level, clamped to one texel.
    #[must_use]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let shrink = |extent: u32| extent.checked_shr(mip).unwrap_or(0).max(1);
        let depth = if self.dimension == TextureDimension::Texture3D {
            shrink(self.array_size)
        } else {
            1
        };
        (shrink(self.width), shrink(self.height), depth)
    }
}

/// Mip/slice window of a texture view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceRange {
    pub first_mip: u32,
    pub mip_count: u32,
    pub first_slice: u32,
    pub slice_count: u32,
}

impl TextureSubresourceRange {
    pub const ALL: Self = Self {
        first_mip: 0,
        mip_count: u32::MAX,
        first_slice: 0,
        slice_count: u32::MAX,
    };

    #[must_use]
    pub const fn single(mip: u32, slice: u32) -> Self {
        Self {
            first_mip: mip,
            mip_count: 1,
            first_slice: slice,
            slice_count: 1,
        }
    }
}

// ============================================================================
// Buffers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub misc_flags: BufferMiscFlags,
    pub usage: Usage,
    pub binding: BindingFlags,
    pub initial_state: ResourceStates,
    /// Element size of structured, vertex and index buffers.
    pub stride: u32,
    pub size: u64,
    /// Element format of typed and index buffers.
    pub format: Format,
    pub allow_unordered_access: bool,
    /// Allocate a bindless index for the shader-resource view.
    pub create_bindless: bool,
    pub debug_name: String,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            misc_flags: BufferMiscFlags::empty(),
            usage: Usage::Default,
            binding: BindingFlags::empty(),
            initial_state: ResourceStates::COMMON,
            stride: 0,
            size: 0,
            format: Format::Unknown,
            allow_unordered_access: false,
            create_bindless: false,
            debug_name: String::new(),
        }
    }
}

/// Byte window of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

/// The range a [`create_subresource`](crate::GraphicsDevice::create_texture_subresource)
/// view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubresourceRange {
    Texture(TextureSubresourceRange),
    Buffer(BufferRange),
}

// ============================================================================
// Shaders & Pipeline States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderStage {
    #[default]
    Vertex,
    Pixel,
    Compute,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub debug_name: String,
}

/// Byte offset that places an attribute right after the previous one.
pub const APPEND_ALIGNED: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttributeDesc {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub is_instanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComparisonFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_func: ComparisonFunc::Less,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPsoDesc {
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: Option<ShaderHandle>,
    pub input_layout: Vec<VertexAttributeDesc>,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_stencil: DepthStencilState,
    pub rtv_formats: SmallVec<[Format; 8]>,
    pub dsv_format: Option<Format>,
    pub sample_count: u32,
    pub debug_name: String,
}

#[derive(Debug, Clone)]
pub struct ComputePsoDesc {
    pub compute_shader: ShaderHandle,
    pub debug_name: String,
}

// ============================================================================
// Barriers
// ============================================================================

/// A state transition, addressed by handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpuBarrier {
    Texture {
        texture: TextureHandle,
        before: ResourceStates,
        after: ResourceStates,
        /// `None` transitions every subresource.
        subresource: Option<u32>,
    },
    Buffer {
        buffer: BufferHandle,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// UAV write-to-read hazard on any resource.
    Memory,
}

// ============================================================================
// Bindless
// ============================================================================

/// Bindless descriptor index embedded into shader-visible data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

impl DescriptorIndex {
    /// Returned when the bindless range is exhausted or the resource has no view.
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for DescriptorIndex {
    fn default() -> Self {
        Self::INVALID
    }
}
