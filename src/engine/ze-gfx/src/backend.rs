use crate::pipeline_stream::PipelineStateStream;
use crate::{PixelFormat, SampleDesc};
use enumflags2::{bitflags, BitFlags};
use num_derive::FromPrimitive;
use raw_window_handle::RawWindowHandle;
use std::any::Any;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum BackendError {
    #[error("backend is not supported on this platform")]
    Unsupported,
    #[error("no compatible adapter found")]
    NoCompatibleAdapter,
}

pub trait Backend: Send + Sync {
    fn create_device(&self, options: &DeviceOptions) -> Result<Arc<dyn Device>, BackendError>;
    fn name(&self) -> &str;
}

/// Switches consumed by backends at device creation
#[derive(Default, Copy, Clone, Debug)]
pub struct DeviceOptions {
    pub enable_debug_layer: bool,
    pub break_on_validation: bool,
    pub stable_power_state: bool,
    pub wait_for_debugger: bool,
}

#[derive(Error, Ord, PartialOrd, Eq, PartialEq, Debug, Copy, Clone)]
pub enum DeviceError {
    #[error("unknown device error")]
    Unknown,
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid parameters")]
    InvalidParameters,
    #[error("device removed")]
    DeviceRemoved,
    #[error("unsupported operation")]
    Unsupported,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub render_passes: bool,
    pub mesh_shaders: bool,
    pub raytracing: bool,
    pub variable_rate_shading: bool,
}

/// Queue families, the discriminant is the tag stored in the upper bits of fence values
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, FromPrimitive)]
#[repr(u8)]
pub enum QueueType {
    Direct = 0,
    Compute = 1,
    Copy = 2,
}

impl QueueType {
    pub const COUNT: usize = 3;
    pub const ALL: [QueueType; Self::COUNT] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueType::Direct => write!(f, "Direct"),
            QueueType::Compute => write!(f, "Compute"),
            QueueType::Copy => write!(f, "Copy"),
        }
    }
}

/// Bit set of resource usages. Values match the native API so backends can pass them through.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceStates(u32);

impl ResourceStates {
    pub const COMMON: Self = Self(0);
    pub const VERTEX_AND_CONSTANT_BUFFER: Self = Self(0x1);
    pub const INDEX_BUFFER: Self = Self(0x2);
    pub const RENDER_TARGET: Self = Self(0x4);
    pub const UNORDERED_ACCESS: Self = Self(0x8);
    pub const DEPTH_WRITE: Self = Self(0x10);
    pub const DEPTH_READ: Self = Self(0x20);
    pub const NON_PIXEL_SHADER_RESOURCE: Self = Self(0x40);
    pub const PIXEL_SHADER_RESOURCE: Self = Self(0x80);
    pub const STREAM_OUT: Self = Self(0x100);
    pub const INDIRECT_ARGUMENT: Self = Self(0x200);
    pub const COPY_DEST: Self = Self(0x400);
    pub const COPY_SOURCE: Self = Self(0x800);
    pub const RESOLVE_DEST: Self = Self(0x1000);
    pub const RESOLVE_SOURCE: Self = Self(0x2000);
    pub const RAYTRACING_ACCELERATION_STRUCTURE: Self = Self(0x400000);
    pub const SHADING_RATE_SOURCE: Self = Self(0x1000000);
    pub const GENERIC_READ: Self = Self(0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800);
    pub const PRESENT: Self = Self(0);

    /// Not a real state, marks a subresource whose state hasn't been observed yet
    pub const UNKNOWN: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    /// True if every bit is a read-only usage (a subset of GENERIC_READ | INDIRECT_ARGUMENT)
    pub fn is_read_only(self) -> bool {
        !self.is_unknown()
            && self != Self::COMMON
            && (Self::GENERIC_READ | Self::INDIRECT_ARGUMENT).contains(self)
    }
}

impl Default for ResourceStates {
    fn default() -> Self {
        Self::COMMON
    }
}

impl BitOr for ResourceStates {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResourceStates {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ResourceStates {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for ResourceStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ResourceStates, &str); 16] = [
            (ResourceStates::VERTEX_AND_CONSTANT_BUFFER, "VERTEX_AND_CONSTANT_BUFFER"),
            (ResourceStates::INDEX_BUFFER, "INDEX_BUFFER"),
            (ResourceStates::RENDER_TARGET, "RENDER_TARGET"),
            (ResourceStates::UNORDERED_ACCESS, "UNORDERED_ACCESS"),
            (ResourceStates::DEPTH_WRITE, "DEPTH_WRITE"),
            (ResourceStates::DEPTH_READ, "DEPTH_READ"),
            (ResourceStates::NON_PIXEL_SHADER_RESOURCE, "NON_PIXEL_SHADER_RESOURCE"),
            (ResourceStates::PIXEL_SHADER_RESOURCE, "PIXEL_SHADER_RESOURCE"),
            (ResourceStates::STREAM_OUT, "STREAM_OUT"),
            (ResourceStates::INDIRECT_ARGUMENT, "INDIRECT_ARGUMENT"),
            (ResourceStates::COPY_DEST, "COPY_DEST"),
            (ResourceStates::COPY_SOURCE, "COPY_SOURCE"),
            (ResourceStates::RESOLVE_DEST, "RESOLVE_DEST"),
            (ResourceStates::RESOLVE_SOURCE, "RESOLVE_SOURCE"),
            (
                ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE,
                "RAYTRACING_ACCELERATION_STRUCTURE",
            ),
            (ResourceStates::SHADING_RATE_SOURCE, "SHADING_RATE_SOURCE"),
        ];

        if self.is_unknown() {
            return write!(f, "UNKNOWN");
        }

        if *self == Self::COMMON {
            return write!(f, "COMMON");
        }

        let mut first = true;
        for (state, name) in NAMES.iter() {
            if self.contains(*state) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }

        Ok(())
    }
}

pub const ALL_SUBRESOURCES: u32 = u32::MAX;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HeapType {
    Default,
    Upload,
    Readback,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResourceFlagBits {
    AllowRenderTarget = 1 << 0,
    AllowDepthStencil = 1 << 1,
    AllowUnorderedAccess = 1 << 2,
    DenyShaderResource = 1 << 3,
    RaytracingAccelerationStructure = 1 << 4,
}
pub type ResourceFlags = BitFlags<ResourceFlagBits>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: PixelFormat,
    pub sample_desc: SampleDesc,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    pub fn buffer(size: u64, flags: ResourceFlags) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: PixelFormat::Unknown,
            sample_desc: SampleDesc::default(),
            flags,
        }
    }

    pub fn array_size(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D | ResourceDimension::Buffer => 1,
            _ => self.depth_or_array_size as u32,
        }
    }

    pub fn subresource_count(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Buffer => 1,
            _ => self.mip_levels.max(1) as u32 * self.array_size() * self.format.plane_count(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil((f32, u8)),
}

/// A clear value bound to a resource at creation. Clears using this value are the fast path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OptimizedClearValue {
    pub format: PixelFormat,
    pub value: ClearValue,
}

/** Descriptors */

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub usize);

impl CpuDescriptorHandle {
    pub const NULL: Self = Self(0);

    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as usize * increment as usize)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    pub const NULL: Self = Self(0);

    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views
    View,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;
    pub const ALL: [DescriptorHeapType; Self::COUNT] = [
        DescriptorHeapType::View,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, DescriptorHeapType::View | DescriptorHeapType::Sampler)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DescriptorHeapDesc {
    pub ty: DescriptorHeapType,
    pub count: u32,
    pub shader_visible: bool,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ShaderResourceViewDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_byte_stride: u32,
        raw: bool,
    },
    Texture1D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    Texture1DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        most_detailed_mip: u32,
        mip_levels: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCube {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCubeArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_2d_array_face: u32,
        num_cubes: u32,
    },
    RaytracingAccelerationStructure {
        location: u64,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShaderResourceViewDesc {
    pub format: PixelFormat,
    pub dimension: ShaderResourceViewDimension,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnorderedAccessViewDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_byte_stride: u32,
        counter_offset_in_bytes: u64,
        raw: bool,
    },
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UnorderedAccessViewDesc {
    pub format: PixelFormat,
    pub dimension: UnorderedAccessViewDimension,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RenderTargetViewDimension {
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
        plane_slice: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderTargetViewDesc {
    pub format: PixelFormat,
    pub dimension: RenderTargetViewDimension,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DepthStencilViewDimension {
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2DMs,
    Texture2DMsArray {
        first_array_slice: u32,
        array_size: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthStencilViewDesc {
    pub format: PixelFormat,
    pub dimension: DepthStencilViewDimension,
    pub read_only_depth: bool,
    pub read_only_stencil: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConstantBufferViewDesc {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Linear,
    Nearest,
    Anisotropic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureAddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: TextureAddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_function: Option<ComparisonFunction>,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address_u: TextureAddressMode::Wrap,
            address_v: TextureAddressMode::Wrap,
            address_w: TextureAddressMode::Wrap,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison_function: None,
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/** Barriers */

#[derive(Copy, Clone)]
pub struct ResourceTransitionBarrier<'a> {
    pub resource: &'a Resource,
    pub subresource: u32,
    pub state_before: ResourceStates,
    pub state_after: ResourceStates,
}

#[derive(Copy, Clone)]
pub enum ResourceBarrier<'a> {
    Transition(ResourceTransitionBarrier<'a>),
    Uav(Option<&'a Resource>),
    Aliasing(Option<&'a Resource>, Option<&'a Resource>),
}

/** Copies */

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SubresourceFootprint {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct PlacedSubresourceFootprint {
    pub offset: u64,
    pub footprint: SubresourceFootprint,
}

#[derive(Clone, Debug, Default)]
pub struct CopyableFootprints {
    pub layouts: Vec<PlacedSubresourceFootprint>,
    pub num_rows: Vec<u32>,
    pub row_sizes_in_bytes: Vec<u64>,
    pub total_bytes: u64,
}

#[derive(Copy, Clone)]
pub enum TextureCopyLocation<'a> {
    Subresource(&'a Resource, u32),
    PlacedFootprint(&'a Resource, PlacedSubresourceFootprint),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CopyBox {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

/** Input assembler & rasterizer */

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct VertexBufferView {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexBufferFormat {
    Uint16,
    Uint32,
}

impl IndexBufferFormat {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            IndexBufferFormat::Uint16 => 2,
            IndexBufferFormat::Uint32 => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexBufferView {
    pub buffer_location: u64,
    pub size_in_bytes: u32,
    pub format: IndexBufferFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ClearFlagBits {
    Depth = 1 << 0,
    Stencil = 1 << 1,
}
pub type ClearFlags = BitFlags<ClearFlagBits>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShadingRate {
    Rate1x1,
    Rate1x2,
    Rate2x1,
    Rate2x2,
    Rate2x4,
    Rate4x2,
    Rate4x4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShadingRateCombiner {
    Passthrough,
    Override,
    Min,
    Max,
    Sum,
}

/** Root signatures */

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Amplification,
    Mesh,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

pub const DESCRIPTOR_RANGE_OFFSET_APPEND: u32 = u32::MAX;
pub const UNBOUNDED_DESCRIPTOR_COUNT: u32 = u32::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorRange {
    pub ty: DescriptorRangeType,
    /// `UNBOUNDED_DESCRIPTOR_COUNT` for a bindless range
    pub num_descriptors: u32,
    pub base_shader_register: u32,
    pub register_space: u32,
    pub offset_in_descriptors_from_table_start: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RootParameter {
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
    Constants {
        shader_register: u32,
        register_space: u32,
        num_32bit_values: u32,
        visibility: ShaderVisibility,
    },
    ConstantBufferView {
        shader_register: u32,
        register_space: u32,
        visibility: ShaderVisibility,
    },
    ShaderResourceView {
        shader_register: u32,
        register_space: u32,
        visibility: ShaderVisibility,
    },
    UnorderedAccessView {
        shader_register: u32,
        register_space: u32,
        visibility: ShaderVisibility,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StaticSamplerDesc {
    pub sampler: SamplerDesc,
    pub shader_register: u32,
    pub register_space: u32,
    pub visibility: ShaderVisibility,
}

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RootSignatureFlagBits {
    AllowInputAssemblerInputLayout = 1 << 0,
    CbvSrvUavHeapDirectlyIndexed = 1 << 1,
    SamplerHeapDirectlyIndexed = 1 << 2,
    LocalRootSignature = 1 << 3,
}
pub type RootSignatureFlags = BitFlags<RootSignatureFlagBits>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSamplerDesc>,
    pub flags: RootSignatureFlags,
}

/** Indirect execution */

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndirectArgument {
    Draw,
    DrawIndexed,
    Dispatch,
    DispatchMesh,
    VertexBufferView {
        slot: u32,
    },
    IndexBufferView,
    Constant {
        root_parameter_index: u32,
        dest_offset_in_32bit_values: u32,
        num_32bit_values: u32,
    },
    ConstantBufferView {
        root_parameter_index: u32,
    },
    ShaderResourceView {
        root_parameter_index: u32,
    },
    UnorderedAccessView {
        root_parameter_index: u32,
    },
}

impl IndirectArgument {
    /// Size of the argument inside the argument buffer
    pub fn byte_size(&self) -> u32 {
        match self {
            IndirectArgument::Draw => 16,
            IndirectArgument::DrawIndexed => 20,
            IndirectArgument::Dispatch | IndirectArgument::DispatchMesh => 12,
            IndirectArgument::VertexBufferView { .. } => 16,
            IndirectArgument::IndexBufferView => 16,
            IndirectArgument::Constant {
                num_32bit_values, ..
            } => 4 * num_32bit_values,
            IndirectArgument::ConstantBufferView { .. }
            | IndirectArgument::ShaderResourceView { .. }
            | IndirectArgument::UnorderedAccessView { .. } => 8,
        }
    }

    pub fn needs_root_signature(&self) -> bool {
        matches!(
            self,
            IndirectArgument::Constant { .. }
                | IndirectArgument::ConstantBufferView { .. }
                | IndirectArgument::ShaderResourceView { .. }
                | IndirectArgument::UnorderedAccessView { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSignatureDesc {
    pub byte_stride: u32,
    pub arguments: Vec<IndirectArgument>,
}

/** Ray tracing */

pub const SHADER_IDENTIFIER_SIZE_IN_BYTES: u32 = 32;
pub const RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT: u32 = 32;
pub const RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT: u32 = 64;

pub type ShaderIdentifier = [u8; SHADER_IDENTIFIER_SIZE_IN_BYTES as usize];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct GpuVirtualAddressRange {
    pub start_address: u64,
    pub size_in_bytes: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct GpuVirtualAddressRangeAndStride {
    pub start_address: u64,
    pub size_in_bytes: u64,
    pub stride_in_bytes: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct DispatchRaysDesc {
    pub ray_generation_shader_record: GpuVirtualAddressRange,
    pub miss_shader_table: GpuVirtualAddressRangeAndStride,
    pub hit_group_table: GpuVirtualAddressRangeAndStride,
    pub callable_shader_table: GpuVirtualAddressRangeAndStride,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Debug)]
pub struct DxilLibraryDesc {
    pub bytecode: Arc<[u8]>,
    pub exports: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitGroupType {
    Triangles,
    ProceduralPrimitive,
}

#[derive(Clone, Debug)]
pub struct HitGroupDesc {
    pub name: String,
    pub ty: HitGroupType,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

/// Ray tracing pipeline. The pipeline stack size is left to the runtime default.
#[derive(Clone)]
pub struct StateObjectDesc<'a> {
    pub libraries: Vec<DxilLibraryDesc>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub max_payload_size_in_bytes: u32,
    pub max_attribute_size_in_bytes: u32,
    pub max_trace_recursion_depth: u32,
    pub global_root_signature: Option<&'a RootSignature>,
}

/** Render passes */

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RenderPassBeginningAccess {
    Discard,
    Preserve,
    Clear(OptimizedClearValue),
    NoAccess,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderPassEndingAccess {
    Discard,
    Preserve,
    NoAccess,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderPassRenderTargetDesc {
    pub descriptor: CpuDescriptorHandle,
    pub beginning_access: RenderPassBeginningAccess,
    pub ending_access: RenderPassEndingAccess,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderPassDepthStencilDesc {
    pub descriptor: CpuDescriptorHandle,
    pub depth_beginning_access: RenderPassBeginningAccess,
    pub stencil_beginning_access: RenderPassBeginningAccess,
    pub depth_ending_access: RenderPassEndingAccess,
    pub stencil_ending_access: RenderPassEndingAccess,
}

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RenderPassFlagBits {
    AllowUavWrites = 1 << 0,
    SuspendingPass = 1 << 1,
    ResumingPass = 1 << 2,
}
pub type RenderPassFlags = BitFlags<RenderPassFlagBits>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

/** Swapchain */

#[derive(Copy, Clone)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub sample_desc: SampleDesc,
    pub window_handle: RawWindowHandle,
}

/** Backend objects, each backend stores its own data inside */

macro_rules! backend_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name {
            pub backend_data: Box<dyn Any + Send + Sync>,
        }

        impl $name {
            pub fn new(backend_data: Box<dyn Any + Send + Sync>) -> Self {
                Self { backend_data }
            }

            pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
                self.backend_data.downcast_ref::<T>()
            }

            pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
                self.backend_data.downcast_mut::<T>()
            }
        }
    };
}

backend_object!(Queue);
backend_object!(Fence);
backend_object!(
    /// OS event a CPU thread can block on until a fence reaches a value
    FenceEvent
);
backend_object!(CommandAllocator);
backend_object!(CommandList);
backend_object!(Resource);
backend_object!(DescriptorHeap);
backend_object!(RootSignature);
backend_object!(CommandSignature);
backend_object!(PipelineState);
backend_object!(StateObject);
backend_object!(SwapChain);

/// Thin, 1:1 wrapper over an explicit GPU API. Higher level state tracking lives above this.
pub trait Device: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;

    /// Diagnostics about a removed device, `None` while the device is healthy
    fn device_removed_reason(&self) -> Option<String>;

    /** Queues & fences */
    fn create_queue(&self, ty: QueueType, name: &str) -> Result<Queue, DeviceError>;
    fn create_fence(&self, initial_value: u64, name: &str) -> Result<Fence, DeviceError>;
    fn create_fence_event(&self) -> Result<FenceEvent, DeviceError>;
    fn fence_completed_value(&self, fence: &Fence) -> u64;

    /// Block the calling thread until `fence` reaches `value`
    fn fence_wait(&self, fence: &Fence, value: u64, event: &FenceEvent)
        -> Result<(), DeviceError>;
    fn queue_signal(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError>;
    fn queue_wait(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError>;
    fn queue_execute(&self, queue: &Queue, command_lists: &[&CommandList]);

    /** Command recording objects */
    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError>;
    fn reset_command_allocator(&self, allocator: &CommandAllocator) -> Result<(), DeviceError>;
    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
        name: &str,
    ) -> Result<CommandList, DeviceError>;
    fn reset_command_list(
        &self,
        command_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError>;
    fn close_command_list(&self, command_list: &mut CommandList) -> Result<(), DeviceError>;

    /** Descriptors */
    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        name: &str,
    ) -> Result<DescriptorHeap, DeviceError>;
    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32;
    fn descriptor_heap_cpu_start(&self, heap: &DescriptorHeap) -> CpuDescriptorHandle;

    /// Null handle for heaps that are not shader visible
    fn descriptor_heap_gpu_start(&self, heap: &DescriptorHeap) -> GpuDescriptorHandle;
    fn copy_descriptors_simple(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    );
    fn create_shader_resource_view(
        &self,
        resource: Option<&Resource>,
        desc: &ShaderResourceViewDesc,
        dst: CpuDescriptorHandle,
    );
    fn create_unordered_access_view(
        &self,
        resource: &Resource,
        counter: Option<&Resource>,
        desc: &UnorderedAccessViewDesc,
        dst: CpuDescriptorHandle,
    );
    fn create_render_target_view(
        &self,
        resource: &Resource,
        desc: &RenderTargetViewDesc,
        dst: CpuDescriptorHandle,
    );
    fn create_depth_stencil_view(
        &self,
        resource: &Resource,
        desc: &DepthStencilViewDesc,
        dst: CpuDescriptorHandle,
    );
    fn create_constant_buffer_view(&self, desc: &ConstantBufferViewDesc, dst: CpuDescriptorHandle);
    fn create_sampler(&self, desc: &SamplerDesc, dst: CpuDescriptorHandle);

    /** Resources */
    fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        heap_type: HeapType,
        initial_state: ResourceStates,
        clear_value: Option<&OptimizedClearValue>,
        name: &str,
    ) -> Result<Resource, DeviceError>;

    /// Persistent CPU pointer of an upload or readback resource
    fn map_resource(&self, resource: &Resource) -> Result<*mut u8, DeviceError>;
    fn resource_gpu_address(&self, resource: &Resource) -> u64;
    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first_subresource: u32,
        num_subresources: u32,
        base_offset: u64,
    ) -> CopyableFootprints;

    /** Pipelines */
    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
        name: &str,
    ) -> Result<RootSignature, DeviceError>;
    fn create_command_signature(
        &self,
        desc: &CommandSignatureDesc,
        root_signature: Option<&RootSignature>,
    ) -> Result<CommandSignature, DeviceError>;
    fn create_pipeline_state(
        &self,
        stream: &PipelineStateStream,
        root_signature: &RootSignature,
        name: &str,
    ) -> Result<PipelineState, DeviceError>;
    fn create_state_object(
        &self,
        desc: &StateObjectDesc,
        name: &str,
    ) -> Result<StateObject, DeviceError>;
    fn shader_identifier(&self, state_object: &StateObject, export: &str)
        -> Option<ShaderIdentifier>;

    /** Swapchains */
    fn create_swapchain(&self, desc: &SwapChainDesc, queue: &Queue)
        -> Result<SwapChain, DeviceError>;
    fn swapchain_backbuffer(&self, swapchain: &SwapChain, index: u32)
        -> Result<Resource, DeviceError>;
    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32;
    fn resize_swapchain(
        &self,
        swapchain: &SwapChain,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError>;
    fn present(&self, swapchain: &SwapChain, sync_interval: u32) -> Result<(), DeviceError>;

    /** Commands */
    fn cmd_resource_barrier(&self, command_list: &mut CommandList, barriers: &[ResourceBarrier]);
    fn cmd_copy_buffer_region(
        &self,
        command_list: &mut CommandList,
        dst: &Resource,
        dst_offset: u64,
        src: &Resource,
        src_offset: u64,
        size: u64,
    );
    fn cmd_copy_resource(&self, command_list: &mut CommandList, dst: &Resource, src: &Resource);
    fn cmd_copy_texture_region(
        &self,
        command_list: &mut CommandList,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: &TextureCopyLocation,
        src_box: Option<&CopyBox>,
    );
    fn cmd_resolve_subresource(
        &self,
        command_list: &mut CommandList,
        dst: &Resource,
        dst_subresource: u32,
        src: &Resource,
        src_subresource: u32,
        format: PixelFormat,
    );
    fn cmd_clear_render_target_view(
        &self,
        command_list: &mut CommandList,
        rtv: CpuDescriptorHandle,
        color: [f32; 4],
    );
    fn cmd_clear_depth_stencil_view(
        &self,
        command_list: &mut CommandList,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    );
    fn cmd_clear_unordered_access_view_uint(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [u32; 4],
    );
    fn cmd_clear_unordered_access_view_float(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [f32; 4],
    );
    fn cmd_set_descriptor_heaps(&self, command_list: &mut CommandList, heaps: &[&DescriptorHeap]);
    fn cmd_set_root_signature(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    );
    fn cmd_set_pipeline_state(&self, command_list: &mut CommandList, pipeline: &PipelineState);
    fn cmd_set_state_object(&self, command_list: &mut CommandList, state_object: &StateObject);
    fn cmd_set_root_descriptor_table(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        base: GpuDescriptorHandle,
    );
    fn cmd_set_root_constant_buffer_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    );
    fn cmd_set_root_shader_resource_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    );
    fn cmd_set_root_unordered_access_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    );
    fn cmd_set_root_32bit_constants(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        values: &[u32],
        dest_offset: u32,
    );
    fn cmd_set_vertex_buffers(
        &self,
        command_list: &mut CommandList,
        start_slot: u32,
        views: &[VertexBufferView],
    );
    fn cmd_set_index_buffer(&self, command_list: &mut CommandList, view: &IndexBufferView);
    fn cmd_set_primitive_topology(&self, command_list: &mut CommandList, topology: PrimitiveTopology);
    fn cmd_set_viewports(&self, command_list: &mut CommandList, viewports: &[Viewport]);
    fn cmd_set_scissors(&self, command_list: &mut CommandList, scissors: &[Rect]);
    fn cmd_set_render_targets(
        &self,
        command_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    );
    fn cmd_begin_render_pass(
        &self,
        command_list: &mut CommandList,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
        flags: RenderPassFlags,
    );
    fn cmd_end_render_pass(&self, command_list: &mut CommandList);
    fn cmd_draw_instanced(
        &self,
        command_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    );
    fn cmd_draw_indexed_instanced(
        &self,
        command_list: &mut CommandList,
        index_count_per_instance: u32,
        instance_count: u32,
        start_index_location: u32,
        base_vertex_location: i32,
        start_instance_location: u32,
    );
    fn cmd_dispatch(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32);
    fn cmd_dispatch_mesh(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32);
    fn cmd_dispatch_rays(&self, command_list: &mut CommandList, desc: &DispatchRaysDesc);
    fn cmd_execute_indirect(
        &self,
        command_list: &mut CommandList,
        signature: &CommandSignature,
        max_command_count: u32,
        argument_buffer: &Resource,
        argument_buffer_offset: u64,
        count_buffer: Option<&Resource>,
        count_buffer_offset: u64,
    );
    fn cmd_set_shading_rate(
        &self,
        command_list: &mut CommandList,
        rate: ShadingRate,
        combiners: [ShadingRateCombiner; 2],
    );
    fn cmd_begin_event(&self, command_list: &mut CommandList, name: &str);
    fn cmd_end_event(&self, command_list: &mut CommandList);
}
