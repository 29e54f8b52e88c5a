//! Pipeline state streams: an ordered list of typed subobjects.
//!
//! Backends serialize the stream with [`StreamWriter`], which reproduces the native layout:
//! every subobject starts on a pointer-aligned boundary with a `u32` tag, followed by its
//! payload at the payload's natural alignment, padded up to pointer alignment.

use crate::backend::{ComparisonFunction, PrimitiveTopology};
use crate::{PixelFormat, SampleDesc};
use std::mem;
use std::sync::Arc;

pub type ShaderBytecode = Arc<[u8]>;

pub const MAX_RENDER_TARGETS: usize = 8;

/// Native subobject tags
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SubobjectType {
    RootSignature = 0,
    VertexShader = 1,
    PixelShader = 2,
    DomainShader = 3,
    HullShader = 4,
    GeometryShader = 5,
    ComputeShader = 6,
    Blend = 8,
    SampleMask = 9,
    Rasterizer = 10,
    DepthStencil = 11,
    InputLayout = 12,
    PrimitiveTopologyType = 14,
    RenderTargetFormats = 15,
    DepthStencilFormat = 16,
    SampleDesc = 17,
    AmplificationShader = 24,
    MeshShader = 25,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: bool,
    pub src_blend: BlendFactor,
    pub dest_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    pub write_mask: u8,
}

impl Default for RenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            write_mask: 0xF,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlendDesc {
    pub alpha_to_coverage_enable: bool,
    pub independent_blend_enable: bool,
    pub render_targets: [RenderTargetBlendDesc; MAX_RENDER_TARGETS],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FillMode {
    Wireframe,
    Solid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub conservative_raster: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            conservative_raster: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StencilOpDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunction,
}

impl Default for StencilOpDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: ComparisonFunction::Always,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: ComparisonFunction,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilOpDesc,
    pub back_face: StencilOpDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_enable: true,
            depth_func: ComparisonFunction::GreaterEqual,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front_face: StencilOpDesc::default(),
            back_face: StencilOpDesc::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InputElementDesc {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: PixelFormat,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub per_instance: bool,
    pub instance_data_step_rate: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopologyType {
    Point,
    Line,
    Triangle,
    Patch,
}

impl From<PrimitiveTopology> for PrimitiveTopologyType {
    fn from(topology: PrimitiveTopology) -> Self {
        match topology {
            PrimitiveTopology::PointList => PrimitiveTopologyType::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => {
                PrimitiveTopologyType::Line
            }
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
                PrimitiveTopologyType::Triangle
            }
            PrimitiveTopology::PatchList(_) => PrimitiveTopologyType::Patch,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineSubobject {
    VertexShader(ShaderBytecode),
    PixelShader(ShaderBytecode),
    GeometryShader(ShaderBytecode),
    ComputeShader(ShaderBytecode),
    AmplificationShader(ShaderBytecode),
    MeshShader(ShaderBytecode),
    Blend(BlendDesc),
    SampleMask(u32),
    Rasterizer(RasterizerDesc),
    DepthStencil(DepthStencilDesc),
    InputLayout(Vec<InputElementDesc>),
    PrimitiveTopologyType(PrimitiveTopologyType),
    RenderTargetFormats(Vec<PixelFormat>),
    DepthStencilFormat(PixelFormat),
    SampleDesc(SampleDesc),
}

impl PipelineSubobject {
    pub fn ty(&self) -> SubobjectType {
        match self {
            PipelineSubobject::VertexShader(_) => SubobjectType::VertexShader,
            PipelineSubobject::PixelShader(_) => SubobjectType::PixelShader,
            PipelineSubobject::GeometryShader(_) => SubobjectType::GeometryShader,
            PipelineSubobject::ComputeShader(_) => SubobjectType::ComputeShader,
            PipelineSubobject::AmplificationShader(_) => SubobjectType::AmplificationShader,
            PipelineSubobject::MeshShader(_) => SubobjectType::MeshShader,
            PipelineSubobject::Blend(_) => SubobjectType::Blend,
            PipelineSubobject::SampleMask(_) => SubobjectType::SampleMask,
            PipelineSubobject::Rasterizer(_) => SubobjectType::Rasterizer,
            PipelineSubobject::DepthStencil(_) => SubobjectType::DepthStencil,
            PipelineSubobject::InputLayout(_) => SubobjectType::InputLayout,
            PipelineSubobject::PrimitiveTopologyType(_) => SubobjectType::PrimitiveTopologyType,
            PipelineSubobject::RenderTargetFormats(_) => SubobjectType::RenderTargetFormats,
            PipelineSubobject::DepthStencilFormat(_) => SubobjectType::DepthStencilFormat,
            PipelineSubobject::SampleDesc(_) => SubobjectType::SampleDesc,
        }
    }
}

/// Ordered list of subobjects, the root signature is given separately at creation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineStateStream {
    subobjects: Vec<PipelineSubobject>,
}

impl PipelineStateStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subobject, replacing any previous subobject of the same type
    pub fn with(mut self, subobject: PipelineSubobject) -> Self {
        self.set(subobject);
        self
    }

    pub fn set(&mut self, subobject: PipelineSubobject) {
        let ty = subobject.ty();
        match self.subobjects.iter_mut().find(|existing| existing.ty() == ty) {
            Some(existing) => *existing = subobject,
            None => self.subobjects.push(subobject),
        }
    }

    pub fn subobjects(&self) -> &[PipelineSubobject] {
        &self.subobjects
    }

    pub fn is_compute(&self) -> bool {
        self.subobjects
            .iter()
            .any(|subobject| matches!(subobject, PipelineSubobject::ComputeShader(_)))
    }

    pub fn is_mesh(&self) -> bool {
        self.subobjects
            .iter()
            .any(|subobject| matches!(subobject, PipelineSubobject::MeshShader(_)))
    }
}

const STREAM_ALIGNMENT: usize = mem::align_of::<*const u8>();

/// Emits subobjects in the native pipeline state stream layout
#[derive(Default)]
pub struct StreamWriter {
    bytes: Vec<u8>,
}

impl StreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn pad_to(&mut self, alignment: usize) {
        let len = crate::utils::align_up(self.bytes.len() as u64, alignment as u64) as usize;
        self.bytes.resize(len, 0);
    }

    /// Write a tagged subobject whose payload is `payload`, aligned to `payload_alignment`.
    /// Returns the offset of the payload inside the stream.
    pub fn write_bytes(&mut self, ty: u32, payload: &[u8], payload_alignment: usize) -> usize {
        let alignment = STREAM_ALIGNMENT.max(payload_alignment);
        self.pad_to(alignment);
        self.bytes.extend_from_slice(&ty.to_ne_bytes());
        self.pad_to(payload_alignment);
        let payload_offset = self.bytes.len();
        self.bytes.extend_from_slice(payload);
        self.pad_to(alignment);
        payload_offset
    }

    /// Write a tagged plain-old-data payload
    ///
    /// # Safety
    /// `T` must be a `repr(C)` type without padding bytes or interior pointers the stream
    /// would outlive.
    pub unsafe fn write<T: Copy>(&mut self, ty: u32, payload: &T) -> usize {
        let bytes =
            std::slice::from_raw_parts(payload as *const T as *const u8, mem::size_of::<T>());
        self.write_bytes(ty, bytes, mem::align_of::<T>())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline_stream::{
        PipelineStateStream, PipelineSubobject, StreamWriter, SubobjectType,
    };
    use crate::PixelFormat;
    use std::sync::Arc;

    #[test]
    fn subobjects_are_pointer_aligned() {
        let mut writer = StreamWriter::new();
        let mask = writer.write_bytes(SubobjectType::SampleMask as u32, &u32::MAX.to_ne_bytes(), 4);
        assert_eq!(mask, 4);
        assert_eq!(writer.len(), 8);

        let root = writer.write_bytes(SubobjectType::RootSignature as u32, &[1u8; 8], 8);
        assert_eq!(root, 16);
        assert_eq!(writer.len(), 24);

        let small = writer.write_bytes(SubobjectType::DepthStencilFormat as u32, &[7u8; 3], 1);
        assert_eq!(small, 28);
        assert_eq!(writer.len(), 32);

        assert_eq!(
            &writer.as_bytes()[24..28],
            &(SubobjectType::DepthStencilFormat as u32).to_ne_bytes()
        );
    }

    #[test]
    fn stream_replaces_subobjects_of_same_type() {
        let bytecode: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        let stream = PipelineStateStream::new()
            .with(PipelineSubobject::ComputeShader(bytecode))
            .with(PipelineSubobject::DepthStencilFormat(PixelFormat::D32Float))
            .with(PipelineSubobject::DepthStencilFormat(PixelFormat::D16Unorm));

        assert!(stream.is_compute());
        assert_eq!(stream.subobjects().len(), 2);
        assert_eq!(
            stream.subobjects()[1],
            PipelineSubobject::DepthStencilFormat(PixelFormat::D16Unorm)
        );
    }
}
