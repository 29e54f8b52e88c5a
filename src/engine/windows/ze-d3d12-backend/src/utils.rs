use std::ops::Deref;
use windows::core::*;
use windows::Win32;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_gfx::backend::{
    ComparisonFunction, DescriptorHeapType, DeviceError, Filter, HeapType, PrimitiveTopology,
    QueueType, ResourceStates, SamplerDesc, ShaderVisibility, TextureAddressMode,
};
use ze_gfx::pipeline_stream::PrimitiveTopologyType;
use ze_gfx::{PixelFormat, SampleDesc};

/// Struct used to wrap a IUnknown to become Send/Sync for uses with Mutexes and such
#[derive(Clone)]
pub struct SendableIUnknown<T: Interface>(pub T);

impl<T: Interface> SendableIUnknown<T> {
    pub fn new(object: T) -> Self {
        Self(object)
    }
}

impl<T: Interface> From<T> for SendableIUnknown<T> {
    fn from(object: T) -> Self {
        Self::new(object)
    }
}

unsafe impl<T: Interface> Send for SendableIUnknown<T> {}
unsafe impl<T: Interface> Sync for SendableIUnknown<T> {}

impl<T: Interface> Deref for SendableIUnknown<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Null-terminated UTF-16 copy of `str`
pub fn to_wide(str: &str) -> Vec<u16> {
    str.encode_utf16().chain(std::iter::once(0)).collect()
}

pub fn set_resource_name(object: &ID3D12Object, str: &str) {
    let name = to_wide(str);
    unsafe {
        // Naming is a debugging aid only
        let _ = object.SetName(PCWSTR(name.as_ptr()));
    }
}

pub fn convert_d3d_error_to_ze_device_error(result: Error) -> DeviceError {
    match result.code() {
        Win32::Foundation::E_OUTOFMEMORY => DeviceError::OutOfMemory,
        Win32::Foundation::E_INVALIDARG => DeviceError::InvalidParameters,
        Win32::Graphics::Dxgi::DXGI_ERROR_INVALID_CALL => DeviceError::InvalidParameters,
        Win32::Graphics::Dxgi::DXGI_ERROR_DEVICE_REMOVED
        | Win32::Graphics::Dxgi::DXGI_ERROR_DEVICE_RESET
        | Win32::Graphics::Dxgi::DXGI_ERROR_DEVICE_HUNG => DeviceError::DeviceRemoved,
        Win32::Graphics::Dxgi::DXGI_ERROR_UNSUPPORTED => DeviceError::Unsupported,
        _ => DeviceError::Unknown,
    }
}

pub fn get_d3d_command_list_type(ty: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match ty {
        QueueType::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

pub fn get_d3d_descriptor_heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::View => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

pub fn get_d3d_heap_type(heap_type: HeapType) -> D3D12_HEAP_TYPE {
    match heap_type {
        HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
        HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
        HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

/// Resource state bits share their values with the native states
pub fn get_d3d_resource_states(states: ResourceStates) -> D3D12_RESOURCE_STATES {
    debug_assert!(!states.is_unknown());
    D3D12_RESOURCE_STATES(states.bits() as i32)
}

pub fn get_dxgi_format_from_ze_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Unknown => DXGI_FORMAT_UNKNOWN,
        PixelFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        PixelFormat::R8G8Unorm => DXGI_FORMAT_R8G8_UNORM,
        PixelFormat::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        PixelFormat::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        PixelFormat::R10G10B10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        PixelFormat::R11G11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        PixelFormat::R16Uint => DXGI_FORMAT_R16_UINT,
        PixelFormat::R16Unorm => DXGI_FORMAT_R16_UNORM,
        PixelFormat::R16Float => DXGI_FORMAT_R16_FLOAT,
        PixelFormat::R16Typeless => DXGI_FORMAT_R16_TYPELESS,
        PixelFormat::R16G16Float => DXGI_FORMAT_R16G16_FLOAT,
        PixelFormat::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::R16G16B16A16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        PixelFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        PixelFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        PixelFormat::R32Typeless => DXGI_FORMAT_R32_TYPELESS,
        PixelFormat::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        PixelFormat::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        PixelFormat::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        PixelFormat::R24G8Typeless => DXGI_FORMAT_R24G8_TYPELESS,
        PixelFormat::R24UnormX8Typeless => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        PixelFormat::R32G8X24Typeless => DXGI_FORMAT_R32G8X24_TYPELESS,
        PixelFormat::R32FloatX8X24Typeless => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        PixelFormat::D16Unorm => DXGI_FORMAT_D16_UNORM,
        PixelFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        PixelFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
        PixelFormat::D32FloatS8X24Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        PixelFormat::Bc1Unorm => DXGI_FORMAT_BC1_UNORM,
        PixelFormat::Bc3Unorm => DXGI_FORMAT_BC3_UNORM,
        PixelFormat::Bc5Unorm => DXGI_FORMAT_BC5_UNORM,
        PixelFormat::Bc7Unorm => DXGI_FORMAT_BC7_UNORM,
        _ => DXGI_FORMAT_UNKNOWN,
    }
}

pub fn get_ze_format_from_dxgi_format(format: DXGI_FORMAT) -> PixelFormat {
    match format {
        DXGI_FORMAT_R8_UNORM => PixelFormat::R8Unorm,
        DXGI_FORMAT_R8G8_UNORM => PixelFormat::R8G8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM => PixelFormat::R8G8B8A8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => PixelFormat::R8G8B8A8UnormSrgb,
        DXGI_FORMAT_B8G8R8A8_UNORM => PixelFormat::B8G8R8A8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => PixelFormat::B8G8R8A8UnormSrgb,
        DXGI_FORMAT_R10G10B10A2_UNORM => PixelFormat::R10G10B10A2Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => PixelFormat::R16G16B16A16Float,
        _ => PixelFormat::Unknown,
    }
}

pub fn get_dxgi_sample_desc_from_ze_sample_desc(sample_desc: SampleDesc) -> DXGI_SAMPLE_DESC {
    DXGI_SAMPLE_DESC {
        Count: sample_desc.count,
        Quality: sample_desc.quality,
    }
}

pub fn get_d3d_comparison_func(func: ComparisonFunction) -> D3D12_COMPARISON_FUNC {
    match func {
        ComparisonFunction::Never => D3D12_COMPARISON_FUNC_NEVER,
        ComparisonFunction::Less => D3D12_COMPARISON_FUNC_LESS,
        ComparisonFunction::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        ComparisonFunction::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        ComparisonFunction::Greater => D3D12_COMPARISON_FUNC_GREATER,
        ComparisonFunction::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        ComparisonFunction::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        ComparisonFunction::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn get_d3d_filter(filter: Filter, comparison: bool) -> D3D12_FILTER {
    match (filter, comparison) {
        (Filter::Nearest, false) => D3D12_FILTER_MIN_MAG_MIP_POINT,
        (Filter::Linear, false) => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, false) => D3D12_FILTER_ANISOTROPIC,
        (Filter::Nearest, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_POINT,
        (Filter::Linear, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, true) => D3D12_FILTER_COMPARISON_ANISOTROPIC,
    }
}

pub fn get_d3d_texture_address_mode(address_mode: TextureAddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match address_mode {
        TextureAddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        TextureAddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        TextureAddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        TextureAddressMode::Border => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    }
}

pub fn get_d3d_sampler_desc(desc: &SamplerDesc) -> D3D12_SAMPLER_DESC {
    D3D12_SAMPLER_DESC {
        Filter: get_d3d_filter(desc.filter, desc.comparison_function.is_some()),
        AddressU: get_d3d_texture_address_mode(desc.address_u),
        AddressV: get_d3d_texture_address_mode(desc.address_v),
        AddressW: get_d3d_texture_address_mode(desc.address_w),
        MipLODBias: desc.mip_lod_bias,
        MaxAnisotropy: desc.max_anisotropy,
        ComparisonFunc: get_d3d_comparison_func(
            desc.comparison_function
                .unwrap_or(ComparisonFunction::Never),
        ),
        BorderColor: desc.border_color,
        MinLOD: desc.min_lod,
        MaxLOD: desc.max_lod,
    }
}

pub fn get_d3d_shader_visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Hull => D3D12_SHADER_VISIBILITY_HULL,
        ShaderVisibility::Domain => D3D12_SHADER_VISIBILITY_DOMAIN,
        ShaderVisibility::Geometry => D3D12_SHADER_VISIBILITY_GEOMETRY,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
        ShaderVisibility::Amplification => D3D12_SHADER_VISIBILITY_AMPLIFICATION,
        ShaderVisibility::Mesh => D3D12_SHADER_VISIBILITY_MESH,
    }
}

pub fn get_d3d_primitive_topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        PrimitiveTopology::PatchList(control_points) => D3D_PRIMITIVE_TOPOLOGY(
            D3D_PRIMITIVE_TOPOLOGY_1_CONTROL_POINT_PATCHLIST.0 + control_points.max(1) as i32 - 1,
        ),
    }
}

pub fn get_d3d_primitive_topology_type(
    topology: PrimitiveTopologyType,
) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PrimitiveTopologyType::Patch => D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH,
    }
}
