use crate::utils::{get_dxgi_format_from_ze_format, get_dxgi_sample_desc_from_ze_sample_desc};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_gfx::backend::*;

pub fn get_d3d_resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.flags.contains(ResourceFlagBits::AllowRenderTarget) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.flags.contains(ResourceFlagBits::AllowDepthStencil) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    // Acceleration structures are written by the build as unordered access
    if desc.flags.contains(ResourceFlagBits::AllowUnorderedAccess)
        || desc
            .flags
            .contains(ResourceFlagBits::RaytracingAccelerationStructure)
    {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    if desc.flags.contains(ResourceFlagBits::DenyShaderResource) {
        flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
    }

    D3D12_RESOURCE_DESC {
        Dimension: match desc.dimension {
            ResourceDimension::Buffer => D3D12_RESOURCE_DIMENSION_BUFFER,
            ResourceDimension::Texture1D => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
            ResourceDimension::Texture2D => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            ResourceDimension::Texture3D => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
        },
        Alignment: 0,
        Width: desc.width,
        Height: desc.height,
        DepthOrArraySize: desc.depth_or_array_size,
        MipLevels: desc.mip_levels,
        Format: get_dxgi_format_from_ze_format(desc.format),
        SampleDesc: get_dxgi_sample_desc_from_ze_sample_desc(desc.sample_desc),
        Layout: if desc.dimension == ResourceDimension::Buffer {
            D3D12_TEXTURE_LAYOUT_ROW_MAJOR
        } else {
            D3D12_TEXTURE_LAYOUT_UNKNOWN
        },
        Flags: flags,
    }
}

pub fn get_d3d_clear_value(clear_value: &OptimizedClearValue) -> D3D12_CLEAR_VALUE {
    D3D12_CLEAR_VALUE {
        Format: get_dxgi_format_from_ze_format(clear_value.format),
        Anonymous: match clear_value.value {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE_0 { Color: color },
            ClearValue::DepthStencil((depth, stencil)) => D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: depth,
                    Stencil: stencil,
                },
            },
        },
    }
}

pub fn get_d3d_srv_desc(desc: &ShaderResourceViewDesc) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    let mut format = get_dxgi_format_from_ze_format(desc.format);
    let (view_dimension, anonymous) = match desc.dimension {
        ShaderResourceViewDimension::Buffer {
            first_element,
            num_elements,
            structure_byte_stride,
            raw,
        } => {
            if raw {
                format = DXGI_FORMAT_R32_TYPELESS;
            }

            (
                D3D12_SRV_DIMENSION_BUFFER,
                D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_SRV {
                        FirstElement: first_element,
                        NumElements: num_elements,
                        StructureByteStride: structure_byte_stride,
                        Flags: if raw {
                            D3D12_BUFFER_SRV_FLAG_RAW
                        } else {
                            D3D12_BUFFER_SRV_FLAG_NONE
                        },
                    },
                },
            )
        }
        ShaderResourceViewDimension::Texture1D {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE1D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::Texture1DArray {
            most_detailed_mip,
            mip_levels,
            first_array_slice,
            array_size,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE1DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::Texture2D {
            most_detailed_mip,
            mip_levels,
            plane_slice,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    PlaneSlice: plane_slice,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::Texture2DArray {
            most_detailed_mip,
            mip_levels,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::Texture2DMs => (
            D3D12_SRV_DIMENSION_TEXTURE2DMS,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_SRV {
                    UnusedField_NothingToDefine: 0,
                },
            },
        ),
        ShaderResourceViewDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_SRV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        ShaderResourceViewDimension::Texture3D {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURE3D,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::TextureCube {
            most_detailed_mip,
            mip_levels,
        } => (
            D3D12_SRV_DIMENSION_TEXTURECUBE,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCube: D3D12_TEXCUBE_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::TextureCubeArray {
            most_detailed_mip,
            mip_levels,
            first_2d_array_face,
            num_cubes,
        } => (
            D3D12_SRV_DIMENSION_TEXTURECUBEARRAY,
            D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCubeArray: D3D12_TEXCUBE_ARRAY_SRV {
                    MostDetailedMip: most_detailed_mip,
                    MipLevels: mip_levels,
                    First2DArrayFace: first_2d_array_face,
                    NumCubes: num_cubes,
                    ResourceMinLODClamp: 0.0,
                },
            },
        ),
        ShaderResourceViewDimension::RaytracingAccelerationStructure { location } => {
            format = DXGI_FORMAT_UNKNOWN;
            (
                D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE,
                D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    RaytracingAccelerationStructure: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                        Location: location,
                    },
                },
            )
        }
    };

    D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        ViewDimension: view_dimension,
        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
        Anonymous: anonymous,
    }
}

pub fn get_d3d_uav_desc(desc: &UnorderedAccessViewDesc) -> D3D12_UNORDERED_ACCESS_VIEW_DESC {
    let mut format = get_dxgi_format_from_ze_format(desc.format);
    let (view_dimension, anonymous) = match desc.dimension {
        UnorderedAccessViewDimension::Buffer {
            first_element,
            num_elements,
            structure_byte_stride,
            counter_offset_in_bytes,
            raw,
        } => {
            if raw {
                format = DXGI_FORMAT_R32_TYPELESS;
            }

            (
                D3D12_UAV_DIMENSION_BUFFER,
                D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_UAV {
                        FirstElement: first_element,
                        NumElements: num_elements,
                        StructureByteStride: structure_byte_stride,
                        CounterOffsetInBytes: counter_offset_in_bytes,
                        Flags: if raw {
                            D3D12_BUFFER_UAV_FLAG_RAW
                        } else {
                            D3D12_BUFFER_UAV_FLAG_NONE
                        },
                    },
                },
            )
        }
        UnorderedAccessViewDimension::Texture1D { mip_slice } => (
            D3D12_UAV_DIMENSION_TEXTURE1D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_UAV {
                    MipSlice: mip_slice,
                },
            },
        ),
        UnorderedAccessViewDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE1DARRAY,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_UAV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        UnorderedAccessViewDimension::Texture2D {
            mip_slice,
            plane_slice,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE2D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_UAV {
                    MipSlice: mip_slice,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        UnorderedAccessViewDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE2DARRAY,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_UAV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        UnorderedAccessViewDimension::Texture3D {
            mip_slice,
            first_w_slice,
            w_size,
        } => (
            D3D12_UAV_DIMENSION_TEXTURE3D,
            D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_UAV {
                    MipSlice: mip_slice,
                    FirstWSlice: first_w_slice,
                    WSize: w_size,
                },
            },
        ),
    };

    D3D12_UNORDERED_ACCESS_VIEW_DESC {
        Format: format,
        ViewDimension: view_dimension,
        Anonymous: anonymous,
    }
}

pub fn get_d3d_rtv_desc(desc: &RenderTargetViewDesc) -> D3D12_RENDER_TARGET_VIEW_DESC {
    let (view_dimension, anonymous) = match desc.dimension {
        RenderTargetViewDimension::Texture1D { mip_slice } => (
            D3D12_RTV_DIMENSION_TEXTURE1D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_RTV {
                    MipSlice: mip_slice,
                },
            },
        ),
        RenderTargetViewDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE1DARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_RTV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        RenderTargetViewDimension::Texture2D {
            mip_slice,
            plane_slice,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE2D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: mip_slice,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        RenderTargetViewDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
            plane_slice,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE2DARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_RTV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                    PlaneSlice: plane_slice,
                },
            },
        ),
        RenderTargetViewDimension::Texture2DMs => (
            D3D12_RTV_DIMENSION_TEXTURE2DMS,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_RTV {
                    UnusedField_NothingToDefine: 0,
                },
            },
        ),
        RenderTargetViewDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_RTV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        RenderTargetViewDimension::Texture3D {
            mip_slice,
            first_w_slice,
            w_size,
        } => (
            D3D12_RTV_DIMENSION_TEXTURE3D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_RTV {
                    MipSlice: mip_slice,
                    FirstWSlice: first_w_slice,
                    WSize: w_size,
                },
            },
        ),
    };

    D3D12_RENDER_TARGET_VIEW_DESC {
        Format: get_dxgi_format_from_ze_format(desc.format),
        ViewDimension: view_dimension,
        Anonymous: anonymous,
    }
}

pub fn get_d3d_dsv_desc(desc: &DepthStencilViewDesc) -> D3D12_DEPTH_STENCIL_VIEW_DESC {
    let (view_dimension, anonymous) = match desc.dimension {
        DepthStencilViewDimension::Texture1D { mip_slice } => (
            D3D12_DSV_DIMENSION_TEXTURE1D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture1D: D3D12_TEX1D_DSV {
                    MipSlice: mip_slice,
                },
            },
        ),
        DepthStencilViewDimension::Texture1DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE1DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture1DArray: D3D12_TEX1D_ARRAY_DSV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        DepthStencilViewDimension::Texture2D { mip_slice } => (
            D3D12_DSV_DIMENSION_TEXTURE2D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV {
                    MipSlice: mip_slice,
                },
            },
        ),
        DepthStencilViewDimension::Texture2DArray {
            mip_slice,
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
        DepthStencilViewDimension::Texture2DMs => (
            D3D12_DSV_DIMENSION_TEXTURE2DMS,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_DSV {
                    UnusedField_NothingToDefine: 0,
                },
            },
        ),
        DepthStencilViewDimension::Texture2DMsArray {
            first_array_slice,
            array_size,
        } => (
            D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_DSV {
                    FirstArraySlice: first_array_slice,
                    ArraySize: array_size,
                },
            },
        ),
    };

    let mut flags = D3D12_DSV_FLAG_NONE;
    if desc.read_only_depth {
        flags |= D3D12_DSV_FLAG_READ_ONLY_DEPTH;
    }
    if desc.read_only_stencil {
        flags |= D3D12_DSV_FLAG_READ_ONLY_STENCIL;
    }

    D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: get_dxgi_format_from_ze_format(desc.format),
        ViewDimension: view_dimension,
        Flags: flags,
        Anonymous: anonymous,
    }
}
