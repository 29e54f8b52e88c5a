use crate::device::{
    downcast, D3D12CommandSignature, D3D12Device, D3D12PipelineState, D3D12RootSignature,
    D3D12StateObject,
};
use crate::utils::*;
use std::ffi::{c_void, CString};
use std::mem::transmute_copy;
use std::slice;
use windows::core::{Interface, PCSTR, PCWSTR};
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_core::ze_error;
use ze_gfx::backend::*;
use ze_gfx::pipeline_stream::*;

fn descriptor_range(range: &DescriptorRange) -> D3D12_DESCRIPTOR_RANGE1 {
    D3D12_DESCRIPTOR_RANGE1 {
        RangeType: match range.ty {
            DescriptorRangeType::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
            DescriptorRangeType::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
            DescriptorRangeType::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
            DescriptorRangeType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        },
        NumDescriptors: range.num_descriptors,
        BaseShaderRegister: range.base_shader_register,
        RegisterSpace: range.register_space,
        // Bindless tables are filled while the frame is recorded
        Flags: if range.num_descriptors == UNBOUNDED_DESCRIPTOR_COUNT {
            D3D12_DESCRIPTOR_RANGE_FLAG_DESCRIPTORS_VOLATILE
                | D3D12_DESCRIPTOR_RANGE_FLAG_DATA_VOLATILE
        } else {
            D3D12_DESCRIPTOR_RANGE_FLAG_NONE
        },
        OffsetInDescriptorsFromTableStart: range.offset_in_descriptors_from_table_start,
    }
}

fn static_border_color(color: [f32; 4]) -> D3D12_STATIC_BORDER_COLOR {
    if color == [1.0; 4] {
        D3D12_STATIC_BORDER_COLOR_OPAQUE_WHITE
    } else if color[3] == 1.0 {
        D3D12_STATIC_BORDER_COLOR_OPAQUE_BLACK
    } else {
        D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes = slice::from_raw_parts(
            blob.GetBufferPointer() as *const u8,
            blob.GetBufferSize(),
        );
        String::from_utf8_lossy(bytes)
            .trim_end_matches(char::from(0))
            .to_string()
    }
}

pub fn create_root_signature(
    device: &D3D12Device,
    desc: &RootSignatureDesc,
    name: &str,
) -> Result<RootSignature, DeviceError> {
    let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE1>> = desc
        .parameters
        .iter()
        .map(|parameter| match parameter {
            RootParameter::DescriptorTable { ranges, .. } => {
                ranges.iter().map(descriptor_range).collect()
            }
            _ => vec![],
        })
        .collect();

    let parameters: Vec<D3D12_ROOT_PARAMETER1> = desc
        .parameters
        .iter()
        .zip(ranges.iter())
        .map(|(parameter, ranges)| match parameter {
            RootParameter::DescriptorTable { visibility, .. } => D3D12_ROOT_PARAMETER1 {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER1_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE1 {
                        NumDescriptorRanges: ranges.len() as u32,
                        pDescriptorRanges: ranges.as_ptr(),
                    },
                },
                ShaderVisibility: get_d3d_shader_visibility(*visibility),
            },
            RootParameter::Constants {
                shader_register,
                register_space,
                num_32bit_values,
                visibility,
            } => D3D12_ROOT_PARAMETER1 {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                Anonymous: D3D12_ROOT_PARAMETER1_0 {
                    Constants: D3D12_ROOT_CONSTANTS {
                        ShaderRegister: *shader_register,
                        RegisterSpace: *register_space,
                        Num32BitValues: *num_32bit_values,
                    },
                },
                ShaderVisibility: get_d3d_shader_visibility(*visibility),
            },
            RootParameter::ConstantBufferView {
                shader_register,
                register_space,
                visibility,
            }
            | RootParameter::ShaderResourceView {
                shader_register,
                register_space,
                visibility,
            }
            | RootParameter::UnorderedAccessView {
                shader_register,
                register_space,
                visibility,
            } => D3D12_ROOT_PARAMETER1 {
                ParameterType: match parameter {
                    RootParameter::ConstantBufferView { .. } => D3D12_ROOT_PARAMETER_TYPE_CBV,
                    RootParameter::ShaderResourceView { .. } => D3D12_ROOT_PARAMETER_TYPE_SRV,
                    _ => D3D12_ROOT_PARAMETER_TYPE_UAV,
                },
                Anonymous: D3D12_ROOT_PARAMETER1_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR1 {
                        ShaderRegister: *shader_register,
                        RegisterSpace: *register_space,
                        Flags: D3D12_ROOT_DESCRIPTOR_FLAG_NONE,
                    },
                },
                ShaderVisibility: get_d3d_shader_visibility(*visibility),
            },
        })
        .collect();

    let static_samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
        .static_samplers
        .iter()
        .map(|sampler| {
            let sampler_desc = get_d3d_sampler_desc(&sampler.sampler);
            D3D12_STATIC_SAMPLER_DESC {
                Filter: sampler_desc.Filter,
                AddressU: sampler_desc.AddressU,
                AddressV: sampler_desc.AddressV,
                AddressW: sampler_desc.AddressW,
                MipLODBias: sampler_desc.MipLODBias,
                MaxAnisotropy: sampler_desc.MaxAnisotropy,
                ComparisonFunc: sampler_desc.ComparisonFunc,
                BorderColor: static_border_color(sampler.sampler.border_color),
                MinLOD: sampler_desc.MinLOD,
                MaxLOD: sampler_desc.MaxLOD,
                ShaderRegister: sampler.shader_register,
                RegisterSpace: sampler.register_space,
                ShaderVisibility: get_d3d_shader_visibility(sampler.visibility),
            }
        })
        .collect();

    let mut flags = D3D12_ROOT_SIGNATURE_FLAG_NONE;
    if desc
        .flags
        .contains(RootSignatureFlagBits::AllowInputAssemblerInputLayout)
    {
        flags |= D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT;
    }
    if desc
        .flags
        .contains(RootSignatureFlagBits::CbvSrvUavHeapDirectlyIndexed)
    {
        flags |= D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED;
    }
    if desc
        .flags
        .contains(RootSignatureFlagBits::SamplerHeapDirectlyIndexed)
    {
        flags |= D3D12_ROOT_SIGNATURE_FLAG_SAMPLER_HEAP_DIRECTLY_INDEXED;
    }
    if desc.flags.contains(RootSignatureFlagBits::LocalRootSignature) {
        flags |= D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE;
    }

    let versioned_desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
        Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
        Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
            Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: static_samplers.len() as u32,
                pStaticSamplers: static_samplers.as_ptr(),
                Flags: flags,
            },
        },
    };

    let root_signature: ID3D12RootSignature = unsafe {
        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        if let Err(result) =
            D3D12SerializeVersionedRootSignature(
                &versioned_desc,
                &mut blob,
                Some(&mut error as *mut _),
            )
        {
            ze_error!(
                "Failed to serialize root signature {}: {}",
                name,
                error
                    .as_ref()
                    .map(blob_to_string)
                    .unwrap_or_else(|| result.message().to_string())
            );
            return Err(DeviceError::InvalidParameters);
        }

        let blob = blob.ok_or(DeviceError::Unknown)?;
        let ptr = blob.GetBufferPointer() as *const u8;
        device
            .device()
            .CreateRootSignature(0, slice::from_raw_parts(ptr, blob.GetBufferSize()))
            .map_err(convert_d3d_error_to_ze_device_error)?
    };

    set_resource_name(
        &root_signature
            .cast()
            .map_err(convert_d3d_error_to_ze_device_error)?,
        name,
    );

    Ok(RootSignature::new(Box::new(D3D12RootSignature {
        root_signature: root_signature.into(),
    })))
}

pub fn create_command_signature(
    device: &D3D12Device,
    desc: &CommandSignatureDesc,
    root_signature: Option<&RootSignature>,
) -> Result<CommandSignature, DeviceError> {
    let arguments: Vec<D3D12_INDIRECT_ARGUMENT_DESC> = desc
        .arguments
        .iter()
        .map(|argument| match *argument {
            IndirectArgument::Draw => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_DRAW,
                Anonymous: Default::default(),
            },
            IndirectArgument::DrawIndexed => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_DRAW_INDEXED,
                Anonymous: Default::default(),
            },
            IndirectArgument::Dispatch => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_DISPATCH,
                Anonymous: Default::default(),
            },
            IndirectArgument::DispatchMesh => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_DISPATCH_MESH,
                Anonymous: Default::default(),
            },
            IndirectArgument::IndexBufferView => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_INDEX_BUFFER_VIEW,
                Anonymous: Default::default(),
            },
            IndirectArgument::VertexBufferView { slot } => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_VERTEX_BUFFER_VIEW,
                Anonymous: D3D12_INDIRECT_ARGUMENT_DESC_0 {
                    VertexBuffer: D3D12_INDIRECT_ARGUMENT_DESC_0_4 { Slot: slot },
                },
            },
            IndirectArgument::Constant {
                root_parameter_index,
                dest_offset_in_32bit_values,
                num_32bit_values,
            } => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_CONSTANT,
                Anonymous: D3D12_INDIRECT_ARGUMENT_DESC_0 {
                    Constant: D3D12_INDIRECT_ARGUMENT_DESC_0_0 {
                        RootParameterIndex: root_parameter_index,
                        DestOffsetIn32BitValues: dest_offset_in_32bit_values,
                        Num32BitValuesToSet: num_32bit_values,
                    },
                },
            },
            IndirectArgument::ConstantBufferView {
                root_parameter_index,
            } => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_CONSTANT_BUFFER_VIEW,
                Anonymous: D3D12_INDIRECT_ARGUMENT_DESC_0 {
                    ConstantBufferView: D3D12_INDIRECT_ARGUMENT_DESC_0_1 {
                        RootParameterIndex: root_parameter_index,
                    },
                },
            },
            IndirectArgument::ShaderResourceView {
                root_parameter_index,
            } => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_SHADER_RESOURCE_VIEW,
                Anonymous: D3D12_INDIRECT_ARGUMENT_DESC_0 {
                    ShaderResourceView: D3D12_INDIRECT_ARGUMENT_DESC_0_2 {
                        RootParameterIndex: root_parameter_index,
                    },
                },
            },
            IndirectArgument::UnorderedAccessView {
                root_parameter_index,
            } => D3D12_INDIRECT_ARGUMENT_DESC {
                Type: D3D12_INDIRECT_ARGUMENT_TYPE_UNORDERED_ACCESS_VIEW,
                Anonymous: D3D12_INDIRECT_ARGUMENT_DESC_0 {
                    UnorderedAccessView: D3D12_INDIRECT_ARGUMENT_DESC_0_3 {
                        RootParameterIndex: root_parameter_index,
                    },
                },
            },
        })
        .collect();

    let d3d_desc = D3D12_COMMAND_SIGNATURE_DESC {
        ByteStride: desc.byte_stride,
        NumArgumentDescs: arguments.len() as u32,
        pArgumentDescs: arguments.as_ptr(),
        NodeMask: 0,
    };

    let root_signature: Option<&ID3D12RootSignature> = root_signature.map(|root_signature| {
        &*downcast::<D3D12RootSignature>(&root_signature.backend_data).root_signature
    });

    let mut command_signature: Option<ID3D12CommandSignature> = None;
    unsafe {
        device
            .device()
            .CreateCommandSignature(&d3d_desc, root_signature, &mut command_signature)
    }
    .map_err(convert_d3d_error_to_ze_device_error)?;

    Ok(CommandSignature::new(Box::new(D3D12CommandSignature {
        command_signature: command_signature.ok_or(DeviceError::Unknown)?.into(),
    })))
}

fn shader_bytecode(bytecode: &ShaderBytecode) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: bytecode.as_ptr() as *const c_void,
        BytecodeLength: bytecode.len(),
    }
}

fn bool(value: bool) -> BOOL {
    BOOL::from(value)
}

fn blend_factor(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DestAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::InvDestAlpha => D3D12_BLEND_INV_DEST_ALPHA,
        BlendFactor::DestColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::InvDestColor => D3D12_BLEND_INV_DEST_COLOR,
    }
}

fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

fn stencil_op(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D12_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D12_STENCIL_OP_REPLACE,
        StencilOp::IncrSat => D3D12_STENCIL_OP_INCR_SAT,
        StencilOp::DecrSat => D3D12_STENCIL_OP_DECR_SAT,
        StencilOp::Invert => D3D12_STENCIL_OP_INVERT,
        StencilOp::Incr => D3D12_STENCIL_OP_INCR,
        StencilOp::Decr => D3D12_STENCIL_OP_DECR,
    }
}

fn stencil_op_desc(desc: &StencilOpDesc) -> D3D12_DEPTH_STENCILOP_DESC {
    D3D12_DEPTH_STENCILOP_DESC {
        StencilFailOp: stencil_op(desc.fail_op),
        StencilDepthFailOp: stencil_op(desc.depth_fail_op),
        StencilPassOp: stencil_op(desc.pass_op),
        StencilFunc: get_d3d_comparison_func(desc.func),
    }
}

fn blend_desc(desc: &BlendDesc) -> D3D12_BLEND_DESC {
    D3D12_BLEND_DESC {
        AlphaToCoverageEnable: bool(desc.alpha_to_coverage_enable),
        IndependentBlendEnable: bool(desc.independent_blend_enable),
        RenderTarget: desc
            .render_targets
            .map(|render_target| D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: bool(render_target.blend_enable),
                LogicOpEnable: bool(false),
                SrcBlend: blend_factor(render_target.src_blend),
                DestBlend: blend_factor(render_target.dest_blend),
                BlendOp: blend_op(render_target.blend_op),
                SrcBlendAlpha: blend_factor(render_target.src_blend_alpha),
                DestBlendAlpha: blend_factor(render_target.dest_blend_alpha),
                BlendOpAlpha: blend_op(render_target.blend_op_alpha),
                LogicOp: D3D12_LOGIC_OP_NOOP,
                RenderTargetWriteMask: render_target.write_mask,
            }),
    }
}

fn rasterizer_desc(desc: &RasterizerDesc) -> D3D12_RASTERIZER_DESC {
    D3D12_RASTERIZER_DESC {
        FillMode: match desc.fill_mode {
            FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
            FillMode::Solid => D3D12_FILL_MODE_SOLID,
        },
        CullMode: match desc.cull_mode {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Front => D3D12_CULL_MODE_FRONT,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        },
        FrontCounterClockwise: bool(desc.front_counter_clockwise),
        DepthBias: desc.depth_bias,
        DepthBiasClamp: desc.depth_bias_clamp,
        SlopeScaledDepthBias: desc.slope_scaled_depth_bias,
        DepthClipEnable: bool(desc.depth_clip_enable),
        MultisampleEnable: bool(false),
        AntialiasedLineEnable: bool(false),
        ForcedSampleCount: 0,
        ConservativeRaster: if desc.conservative_raster {
            D3D12_CONSERVATIVE_RASTERIZATION_MODE_ON
        } else {
            D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF
        },
    }
}

fn depth_stencil_desc(desc: &DepthStencilDesc) -> D3D12_DEPTH_STENCIL_DESC {
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: bool(desc.depth_enable),
        DepthWriteMask: if desc.depth_write_enable {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        DepthFunc: get_d3d_comparison_func(desc.depth_func),
        StencilEnable: bool(desc.stencil_enable),
        StencilReadMask: desc.stencil_read_mask,
        StencilWriteMask: desc.stencil_write_mask,
        FrontFace: stencil_op_desc(&desc.front_face),
        BackFace: stencil_op_desc(&desc.back_face),
    }
}

/// Serialize `stream` in the native subobject layout. Every pointer written in the stream
/// borrows from `stream`, `root_signature` or `semantic_names`.
fn write_stream(
    writer: &mut StreamWriter,
    stream: &PipelineStateStream,
    root_signature: &ID3D12RootSignature,
    semantic_names: &mut Vec<CString>,
    input_elements: &mut Vec<D3D12_INPUT_ELEMENT_DESC>,
) -> Result<(), DeviceError> {
    // Input elements point to the semantic names, both are built before anything is written
    for subobject in stream.subobjects() {
        if let PipelineSubobject::InputLayout(elements) = subobject {
            for element in elements {
                semantic_names.push(
                    CString::new(element.semantic_name.as_str())
                        .map_err(|_| DeviceError::InvalidParameters)?,
                );
            }

            for (element, name) in elements.iter().zip(semantic_names.iter()) {
                input_elements.push(D3D12_INPUT_ELEMENT_DESC {
                    SemanticName: PCSTR(name.as_ptr() as *const u8),
                    SemanticIndex: element.semantic_index,
                    Format: get_dxgi_format_from_ze_format(element.format),
                    InputSlot: element.input_slot,
                    AlignedByteOffset: element.aligned_byte_offset,
                    InputSlotClass: if element.per_instance {
                        D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA
                    } else {
                        D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA
                    },
                    InstanceDataStepRate: element.instance_data_step_rate,
                });
            }
        }
    }

    unsafe {
        // The stream holds the interface pointer without a reference of its own
        let root_signature: *mut c_void = transmute_copy(root_signature);
        writer.write(SubobjectType::RootSignature as u32, &root_signature);

        for subobject in stream.subobjects() {
            let ty = subobject.ty() as u32;
            match subobject {
                PipelineSubobject::VertexShader(bytecode)
                | PipelineSubobject::PixelShader(bytecode)
                | PipelineSubobject::GeometryShader(bytecode)
                | PipelineSubobject::ComputeShader(bytecode)
                | PipelineSubobject::AmplificationShader(bytecode)
                | PipelineSubobject::MeshShader(bytecode) => {
                    writer.write(ty, &shader_bytecode(bytecode));
                }
                PipelineSubobject::Blend(desc) => {
                    writer.write(ty, &blend_desc(desc));
                }
                PipelineSubobject::SampleMask(mask) => {
                    writer.write(ty, mask);
                }
                PipelineSubobject::Rasterizer(desc) => {
                    writer.write(ty, &rasterizer_desc(desc));
                }
                PipelineSubobject::DepthStencil(desc) => {
                    writer.write(ty, &depth_stencil_desc(desc));
                }
                PipelineSubobject::InputLayout(_) => {
                    writer.write(
                        ty,
                        &D3D12_INPUT_LAYOUT_DESC {
                            pInputElementDescs: input_elements.as_ptr(),
                            NumElements: input_elements.len() as u32,
                        },
                    );
                }
                PipelineSubobject::PrimitiveTopologyType(topology) => {
                    writer.write(ty, &get_d3d_primitive_topology_type(*topology));
                }
                PipelineSubobject::RenderTargetFormats(formats) => {
                    if formats.len() > MAX_RENDER_TARGETS {
                        return Err(DeviceError::InvalidParameters);
                    }

                    let mut rt_formats = D3D12_RT_FORMAT_ARRAY {
                        RTFormats: [DXGI_FORMAT_UNKNOWN; 8],
                        NumRenderTargets: formats.len() as u32,
                    };
                    for (dst, format) in rt_formats.RTFormats.iter_mut().zip(formats) {
                        *dst = get_dxgi_format_from_ze_format(*format);
                    }
                    writer.write(ty, &rt_formats);
                }
                PipelineSubobject::DepthStencilFormat(format) => {
                    writer.write(ty, &get_dxgi_format_from_ze_format(*format));
                }
                PipelineSubobject::SampleDesc(sample_desc) => {
                    writer.write(ty, &get_dxgi_sample_desc_from_ze_sample_desc(*sample_desc));
                }
            }
        }
    }

    Ok(())
}

pub fn create_pipeline_state(
    device: &D3D12Device,
    stream: &PipelineStateStream,
    root_signature: &RootSignature,
    name: &str,
) -> Result<PipelineState, DeviceError> {
    let root_signature = &downcast::<D3D12RootSignature>(&root_signature.backend_data).root_signature;

    let mut writer = StreamWriter::new();
    let mut semantic_names = vec![];
    let mut input_elements = vec![];
    write_stream(
        &mut writer,
        stream,
        root_signature,
        &mut semantic_names,
        &mut input_elements,
    )?;

    let stream_desc = D3D12_PIPELINE_STATE_STREAM_DESC {
        SizeInBytes: writer.len(),
        pPipelineStateSubobjectStream: writer.as_bytes().as_ptr() as *mut c_void,
    };

    let pipeline: ID3D12PipelineState = unsafe { device.device().CreatePipelineState(&stream_desc) }
        .map_err(|error| {
            ze_error!("Failed to create pipeline state {}: {}", name, error.message());
            convert_d3d_error_to_ze_device_error(error)
        })?;

    set_resource_name(&pipeline.cast().map_err(convert_d3d_error_to_ze_device_error)?, name);

    Ok(PipelineState::new(Box::new(D3D12PipelineState {
        pipeline: pipeline.into(),
    })))
}

/// Native layout of `D3D12_GLOBAL_ROOT_SIGNATURE`
#[repr(C)]
struct GlobalRootSignature {
    root_signature: *mut c_void,
}

pub fn create_state_object(
    device: &D3D12Device,
    desc: &StateObjectDesc,
    name: &str,
) -> Result<StateObject, DeviceError> {
    let optional_wide = |str: &Option<String>| str.as_deref().map(to_wide);
    let pcwstr = |str: &Option<Vec<u16>>| match str {
        Some(str) => PCWSTR(str.as_ptr()),
        None => PCWSTR::null(),
    };

    // Every string and description below must stay alive until the state object is created
    let export_names: Vec<Vec<Vec<u16>>> = desc
        .libraries
        .iter()
        .map(|library| library.exports.iter().map(|export| to_wide(export)).collect())
        .collect();

    let mut exports: Vec<Vec<D3D12_EXPORT_DESC>> = export_names
        .iter()
        .map(|names| {
            names
                .iter()
                .map(|name| D3D12_EXPORT_DESC {
                    Name: PCWSTR(name.as_ptr()),
                    ExportToRename: PCWSTR::null(),
                    Flags: D3D12_EXPORT_FLAG_NONE,
                })
                .collect()
        })
        .collect();

    let libraries: Vec<D3D12_DXIL_LIBRARY_DESC> = desc
        .libraries
        .iter()
        .zip(exports.iter_mut())
        .map(|(library, exports)| D3D12_DXIL_LIBRARY_DESC {
            DXILLibrary: shader_bytecode(&library.bytecode),
            NumExports: exports.len() as u32,
            pExports: exports.as_mut_ptr(),
        })
        .collect();

    let hit_group_names: Vec<[Option<Vec<u16>>; 4]> = desc
        .hit_groups
        .iter()
        .map(|hit_group| {
            [
                Some(to_wide(&hit_group.name)),
                optional_wide(&hit_group.any_hit),
                optional_wide(&hit_group.closest_hit),
                optional_wide(&hit_group.intersection),
            ]
        })
        .collect();

    let hit_groups: Vec<D3D12_HIT_GROUP_DESC> = desc
        .hit_groups
        .iter()
        .zip(hit_group_names.iter())
        .map(|(hit_group, names)| D3D12_HIT_GROUP_DESC {
            HitGroupExport: pcwstr(&names[0]),
            Type: match hit_group.ty {
                HitGroupType::Triangles => D3D12_HIT_GROUP_TYPE_TRIANGLES,
                HitGroupType::ProceduralPrimitive => D3D12_HIT_GROUP_TYPE_PROCEDURAL_PRIMITIVE,
            },
            AnyHitShaderImport: pcwstr(&names[1]),
            ClosestHitShaderImport: pcwstr(&names[2]),
            IntersectionShaderImport: pcwstr(&names[3]),
        })
        .collect();

    let shader_config = D3D12_RAYTRACING_SHADER_CONFIG {
        MaxPayloadSizeInBytes: desc.max_payload_size_in_bytes,
        MaxAttributeSizeInBytes: desc.max_attribute_size_in_bytes,
    };

    let pipeline_config = D3D12_RAYTRACING_PIPELINE_CONFIG {
        MaxTraceRecursionDepth: desc.max_trace_recursion_depth,
    };

    let global_root_signature = desc.global_root_signature.map(|root_signature| unsafe {
        GlobalRootSignature {
            root_signature: transmute_copy(
                &*downcast::<D3D12RootSignature>(&root_signature.backend_data).root_signature,
            ),
        }
    });

    let mut subobjects: Vec<D3D12_STATE_SUBOBJECT> = vec![];
    for library in &libraries {
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY,
            pDesc: library as *const _ as *const c_void,
        });
    }
    for hit_group in &hit_groups {
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP,
            pDesc: hit_group as *const _ as *const c_void,
        });
    }
    subobjects.push(D3D12_STATE_SUBOBJECT {
        Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
        pDesc: &shader_config as *const _ as *const c_void,
    });
    subobjects.push(D3D12_STATE_SUBOBJECT {
        Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
        pDesc: &pipeline_config as *const _ as *const c_void,
    });
    if let Some(global_root_signature) = &global_root_signature {
        subobjects.push(D3D12_STATE_SUBOBJECT {
            Type: D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
            pDesc: global_root_signature as *const _ as *const c_void,
        });
    }

    let state_object_desc = D3D12_STATE_OBJECT_DESC {
        Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
        NumSubobjects: subobjects.len() as u32,
        pSubobjects: subobjects.as_ptr(),
    };

    let state_object: ID3D12StateObject =
        unsafe { device.device().CreateStateObject(&state_object_desc) }.map_err(|error| {
            ze_error!("Failed to create state object {}: {}", name, error.message());
            convert_d3d_error_to_ze_device_error(error)
        })?;

    set_resource_name(
        &state_object
            .cast()
            .map_err(convert_d3d_error_to_ze_device_error)?,
        name,
    );

    let properties: ID3D12StateObjectProperties = state_object
        .cast()
        .map_err(convert_d3d_error_to_ze_device_error)?;

    Ok(StateObject::new(Box::new(D3D12StateObject {
        state_object: state_object.into(),
        properties: properties.into(),
    })))
}
