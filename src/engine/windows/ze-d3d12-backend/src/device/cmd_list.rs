use crate::device::d3d_resource;
use crate::utils::*;
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use ze_gfx::backend::*;
use ze_gfx::pipeline_stream::MAX_RENDER_TARGETS;

pub(crate) struct D3D12CommandList {
    pub cmd_list: SendableIUnknown<ID3D12GraphicsCommandList4>,
    pub ty: QueueType,
}

impl D3D12CommandList {
    pub fn new(cmd_list: ID3D12GraphicsCommandList4, ty: QueueType) -> Self {
        Self {
            cmd_list: cmd_list.into(),
            ty,
        }
    }

    /// Only available on runtimes supporting variable rate shading
    fn cmd_list5(&self) -> Option<ID3D12GraphicsCommandList5> {
        self.cmd_list.cast().ok()
    }

    /// Only available on runtimes supporting mesh shaders
    pub fn cmd_list6(&self) -> Option<ID3D12GraphicsCommandList6> {
        self.cmd_list.cast().ok()
    }

    pub fn resource_barrier(&self, barriers: &[ResourceBarrier]) {
        let mut resource_barriers: Vec<D3D12_RESOURCE_BARRIER> = Vec::with_capacity(barriers.len());
        for barrier in barriers {
            resource_barriers.push(match barrier {
                ResourceBarrier::Transition(transition) => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                            pResource: Some(d3d_resource(transition.resource).clone()),
                            // ALL_SUBRESOURCES shares its value with the native constant
                            Subresource: transition.subresource,
                            StateBefore: get_d3d_resource_states(transition.state_before),
                            StateAfter: get_d3d_resource_states(transition.state_after),
                        }),
                    },
                },
                ResourceBarrier::Uav(resource) => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                            pResource: resource.map(|resource| d3d_resource(resource).clone()),
                        }),
                    },
                },
                ResourceBarrier::Aliasing(before, after) => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_ALIASING,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Aliasing: ManuallyDrop::new(D3D12_RESOURCE_ALIASING_BARRIER {
                            pResourceBefore: before.map(|resource| d3d_resource(resource).clone()),
                            pResourceAfter: after.map(|resource| d3d_resource(resource).clone()),
                        }),
                    },
                },
            });
        }

        unsafe {
            self.cmd_list.ResourceBarrier(&resource_barriers);
        }

        // We need to call drops or else we're going to leak COM objects
        for barrier in resource_barriers {
            unsafe {
                match barrier.Type {
                    D3D12_RESOURCE_BARRIER_TYPE_TRANSITION => {
                        drop(ManuallyDrop::into_inner(barrier.Anonymous.Transition))
                    }
                    D3D12_RESOURCE_BARRIER_TYPE_UAV => {
                        drop(ManuallyDrop::into_inner(barrier.Anonymous.UAV))
                    }
                    _ => drop(ManuallyDrop::into_inner(barrier.Anonymous.Aliasing)),
                }
            }
        }
    }

    fn texture_copy_location(location: &TextureCopyLocation) -> D3D12_TEXTURE_COPY_LOCATION {
        match location {
            TextureCopyLocation::Subresource(resource, subresource) => {
                D3D12_TEXTURE_COPY_LOCATION {
                    pResource: Some(d3d_resource(resource).clone()),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: *subresource,
                    },
                }
            }
            TextureCopyLocation::PlacedFootprint(resource, placed) => D3D12_TEXTURE_COPY_LOCATION {
                pResource: Some(d3d_resource(resource).clone()),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: placed.offset,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: get_dxgi_format_from_ze_format(placed.footprint.format),
                            Width: placed.footprint.width,
                            Height: placed.footprint.height,
                            Depth: placed.footprint.depth,
                            RowPitch: placed.footprint.row_pitch,
                        },
                    },
                },
            },
        }
    }

    pub fn copy_texture_region(
        &self,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: &TextureCopyLocation,
        src_box: Option<&CopyBox>,
    ) {
        let dst_location = Self::texture_copy_location(dst);
        let src_location = Self::texture_copy_location(src);
        let src_box = src_box.map(|src_box| D3D12_BOX {
            left: src_box.left,
            top: src_box.top,
            front: src_box.front,
            right: src_box.right,
            bottom: src_box.bottom,
            back: src_box.back,
        });

        unsafe {
            self.cmd_list.CopyTextureRegion(
                &dst_location,
                dst_x,
                dst_y,
                dst_z,
                &src_location,
                src_box.as_ref().map(|src_box| src_box as *const D3D12_BOX),
            );
        }
    }

    fn beginning_access(access: &RenderPassBeginningAccess) -> D3D12_RENDER_PASS_BEGINNING_ACCESS {
        match access {
            RenderPassBeginningAccess::Discard => D3D12_RENDER_PASS_BEGINNING_ACCESS {
                Type: D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_DISCARD,
                Anonymous: Default::default(),
            },
            RenderPassBeginningAccess::Preserve => D3D12_RENDER_PASS_BEGINNING_ACCESS {
                Type: D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_PRESERVE,
                Anonymous: Default::default(),
            },
            RenderPassBeginningAccess::NoAccess => D3D12_RENDER_PASS_BEGINNING_ACCESS {
                Type: D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_NO_ACCESS,
                Anonymous: Default::default(),
            },
            RenderPassBeginningAccess::Clear(clear_value) => D3D12_RENDER_PASS_BEGINNING_ACCESS {
                Type: D3D12_RENDER_PASS_BEGINNING_ACCESS_TYPE_CLEAR,
                Anonymous: D3D12_RENDER_PASS_BEGINNING_ACCESS_0 {
                    Clear: D3D12_RENDER_PASS_BEGINNING_ACCESS_CLEAR_PARAMETERS {
                        ClearValue: crate::device::views::get_d3d_clear_value(clear_value),
                    },
                },
            },
        }
    }

    fn ending_access(access: RenderPassEndingAccess) -> D3D12_RENDER_PASS_ENDING_ACCESS {
        D3D12_RENDER_PASS_ENDING_ACCESS {
            Type: match access {
                RenderPassEndingAccess::Discard => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_DISCARD,
                RenderPassEndingAccess::Preserve => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_PRESERVE,
                RenderPassEndingAccess::NoAccess => D3D12_RENDER_PASS_ENDING_ACCESS_TYPE_NO_ACCESS,
            },
            Anonymous: Default::default(),
        }
    }

    pub fn begin_render_pass(
        &self,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
        flags: RenderPassFlags,
    ) {
        debug_assert!(render_targets.len() <= MAX_RENDER_TARGETS);

        let render_target_descs: Vec<D3D12_RENDER_PASS_RENDER_TARGET_DESC> =
            render_targets
                .iter()
                .map(|desc| D3D12_RENDER_PASS_RENDER_TARGET_DESC {
                    cpuDescriptor: D3D12_CPU_DESCRIPTOR_HANDLE {
                        ptr: desc.descriptor.0,
                    },
                    BeginningAccess: Self::beginning_access(&desc.beginning_access),
                    EndingAccess: Self::ending_access(desc.ending_access),
                })
                .collect();

        let depth_stencil_desc = depth_stencil.map(|desc| D3D12_RENDER_PASS_DEPTH_STENCIL_DESC {
            cpuDescriptor: D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: desc.descriptor.0,
            },
            DepthBeginningAccess: Self::beginning_access(&desc.depth_beginning_access),
            StencilBeginningAccess: Self::beginning_access(&desc.stencil_beginning_access),
            DepthEndingAccess: Self::ending_access(desc.depth_ending_access),
            StencilEndingAccess: Self::ending_access(desc.stencil_ending_access),
        });

        let mut d3d_flags = D3D12_RENDER_PASS_FLAG_NONE;
        if flags.contains(RenderPassFlagBits::AllowUavWrites) {
            d3d_flags |= D3D12_RENDER_PASS_FLAG_ALLOW_UAV_WRITES;
        }
        if flags.contains(RenderPassFlagBits::SuspendingPass) {
            d3d_flags |= D3D12_RENDER_PASS_FLAG_SUSPENDING_PASS;
        }
        if flags.contains(RenderPassFlagBits::ResumingPass) {
            d3d_flags |= D3D12_RENDER_PASS_FLAG_RESUMING_PASS;
        }

        unsafe {
            self.cmd_list.BeginRenderPass(
                if render_target_descs.is_empty() {
                    None
                } else {
                    Some(&render_target_descs)
                },
                depth_stencil_desc
                    .as_ref()
                    .map(|desc| desc as *const D3D12_RENDER_PASS_DEPTH_STENCIL_DESC),
                d3d_flags,
            );
        }
    }

    pub fn dispatch_rays(&self, desc: &DispatchRaysDesc) {
        let table = |table: &GpuVirtualAddressRangeAndStride| D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
            StartAddress: table.start_address,
            SizeInBytes: table.size_in_bytes,
            StrideInBytes: table.stride_in_bytes,
        };

        let d3d_desc = D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                StartAddress: desc.ray_generation_shader_record.start_address,
                SizeInBytes: desc.ray_generation_shader_record.size_in_bytes,
            },
            MissShaderTable: table(&desc.miss_shader_table),
            HitGroupTable: table(&desc.hit_group_table),
            CallableShaderTable: table(&desc.callable_shader_table),
            Width: desc.width,
            Height: desc.height,
            Depth: desc.depth,
        };

        unsafe {
            self.cmd_list.DispatchRays(&d3d_desc);
        }
    }

    pub fn set_shading_rate(&self, rate: ShadingRate, combiners: [ShadingRateCombiner; 2]) {
        let cmd_list = match self.cmd_list5() {
            Some(cmd_list) => cmd_list,
            None => return,
        };

        let rate = match rate {
            ShadingRate::Rate1x1 => D3D12_SHADING_RATE_1X1,
            ShadingRate::Rate1x2 => D3D12_SHADING_RATE_1X2,
            ShadingRate::Rate2x1 => D3D12_SHADING_RATE_2X1,
            ShadingRate::Rate2x2 => D3D12_SHADING_RATE_2X2,
            ShadingRate::Rate2x4 => D3D12_SHADING_RATE_2X4,
            ShadingRate::Rate4x2 => D3D12_SHADING_RATE_4X2,
            ShadingRate::Rate4x4 => D3D12_SHADING_RATE_4X4,
        };

        let combiners = combiners.map(|combiner| match combiner {
            ShadingRateCombiner::Passthrough => D3D12_SHADING_RATE_COMBINER_PASSTHROUGH,
            ShadingRateCombiner::Override => D3D12_SHADING_RATE_COMBINER_OVERRIDE,
            ShadingRateCombiner::Min => D3D12_SHADING_RATE_COMBINER_MIN,
            ShadingRateCombiner::Max => D3D12_SHADING_RATE_COMBINER_MAX,
            ShadingRateCombiner::Sum => D3D12_SHADING_RATE_COMBINER_SUM,
        });

        unsafe {
            cmd_list.RSSetShadingRate(rate, Some(combiners.as_ptr()));
        }
    }

    /// Unicode event markers, understood by PIX and the debug layer
    pub fn begin_event(&self, name: &str) {
        let name = to_wide(name);
        unsafe {
            self.cmd_list.BeginEvent(
                0,
                Some(name.as_ptr() as *const c_void),
                (name.len() * std::mem::size_of::<u16>()) as u32,
            );
        }
    }
}
