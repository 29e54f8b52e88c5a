pub(crate) mod cmd_list;
mod pipeline;
pub(crate) mod swapchain;
mod views;

use crate::device::cmd_list::D3D12CommandList;
use crate::device::swapchain::D3D12SwapChain;
use crate::utils::*;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::mem::size_of;
use std::sync::Arc;
use tinyvec::TinyVec;
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::IDXGIFactory4;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::Win32::System::WindowsProgramming::INFINITE;
use ze_gfx::backend::*;
use ze_gfx::pipeline_stream::PipelineStateStream;
use ze_gfx::PixelFormat;

pub(crate) struct D3D12Queue {
    pub queue: SendableIUnknown<ID3D12CommandQueue>,
}

pub(crate) struct D3D12Fence {
    pub fence: SendableIUnknown<ID3D12Fence>,
}

pub(crate) struct D3D12FenceEvent {
    handle: HANDLE,
}

impl Drop for D3D12FenceEvent {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

pub(crate) struct D3D12CommandAllocator {
    pub allocator: SendableIUnknown<ID3D12CommandAllocator>,
    pub ty: QueueType,
}

pub(crate) struct D3D12DescriptorHeap {
    pub heap: SendableIUnknown<ID3D12DescriptorHeap>,
    pub shader_visible: bool,
}

pub(crate) struct D3D12Resource {
    pub resource: SendableIUnknown<ID3D12Resource>,
    pub desc: ResourceDesc,
}

pub(crate) struct D3D12RootSignature {
    pub root_signature: SendableIUnknown<ID3D12RootSignature>,
}

pub(crate) struct D3D12CommandSignature {
    pub command_signature: SendableIUnknown<ID3D12CommandSignature>,
}

pub(crate) struct D3D12PipelineState {
    pub pipeline: SendableIUnknown<ID3D12PipelineState>,
}

pub(crate) struct D3D12StateObject {
    pub state_object: SendableIUnknown<ID3D12StateObject>,
    pub properties: SendableIUnknown<ID3D12StateObjectProperties>,
}

pub(crate) fn downcast<T: 'static>(data: &Box<dyn std::any::Any + Send + Sync>) -> &T {
    data.downcast_ref::<T>()
        .expect("object created by another backend")
}

pub(crate) fn d3d_resource(resource: &Resource) -> &ID3D12Resource {
    &downcast::<D3D12Resource>(&resource.backend_data).resource
}

pub(crate) struct D3D12Device {
    dxgi_factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
    device: SendableIUnknown<ID3D12Device5>,
    capabilities: DeviceCapabilities,
    descriptor_increment_sizes: [u32; DescriptorHeapType::COUNT],
}

impl D3D12Device {
    pub fn new(
        dxgi_factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
        device: SendableIUnknown<ID3D12Device5>,
    ) -> Self {
        let capabilities = Self::query_capabilities(&device);
        let descriptor_increment_sizes = DescriptorHeapType::ALL.map(|ty| unsafe {
            device.GetDescriptorHandleIncrementSize(get_d3d_descriptor_heap_type(ty))
        });

        Self {
            dxgi_factory,
            device,
            capabilities,
            descriptor_increment_sizes,
        }
    }

    fn check_feature<T: Default>(device: &ID3D12Device5, feature: D3D12_FEATURE) -> Option<T> {
        let mut data = T::default();
        unsafe {
            device
                .CheckFeatureSupport(
                    feature,
                    &mut data as *mut T as *mut c_void,
                    size_of::<T>() as u32,
                )
                .ok()
                .map(|_| data)
        }
    }

    fn query_capabilities(device: &ID3D12Device5) -> DeviceCapabilities {
        let options5 = Self::check_feature::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>(
            device,
            D3D12_FEATURE_D3D12_OPTIONS5,
        );
        let options6 = Self::check_feature::<D3D12_FEATURE_DATA_D3D12_OPTIONS6>(
            device,
            D3D12_FEATURE_D3D12_OPTIONS6,
        );
        let options7 = Self::check_feature::<D3D12_FEATURE_DATA_D3D12_OPTIONS7>(
            device,
            D3D12_FEATURE_D3D12_OPTIONS7,
        );

        DeviceCapabilities {
            // Tier 0 render passes are emulated by the runtime
            render_passes: options5
                .map(|options| options.RenderPassesTier.0 >= D3D12_RENDER_PASS_TIER_1.0)
                .unwrap_or(false),
            raytracing: options5
                .map(|options| options.RaytracingTier.0 >= D3D12_RAYTRACING_TIER_1_0.0)
                .unwrap_or(false),
            variable_rate_shading: options6
                .map(|options| {
                    options.VariableShadingRateTier.0 >= D3D12_VARIABLE_SHADING_RATE_TIER_1.0
                })
                .unwrap_or(false),
            mesh_shaders: options7
                .map(|options| options.MeshShaderTier.0 >= D3D12_MESH_SHADER_TIER_1.0)
                .unwrap_or(false),
        }
    }

    pub(crate) fn device(&self) -> &ID3D12Device5 {
        &self.device
    }

    fn command_list(command_list: &CommandList) -> &D3D12CommandList {
        downcast::<D3D12CommandList>(&command_list.backend_data)
    }
}

impl Device for D3D12Device {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn device_removed_reason(&self) -> Option<String> {
        match unsafe { self.device.GetDeviceRemovedReason() } {
            Ok(_) => None,
            Err(error) => Some(format!("{} ({:?})", error.message(), error.code())),
        }
    }

    fn create_queue(&self, ty: QueueType, name: &str) -> Result<Queue, DeviceError> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: get_d3d_command_list_type(ty),
                Priority: 0,
                Flags: Default::default(),
                NodeMask: 0,
            })
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        set_resource_name(&queue.cast().map_err(convert_d3d_error_to_ze_device_error)?, name);
        Ok(Queue::new(Box::new(D3D12Queue {
            queue: queue.into(),
        })))
    }

    fn create_fence(&self, initial_value: u64, name: &str) -> Result<Fence, DeviceError> {
        let fence: ID3D12Fence = unsafe {
            self.device
                .CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        set_resource_name(&fence.cast().map_err(convert_d3d_error_to_ze_device_error)?, name);
        Ok(Fence::new(Box::new(D3D12Fence {
            fence: fence.into(),
        })))
    }

    fn create_fence_event(&self) -> Result<FenceEvent, DeviceError> {
        let handle = unsafe {
            CreateEventW(None, BOOL::from(false), BOOL::from(false), PCWSTR::null())
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;
        Ok(FenceEvent::new(Box::new(D3D12FenceEvent { handle })))
    }

    fn fence_completed_value(&self, fence: &Fence) -> u64 {
        unsafe {
            downcast::<D3D12Fence>(&fence.backend_data)
                .fence
                .GetCompletedValue()
        }
    }

    fn fence_wait(
        &self,
        fence: &Fence,
        value: u64,
        event: &FenceEvent,
    ) -> Result<(), DeviceError> {
        let fence = &downcast::<D3D12Fence>(&fence.backend_data).fence;
        let event = downcast::<D3D12FenceEvent>(&event.backend_data);

        unsafe {
            if fence.GetCompletedValue() >= value {
                return Ok(());
            }

            fence
                .SetEventOnCompletion(value, event.handle)
                .map_err(convert_d3d_error_to_ze_device_error)?;
            WaitForSingleObject(event.handle, INFINITE);
        }

        Ok(())
    }

    fn queue_signal(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let queue = &downcast::<D3D12Queue>(&queue.backend_data).queue;
        let fence = &downcast::<D3D12Fence>(&fence.backend_data).fence;
        unsafe { queue.Signal(&**fence, value) }.map_err(convert_d3d_error_to_ze_device_error)
    }

    fn queue_wait(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let queue = &downcast::<D3D12Queue>(&queue.backend_data).queue;
        let fence = &downcast::<D3D12Fence>(&fence.backend_data).fence;
        unsafe { queue.Wait(&**fence, value) }.map_err(convert_d3d_error_to_ze_device_error)
    }

    fn queue_execute(&self, queue: &Queue, command_lists: &[&CommandList]) {
        let queue = &downcast::<D3D12Queue>(&queue.backend_data).queue;

        let mut lists: TinyVec<[Option<ID3D12CommandList>; 8]> = TinyVec::new();
        for command_list in command_lists {
            lists.push(Self::command_list(command_list).cmd_list.cast().ok());
        }

        unsafe {
            queue.ExecuteCommandLists(&lists);
        }
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(get_d3d_command_list_type(ty)) }
                .map_err(convert_d3d_error_to_ze_device_error)?;

        set_resource_name(
            &allocator
                .cast()
                .map_err(convert_d3d_error_to_ze_device_error)?,
            &format!("{} Command Allocator", ty),
        );

        Ok(CommandAllocator::new(Box::new(D3D12CommandAllocator {
            allocator: allocator.into(),
            ty,
        })))
    }

    fn reset_command_allocator(&self, allocator: &CommandAllocator) -> Result<(), DeviceError> {
        unsafe {
            downcast::<D3D12CommandAllocator>(&allocator.backend_data)
                .allocator
                .Reset()
        }
        .map_err(convert_d3d_error_to_ze_device_error)
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
        name: &str,
    ) -> Result<CommandList, DeviceError> {
        let allocator = downcast::<D3D12CommandAllocator>(&allocator.backend_data);
        if allocator.ty != ty {
            return Err(DeviceError::InvalidParameters);
        }

        let cmd_list: ID3D12GraphicsCommandList4 = unsafe {
            self.device.CreateCommandList(
                0,
                get_d3d_command_list_type(ty),
                &*allocator.allocator,
                None,
            )
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        set_resource_name(
            &cmd_list.cast().map_err(convert_d3d_error_to_ze_device_error)?,
            name,
        );

        Ok(CommandList::new(Box::new(D3D12CommandList::new(
            cmd_list, ty,
        ))))
    }

    fn reset_command_list(
        &self,
        command_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError> {
        let allocator = downcast::<D3D12CommandAllocator>(&allocator.backend_data);
        let command_list = Self::command_list(command_list);
        if allocator.ty != command_list.ty {
            return Err(DeviceError::InvalidParameters);
        }

        unsafe { command_list.cmd_list.Reset(&*allocator.allocator, None) }
            .map_err(convert_d3d_error_to_ze_device_error)
    }

    fn close_command_list(&self, command_list: &mut CommandList) -> Result<(), DeviceError> {
        unsafe { Self::command_list(command_list).cmd_list.Close() }
            .map_err(convert_d3d_error_to_ze_device_error)
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        name: &str,
    ) -> Result<DescriptorHeap, DeviceError> {
        let shader_visible = desc.shader_visible && desc.ty.can_be_shader_visible();
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: get_d3d_descriptor_heap_type(desc.ty),
                NumDescriptors: desc.count,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        set_resource_name(&heap.cast().map_err(convert_d3d_error_to_ze_device_error)?, name);
        Ok(DescriptorHeap::new(Box::new(D3D12DescriptorHeap {
            heap: heap.into(),
            shader_visible,
        })))
    }

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        self.descriptor_increment_sizes[ty.index()]
    }

    fn descriptor_heap_cpu_start(&self, heap: &DescriptorHeap) -> CpuDescriptorHandle {
        let heap = downcast::<D3D12DescriptorHeap>(&heap.backend_data);
        CpuDescriptorHandle(unsafe { heap.heap.GetCPUDescriptorHandleForHeapStart() }.ptr)
    }

    fn descriptor_heap_gpu_start(&self, heap: &DescriptorHeap) -> GpuDescriptorHandle {
        let heap = downcast::<D3D12DescriptorHeap>(&heap.backend_data);
        if !heap.shader_visible {
            return GpuDescriptorHandle::NULL;
        }

        GpuDescriptorHandle(unsafe { heap.heap.GetGPUDescriptorHandleForHeapStart() }.ptr)
    }

    fn copy_descriptors_simple(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    ) {
        unsafe {
            self.device.CopyDescriptorsSimple(
                count,
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 },
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: src.0 },
                get_d3d_descriptor_heap_type(ty),
            );
        }
    }

    fn create_shader_resource_view(
        &self,
        resource: Option<&Resource>,
        desc: &ShaderResourceViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        let d3d_desc = views::get_d3d_srv_desc(desc);
        let dst = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 };
        unsafe {
            match resource {
                Some(resource) => self.device.CreateShaderResourceView(
                    d3d_resource(resource),
                    Some(&d3d_desc),
                    dst,
                ),
                // Acceleration structures are addressed through the view description
                None => self.device.CreateShaderResourceView(None, Some(&d3d_desc), dst),
            }
        }
    }

    fn create_unordered_access_view(
        &self,
        resource: &Resource,
        counter: Option<&Resource>,
        desc: &UnorderedAccessViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        let d3d_desc = views::get_d3d_uav_desc(desc);
        let dst = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 };
        unsafe {
            match counter {
                Some(counter) => self.device.CreateUnorderedAccessView(
                    d3d_resource(resource),
                    d3d_resource(counter),
                    Some(&d3d_desc),
                    dst,
                ),
                None => self.device.CreateUnorderedAccessView(
                    d3d_resource(resource),
                    None,
                    Some(&d3d_desc),
                    dst,
                ),
            }
        }
    }

    fn create_render_target_view(
        &self,
        resource: &Resource,
        desc: &RenderTargetViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        let d3d_desc = views::get_d3d_rtv_desc(desc);
        unsafe {
            self.device.CreateRenderTargetView(
                d3d_resource(resource),
                Some(&d3d_desc),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 },
            )
        }
    }

    fn create_depth_stencil_view(
        &self,
        resource: &Resource,
        desc: &DepthStencilViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        let d3d_desc = views::get_d3d_dsv_desc(desc);
        unsafe {
            self.device.CreateDepthStencilView(
                d3d_resource(resource),
                Some(&d3d_desc),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 },
            )
        }
    }

    fn create_constant_buffer_view(&self, desc: &ConstantBufferViewDesc, dst: CpuDescriptorHandle) {
        unsafe {
            self.device.CreateConstantBufferView(
                Some(&D3D12_CONSTANT_BUFFER_VIEW_DESC {
                    BufferLocation: desc.buffer_location,
                    SizeInBytes: desc.size_in_bytes,
                }),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 },
            )
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc, dst: CpuDescriptorHandle) {
        unsafe {
            self.device.CreateSampler(
                &get_d3d_sampler_desc(desc),
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 },
            )
        }
    }

    fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        heap_type: HeapType,
        initial_state: ResourceStates,
        clear_value: Option<&OptimizedClearValue>,
        name: &str,
    ) -> Result<Resource, DeviceError> {
        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: get_d3d_heap_type(heap_type),
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: 0,
            VisibleNodeMask: 0,
        };

        let d3d_desc = views::get_d3d_resource_desc(desc);
        let d3d_clear_value = clear_value.map(views::get_d3d_clear_value);

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_properties,
                D3D12_HEAP_FLAG_NONE,
                &d3d_desc,
                get_d3d_resource_states(initial_state),
                d3d_clear_value
                    .as_ref()
                    .map(|value| value as *const D3D12_CLEAR_VALUE),
                &mut resource,
            )
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        let resource = resource.ok_or(DeviceError::Unknown)?;
        set_resource_name(
            &resource.cast().map_err(convert_d3d_error_to_ze_device_error)?,
            name,
        );

        Ok(Resource::new(Box::new(D3D12Resource {
            resource: resource.into(),
            desc: *desc,
        })))
    }

    fn map_resource(&self, resource: &Resource) -> Result<*mut u8, DeviceError> {
        let resource = d3d_resource(resource);
        let mut mapped_ptr: *mut c_void = std::ptr::null_mut();
        unsafe {
            // Nothing is read back by the CPU through this mapping
            let range = D3D12_RANGE { Begin: 0, End: 0 };
            resource
                .Map(0, Some(&range), Some(&mut mapped_ptr))
                .map_err(convert_d3d_error_to_ze_device_error)?;
        }

        if mapped_ptr.is_null() {
            Err(DeviceError::InvalidParameters)
        } else {
            Ok(mapped_ptr.cast::<u8>())
        }
    }

    fn resource_gpu_address(&self, resource: &Resource) -> u64 {
        let resource = downcast::<D3D12Resource>(&resource.backend_data);
        match resource.desc.dimension {
            ResourceDimension::Buffer => unsafe { resource.resource.GetGPUVirtualAddress() },
            _ => 0,
        }
    }

    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first_subresource: u32,
        num_subresources: u32,
        base_offset: u64,
    ) -> CopyableFootprints {
        let count = num_subresources as usize;
        let mut layouts = vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); count];
        let mut num_rows = vec![0u32; count];
        let mut row_sizes_in_bytes = vec![0u64; count];
        let mut total_bytes = 0;

        unsafe {
            self.device.GetCopyableFootprints(
                &views::get_d3d_resource_desc(desc),
                first_subresource,
                num_subresources,
                base_offset,
                Some(layouts.as_mut_ptr()),
                Some(num_rows.as_mut_ptr()),
                Some(row_sizes_in_bytes.as_mut_ptr()),
                Some(&mut total_bytes),
            );
        }

        CopyableFootprints {
            layouts: layouts
                .iter()
                .map(|layout| PlacedSubresourceFootprint {
                    offset: layout.Offset,
                    footprint: SubresourceFootprint {
                        format: desc.format,
                        width: layout.Footprint.Width,
                        height: layout.Footprint.Height,
                        depth: layout.Footprint.Depth,
                        row_pitch: layout.Footprint.RowPitch,
                    },
                })
                .collect(),
            num_rows,
            row_sizes_in_bytes,
            total_bytes,
        }
    }

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
        name: &str,
    ) -> Result<RootSignature, DeviceError> {
        pipeline::create_root_signature(self, desc, name)
    }

    fn create_command_signature(
        &self,
        desc: &CommandSignatureDesc,
        root_signature: Option<&RootSignature>,
    ) -> Result<CommandSignature, DeviceError> {
        pipeline::create_command_signature(self, desc, root_signature)
    }

    fn create_pipeline_state(
        &self,
        stream: &PipelineStateStream,
        root_signature: &RootSignature,
        name: &str,
    ) -> Result<PipelineState, DeviceError> {
        pipeline::create_pipeline_state(self, stream, root_signature, name)
    }

    fn create_state_object(
        &self,
        desc: &StateObjectDesc,
        name: &str,
    ) -> Result<StateObject, DeviceError> {
        if !self.capabilities.raytracing {
            return Err(DeviceError::Unsupported);
        }

        pipeline::create_state_object(self, desc, name)
    }

    fn shader_identifier(
        &self,
        state_object: &StateObject,
        export: &str,
    ) -> Option<ShaderIdentifier> {
        let state_object = downcast::<D3D12StateObject>(&state_object.backend_data);
        let export = to_wide(export);
        unsafe {
            let identifier = state_object
                .properties
                .GetShaderIdentifier(PCWSTR(export.as_ptr()));
            if identifier.is_null() {
                return None;
            }

            let mut result = ShaderIdentifier::default();
            std::ptr::copy_nonoverlapping(
                identifier as *const u8,
                result.as_mut_ptr(),
                result.len(),
            );
            Some(result)
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        queue: &Queue,
    ) -> Result<SwapChain, DeviceError> {
        let queue = &downcast::<D3D12Queue>(&queue.backend_data).queue;
        let factory = self.dxgi_factory.lock();
        let swapchain = D3D12SwapChain::new(&factory, queue, desc)?;
        Ok(SwapChain::new(Box::new(swapchain)))
    }

    fn swapchain_backbuffer(
        &self,
        swapchain: &SwapChain,
        index: u32,
    ) -> Result<Resource, DeviceError> {
        let swapchain = downcast::<D3D12SwapChain>(&swapchain.backend_data);
        let (resource, desc) = swapchain.backbuffer(index)?;
        Ok(Resource::new(Box::new(D3D12Resource {
            resource: resource.into(),
            desc,
        })))
    }

    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32 {
        downcast::<D3D12SwapChain>(&swapchain.backend_data).current_backbuffer_index()
    }

    fn resize_swapchain(
        &self,
        swapchain: &SwapChain,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        downcast::<D3D12SwapChain>(&swapchain.backend_data).resize(width, height)
    }

    fn present(&self, swapchain: &SwapChain, sync_interval: u32) -> Result<(), DeviceError> {
        downcast::<D3D12SwapChain>(&swapchain.backend_data).present(sync_interval)
    }

    fn cmd_resource_barrier(&self, command_list: &mut CommandList, barriers: &[ResourceBarrier]) {
        Self::command_list(command_list).resource_barrier(barriers);
    }

    fn cmd_copy_buffer_region(
        &self,
        command_list: &mut CommandList,
        dst: &Resource,
        dst_offset: u64,
        src: &Resource,
        src_offset: u64,
        size: u64,
    ) {
        unsafe {
            Self::command_list(command_list).cmd_list.CopyBufferRegion(
                d3d_resource(dst),
                dst_offset,
                d3d_resource(src),
                src_offset,
                size,
            );
        }
    }

    fn cmd_copy_resource(&self, command_list: &mut CommandList, dst: &Resource, src: &Resource) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .CopyResource(d3d_resource(dst), d3d_resource(src));
        }
    }

    fn cmd_copy_texture_region(
        &self,
        command_list: &mut CommandList,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: &TextureCopyLocation,
        src_box: Option<&CopyBox>,
    ) {
        Self::command_list(command_list).copy_texture_region(dst, dst_x, dst_y, dst_z, src, src_box);
    }

    fn cmd_resolve_subresource(
        &self,
        command_list: &mut CommandList,
        dst: &Resource,
        dst_subresource: u32,
        src: &Resource,
        src_subresource: u32,
        format: PixelFormat,
    ) {
        unsafe {
            Self::command_list(command_list).cmd_list.ResolveSubresource(
                d3d_resource(dst),
                dst_subresource,
                d3d_resource(src),
                src_subresource,
                get_dxgi_format_from_ze_format(format),
            );
        }
    }

    fn cmd_clear_render_target_view(
        &self,
        command_list: &mut CommandList,
        rtv: CpuDescriptorHandle,
        color: [f32; 4],
    ) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .ClearRenderTargetView(
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.0 },
                    color.as_ptr(),
                    &[],
                );
        }
    }

    fn cmd_clear_depth_stencil_view(
        &self,
        command_list: &mut CommandList,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) {
        let mut d3d_flags = D3D12_CLEAR_FLAGS(0);
        if flags.contains(ClearFlagBits::Depth) {
            d3d_flags |= D3D12_CLEAR_FLAG_DEPTH;
        }
        if flags.contains(ClearFlagBits::Stencil) {
            d3d_flags |= D3D12_CLEAR_FLAG_STENCIL;
        }

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .ClearDepthStencilView(
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dsv.0 },
                    d3d_flags,
                    depth,
                    stencil,
                    &[],
                );
        }
    }

    fn cmd_clear_unordered_access_view_uint(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [u32; 4],
    ) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .ClearUnorderedAccessViewUint(
                    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: gpu_handle.0 },
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: cpu_handle.0 },
                    d3d_resource(resource),
                    values.as_ptr(),
                    &[],
                );
        }
    }

    fn cmd_clear_unordered_access_view_float(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [f32; 4],
    ) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .ClearUnorderedAccessViewFloat(
                    D3D12_GPU_DESCRIPTOR_HANDLE { ptr: gpu_handle.0 },
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: cpu_handle.0 },
                    d3d_resource(resource),
                    values.as_ptr(),
                    &[],
                );
        }
    }

    fn cmd_set_descriptor_heaps(&self, command_list: &mut CommandList, heaps: &[&DescriptorHeap]) {
        let heaps: TinyVec<[Option<ID3D12DescriptorHeap>; 2]> = heaps
            .iter()
            .map(|heap| Some(downcast::<D3D12DescriptorHeap>(&heap.backend_data).heap.0.clone()))
            .collect();

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .SetDescriptorHeaps(&heaps);
        }
    }

    fn cmd_set_root_signature(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        let root_signature =
            &*downcast::<D3D12RootSignature>(&root_signature.backend_data).root_signature;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => cmd_list.SetGraphicsRootSignature(root_signature),
                PipelineBindPoint::Compute => cmd_list.SetComputeRootSignature(root_signature),
            }
        }
    }

    fn cmd_set_pipeline_state(&self, command_list: &mut CommandList, pipeline: &PipelineState) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .SetPipelineState(&*downcast::<D3D12PipelineState>(&pipeline.backend_data).pipeline);
        }
    }

    fn cmd_set_state_object(&self, command_list: &mut CommandList, state_object: &StateObject) {
        unsafe {
            Self::command_list(command_list).cmd_list.SetPipelineState1(
                &*downcast::<D3D12StateObject>(&state_object.backend_data).state_object,
            );
        }
    }

    fn cmd_set_root_descriptor_table(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        base: GpuDescriptorHandle,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        let base = D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 };
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    cmd_list.SetGraphicsRootDescriptorTable(root_index, base)
                }
                PipelineBindPoint::Compute => {
                    cmd_list.SetComputeRootDescriptorTable(root_index, base)
                }
            }
        }
    }

    fn cmd_set_root_constant_buffer_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    cmd_list.SetGraphicsRootConstantBufferView(root_index, address)
                }
                PipelineBindPoint::Compute => {
                    cmd_list.SetComputeRootConstantBufferView(root_index, address)
                }
            }
        }
    }

    fn cmd_set_root_shader_resource_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    cmd_list.SetGraphicsRootShaderResourceView(root_index, address)
                }
                PipelineBindPoint::Compute => {
                    cmd_list.SetComputeRootShaderResourceView(root_index, address)
                }
            }
        }
    }

    fn cmd_set_root_unordered_access_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    cmd_list.SetGraphicsRootUnorderedAccessView(root_index, address)
                }
                PipelineBindPoint::Compute => {
                    cmd_list.SetComputeRootUnorderedAccessView(root_index, address)
                }
            }
        }
    }

    fn cmd_set_root_32bit_constants(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        values: &[u32],
        dest_offset: u32,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        let data = values.as_ptr() as *const c_void;
        let count = values.len() as u32;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    cmd_list.SetGraphicsRoot32BitConstants(root_index, count, data, dest_offset)
                }
                PipelineBindPoint::Compute => {
                    cmd_list.SetComputeRoot32BitConstants(root_index, count, data, dest_offset)
                }
            }
        }
    }

    fn cmd_set_vertex_buffers(
        &self,
        command_list: &mut CommandList,
        start_slot: u32,
        views: &[VertexBufferView],
    ) {
        let views: TinyVec<[D3D12_VERTEX_BUFFER_VIEW; 8]> = views
            .iter()
            .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: view.buffer_location,
                SizeInBytes: view.size_in_bytes,
                StrideInBytes: view.stride_in_bytes,
            })
            .collect();

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .IASetVertexBuffers(start_slot, Some(&views));
        }
    }

    fn cmd_set_index_buffer(&self, command_list: &mut CommandList, view: &IndexBufferView) {
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: view.buffer_location,
            SizeInBytes: view.size_in_bytes,
            Format: match view.format {
                IndexBufferFormat::Uint16 => {
                    windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R16_UINT
                }
                IndexBufferFormat::Uint32 => {
                    windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_UINT
                }
            },
        };

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .IASetIndexBuffer(Some(&view));
        }
    }

    fn cmd_set_primitive_topology(&self, command_list: &mut CommandList, topology: PrimitiveTopology) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .IASetPrimitiveTopology(get_d3d_primitive_topology(topology));
        }
    }

    fn cmd_set_viewports(&self, command_list: &mut CommandList, viewports: &[Viewport]) {
        let viewports: TinyVec<[D3D12_VIEWPORT; 8]> = viewports
            .iter()
            .map(|viewport| D3D12_VIEWPORT {
                TopLeftX: viewport.x,
                TopLeftY: viewport.y,
                Width: viewport.width,
                Height: viewport.height,
                MinDepth: viewport.min_depth,
                MaxDepth: viewport.max_depth,
            })
            .collect();

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .RSSetViewports(&viewports);
        }
    }

    fn cmd_set_scissors(&self, command_list: &mut CommandList, scissors: &[Rect]) {
        let scissors: TinyVec<[windows::Win32::Foundation::RECT; 8]> = scissors
            .iter()
            .map(|scissor| windows::Win32::Foundation::RECT {
                left: scissor.left,
                top: scissor.top,
                right: scissor.right,
                bottom: scissor.bottom,
            })
            .collect();

        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .RSSetScissorRects(&scissors);
        }
    }

    fn cmd_set_render_targets(
        &self,
        command_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        let render_targets: TinyVec<[D3D12_CPU_DESCRIPTOR_HANDLE; 8]> = render_targets
            .iter()
            .map(|handle| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 })
            .collect();
        let depth_stencil = depth_stencil.map(|handle| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.0 });

        unsafe {
            Self::command_list(command_list).cmd_list.OMSetRenderTargets(
                render_targets.len() as u32,
                if render_targets.is_empty() {
                    None
                } else {
                    Some(render_targets.as_ptr())
                },
                BOOL::from(false),
                depth_stencil
                    .as_ref()
                    .map(|handle| handle as *const D3D12_CPU_DESCRIPTOR_HANDLE),
            );
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_list: &mut CommandList,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
        flags: RenderPassFlags,
    ) {
        Self::command_list(command_list).begin_render_pass(render_targets, depth_stencil, flags);
    }

    fn cmd_end_render_pass(&self, command_list: &mut CommandList) {
        unsafe {
            Self::command_list(command_list).cmd_list.EndRenderPass();
        }
    }

    fn cmd_draw_instanced(
        &self,
        command_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    ) {
        unsafe {
            Self::command_list(command_list).cmd_list.DrawInstanced(
                vertex_count_per_instance,
                instance_count,
                start_vertex_location,
                start_instance_location,
            );
        }
    }

    fn cmd_draw_indexed_instanced(
        &self,
        command_list: &mut CommandList,
        index_count_per_instance: u32,
        instance_count: u32,
        start_index_location: u32,
        base_vertex_location: i32,
        start_instance_location: u32,
    ) {
        unsafe {
            Self::command_list(command_list)
                .cmd_list
                .DrawIndexedInstanced(
                    index_count_per_instance,
                    instance_count,
                    start_index_location,
                    base_vertex_location,
                    start_instance_location,
                );
        }
    }

    fn cmd_dispatch(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32) {
        unsafe {
            Self::command_list(command_list).cmd_list.Dispatch(x, y, z);
        }
    }

    fn cmd_dispatch_mesh(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32) {
        if let Some(cmd_list) = Self::command_list(command_list).cmd_list6() {
            unsafe {
                cmd_list.DispatchMesh(x, y, z);
            }
        }
    }

    fn cmd_dispatch_rays(&self, command_list: &mut CommandList, desc: &DispatchRaysDesc) {
        Self::command_list(command_list).dispatch_rays(desc);
    }

    fn cmd_execute_indirect(
        &self,
        command_list: &mut CommandList,
        signature: &CommandSignature,
        max_command_count: u32,
        argument_buffer: &Resource,
        argument_buffer_offset: u64,
        count_buffer: Option<&Resource>,
        count_buffer_offset: u64,
    ) {
        let cmd_list = &Self::command_list(command_list).cmd_list;
        let signature =
            &*downcast::<D3D12CommandSignature>(&signature.backend_data).command_signature;
        unsafe {
            match count_buffer {
                Some(count_buffer) => cmd_list.ExecuteIndirect(
                    signature,
                    max_command_count,
                    d3d_resource(argument_buffer),
                    argument_buffer_offset,
                    d3d_resource(count_buffer),
                    count_buffer_offset,
                ),
                None => cmd_list.ExecuteIndirect(
                    signature,
                    max_command_count,
                    d3d_resource(argument_buffer),
                    argument_buffer_offset,
                    None,
                    0,
                ),
            }
        }
    }

    fn cmd_set_shading_rate(
        &self,
        command_list: &mut CommandList,
        rate: ShadingRate,
        combiners: [ShadingRateCombiner; 2],
    ) {
        Self::command_list(command_list).set_shading_rate(rate, combiners);
    }

    fn cmd_begin_event(&self, command_list: &mut CommandList, name: &str) {
        Self::command_list(command_list).begin_event(name);
    }

    fn cmd_end_event(&self, command_list: &mut CommandList) {
        unsafe {
            Self::command_list(command_list).cmd_list.EndEvent();
        }
    }
}
