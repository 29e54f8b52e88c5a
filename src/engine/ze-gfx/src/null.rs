//! A backend that executes nothing on a GPU.
//!
//! Every command is recorded so callers can inspect what reached each queue. Fences are
//! simulated: by default a signal completes immediately, in manual mode signals stay pending
//! until [`NullDevice::complete_all_fences`] is called or a CPU wait forces them. Buffer copies
//! are carried out on CPU memory when a command list is executed.

use crate::backend::*;
use crate::pipeline_stream::PipelineStateStream;
use crate::utils::{align_up, compute_copyable_footprints};
use crate::PixelFormat;
use fnv::{FnvHashMap, FnvHasher};
use parking_lot::Mutex;
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub type ResourceId = u64;
pub type ObjectId = u64;

const DESCRIPTOR_INCREMENT: u32 = 32;
const GPU_DESCRIPTOR_OFFSET: u64 = 0x1_0000_0000;
const RESOURCE_ADDRESS_ALIGNMENT: u64 = 64 * 1024;

#[derive(Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn create_device(&self, _: &DeviceOptions) -> Result<Arc<dyn Device>, BackendError> {
        Ok(Arc::new(NullDevice::new()))
    }

    fn name(&self) -> &str {
        "Null"
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedBarrier {
    Transition {
        resource: ResourceId,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    Uav(Option<ResourceId>),
    Aliasing(Option<ResourceId>, Option<ResourceId>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCopyLocation {
    Subresource(ResourceId, u32),
    PlacedFootprint(ResourceId, PlacedSubresourceFootprint),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    ResourceBarrier(Vec<RecordedBarrier>),
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    CopyResource {
        dst: ResourceId,
        src: ResourceId,
    },
    CopyTextureRegion {
        dst: RecordedCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: RecordedCopyLocation,
        src_box: Option<CopyBox>,
    },
    ResolveSubresource {
        dst: ResourceId,
        dst_subresource: u32,
        src: ResourceId,
        src_subresource: u32,
        format: PixelFormat,
    },
    ClearRenderTargetView {
        rtv: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencilView {
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    ClearUnorderedAccessViewUint {
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: ResourceId,
        values: [u32; 4],
    },
    ClearUnorderedAccessViewFloat {
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: ResourceId,
        values: [f32; 4],
    },
    SetDescriptorHeaps(Vec<ObjectId>),
    SetRootSignature {
        bind_point: PipelineBindPoint,
        root_signature: ObjectId,
    },
    SetPipelineState(ObjectId),
    SetStateObject(ObjectId),
    SetRootDescriptorTable {
        bind_point: PipelineBindPoint,
        root_index: u32,
        base: GpuDescriptorHandle,
    },
    SetRootConstantBufferView {
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    },
    SetRootShaderResourceView {
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    },
    SetRootUnorderedAccessView {
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    },
    SetRoot32BitConstants {
        bind_point: PipelineBindPoint,
        root_index: u32,
        values: Vec<u32>,
        dest_offset: u32,
    },
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(IndexBufferView),
    SetPrimitiveTopology(PrimitiveTopology),
    SetViewports(Vec<Viewport>),
    SetScissors(Vec<Rect>),
    SetRenderTargets {
        render_targets: Vec<CpuDescriptorHandle>,
        depth_stencil: Option<CpuDescriptorHandle>,
    },
    BeginRenderPass {
        render_targets: Vec<RenderPassRenderTargetDesc>,
        depth_stencil: Option<RenderPassDepthStencilDesc>,
        flags: RenderPassFlags,
    },
    EndRenderPass,
    DrawInstanced {
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    },
    DrawIndexedInstanced {
        index_count_per_instance: u32,
        instance_count: u32,
        start_index_location: u32,
        base_vertex_location: i32,
        start_instance_location: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchMesh {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchRays(DispatchRaysDesc),
    ExecuteIndirect {
        signature: ObjectId,
        max_command_count: u32,
        argument_buffer: ResourceId,
        argument_buffer_offset: u64,
        count_buffer: Option<ResourceId>,
        count_buffer_offset: u64,
    },
    SetShadingRate {
        rate: ShadingRate,
        combiners: [ShadingRateCombiner; 2],
    },
    BeginEvent(String),
    EndEvent,
}

#[derive(Clone, Debug)]
pub struct ExecutedCommandList {
    pub name: String,
    pub commands: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NullDescriptor {
    ShaderResourceView {
        resource: Option<ResourceId>,
        desc: ShaderResourceViewDesc,
    },
    UnorderedAccessView {
        resource: ResourceId,
        desc: UnorderedAccessViewDesc,
    },
    RenderTargetView {
        resource: ResourceId,
        desc: RenderTargetViewDesc,
    },
    DepthStencilView {
        resource: ResourceId,
        desc: DepthStencilViewDesc,
    },
    ConstantBufferView(ConstantBufferViewDesc),
    Sampler(SamplerDesc),
}

#[derive(Default)]
struct QueueLog {
    submissions: Vec<Vec<ExecutedCommandList>>,
    waits: Vec<(ObjectId, u64)>,
    signals: Vec<(ObjectId, u64)>,
}

struct NullMemory {
    ptr: *mut u8,
    len: usize,
}

// Accesses are serialized by the callers the same way GPU memory would be
unsafe impl Send for NullMemory {}
unsafe impl Sync for NullMemory {}

impl NullMemory {
    fn new(len: usize) -> Self {
        let ptr = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        Self { ptr, len }
    }
}

impl Drop for NullMemory {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr, self.len,
            )));
        }
    }
}

struct NullQueue {
    ty: QueueType,
}

struct NullFenceState {
    id: ObjectId,
    completed: AtomicU64,
    signaled: AtomicU64,
}

struct NullFence {
    state: Arc<NullFenceState>,
}

struct NullFenceEvent;

struct NullCommandAllocator {
    id: ObjectId,
    ty: QueueType,
    reset_count: AtomicU32,
}

struct NullCommandList {
    ty: QueueType,
    name: String,
    commands: Vec<Command>,
    closed: bool,
}

struct NullResource {
    id: ResourceId,
    desc: ResourceDesc,
    heap_type: HeapType,
    gpu_address: u64,
    memory: Option<Arc<NullMemory>>,
    live_resources: Arc<AtomicUsize>,
}

impl Drop for NullResource {
    fn drop(&mut self) {
        self.live_resources.fetch_sub(1, Ordering::SeqCst);
    }
}

struct NullDescriptorHeap {
    id: ObjectId,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
}

struct NullRootSignature {
    id: ObjectId,
}

struct NullCommandSignature {
    id: ObjectId,
}

struct NullPipelineState {
    id: ObjectId,
    stream: PipelineStateStream,
}

struct NullStateObject {
    id: ObjectId,
    exports: Vec<String>,
}

struct NullSwapChain {
    backbuffers: Vec<ResourceId>,
    desc: ResourceDesc,
    current: AtomicU32,
    presents: AtomicU32,
}

pub struct NullDevice {
    capabilities: Mutex<DeviceCapabilities>,
    removed_reason: Mutex<Option<String>>,
    auto_complete: AtomicBool,
    fail_next_resource: AtomicBool,
    next_object_id: AtomicU64,
    next_gpu_address: AtomicU64,
    next_cpu_descriptor: AtomicUsize,
    live_resources: Arc<AtomicUsize>,
    fences: Mutex<Vec<Arc<NullFenceState>>>,
    queues: Mutex<FnvHashMap<QueueType, QueueLog>>,
    memories: Mutex<FnvHashMap<ResourceId, Weak<NullMemory>>>,
    descriptors: Mutex<FnvHashMap<usize, NullDescriptor>>,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            capabilities: Mutex::new(DeviceCapabilities {
                render_passes: true,
                mesh_shaders: true,
                raytracing: true,
                variable_rate_shading: true,
            }),
            removed_reason: Mutex::new(None),
            auto_complete: AtomicBool::new(true),
            fail_next_resource: AtomicBool::new(false),
            next_object_id: AtomicU64::new(1),
            next_gpu_address: AtomicU64::new(0x10_0000),
            next_cpu_descriptor: AtomicUsize::new(0x1000),
            live_resources: Arc::new(AtomicUsize::new(0)),
            fences: Mutex::new(vec![]),
            queues: Mutex::new(FnvHashMap::default()),
            memories: Mutex::new(FnvHashMap::default()),
            descriptors: Mutex::new(FnvHashMap::default()),
        }
    }

    fn next_id(&self) -> ObjectId {
        self.next_object_id.fetch_add(1, Ordering::SeqCst)
    }

    /** Test controls */

    pub fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        *self.capabilities.lock() = capabilities;
    }

    /// When disabled, signals stay pending until completed explicitly or forced by a CPU wait
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// The next committed resource creation fails with `OutOfMemory`
    pub fn fail_next_resource_creation(&self) {
        self.fail_next_resource.store(true, Ordering::SeqCst);
    }

    /// Simulate the GPU catching up with every signal issued so far
    pub fn complete_all_fences(&self) {
        for fence in self.fences.lock().iter() {
            fence
                .completed
                .fetch_max(fence.signaled.load(Ordering::SeqCst), Ordering::SeqCst);
        }
    }

    pub fn simulate_device_removed(&self, reason: &str) {
        *self.removed_reason.lock() = Some(reason.to_string());
    }

    /** Inspection */

    pub fn live_resource_count(&self) -> usize {
        self.live_resources.load(Ordering::SeqCst)
    }

    pub fn resource_id(&self, resource: &Resource) -> ResourceId {
        Self::resource(resource).id
    }

    pub fn submissions(&self, ty: QueueType) -> Vec<Vec<ExecutedCommandList>> {
        self.queues
            .lock()
            .get(&ty)
            .map(|log| log.submissions.clone())
            .unwrap_or_default()
    }

    /// Every command executed on queues of type `ty`, in submission order
    pub fn executed_commands(&self, ty: QueueType) -> Vec<Command> {
        self.submissions(ty)
            .into_iter()
            .flatten()
            .flat_map(|list| list.commands)
            .collect()
    }

    pub fn queue_waits(&self, ty: QueueType) -> Vec<(ObjectId, u64)> {
        self.queues
            .lock()
            .get(&ty)
            .map(|log| log.waits.clone())
            .unwrap_or_default()
    }

    pub fn queue_signals(&self, ty: QueueType) -> Vec<(ObjectId, u64)> {
        self.queues
            .lock()
            .get(&ty)
            .map(|log| log.signals.clone())
            .unwrap_or_default()
    }

    pub fn clear_submissions(&self) {
        for log in self.queues.lock().values_mut() {
            log.submissions.clear();
        }
    }

    pub fn fence_id(&self, fence: &Fence) -> ObjectId {
        Self::fence(fence).state.id
    }

    pub fn command_allocator_id(&self, allocator: &CommandAllocator) -> ObjectId {
        Self::allocator(allocator).id
    }

    pub fn command_allocator_reset_count(&self, allocator: &CommandAllocator) -> u32 {
        Self::allocator(allocator).reset_count.load(Ordering::SeqCst)
    }

    pub fn root_signature_id(&self, root_signature: &RootSignature) -> ObjectId {
        downcast::<NullRootSignature>(&root_signature.backend_data).id
    }

    pub fn pipeline_state_id(&self, pipeline: &PipelineState) -> ObjectId {
        downcast::<NullPipelineState>(&pipeline.backend_data).id
    }

    pub fn pipeline_state_stream(&self, pipeline: &PipelineState) -> PipelineStateStream {
        downcast::<NullPipelineState>(&pipeline.backend_data)
            .stream
            .clone()
    }

    pub fn command_signature_id(&self, signature: &CommandSignature) -> ObjectId {
        downcast::<NullCommandSignature>(&signature.backend_data).id
    }

    pub fn descriptor_heap_id(&self, heap: &DescriptorHeap) -> ObjectId {
        downcast::<NullDescriptorHeap>(&heap.backend_data).id
    }

    pub fn descriptor(&self, handle: CpuDescriptorHandle) -> Option<NullDescriptor> {
        self.descriptors.lock().get(&handle.0).cloned()
    }

    pub fn descriptor_at_gpu(&self, handle: GpuDescriptorHandle) -> Option<NullDescriptor> {
        let cpu = handle.0.checked_sub(GPU_DESCRIPTOR_OFFSET)? as usize;
        self.descriptor(CpuDescriptorHandle(cpu))
    }

    pub fn swapchain_present_count(&self, swapchain: &SwapChain) -> u32 {
        downcast::<NullSwapChain>(&swapchain.backend_data)
            .presents
            .load(Ordering::SeqCst)
    }

    /// Copy of the CPU memory backing a buffer
    pub fn read_buffer(&self, resource: &Resource) -> Vec<u8> {
        match &Self::resource(resource).memory {
            Some(memory) => unsafe { std::slice::from_raw_parts(memory.ptr, memory.len).to_vec() },
            None => vec![],
        }
    }

    fn resource(resource: &Resource) -> &NullResource {
        downcast(&resource.backend_data)
    }

    fn fence(fence: &Fence) -> &NullFence {
        downcast(&fence.backend_data)
    }

    fn allocator(allocator: &CommandAllocator) -> &NullCommandAllocator {
        downcast(&allocator.backend_data)
    }

    fn list(command_list: &mut CommandList) -> &mut NullCommandList {
        let list = command_list
            .backend_data
            .downcast_mut::<NullCommandList>()
            .expect("command list created by another backend");
        assert!(!list.closed, "recording into a closed command list");
        list
    }

    fn record(&self, command_list: &mut CommandList, command: Command) {
        Self::list(command_list).commands.push(command);
    }

    fn allocate_cpu_descriptors(&self, count: u32) -> CpuDescriptorHandle {
        let size = count as usize * DESCRIPTOR_INCREMENT as usize + 0x1000;
        CpuDescriptorHandle(self.next_cpu_descriptor.fetch_add(size, Ordering::SeqCst))
    }

    fn make_resource(
        &self,
        id: ResourceId,
        desc: &ResourceDesc,
        heap_type: HeapType,
        with_memory: bool,
    ) -> Resource {
        let size = match desc.dimension {
            ResourceDimension::Buffer => desc.width,
            _ => compute_copyable_footprints(desc, 0, desc.subresource_count(), 0).total_bytes,
        };

        let gpu_address = self.next_gpu_address.fetch_add(
            align_up(size.max(1), RESOURCE_ADDRESS_ALIGNMENT),
            Ordering::SeqCst,
        );

        let memory = if with_memory {
            let memory = Arc::new(NullMemory::new(size as usize));
            self.memories.lock().insert(id, Arc::downgrade(&memory));
            Some(memory)
        } else {
            None
        };

        self.live_resources.fetch_add(1, Ordering::SeqCst);
        Resource::new(Box::new(NullResource {
            id,
            desc: *desc,
            heap_type,
            gpu_address,
            memory,
            live_resources: self.live_resources.clone(),
        }))
    }

    fn execute_copies(&self, commands: &[Command]) {
        let memories = self.memories.lock();
        let memory = |id: &ResourceId| memories.get(id).and_then(Weak::upgrade);

        for command in commands {
            match command {
                Command::CopyBufferRegion {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    size,
                } => {
                    if let (Some(dst), Some(src)) = (memory(dst), memory(src)) {
                        assert!(dst_offset + size <= dst.len as u64, "copy overflows destination");
                        assert!(src_offset + size <= src.len as u64, "copy overflows source");
                        unsafe {
                            std::ptr::copy(
                                src.ptr.add(*src_offset as usize),
                                dst.ptr.add(*dst_offset as usize),
                                *size as usize,
                            );
                        }
                    }
                }
                Command::CopyResource { dst, src } => {
                    if let (Some(dst), Some(src)) = (memory(dst), memory(src)) {
                        unsafe {
                            std::ptr::copy(src.ptr, dst.ptr, src.len.min(dst.len));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn queue_log<R>(&self, ty: QueueType, f: impl FnOnce(&mut QueueLog) -> R) -> R {
        f(self.queues.lock().entry(ty).or_default())
    }
}

#[allow(clippy::borrowed_box)]
fn downcast<T: 'static>(data: &Box<dyn std::any::Any + Send + Sync>) -> &T {
    data.downcast_ref::<T>()
        .expect("object created by another backend")
}

fn resource_id(resource: &Resource) -> ResourceId {
    NullDevice::resource(resource).id
}

fn copy_location(location: &TextureCopyLocation) -> RecordedCopyLocation {
    match location {
        TextureCopyLocation::Subresource(resource, index) => {
            RecordedCopyLocation::Subresource(resource_id(resource), *index)
        }
        TextureCopyLocation::PlacedFootprint(resource, footprint) => {
            RecordedCopyLocation::PlacedFootprint(resource_id(resource), *footprint)
        }
    }
}

impl Device for NullDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        *self.capabilities.lock()
    }

    fn device_removed_reason(&self) -> Option<String> {
        self.removed_reason.lock().clone()
    }

    fn create_queue(&self, ty: QueueType, _: &str) -> Result<Queue, DeviceError> {
        self.queue_log(ty, |_| ());
        Ok(Queue::new(Box::new(NullQueue { ty })))
    }

    fn create_fence(&self, initial_value: u64, _: &str) -> Result<Fence, DeviceError> {
        let state = Arc::new(NullFenceState {
            id: self.next_id(),
            completed: AtomicU64::new(initial_value),
            signaled: AtomicU64::new(initial_value),
        });
        self.fences.lock().push(state.clone());
        Ok(Fence::new(Box::new(NullFence { state })))
    }

    fn create_fence_event(&self) -> Result<FenceEvent, DeviceError> {
        Ok(FenceEvent::new(Box::new(NullFenceEvent)))
    }

    fn fence_completed_value(&self, fence: &Fence) -> u64 {
        Self::fence(fence).state.completed.load(Ordering::SeqCst)
    }

    fn fence_wait(&self, fence: &Fence, value: u64, _: &FenceEvent) -> Result<(), DeviceError> {
        let state = &Self::fence(fence).state;
        if state.completed.load(Ordering::SeqCst) >= value {
            return Ok(());
        }

        assert!(
            state.signaled.load(Ordering::SeqCst) >= value,
            "waiting for fence value {} that is never signaled",
            value
        );
        state.completed.fetch_max(value, Ordering::SeqCst);
        Ok(())
    }

    fn queue_signal(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let state = &Self::fence(fence).state;
        state.signaled.fetch_max(value, Ordering::SeqCst);
        if self.auto_complete.load(Ordering::SeqCst) {
            state.completed.fetch_max(value, Ordering::SeqCst);
        }

        let ty = downcast::<NullQueue>(&queue.backend_data).ty;
        self.queue_log(ty, |log| log.signals.push((state.id, value)));
        Ok(())
    }

    fn queue_wait(&self, queue: &Queue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let ty = downcast::<NullQueue>(&queue.backend_data).ty;
        let id = Self::fence(fence).state.id;
        self.queue_log(ty, |log| log.waits.push((id, value)));
        Ok(())
    }

    fn queue_execute(&self, queue: &Queue, command_lists: &[&CommandList]) {
        let ty = downcast::<NullQueue>(&queue.backend_data).ty;
        let mut executed = Vec::with_capacity(command_lists.len());
        for command_list in command_lists {
            let list = downcast::<NullCommandList>(&command_list.backend_data);
            assert!(list.closed, "executing command list \"{}\" that is still open", list.name);
            assert_eq!(list.ty, ty, "command list type doesn't match the queue");
            self.execute_copies(&list.commands);
            executed.push(ExecutedCommandList {
                name: list.name.clone(),
                commands: list.commands.clone(),
            });
        }

        self.queue_log(ty, |log| log.submissions.push(executed));
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError> {
        Ok(CommandAllocator::new(Box::new(NullCommandAllocator {
            id: self.next_id(),
            ty,
            reset_count: AtomicU32::new(0),
        })))
    }

    fn reset_command_allocator(&self, allocator: &CommandAllocator) -> Result<(), DeviceError> {
        Self::allocator(allocator)
            .reset_count
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
        name: &str,
    ) -> Result<CommandList, DeviceError> {
        if Self::allocator(allocator).ty != ty {
            return Err(DeviceError::InvalidParameters);
        }

        Ok(CommandList::new(Box::new(NullCommandList {
            ty,
            name: name.to_string(),
            commands: vec![],
            closed: false,
        })))
    }

    fn reset_command_list(
        &self,
        command_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError> {
        let allocator_ty = Self::allocator(allocator).ty;
        let list = command_list
            .downcast_mut::<NullCommandList>()
            .ok_or(DeviceError::InvalidParameters)?;
        if !list.closed || list.ty != allocator_ty {
            return Err(DeviceError::InvalidParameters);
        }

        list.commands.clear();
        list.closed = false;
        Ok(())
    }

    fn close_command_list(&self, command_list: &mut CommandList) -> Result<(), DeviceError> {
        let list = command_list
            .downcast_mut::<NullCommandList>()
            .ok_or(DeviceError::InvalidParameters)?;
        if list.closed {
            return Err(DeviceError::InvalidParameters);
        }
        list.closed = true;
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        _: &str,
    ) -> Result<DescriptorHeap, DeviceError> {
        if desc.shader_visible && !desc.ty.can_be_shader_visible() {
            return Err(DeviceError::InvalidParameters);
        }

        let cpu_start = self.allocate_cpu_descriptors(desc.count);
        let gpu_start = if desc.shader_visible {
            GpuDescriptorHandle(cpu_start.0 as u64 + GPU_DESCRIPTOR_OFFSET)
        } else {
            GpuDescriptorHandle::NULL
        };

        Ok(DescriptorHeap::new(Box::new(NullDescriptorHeap {
            id: self.next_id(),
            cpu_start,
            gpu_start,
        })))
    }

    fn descriptor_increment_size(&self, _: DescriptorHeapType) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn descriptor_heap_cpu_start(&self, heap: &DescriptorHeap) -> CpuDescriptorHandle {
        downcast::<NullDescriptorHeap>(&heap.backend_data).cpu_start
    }

    fn descriptor_heap_gpu_start(&self, heap: &DescriptorHeap) -> GpuDescriptorHandle {
        downcast::<NullDescriptorHeap>(&heap.backend_data).gpu_start
    }

    fn copy_descriptors_simple(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        _: DescriptorHeapType,
    ) {
        let mut descriptors = self.descriptors.lock();
        for i in 0..count {
            let src = src.offset(i, DESCRIPTOR_INCREMENT).0;
            let dst = dst.offset(i, DESCRIPTOR_INCREMENT).0;
            match descriptors.get(&src).cloned() {
                Some(descriptor) => descriptors.insert(dst, descriptor),
                None => descriptors.remove(&dst),
            };
        }
    }

    fn create_shader_resource_view(
        &self,
        resource: Option<&Resource>,
        desc: &ShaderResourceViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        self.descriptors.lock().insert(
            dst.0,
            NullDescriptor::ShaderResourceView {
                resource: resource.map(resource_id),
                desc: *desc,
            },
        );
    }

    fn create_unordered_access_view(
        &self,
        resource: &Resource,
        _: Option<&Resource>,
        desc: &UnorderedAccessViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        self.descriptors.lock().insert(
            dst.0,
            NullDescriptor::UnorderedAccessView {
                resource: resource_id(resource),
                desc: *desc,
            },
        );
    }

    fn create_render_target_view(
        &self,
        resource: &Resource,
        desc: &RenderTargetViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        self.descriptors.lock().insert(
            dst.0,
            NullDescriptor::RenderTargetView {
                resource: resource_id(resource),
                desc: *desc,
            },
        );
    }

    fn create_depth_stencil_view(
        &self,
        resource: &Resource,
        desc: &DepthStencilViewDesc,
        dst: CpuDescriptorHandle,
    ) {
        self.descriptors.lock().insert(
            dst.0,
            NullDescriptor::DepthStencilView {
                resource: resource_id(resource),
                desc: *desc,
            },
        );
    }

    fn create_constant_buffer_view(&self, desc: &ConstantBufferViewDesc, dst: CpuDescriptorHandle) {
        self.descriptors
            .lock()
            .insert(dst.0, NullDescriptor::ConstantBufferView(*desc));
    }

    fn create_sampler(&self, desc: &SamplerDesc, dst: CpuDescriptorHandle) {
        self.descriptors
            .lock()
            .insert(dst.0, NullDescriptor::Sampler(*desc));
    }

    fn create_committed_resource(
        &self,
        desc: &ResourceDesc,
        heap_type: HeapType,
        _: ResourceStates,
        clear_value: Option<&OptimizedClearValue>,
        _: &str,
    ) -> Result<Resource, DeviceError> {
        if self.fail_next_resource.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::OutOfMemory);
        }

        if desc.dimension == ResourceDimension::Buffer && desc.width == 0 {
            return Err(DeviceError::InvalidParameters);
        }

        if clear_value.is_some()
            && !desc.flags.intersects(
                ResourceFlagBits::AllowRenderTarget | ResourceFlagBits::AllowDepthStencil,
            )
        {
            return Err(DeviceError::InvalidParameters);
        }

        let with_memory = desc.dimension == ResourceDimension::Buffer;
        Ok(self.make_resource(self.next_id(), desc, heap_type, with_memory))
    }

    fn map_resource(&self, resource: &Resource) -> Result<*mut u8, DeviceError> {
        let resource = Self::resource(resource);
        match (&resource.memory, resource.heap_type) {
            (Some(memory), HeapType::Upload | HeapType::Readback) => Ok(memory.ptr),
            _ => Err(DeviceError::InvalidParameters),
        }
    }

    fn resource_gpu_address(&self, resource: &Resource) -> u64 {
        let resource = Self::resource(resource);
        match resource.desc.dimension {
            ResourceDimension::Buffer => resource.gpu_address,
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
        compute_copyable_footprints(desc, first_subresource, num_subresources, base_offset)
    }

    fn create_root_signature(
        &self,
        _: &RootSignatureDesc,
        _: &str,
    ) -> Result<RootSignature, DeviceError> {
        Ok(RootSignature::new(Box::new(NullRootSignature {
            id: self.next_id(),
        })))
    }

    fn create_command_signature(
        &self,
        desc: &CommandSignatureDesc,
        root_signature: Option<&RootSignature>,
    ) -> Result<CommandSignature, DeviceError> {
        let needs_root_signature = desc.arguments.iter().any(|arg| arg.needs_root_signature());
        if needs_root_signature && root_signature.is_none() {
            return Err(DeviceError::InvalidParameters);
        }

        Ok(CommandSignature::new(Box::new(NullCommandSignature {
            id: self.next_id(),
        })))
    }

    fn create_pipeline_state(
        &self,
        stream: &PipelineStateStream,
        _: &RootSignature,
        _: &str,
    ) -> Result<PipelineState, DeviceError> {
        if stream.subobjects().is_empty() {
            return Err(DeviceError::InvalidParameters);
        }

        Ok(PipelineState::new(Box::new(NullPipelineState {
            id: self.next_id(),
            stream: stream.clone(),
        })))
    }

    fn create_state_object(
        &self,
        desc: &StateObjectDesc,
        _: &str,
    ) -> Result<StateObject, DeviceError> {
        let exports = desc
            .libraries
            .iter()
            .flat_map(|library| library.exports.iter().cloned())
            .chain(desc.hit_groups.iter().map(|group| group.name.clone()))
            .collect();

        Ok(StateObject::new(Box::new(NullStateObject {
            id: self.next_id(),
            exports,
        })))
    }

    fn shader_identifier(
        &self,
        state_object: &StateObject,
        export: &str,
    ) -> Option<ShaderIdentifier> {
        let state_object = downcast::<NullStateObject>(&state_object.backend_data);
        if !state_object.exports.iter().any(|name| name == export) {
            return None;
        }

        let mut hasher = FnvHasher::default();
        hasher.write_u64(state_object.id);
        hasher.write(export.as_bytes());
        let hash = hasher.finish().to_le_bytes();

        let mut identifier = [0u8; SHADER_IDENTIFIER_SIZE_IN_BYTES as usize];
        for (i, byte) in identifier.iter_mut().enumerate() {
            *byte = hash[i % hash.len()];
        }
        Some(identifier)
    }

    fn create_swapchain(&self, desc: &SwapChainDesc, _: &Queue) -> Result<SwapChain, DeviceError> {
        if desc.buffer_count < 2 {
            return Err(DeviceError::InvalidParameters);
        }

        let backbuffers = (0..desc.buffer_count).map(|_| self.next_id()).collect();
        Ok(SwapChain::new(Box::new(NullSwapChain {
            backbuffers,
            desc: ResourceDesc {
                dimension: ResourceDimension::Texture2D,
                width: desc.width as u64,
                height: desc.height,
                depth_or_array_size: 1,
                mip_levels: 1,
                format: desc.format,
                sample_desc: desc.sample_desc,
                flags: ResourceFlagBits::AllowRenderTarget.into(),
            },
            current: AtomicU32::new(0),
            presents: AtomicU32::new(0),
        })))
    }

    fn swapchain_backbuffer(
        &self,
        swapchain: &SwapChain,
        index: u32,
    ) -> Result<Resource, DeviceError> {
        let swapchain = downcast::<NullSwapChain>(&swapchain.backend_data);
        let id = *swapchain
            .backbuffers
            .get(index as usize)
            .ok_or(DeviceError::InvalidParameters)?;
        Ok(self.make_resource(id, &swapchain.desc, HeapType::Default, false))
    }

    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32 {
        downcast::<NullSwapChain>(&swapchain.backend_data)
            .current
            .load(Ordering::SeqCst)
    }

    fn resize_swapchain(&self, swapchain: &SwapChain, _: u32, _: u32) -> Result<(), DeviceError> {
        downcast::<NullSwapChain>(&swapchain.backend_data)
            .current
            .store(0, Ordering::SeqCst);
        Ok(())
    }

    fn present(&self, swapchain: &SwapChain, _: u32) -> Result<(), DeviceError> {
        let swapchain = downcast::<NullSwapChain>(&swapchain.backend_data);
        let count = swapchain.backbuffers.len() as u32;
        let current = swapchain.current.load(Ordering::SeqCst);
        swapchain.current.store((current + 1) % count, Ordering::SeqCst);
        swapchain.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cmd_resource_barrier(&self, command_list: &mut CommandList, barriers: &[ResourceBarrier]) {
        let barriers = barriers
            .iter()
            .map(|barrier| match barrier {
                ResourceBarrier::Transition(transition) => RecordedBarrier::Transition {
                    resource: resource_id(transition.resource),
                    subresource: transition.subresource,
                    before: transition.state_before,
                    after: transition.state_after,
                },
                ResourceBarrier::Uav(resource) => RecordedBarrier::Uav(resource.map(resource_id)),
                ResourceBarrier::Aliasing(before, after) => {
                    RecordedBarrier::Aliasing(before.map(resource_id), after.map(resource_id))
                }
            })
            .collect();
        self.record(command_list, Command::ResourceBarrier(barriers));
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
        self.record(
            command_list,
            Command::CopyBufferRegion {
                dst: resource_id(dst),
                dst_offset,
                src: resource_id(src),
                src_offset,
                size,
            },
        );
    }

    fn cmd_copy_resource(&self, command_list: &mut CommandList, dst: &Resource, src: &Resource) {
        self.record(
            command_list,
            Command::CopyResource {
                dst: resource_id(dst),
                src: resource_id(src),
            },
        );
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
        self.record(
            command_list,
            Command::CopyTextureRegion {
                dst: copy_location(dst),
                dst_x,
                dst_y,
                dst_z,
                src: copy_location(src),
                src_box: src_box.copied(),
            },
        );
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
        self.record(
            command_list,
            Command::ResolveSubresource {
                dst: resource_id(dst),
                dst_subresource,
                src: resource_id(src),
                src_subresource,
                format,
            },
        );
    }

    fn cmd_clear_render_target_view(
        &self,
        command_list: &mut CommandList,
        rtv: CpuDescriptorHandle,
        color: [f32; 4],
    ) {
        self.record(command_list, Command::ClearRenderTargetView { rtv, color });
    }

    fn cmd_clear_depth_stencil_view(
        &self,
        command_list: &mut CommandList,
        dsv: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) {
        self.record(
            command_list,
            Command::ClearDepthStencilView {
                dsv,
                flags,
                depth,
                stencil,
            },
        );
    }

    fn cmd_clear_unordered_access_view_uint(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [u32; 4],
    ) {
        self.record(
            command_list,
            Command::ClearUnorderedAccessViewUint {
                gpu_handle,
                cpu_handle,
                resource: resource_id(resource),
                values,
            },
        );
    }

    fn cmd_clear_unordered_access_view_float(
        &self,
        command_list: &mut CommandList,
        gpu_handle: GpuDescriptorHandle,
        cpu_handle: CpuDescriptorHandle,
        resource: &Resource,
        values: [f32; 4],
    ) {
        self.record(
            command_list,
            Command::ClearUnorderedAccessViewFloat {
                gpu_handle,
                cpu_handle,
                resource: resource_id(resource),
                values,
            },
        );
    }

    fn cmd_set_descriptor_heaps(&self, command_list: &mut CommandList, heaps: &[&DescriptorHeap]) {
        let heaps = heaps
            .iter()
            .map(|heap| downcast::<NullDescriptorHeap>(&heap.backend_data).id)
            .collect();
        self.record(command_list, Command::SetDescriptorHeaps(heaps));
    }

    fn cmd_set_root_signature(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        let root_signature = downcast::<NullRootSignature>(&root_signature.backend_data).id;
        self.record(
            command_list,
            Command::SetRootSignature {
                bind_point,
                root_signature,
            },
        );
    }

    fn cmd_set_pipeline_state(&self, command_list: &mut CommandList, pipeline: &PipelineState) {
        let id = downcast::<NullPipelineState>(&pipeline.backend_data).id;
        self.record(command_list, Command::SetPipelineState(id));
    }

    fn cmd_set_state_object(&self, command_list: &mut CommandList, state_object: &StateObject) {
        let id = downcast::<NullStateObject>(&state_object.backend_data).id;
        self.record(command_list, Command::SetStateObject(id));
    }

    fn cmd_set_root_descriptor_table(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        base: GpuDescriptorHandle,
    ) {
        self.record(
            command_list,
            Command::SetRootDescriptorTable {
                bind_point,
                root_index,
                base,
            },
        );
    }

    fn cmd_set_root_constant_buffer_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        self.record(
            command_list,
            Command::SetRootConstantBufferView {
                bind_point,
                root_index,
                address,
            },
        );
    }

    fn cmd_set_root_shader_resource_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        self.record(
            command_list,
            Command::SetRootShaderResourceView {
                bind_point,
                root_index,
                address,
            },
        );
    }

    fn cmd_set_root_unordered_access_view(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        address: u64,
    ) {
        self.record(
            command_list,
            Command::SetRootUnorderedAccessView {
                bind_point,
                root_index,
                address,
            },
        );
    }

    fn cmd_set_root_32bit_constants(
        &self,
        command_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_index: u32,
        values: &[u32],
        dest_offset: u32,
    ) {
        self.record(
            command_list,
            Command::SetRoot32BitConstants {
                bind_point,
                root_index,
                values: values.to_vec(),
                dest_offset,
            },
        );
    }

    fn cmd_set_vertex_buffers(
        &self,
        command_list: &mut CommandList,
        start_slot: u32,
        views: &[VertexBufferView],
    ) {
        self.record(
            command_list,
            Command::SetVertexBuffers {
                start_slot,
                views: views.to_vec(),
            },
        );
    }

    fn cmd_set_index_buffer(&self, command_list: &mut CommandList, view: &IndexBufferView) {
        self.record(command_list, Command::SetIndexBuffer(*view));
    }

    fn cmd_set_primitive_topology(&self, command_list: &mut CommandList, topology: PrimitiveTopology) {
        self.record(command_list, Command::SetPrimitiveTopology(topology));
    }

    fn cmd_set_viewports(&self, command_list: &mut CommandList, viewports: &[Viewport]) {
        self.record(command_list, Command::SetViewports(viewports.to_vec()));
    }

    fn cmd_set_scissors(&self, command_list: &mut CommandList, scissors: &[Rect]) {
        self.record(command_list, Command::SetScissors(scissors.to_vec()));
    }

    fn cmd_set_render_targets(
        &self,
        command_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        self.record(
            command_list,
            Command::SetRenderTargets {
                render_targets: render_targets.to_vec(),
                depth_stencil,
            },
        );
    }

    fn cmd_begin_render_pass(
        &self,
        command_list: &mut CommandList,
        render_targets: &[RenderPassRenderTargetDesc],
        depth_stencil: Option<&RenderPassDepthStencilDesc>,
        flags: RenderPassFlags,
    ) {
        self.record(
            command_list,
            Command::BeginRenderPass {
                render_targets: render_targets.to_vec(),
                depth_stencil: depth_stencil.copied(),
                flags,
            },
        );
    }

    fn cmd_end_render_pass(&self, command_list: &mut CommandList) {
        self.record(command_list, Command::EndRenderPass);
    }

    fn cmd_draw_instanced(
        &self,
        command_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        start_vertex_location: u32,
        start_instance_location: u32,
    ) {
        self.record(
            command_list,
            Command::DrawInstanced {
                vertex_count_per_instance,
                instance_count,
                start_vertex_location,
                start_instance_location,
            },
        );
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
        self.record(
            command_list,
            Command::DrawIndexedInstanced {
                index_count_per_instance,
                instance_count,
                start_index_location,
                base_vertex_location,
                start_instance_location,
            },
        );
    }

    fn cmd_dispatch(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32) {
        self.record(command_list, Command::Dispatch { x, y, z });
    }

    fn cmd_dispatch_mesh(&self, command_list: &mut CommandList, x: u32, y: u32, z: u32) {
        self.record(command_list, Command::DispatchMesh { x, y, z });
    }

    fn cmd_dispatch_rays(&self, command_list: &mut CommandList, desc: &DispatchRaysDesc) {
        self.record(command_list, Command::DispatchRays(*desc));
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
        self.record(
            command_list,
            Command::ExecuteIndirect {
                signature: downcast::<NullCommandSignature>(&signature.backend_data).id,
                max_command_count,
                argument_buffer: resource_id(argument_buffer),
                argument_buffer_offset,
                count_buffer: count_buffer.map(resource_id),
                count_buffer_offset,
            },
        );
    }

    fn cmd_set_shading_rate(
        &self,
        command_list: &mut CommandList,
        rate: ShadingRate,
        combiners: [ShadingRateCombiner; 2],
    ) {
        self.record(command_list, Command::SetShadingRate { rate, combiners });
    }

    fn cmd_begin_event(&self, command_list: &mut CommandList, name: &str) {
        self.record(command_list, Command::BeginEvent(name.to_string()));
    }

    fn cmd_end_event(&self, command_list: &mut CommandList) {
        self.record(command_list, Command::EndEvent);
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::*;
    use crate::null::{Command, NullDescriptor, NullDevice};

    #[test]
    fn manual_fences_complete_on_demand() {
        let device = NullDevice::new();
        device.set_auto_complete(false);
        let queue = device.create_queue(QueueType::Direct, "Direct").unwrap();
        let fence = device.create_fence(0, "Fence").unwrap();
        device.queue_signal(&queue, &fence, 3).unwrap();
        assert_eq!(device.fence_completed_value(&fence), 0);

        device.complete_all_fences();
        assert_eq!(device.fence_completed_value(&fence), 3);
    }

    #[test]
    fn cpu_wait_forces_pending_signal() {
        let device = NullDevice::new();
        device.set_auto_complete(false);
        let queue = device.create_queue(QueueType::Copy, "Copy").unwrap();
        let fence = device.create_fence(0, "Fence").unwrap();
        let event = device.create_fence_event().unwrap();
        device.queue_signal(&queue, &fence, 5).unwrap();
        device.fence_wait(&fence, 4, &event).unwrap();
        assert_eq!(device.fence_completed_value(&fence), 4);
    }

    #[test]
    fn buffer_copies_are_executed() {
        let device = NullDevice::new();
        let queue = device.create_queue(QueueType::Copy, "Copy").unwrap();
        let desc = ResourceDesc::buffer(16, ResourceFlags::empty());
        let upload = device
            .create_committed_resource(&desc, HeapType::Upload, ResourceStates::GENERIC_READ, None, "")
            .unwrap();
        let dst = device
            .create_committed_resource(&desc, HeapType::Default, ResourceStates::COMMON, None, "")
            .unwrap();
        unsafe {
            let ptr = device.map_resource(&upload).unwrap();
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.add(4), 4);
        }

        let allocator = device.create_command_allocator(QueueType::Copy).unwrap();
        let mut list = device
            .create_command_list(QueueType::Copy, &allocator, "Copy")
            .unwrap();
        device.cmd_copy_buffer_region(&mut list, &dst, 0, &upload, 4, 4);
        device.close_command_list(&mut list).unwrap();
        device.queue_execute(&queue, &[&list]);

        assert_eq!(&device.read_buffer(&dst)[0..4], &[1, 2, 3, 4]);
        assert!(matches!(
            device.executed_commands(QueueType::Copy)[0],
            Command::CopyBufferRegion { size: 4, .. }
        ));
        assert_eq!(device.live_resource_count(), 2);
        drop(upload);
        drop(dst);
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn descriptor_copies_follow_contents() {
        let device = NullDevice::new();
        let heap = device
            .create_descriptor_heap(
                &DescriptorHeapDesc {
                    ty: DescriptorHeapType::View,
                    count: 4,
                    shader_visible: true,
                },
                "",
            )
            .unwrap();
        let start = device.descriptor_heap_cpu_start(&heap);
        let inc = device.descriptor_increment_size(DescriptorHeapType::View);
        let cbv = ConstantBufferViewDesc {
            buffer_location: 256,
            size_in_bytes: 256,
        };
        device.create_constant_buffer_view(&cbv, start);
        device.copy_descriptors_simple(1, start.offset(2, inc), start, DescriptorHeapType::View);

        let gpu = device.descriptor_heap_gpu_start(&heap).offset(2, inc);
        assert_eq!(
            device.descriptor_at_gpu(gpu),
            Some(NullDescriptor::ConstantBufferView(cbv))
        );
    }
}
