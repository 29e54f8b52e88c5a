use crate::buffer::{Buffer, BufferDesc};
use crate::command_queue::CommandQueue;
use crate::command_signature::{CommandSignature, CommandSignatureBuilder};
use crate::context::state::ContextState;
use crate::context::CommandContext;
use crate::deferred_delete::DeferredDeleteQueue;
use crate::descriptor::global_online::GlobalOnlineDescriptorHeap;
use crate::descriptor::offline::{OfflineDescriptor, OfflineDescriptorAllocator};
use crate::dynamic_allocator::{DynamicAllocationManager, DEFAULT_PAGE_SIZE};
use crate::fence::{Fence, QueueFences};
use crate::pipeline::{PipelineState, PipelineStateCache, StateObject};
use crate::profiler::ProfilerCallbacks;
use crate::root_signature::RootSignature;
use crate::swapchain::SwapChain;
use crate::texture::{Texture, TextureDesc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use ze_core::command_line::CommandLine;
use ze_core::logger::{register_sink, Sink};
use ze_core::{ze_fatal, ze_info, ze_verbose};
use ze_gfx::backend::{
    DescriptorHeapType, Device, DeviceCapabilities, DeviceError, DeviceOptions, QueueType,
    RootSignatureDesc, SamplerDesc, StateObjectDesc, SwapChainDesc,
};
use ze_gfx::pipeline_stream::PipelineStateStream;

/// Switches read from the command line when the application starts
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphicsDeviceOptions {
    pub enable_debug_layer: bool,
    pub wait_for_debugger: bool,
    pub break_on_validation: bool,
    pub stable_power_state: bool,
    pub dump_shaders: bool,
    pub shader_hot_reload: bool,
}

impl GraphicsDeviceOptions {
    pub fn from_command_line(command_line: &CommandLine) -> Self {
        Self {
            enable_debug_layer: cfg!(debug_assertions) || command_line.has("d3ddebug"),
            wait_for_debugger: command_line.has("debuggerwait"),
            break_on_validation: command_line.has("d3dbreakvalidation"),
            stable_power_state: command_line.has("stablepowerstate"),
            dump_shaders: command_line.has("dumpshaders"),
            shader_hot_reload: command_line.has("shaderhotreload"),
        }
    }

    /// Options the backend device must be created with
    pub fn to_device_options(&self) -> DeviceOptions {
        DeviceOptions {
            enable_debug_layer: self.enable_debug_layer || self.break_on_validation,
            break_on_validation: self.break_on_validation,
            stable_power_state: self.stable_power_state,
            wait_for_debugger: self.wait_for_debugger,
        }
    }
}

#[derive(Clone)]
pub struct GraphicsDeviceDesc {
    /// CBV/SRV/UAV descriptors of the shader visible heap, half of them persistent
    pub view_heap_size: u32,
    pub sampler_heap_size: u32,

    /// Descriptors handed to a context at once from the dynamic regions
    pub descriptor_block_size: u32,
    pub upload_page_size: u64,

    /// Frames the CPU may record ahead of the GPU before `end_frame` blocks
    pub max_frames_in_flight: u32,
    pub profiler: Option<Arc<dyn ProfilerCallbacks>>,
    pub log_sink: Option<Arc<dyn Sink>>,
    pub options: GraphicsDeviceOptions,
}

impl Default for GraphicsDeviceDesc {
    fn default() -> Self {
        Self {
            view_heap_size: 65536,
            sampler_heap_size: 2048,
            descriptor_block_size: 64,
            upload_page_size: DEFAULT_PAGE_SIZE,
            max_frames_in_flight: 2,
            profiler: None,
            log_sink: None,
            options: GraphicsDeviceOptions::default(),
        }
    }
}

/// Owns the queues, the descriptor heaps, the upload pages and everything keeping GPU
/// resources alive until the GPU is done with them.
pub struct GraphicsDevice {
    device: Arc<dyn Device>,
    options: GraphicsDeviceOptions,
    queue_fences: Arc<QueueFences>,
    queues: [CommandQueue; QueueType::COUNT],
    frame_fence: Arc<Fence>,
    frames_in_flight: Mutex<VecDeque<u64>>,
    max_frames_in_flight: usize,
    deferred_delete_queue: Arc<DeferredDeleteQueue>,
    offline_allocators: [Arc<OfflineDescriptorAllocator>; 4],
    online_heaps: [Arc<GlobalOnlineDescriptorHeap>; 2],
    upload_manager: Arc<DynamicAllocationManager>,
    context_pools: [Mutex<Vec<ContextState>>; QueueType::COUNT],
    pipeline_cache: PipelineStateCache,
}

impl GraphicsDevice {
    pub fn new(device: Arc<dyn Device>, desc: GraphicsDeviceDesc) -> Result<Self, DeviceError> {
        if let Some(sink) = desc.log_sink {
            register_sink(sink);
        }

        let queue_fences = Arc::new(QueueFences::new(&device, desc.profiler.clone())?);
        let queue = |ty: QueueType| {
            CommandQueue::new(device.clone(), ty, queue_fences.clone(), desc.profiler.clone())
        };
        let queues = [
            queue(QueueType::Direct)?,
            queue(QueueType::Compute)?,
            queue(QueueType::Copy)?,
        ];

        let frame_fence = Arc::new(Fence::new(
            device.clone(),
            QueueType::Direct,
            "Frame Fence",
            desc.profiler.clone(),
        )?);

        let offline = |ty: DescriptorHeapType| {
            Arc::new(OfflineDescriptorAllocator::new(device.clone(), ty))
        };
        let offline_allocators = [
            offline(DescriptorHeapType::View),
            offline(DescriptorHeapType::Sampler),
            offline(DescriptorHeapType::Rtv),
            offline(DescriptorHeapType::Dsv),
        ];

        let online = |ty: DescriptorHeapType, count: u32| -> Result<_, DeviceError> {
            Ok(Arc::new(GlobalOnlineDescriptorHeap::new(
                device.clone(),
                ty,
                count,
                desc.descriptor_block_size,
                frame_fence.clone(),
                queue_fences.clone(),
            )?))
        };
        let online_heaps = [
            online(DescriptorHeapType::View, desc.view_heap_size)?,
            online(DescriptorHeapType::Sampler, desc.sampler_heap_size)?,
        ];

        let capabilities = device.capabilities();
        ze_info!(
            "Graphics device ready (render passes: {}, mesh shaders: {}, raytracing: {}, VRS: {})",
            capabilities.render_passes,
            capabilities.mesh_shaders,
            capabilities.raytracing,
            capabilities.variable_rate_shading
        );

        Ok(Self {
            upload_manager: Arc::new(DynamicAllocationManager::new(
                device.clone(),
                desc.upload_page_size,
                queue_fences.clone(),
            )),
            deferred_delete_queue: Arc::new(DeferredDeleteQueue::new(frame_fence.clone())),
            pipeline_cache: PipelineStateCache::new(device.clone()),
            options: desc.options,
            max_frames_in_flight: desc.max_frames_in_flight.max(1) as usize,
            frames_in_flight: Mutex::new(VecDeque::new()),
            context_pools: Default::default(),
            device,
            queue_fences,
            queues,
            frame_fence,
            offline_allocators,
            online_heaps,
        })
    }

    pub fn raw(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn options(&self) -> &GraphicsDeviceOptions {
        &self.options
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.device.capabilities()
    }

    pub fn queue(&self, ty: QueueType) -> &CommandQueue {
        &self.queues[ty.index()]
    }

    pub fn queue_fences(&self) -> &Arc<QueueFences> {
        &self.queue_fences
    }

    pub fn frame_fence(&self) -> &Arc<Fence> {
        &self.frame_fence
    }

    pub fn deferred_delete_queue(&self) -> &Arc<DeferredDeleteQueue> {
        &self.deferred_delete_queue
    }

    pub fn offline_allocator(&self, ty: DescriptorHeapType) -> &Arc<OfflineDescriptorAllocator> {
        &self.offline_allocators[ty as usize]
    }

    /// Shader visible heap, only view and sampler heaps have one
    pub fn online_heap(&self, ty: DescriptorHeapType) -> &Arc<GlobalOnlineDescriptorHeap> {
        match ty {
            DescriptorHeapType::View => &self.online_heaps[0],
            DescriptorHeapType::Sampler => &self.online_heaps[1],
            _ => panic!("{:?} descriptors have no shader visible heap", ty),
        }
    }

    pub fn upload_manager(&self) -> &Arc<DynamicAllocationManager> {
        &self.upload_manager
    }

    pub fn pipeline_cache(&self) -> &PipelineStateCache {
        &self.pipeline_cache
    }

    /// Get a recording context for `ty`, reusing a pooled one when possible
    pub fn allocate_context(&self, ty: QueueType) -> Result<CommandContext, DeviceError> {
        let allocator = self.queue(ty).request_allocator()?;

        let pooled = self.context_pools[ty.index()].lock().pop();
        let mut state = match pooled {
            Some(mut state) => {
                debug_assert!(!state.recording);
                self.device
                    .reset_command_list(&mut state.command_list, &allocator)?;
                state
            }
            None => {
                ze_verbose!("New {} command context", ty);
                ContextState::new(self, ty, &allocator)?
            }
        };

        if ty != QueueType::Copy {
            let heaps = [
                self.online_heaps[0].raw(),
                self.online_heaps[1].raw(),
            ];
            self.device
                .cmd_set_descriptor_heaps(&mut state.command_list, &heaps);
        }

        state.allocator = Some(allocator);
        state.recording = true;
        Ok(CommandContext::new(self, state))
    }

    pub(crate) fn recycle_context(&self, state: ContextState) {
        self.context_pools[state.queue_type.index()]
            .lock()
            .push(state);
    }

    pub fn create_buffer(&self, desc: BufferDesc, name: &str) -> Result<Arc<Buffer>, DeviceError> {
        Ok(Arc::new(Buffer::new(self, desc, name)?))
    }

    pub fn create_texture(&self, desc: TextureDesc, name: &str) -> Result<Arc<Texture>, DeviceError> {
        Ok(Arc::new(Texture::new(self, desc, name)?))
    }

    pub fn create_root_signature(
        &self,
        desc: RootSignatureDesc,
        name: &str,
    ) -> Result<Arc<RootSignature>, DeviceError> {
        Ok(Arc::new(RootSignature::new(&*self.device, desc, name)?))
    }

    pub fn create_command_signature(
        &self,
        builder: CommandSignatureBuilder,
        root_signature: Option<&RootSignature>,
    ) -> Result<Arc<CommandSignature>, DeviceError> {
        Ok(Arc::new(builder.build(&*self.device, root_signature)?))
    }

    pub fn create_pipeline_state(
        &self,
        stream: &PipelineStateStream,
        root_signature: &Arc<RootSignature>,
        name: &str,
    ) -> Result<Arc<PipelineState>, DeviceError> {
        Ok(Arc::new(PipelineState::new(
            &*self.device,
            stream,
            root_signature.clone(),
            name,
        )?))
    }

    pub fn create_state_object(
        &self,
        desc: &StateObjectDesc,
        name: &str,
    ) -> Result<Arc<StateObject>, DeviceError> {
        Ok(Arc::new(StateObject::new(self.device.clone(), desc, name)?))
    }

    pub fn create_swapchain(&self, desc: SwapChainDesc) -> Result<SwapChain, DeviceError> {
        SwapChain::new(self, desc)
    }

    /// The returned descriptor goes back to the sampler allocator when dropped
    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<OfflineDescriptor, DeviceError> {
        let descriptor = self
            .offline_allocator(DescriptorHeapType::Sampler)
            .allocate_owned()?;
        self.device.create_sampler(desc, descriptor.handle());
        Ok(descriptor)
    }

    /// Signal the end of the CPU frame. Blocks while more than `max_frames_in_flight`
    /// frames are queued, then releases every resource whose last frame completed.
    pub fn end_frame(&self) {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        // The frame fence covers async work only if the direct queue waits for it first
        let direct = self.queue(QueueType::Direct);
        for ty in [QueueType::Compute, QueueType::Copy] {
            let queue = self.queue(ty);
            let last_signaled = queue.fence().last_signaled_value();
            if !queue.is_fence_complete(last_signaled) {
                direct.insert_wait_for_fence(last_signaled);
            }
        }

        let fence_value = self.frame_fence.signal(direct.raw());
        {
            let mut frames = self.frames_in_flight.lock();
            frames.push_back(fence_value);
            while frames.len() > self.max_frames_in_flight {
                if let Some(oldest) = frames.pop_front() {
                    self.frame_fence.wait_cpu(oldest);
                }
            }
        }

        self.deferred_delete_queue.clean();
        self.check_device_removed();
    }

    /// Block until every queue is idle and release what was waiting on them
    pub fn wait_for_idle(&self) {
        for queue in &self.queues {
            queue.wait_for_idle();
        }

        let fence_value = self.frame_fence.signal(self.queue(QueueType::Direct).raw());
        self.frame_fence.wait_cpu(fence_value);
        self.frames_in_flight.lock().clear();
        self.deferred_delete_queue.clean();
    }

    fn check_device_removed(&self) {
        if let Some(reason) = self.device.device_removed_reason() {
            ze_fatal!("Device removed: {}", reason);
        }
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.wait_for_idle();
        let released = self.deferred_delete_queue.drain();
        if released > 0 {
            ze_verbose!("Released {} resources at device shutdown", released);
        }
    }
}
