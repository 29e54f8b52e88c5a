use crate::barrier_batcher::ResourceBarrierBatcher;
use crate::command_queue::CommandQueue;
use crate::descriptor::online::OnlineDescriptorAllocator;
use crate::device::GraphicsDevice;
use crate::dynamic_allocator::DynamicResourceAllocator;
use crate::render_pass::ActiveRenderPass;
use crate::resource::{GraphicsResource, ResourceId};
use crate::resource_state::ResourceState;
use crate::root_signature::RootSignature;
use fnv::FnvHashMap;
use std::sync::Arc;
use ze_gfx::backend;
use ze_gfx::backend::{
    DescriptorHeapType, Device, DeviceError, QueueType, ResourceStates, ALL_SUBRESOURCES,
};

/// What a context knows about a resource since it was reset
pub(crate) struct LocalResourceState {
    pub resource: Arc<GraphicsResource>,
    pub state: ResourceState,
}

/// First transition of a subresource in a context. The state it comes from is only known at
/// submission, once previous submissions updated the global state.
pub(crate) struct PendingBarrier {
    pub resource: Arc<GraphicsResource>,
    pub state: ResourceStates,
    pub subresource: u32,
}

/// Everything a command context records into, recycled through the device context pools
pub(crate) struct ContextState {
    pub queue_type: QueueType,
    pub command_list: backend::CommandList,
    pub allocator: Option<backend::CommandAllocator>,
    pub local_states: FnvHashMap<ResourceId, LocalResourceState>,
    pub pending_barriers: Vec<PendingBarrier>,
    pub batcher: ResourceBarrierBatcher,
    pub view_allocator: OnlineDescriptorAllocator,
    pub sampler_allocator: OnlineDescriptorAllocator,
    pub upload_allocator: DynamicResourceAllocator,
    pub graphics_root_signature: Option<Arc<RootSignature>>,
    pub compute_root_signature: Option<Arc<RootSignature>>,
    /// Layout the staging descriptor allocators were last parsed from, shared by both bind points
    pub staged_root_signature: Option<Arc<RootSignature>>,
    pub render_pass: Option<ActiveRenderPass>,

    /// The command list is open and has not been handed to a queue yet
    pub recording: bool,
}

impl ContextState {
    pub fn new(
        device: &GraphicsDevice,
        queue_type: QueueType,
        allocator: &backend::CommandAllocator,
    ) -> Result<Self, DeviceError> {
        let command_list = device.raw().create_command_list(
            queue_type,
            allocator,
            &format!("{} Command List", queue_type),
        )?;

        Ok(Self {
            queue_type,
            command_list,
            allocator: None,
            local_states: FnvHashMap::default(),
            pending_barriers: vec![],
            batcher: ResourceBarrierBatcher::new(),
            view_allocator: OnlineDescriptorAllocator::new(
                device.online_heap(DescriptorHeapType::View).clone(),
            ),
            sampler_allocator: OnlineDescriptorAllocator::new(
                device.online_heap(DescriptorHeapType::Sampler).clone(),
            ),
            upload_allocator: DynamicResourceAllocator::new(device.upload_manager().clone()),
            graphics_root_signature: None,
            compute_root_signature: None,
            staged_root_signature: None,
            render_pass: None,
            recording: false,
        })
    }

    /// Hand every transient allocation back, reusable once `fence_value` completes
    pub fn retire(&mut self, fence_value: u64, queue: &CommandQueue) {
        if let Some(allocator) = self.allocator.take() {
            queue.free_allocator(fence_value, allocator);
        }

        self.view_allocator.release_used_heaps(fence_value);
        self.sampler_allocator.release_used_heaps(fence_value);
        self.upload_allocator.free(fence_value);
        self.local_states.clear();
        self.pending_barriers.clear();
        self.graphics_root_signature = None;
        self.compute_root_signature = None;
        self.staged_root_signature = None;
        self.render_pass = None;
        self.recording = false;
    }

    /// Request `state` for `subresource`, recording a transition or a pending barrier
    pub fn transition(
        &mut self,
        device: &dyn Device,
        resource: &Arc<GraphicsResource>,
        state: ResourceStates,
        subresource: u32,
    ) {
        assert!(
            !state.is_unknown(),
            "cannot transition {} to an unknown state",
            resource.name()
        );
        assert!(
            subresource == ALL_SUBRESOURCES || subresource < resource.subresource_count(),
            "subresource {} out of range for {}",
            subresource,
            resource.name()
        );
        validate_queue_state(self.queue_type, resource, state);

        let Self {
            command_list,
            local_states,
            pending_barriers,
            batcher,
            ..
        } = self;

        let local = local_states
            .entry(resource.id())
            .or_insert_with(|| LocalResourceState {
                resource: resource.clone(),
                state: ResourceState::unknown(resource.subresource_count()),
            });

        let mut recorder = TransitionRecorder {
            device,
            command_list,
            batcher,
            pending_barriers,
            resource,
            tracker: &mut local.state,
        };

        if subresource == ALL_SUBRESOURCES && !recorder.tracker.is_uniform() {
            for index in 0..resource.subresource_count() {
                recorder.transition(index, state);
            }
        } else {
            recorder.transition(subresource, state);
        }
    }

    /// State the context left `subresource` in, `UNKNOWN` if it never touched it
    pub fn local_state(&self, resource: &GraphicsResource, subresource: u32) -> ResourceStates {
        self.local_states
            .get(&resource.id())
            .map(|local| local.state.get(subresource))
            .unwrap_or(ResourceStates::UNKNOWN)
    }

    pub fn flush_barriers(&mut self, device: &dyn Device) {
        self.batcher.flush(device, &mut self.command_list);
    }
}

struct TransitionRecorder<'a> {
    device: &'a dyn Device,
    command_list: &'a mut backend::CommandList,
    batcher: &'a mut ResourceBarrierBatcher,
    pending_barriers: &'a mut Vec<PendingBarrier>,
    resource: &'a Arc<GraphicsResource>,
    tracker: &'a mut ResourceState,
}

impl<'a> TransitionRecorder<'a> {
    fn transition(&mut self, subresource: u32, state: ResourceStates) {
        let current = self.tracker.get(subresource);

        if current.is_unknown() {
            self.pending_barriers.push(PendingBarrier {
                resource: self.resource.clone(),
                state,
                subresource,
            });
            self.tracker.set(subresource, state);
            return;
        }

        // Depth reads are allowed while depth writes are enabled
        if current == ResourceStates::DEPTH_WRITE && state == ResourceStates::DEPTH_READ {
            return;
        }

        if current == state {
            return;
        }

        let target = if current.is_read_only() && state.is_read_only() {
            if current.contains(state) {
                return;
            }
            current | state
        } else {
            state
        };

        self.batcher.add_transition(
            self.device,
            self.command_list,
            self.resource,
            subresource,
            current,
            target,
        );
        self.tracker.set(subresource, target);
    }
}

fn validate_queue_state(queue_type: QueueType, resource: &GraphicsResource, state: ResourceStates) {
    let allowed = match queue_type {
        QueueType::Direct => return,
        QueueType::Compute => {
            ResourceStates::UNORDERED_ACCESS
                | ResourceStates::NON_PIXEL_SHADER_RESOURCE
                | ResourceStates::COPY_DEST
                | ResourceStates::COPY_SOURCE
                | ResourceStates::INDIRECT_ARGUMENT
        }
        QueueType::Copy => ResourceStates::COPY_DEST | ResourceStates::COPY_SOURCE,
    };

    assert!(
        allowed.contains(state),
        "resource {} cannot be transitioned to {:?} on a {} queue",
        resource.name(),
        state,
        queue_type
    );
}
