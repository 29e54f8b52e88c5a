use crate::barrier_batcher::ResourceBarrierBatcher;
use crate::command_allocator_pool::CommandAllocatorPool;
use crate::context::state::ContextState;
use crate::context::CommandContext;
use crate::fence::{fence_value_queue_type, Fence, QueueFences};
use crate::profiler::ProfilerCallbacks;
use crate::resource::GraphicsResource;
use parking_lot::Mutex;
use std::sync::Arc;
use ze_core::{ze_fatal, ze_verbose};
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, QueueType, ResourceStates, ALL_SUBRESOURCES};

/// Transition resolved against the global state when a context is submitted
struct PreludeTransition {
    resource: Arc<GraphicsResource>,
    subresource: u32,
    before: ResourceStates,
    after: ResourceStates,
}

/// A hardware queue, its fence and the command allocators of its type
pub struct CommandQueue {
    device: Arc<dyn Device>,
    ty: QueueType,
    queue: backend::Queue,
    fences: Arc<QueueFences>,
    allocator_pool: CommandAllocatorPool,

    /// Closed command lists used to record barrier preludes
    prelude_lists: Mutex<Vec<backend::CommandList>>,

    /// Resolving global states, executing and signaling happen as one step
    submit_lock: Mutex<()>,
    profiler: Option<Arc<dyn ProfilerCallbacks>>,
}

impl CommandQueue {
    pub fn new(
        device: Arc<dyn Device>,
        ty: QueueType,
        fences: Arc<QueueFences>,
        profiler: Option<Arc<dyn ProfilerCallbacks>>,
    ) -> Result<Self, DeviceError> {
        let queue = device.create_queue(ty, &format!("{} Queue", ty))?;
        Ok(Self {
            allocator_pool: CommandAllocatorPool::new(device.clone(), ty),
            device,
            ty,
            queue,
            fences,
            prelude_lists: Mutex::new(vec![]),
            submit_lock: Mutex::new(()),
            profiler,
        })
    }

    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn raw(&self) -> &backend::Queue {
        &self.queue
    }

    pub fn fence(&self) -> &Arc<Fence> {
        self.fences.fence(self.ty)
    }

    pub fn request_allocator(&self) -> Result<backend::CommandAllocator, DeviceError> {
        self.allocator_pool.request_allocator(self.fence().poll())
    }

    pub fn free_allocator(&self, fence_value: u64, allocator: backend::CommandAllocator) {
        self.allocator_pool.free_allocator(fence_value, allocator);
    }

    pub fn allocator_count(&self) -> usize {
        self.allocator_pool.allocator_count()
    }

    /// Execute closed command lists without any state tracking
    pub fn execute_command_lists(&self, command_lists: &[&backend::CommandList]) -> u64 {
        let _guard = self.submit_lock.lock();
        self.device.queue_execute(&self.queue, command_lists);
        let fence_value = self.fence().signal(&self.queue);
        if let Some(profiler) = &self.profiler {
            profiler.on_submit(self.ty, command_lists.len());
        }
        fence_value
    }

    /// Close and execute `contexts` in order, returns the fence value signaled after the last one.
    ///
    /// Pending barriers of each context are resolved against the global state left by
    /// everything submitted before it, including earlier contexts of the same batch. The
    /// transitions they need are recorded in a prelude list executed right before the context.
    pub fn execute_contexts(&self, contexts: &mut [&mut CommandContext]) -> u64 {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let _guard = self.submit_lock.lock();
        let mut prelude_allocator: Option<backend::CommandAllocator> = None;
        let mut preludes: Vec<Option<backend::CommandList>> = Vec::with_capacity(contexts.len());

        for context in contexts.iter_mut() {
            let state = context.state_mut();
            assert_eq!(
                state.queue_type, self.ty,
                "a {} context cannot be executed on a {} queue",
                state.queue_type, self.ty
            );
            assert!(state.recording, "context was already executed");
            assert!(
                state.render_pass.is_none(),
                "render pass still open when executing the context"
            );

            state.batcher.flush(&*self.device, &mut state.command_list);
            if let Err(error) = self.device.close_command_list(&mut state.command_list) {
                ze_fatal!("Failed to close {} command list: {}", self.ty, error);
            }

            let transitions = Self::resolve_pending_barriers(state);
            for local in state.local_states.values() {
                local
                    .resource
                    .global_state_mut()
                    .apply_known(&local.state);
            }

            let prelude = if transitions.is_empty() {
                None
            } else {
                Some(self.record_prelude(&mut prelude_allocator, &transitions))
            };
            preludes.push(prelude);
        }

        let mut command_lists: Vec<&backend::CommandList> = Vec::with_capacity(contexts.len() * 2);
        for (prelude, context) in preludes.iter().zip(contexts.iter()) {
            if let Some(prelude) = prelude {
                command_lists.push(prelude);
            }
            command_lists.push(&context.state().command_list);
        }

        self.device.queue_execute(&self.queue, &command_lists);
        let fence_value = self.fence().signal(&self.queue);
        if let Some(profiler) = &self.profiler {
            profiler.on_submit(self.ty, command_lists.len());
        }
        drop(command_lists);

        if let Some(allocator) = prelude_allocator {
            self.free_allocator(fence_value, allocator);
        }
        self.prelude_lists
            .lock()
            .extend(preludes.into_iter().flatten());

        for context in contexts.iter_mut() {
            context.state_mut().retire(fence_value, self);
        }

        fence_value
    }

    /// First use of each subresource against its global state
    fn resolve_pending_barriers(state: &mut ContextState) -> Vec<PreludeTransition> {
        let mut transitions = vec![];
        for pending in state.pending_barriers.drain(..) {
            let global = pending.resource.global_state_mut();
            let mut resolve = |subresource: u32| {
                let before = global.get(subresource);
                if before != pending.state {
                    transitions.push(PreludeTransition {
                        resource: pending.resource.clone(),
                        subresource,
                        before,
                        after: pending.state,
                    });
                }
            };

            if pending.subresource == ALL_SUBRESOURCES && !global.is_uniform() {
                for subresource in 0..pending.resource.subresource_count() {
                    resolve(subresource);
                }
            } else {
                resolve(pending.subresource);
            }
        }
        transitions
    }

    fn record_prelude(
        &self,
        allocator: &mut Option<backend::CommandAllocator>,
        transitions: &[PreludeTransition],
    ) -> backend::CommandList {
        if allocator.is_none() {
            match self.request_allocator() {
                Ok(new_allocator) => *allocator = Some(new_allocator),
                Err(error) => ze_fatal!("Failed to get a prelude command allocator: {}", error),
            }
        }

        let allocator = match allocator.as_ref() {
            Some(allocator) => allocator,
            None => unreachable!(),
        };

        let recycled = self.prelude_lists.lock().pop();
        let mut command_list = match recycled {
            Some(mut command_list) => {
                if let Err(error) = self.device.reset_command_list(&mut command_list, allocator) {
                    ze_fatal!("Failed to reset prelude command list: {}", error);
                }
                command_list
            }
            None => {
                ze_verbose!("New {} barrier prelude command list", self.ty);
                match self
                    .device
                    .create_command_list(self.ty, allocator, "Barrier Prelude")
                {
                    Ok(command_list) => command_list,
                    Err(error) => ze_fatal!("Failed to create prelude command list: {}", error),
                }
            }
        };

        let mut batcher = ResourceBarrierBatcher::new();
        for transition in transitions {
            batcher.add_transition(
                &*self.device,
                &mut command_list,
                &transition.resource,
                transition.subresource,
                transition.before,
                transition.after,
            );
        }
        batcher.flush(&*self.device, &mut command_list);

        if let Err(error) = self.device.close_command_list(&mut command_list) {
            ze_fatal!("Failed to close prelude command list: {}", error);
        }
        command_list
    }

    /// Block until `fence_value` completes, it may come from any queue
    pub fn wait_for_fence(&self, fence_value: u64) {
        self.fences.wait_cpu(fence_value);
    }

    pub fn is_fence_complete(&self, fence_value: u64) -> bool {
        self.fences.is_complete(fence_value)
    }

    /// Block until everything submitted so far completes
    pub fn wait_for_idle(&self) {
        let fence_value = {
            let _guard = self.submit_lock.lock();
            self.fence().signal(&self.queue)
        };
        self.fence().wait_cpu(fence_value);
    }

    /// Make the GPU wait for `fence_value` before running work submitted afterwards
    pub fn insert_wait_for_fence(&self, fence_value: u64) {
        let fence = self.fences.fence(fence_value_queue_type(fence_value));
        fence.wait_gpu(&self.queue, fence_value);
    }

    /// Make the GPU wait for everything submitted to `other` so far
    pub fn insert_wait_for_queue(&self, other: &CommandQueue) {
        self.insert_wait_for_fence(other.fence().last_signaled_value());
    }
}
