use crate::resource::GraphicsResource;
use std::sync::Arc;
use tinyvec::ArrayVec;
use ze_gfx::backend;
use ze_gfx::backend::{Device, ResourceBarrier, ResourceStates, ResourceTransitionBarrier};

pub const MAX_BATCH_SIZE: usize = 16;

#[derive(Clone)]
enum BatchedBarrier {
    Transition {
        resource: Arc<GraphicsResource>,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    Uav(Option<Arc<GraphicsResource>>),
}

impl Default for BatchedBarrier {
    fn default() -> Self {
        Self::Uav(None)
    }
}

/// Accumulates barriers and records them in groups. A transition immediately followed by its
/// exact reverse cancels out.
#[derive(Default)]
pub struct ResourceBarrierBatcher {
    barriers: ArrayVec<[BatchedBarrier; MAX_BATCH_SIZE]>,
}

impl ResourceBarrierBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transition(
        &mut self,
        device: &dyn Device,
        command_list: &mut backend::CommandList,
        resource: &Arc<GraphicsResource>,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    ) {
        if let Some(BatchedBarrier::Transition {
            resource: last_resource,
            subresource: last_subresource,
            before: last_before,
            after: last_after,
        }) = self.barriers.last()
        {
            if Arc::ptr_eq(last_resource, resource)
                && *last_subresource == subresource
                && *last_before == after
                && *last_after == before
            {
                self.barriers.pop();
                return;
            }
        }

        self.push(
            device,
            command_list,
            BatchedBarrier::Transition {
                resource: resource.clone(),
                subresource,
                before,
                after,
            },
        );
    }

    /// `None` orders every unordered access against the next ones
    pub fn add_uav(
        &mut self,
        device: &dyn Device,
        command_list: &mut backend::CommandList,
        resource: Option<&Arc<GraphicsResource>>,
    ) {
        self.push(device, command_list, BatchedBarrier::Uav(resource.cloned()));
    }

    pub fn flush(&mut self, device: &dyn Device, command_list: &mut backend::CommandList) {
        if self.barriers.is_empty() {
            return;
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let barriers: Vec<ResourceBarrier> = self
            .barriers
            .iter()
            .map(|barrier| match barrier {
                BatchedBarrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => ResourceBarrier::Transition(ResourceTransitionBarrier {
                    resource: resource.raw(),
                    subresource: *subresource,
                    state_before: *before,
                    state_after: *after,
                }),
                BatchedBarrier::Uav(resource) => {
                    ResourceBarrier::Uav(resource.as_ref().map(|resource| resource.raw()))
                }
            })
            .collect();

        device.cmd_resource_barrier(command_list, &barriers);
        drop(barriers);
        self.barriers.clear();
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    fn push(
        &mut self,
        device: &dyn Device,
        command_list: &mut backend::CommandList,
        barrier: BatchedBarrier,
    ) {
        self.barriers.push(barrier);
        if self.barriers.len() >= MAX_BATCH_SIZE {
            self.flush(device, command_list);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::barrier_batcher::{ResourceBarrierBatcher, MAX_BATCH_SIZE};
    use crate::resource::{GraphicsResource, ReleasePolicy};
    use std::sync::Arc;
    use ze_gfx::backend::{
        Device, HeapType, QueueType, ResourceDesc, ResourceFlags, ResourceStates,
    };
    use ze_gfx::null::{Command, NullDevice, RecordedBarrier};

    fn buffer(device: &NullDevice) -> Arc<GraphicsResource> {
        let desc = ResourceDesc::buffer(256, ResourceFlags::empty());
        let raw = device
            .create_committed_resource(&desc, HeapType::Default, ResourceStates::COMMON, None, "")
            .unwrap();
        Arc::new(GraphicsResource::new(
            raw,
            desc,
            HeapType::Default,
            ResourceStates::COMMON,
            0,
            "Buffer",
            ReleasePolicy::Immediate,
        ))
    }

    fn recorded(device: &NullDevice, mut list: ze_gfx::backend::CommandList) -> Vec<Command> {
        let queue = device.create_queue(QueueType::Direct, "Direct").unwrap();
        device.close_command_list(&mut list).unwrap();
        device.queue_execute(&queue, &[&list]);
        device.executed_commands(QueueType::Direct)
    }

    #[test]
    fn reverse_pair_cancels() {
        let device = NullDevice::new();
        let allocator = device.create_command_allocator(QueueType::Direct).unwrap();
        let mut list = device
            .create_command_list(QueueType::Direct, &allocator, "")
            .unwrap();
        let resource = buffer(&device);

        let mut batcher = ResourceBarrierBatcher::new();
        batcher.add_transition(
            &device,
            &mut list,
            &resource,
            0,
            ResourceStates::COMMON,
            ResourceStates::COPY_DEST,
        );
        batcher.add_transition(
            &device,
            &mut list,
            &resource,
            0,
            ResourceStates::COPY_DEST,
            ResourceStates::COMMON,
        );
        assert!(batcher.is_empty());

        // Flushing nothing records nothing
        batcher.flush(&device, &mut list);
        assert!(recorded(&device, list).is_empty());
    }

    #[test]
    fn flushes_when_full() {
        let device = NullDevice::new();
        let allocator = device.create_command_allocator(QueueType::Direct).unwrap();
        let mut list = device
            .create_command_list(QueueType::Direct, &allocator, "")
            .unwrap();
        let resources: Vec<_> = (0..MAX_BATCH_SIZE + 1).map(|_| buffer(&device)).collect();

        let mut batcher = ResourceBarrierBatcher::new();
        for resource in &resources {
            batcher.add_transition(
                &device,
                &mut list,
                resource,
                0,
                ResourceStates::COMMON,
                ResourceStates::UNORDERED_ACCESS,
            );
        }
        assert_eq!(batcher.len(), 1);
        batcher.add_uav(&device, &mut list, None);
        batcher.flush(&device, &mut list);

        let commands = recorded(&device, list);
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            Command::ResourceBarrier(barriers) => assert_eq!(barriers.len(), MAX_BATCH_SIZE),
            command => panic!("unexpected command {:?}", command),
        }
        match &commands[1] {
            Command::ResourceBarrier(barriers) => {
                assert_eq!(barriers.len(), 2);
                assert_eq!(barriers[1], RecordedBarrier::Uav(None));
            }
            command => panic!("unexpected command {:?}", command),
        }
    }
}
