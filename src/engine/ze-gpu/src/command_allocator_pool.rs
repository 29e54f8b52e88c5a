use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, QueueType};

/// Recycles command allocators of one queue type once the GPU is done with them
pub struct CommandAllocatorPool {
    device: Arc<dyn Device>,
    ty: QueueType,
    free_allocators: Mutex<VecDeque<(u64, backend::CommandAllocator)>>,
    allocator_count: AtomicUsize,
}

impl CommandAllocatorPool {
    pub fn new(device: Arc<dyn Device>, ty: QueueType) -> Self {
        Self {
            device,
            ty,
            free_allocators: Mutex::new(VecDeque::new()),
            allocator_count: AtomicUsize::new(0),
        }
    }

    /// Reuse the oldest returned allocator if its fence is at or below `completed_fence_value`,
    /// create a new one otherwise
    pub fn request_allocator(
        &self,
        completed_fence_value: u64,
    ) -> Result<backend::CommandAllocator, DeviceError> {
        {
            let mut free_allocators = self.free_allocators.lock();
            let reusable = matches!(free_allocators.front(), Some((fence, _)) if *fence <= completed_fence_value);
            if reusable {
                if let Some((_, allocator)) = free_allocators.pop_front() {
                    self.device.reset_command_allocator(&allocator)?;
                    return Ok(allocator);
                }
            }
        }

        let allocator = self.device.create_command_allocator(self.ty)?;
        self.allocator_count.fetch_add(1, Ordering::SeqCst);
        Ok(allocator)
    }

    /// Give back an allocator whose commands complete at `fence_value`
    pub fn free_allocator(&self, fence_value: u64, allocator: backend::CommandAllocator) {
        self.free_allocators
            .lock()
            .push_back((fence_value, allocator));
    }

    /// Number of allocators created by this pool so far
    pub fn allocator_count(&self) -> usize {
        self.allocator_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use crate::command_allocator_pool::CommandAllocatorPool;
    use std::sync::Arc;
    use ze_gfx::backend::QueueType;
    use ze_gfx::null::NullDevice;

    #[test]
    fn reuses_completed_allocators_only() {
        let null = Arc::new(NullDevice::new());
        let pool = CommandAllocatorPool::new(null.clone(), QueueType::Direct);

        let first = pool.request_allocator(0).unwrap();
        let first_id = null.command_allocator_id(&first);
        pool.free_allocator(5, first);

        let second = pool.request_allocator(4).unwrap();
        assert_ne!(null.command_allocator_id(&second), first_id);
        assert_eq!(pool.allocator_count(), 2);

        let third = pool.request_allocator(5).unwrap();
        assert_eq!(null.command_allocator_id(&third), first_id);
        assert_eq!(null.command_allocator_reset_count(&third), 1);
        assert_eq!(pool.allocator_count(), 2);
    }
}
