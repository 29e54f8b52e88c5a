use crate::fence::Fence;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use ze_core::ze_verbose;
use ze_gfx::backend;

/// Native resources dropped while the GPU may still use them. Each entry is released once the
/// frame fence reaches the value it was queued with.
pub struct DeferredDeleteQueue {
    frame_fence: Arc<Fence>,
    entries: Mutex<VecDeque<(u64, backend::Resource)>>,
}

impl DeferredDeleteQueue {
    pub fn new(frame_fence: Arc<Fence>) -> Self {
        Self {
            frame_fence,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Release `resource` once the frame currently being recorded has completed
    pub fn enqueue(&self, resource: backend::Resource) {
        let value = self.frame_fence.next_value();
        self.entries.lock().push_back((value, resource));
    }

    /// Release every entry whose fence value is complete. Returns the number of released entries.
    pub fn clean(&self) -> usize {
        let mut released = vec![];
        {
            let mut entries = self.entries.lock();
            while let Some((value, _)) = entries.front() {
                if !self.frame_fence.is_complete(*value) {
                    break;
                }

                if let Some((_, resource)) = entries.pop_front() {
                    released.push(resource);
                }
            }
        }

        // Native objects are released outside the lock
        let count = released.len();
        drop(released);
        count
    }

    /// Release everything immediately, the caller guarantees the GPU is idle
    pub fn drain(&self) -> usize {
        let entries: Vec<_> = self.entries.lock().drain(..).collect();
        if !entries.is_empty() {
            ze_verbose!("Releasing {} deferred resources", entries.len());
        }
        entries.len()
    }

    /// Frame-fence values of the queued entries, oldest first
    pub fn pending_fence_values(&self) -> Vec<u64> {
        self.entries.lock().iter().map(|(value, _)| *value).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::deferred_delete::DeferredDeleteQueue;
    use crate::fence::Fence;
    use std::sync::Arc;
    use ze_gfx::backend::{
        Device, HeapType, QueueType, ResourceDesc, ResourceFlags, ResourceStates,
    };
    use ze_gfx::null::NullDevice;

    #[test]
    fn released_after_frame_fence() {
        let null = Arc::new(NullDevice::new());
        null.set_auto_complete(false);
        let device: Arc<dyn Device> = null.clone();
        let queue = device.create_queue(QueueType::Direct, "Direct").unwrap();
        let fence = Arc::new(Fence::new(device.clone(), QueueType::Direct, "Frame", None).unwrap());
        let deletes = DeferredDeleteQueue::new(fence.clone());

        let resource = device
            .create_committed_resource(
                &ResourceDesc::buffer(64, ResourceFlags::empty()),
                HeapType::Default,
                ResourceStates::COMMON,
                None,
                "Buffer",
            )
            .unwrap();
        deletes.enqueue(resource);
        assert_eq!(deletes.clean(), 0);

        fence.signal(&queue);
        assert_eq!(deletes.clean(), 0);
        assert_eq!(null.live_resource_count(), 1);

        null.complete_all_fences();
        assert_eq!(deletes.clean(), 1);
        assert!(deletes.is_empty());
        assert_eq!(null.live_resource_count(), 0);
    }
}
