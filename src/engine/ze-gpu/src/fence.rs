use crate::profiler::ProfilerCallbacks;
use num_traits::FromPrimitive;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ze_core::ze_fatal;
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, QueueType};

/// Fence values carry the queue type that signals them in their upper 8 bits,
/// the lower 56 bits are a monotonic counter.
pub const QUEUE_TYPE_SHIFT: u32 = 56;
pub const COUNTER_MASK: u64 = (1 << QUEUE_TYPE_SHIFT) - 1;

pub fn make_fence_value(queue_type: QueueType, counter: u64) -> u64 {
    debug_assert!(counter <= COUNTER_MASK);
    ((queue_type as u64) << QUEUE_TYPE_SHIFT) | (counter & COUNTER_MASK)
}

pub fn fence_value_queue_type(value: u64) -> QueueType {
    let tag = (value >> QUEUE_TYPE_SHIFT) as u8;
    QueueType::from_u8(tag)
        .unwrap_or_else(|| panic!("fence value {:#x} carries an invalid queue tag", value))
}

pub fn fence_value_counter(value: u64) -> u64 {
    value & COUNTER_MASK
}

pub struct Fence {
    device: Arc<dyn Device>,
    fence: backend::Fence,
    event: Mutex<backend::FenceEvent>,
    queue_type: QueueType,
    name: String,
    next_value: AtomicU64,
    last_completed_value: AtomicU64,
    profiler: Option<Arc<dyn ProfilerCallbacks>>,
}

impl Fence {
    pub fn new(
        device: Arc<dyn Device>,
        queue_type: QueueType,
        name: &str,
        profiler: Option<Arc<dyn ProfilerCallbacks>>,
    ) -> Result<Self, DeviceError> {
        let initial_value = make_fence_value(queue_type, 0);
        let fence = device.create_fence(initial_value, name)?;
        let event = device.create_fence_event()?;

        Ok(Self {
            device,
            fence,
            event: Mutex::new(event),
            queue_type,
            name: name.to_string(),
            next_value: AtomicU64::new(initial_value + 1),
            last_completed_value: AtomicU64::new(initial_value),
            profiler,
        })
    }

    /// Enqueue a signal of the next value on `queue` and return the signaled value
    pub fn signal(&self, queue: &backend::Queue) -> u64 {
        let value = self.next_value.fetch_add(1, Ordering::SeqCst);
        if let Err(error) = self.device.queue_signal(queue, &self.fence, value) {
            ze_fatal!("Failed to signal fence {} ({:#x}): {}", self.name, value, error);
        }

        if let Some(profiler) = &self.profiler {
            profiler.on_fence_signal(&self.name, value);
        }

        value
    }

    /// Block the calling thread until `value` is reached
    pub fn wait_cpu(&self, value: u64) {
        if self.is_complete(value) {
            return;
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        if let Some(profiler) = &self.profiler {
            profiler.on_fence_wait(&self.name, value);
        }

        // One waiter at a time per event
        let event = self.event.lock();
        if let Err(error) = self.device.fence_wait(&self.fence, value, &event) {
            ze_fatal!("Failed to wait for fence {} ({:#x}): {}", self.name, value, error);
        }

        self.last_completed_value.fetch_max(value, Ordering::SeqCst);
    }

    /// Make `queue` wait on the GPU until `value` is reached
    pub fn wait_gpu(&self, queue: &backend::Queue, value: u64) {
        debug_assert_eq!(fence_value_queue_type(value), self.queue_type);
        if let Err(error) = self.device.queue_wait(queue, &self.fence, value) {
            ze_fatal!("Failed to insert GPU wait on {} ({:#x}): {}", self.name, value, error);
        }
    }

    pub fn is_complete(&self, value: u64) -> bool {
        debug_assert_eq!(
            fence_value_queue_type(value),
            self.queue_type,
            "fence value {:#x} was not issued by {}",
            value,
            self.name
        );

        if value <= self.last_completed_value.load(Ordering::SeqCst) {
            return true;
        }

        self.poll() >= value
    }

    /// Refresh the cached completed value from the GPU
    pub fn poll(&self) -> u64 {
        let completed = self.device.fence_completed_value(&self.fence);
        let previous = self
            .last_completed_value
            .fetch_max(completed, Ordering::SeqCst);
        previous.max(completed)
    }

    pub fn last_completed_value(&self) -> u64 {
        self.last_completed_value.load(Ordering::SeqCst)
    }

    /// Value the next call to [`Fence::signal`] will use
    pub fn next_value(&self) -> u64 {
        self.next_value.load(Ordering::SeqCst)
    }

    /// Last value handed out by [`Fence::signal`], the initial value if none was
    pub fn last_signaled_value(&self) -> u64 {
        self.next_value() - 1
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &backend::Fence {
        &self.fence
    }
}

/// The fence of every queue type, used to answer completion queries for tagged values
/// coming from any queue.
pub struct QueueFences {
    fences: [Arc<Fence>; QueueType::COUNT],
}

impl QueueFences {
    pub fn new(
        device: &Arc<dyn Device>,
        profiler: Option<Arc<dyn ProfilerCallbacks>>,
    ) -> Result<Self, DeviceError> {
        let fence = |ty: QueueType| -> Result<Arc<Fence>, DeviceError> {
            Ok(Arc::new(Fence::new(
                device.clone(),
                ty,
                &format!("{} Queue Fence", ty),
                profiler.clone(),
            )?))
        };

        Ok(Self {
            fences: [
                fence(QueueType::Direct)?,
                fence(QueueType::Compute)?,
                fence(QueueType::Copy)?,
            ],
        })
    }

    pub fn fence(&self, ty: QueueType) -> &Arc<Fence> {
        &self.fences[ty.index()]
    }

    /// Route the query to the fence of the queue that issued `value`
    pub fn is_complete(&self, value: u64) -> bool {
        self.fence(fence_value_queue_type(value)).is_complete(value)
    }

    pub fn wait_cpu(&self, value: u64) {
        self.fence(fence_value_queue_type(value)).wait_cpu(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::fence::{
        fence_value_counter, fence_value_queue_type, make_fence_value, Fence, QueueFences,
    };
    use std::sync::Arc;
    use ze_gfx::backend::{Device, QueueType};
    use ze_gfx::null::NullDevice;

    #[test]
    fn values_carry_queue_tag() {
        let value = make_fence_value(QueueType::Copy, 42);
        assert_eq!(value >> 56, 2);
        assert_eq!(fence_value_queue_type(value), QueueType::Copy);
        assert_eq!(fence_value_counter(value), 42);
        assert_eq!(make_fence_value(QueueType::Direct, 7), 7);
    }

    #[test]
    fn signal_and_wait() {
        let null = Arc::new(NullDevice::new());
        null.set_auto_complete(false);
        let device: Arc<dyn Device> = null.clone();
        let queue = device.create_queue(QueueType::Compute, "Compute").unwrap();
        let fence = Fence::new(device, QueueType::Compute, "Test", None).unwrap();

        let first = fence.signal(&queue);
        let second = fence.signal(&queue);
        assert_eq!(fence_value_counter(first), 1);
        assert_eq!(second, first + 1);
        assert_eq!(fence_value_queue_type(second), QueueType::Compute);
        assert!(!fence.is_complete(first));

        fence.wait_cpu(first);
        assert!(fence.is_complete(first));
        assert!(!fence.is_complete(second));

        null.complete_all_fences();
        assert!(fence.is_complete(second));
        assert_eq!(fence.last_completed_value(), second);
    }

    #[test]
    fn queue_fences_route_by_tag() {
        let null = Arc::new(NullDevice::new());
        null.set_auto_complete(false);
        let device: Arc<dyn Device> = null.clone();
        let fences = QueueFences::new(&device, None).unwrap();
        let copy = device.create_queue(QueueType::Copy, "Copy").unwrap();

        let value = fences.fence(QueueType::Copy).signal(&copy);
        assert!(!fences.is_complete(value));
        assert!(fences.is_complete(make_fence_value(QueueType::Direct, 0)));

        null.complete_all_fences();
        assert!(fences.is_complete(value));
    }
}
