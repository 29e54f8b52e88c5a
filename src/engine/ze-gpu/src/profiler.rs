use ze_gfx::backend::QueueType;

/// Hooks for an external GPU/CPU profiler. Every method has an empty default.
pub trait ProfilerCallbacks: Send + Sync {
    fn on_fence_signal(&self, _fence: &str, _value: u64) {}
    fn on_fence_wait(&self, _fence: &str, _value: u64) {}
    fn on_submit(&self, _queue: QueueType, _command_list_count: usize) {}
}
