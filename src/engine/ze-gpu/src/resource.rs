use crate::deferred_delete::DeferredDeleteQueue;
use crate::descriptor::ResourceView;
use crate::resource_state::ResourceState;
use parking_lot::{Mutex, MutexGuard};
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ze_gfx::backend;
use ze_gfx::backend::{HeapType, ResourceDesc, ResourceStates};

pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// What happens to the native resource when the last reference goes away
pub enum ReleasePolicy {
    /// Kept alive until the frame it was dropped in completes
    DeletionQueue(Arc<DeferredDeleteQueue>),

    /// Released right away, used for resources owned by the swapchain
    Immediate,
}

/// A native resource plus the state every queue agrees on between submissions
pub struct GraphicsResource {
    id: ResourceId,
    name: String,
    resource: ManuallyDrop<backend::Resource>,
    desc: ResourceDesc,
    heap_type: HeapType,
    gpu_address: u64,
    global_state: Mutex<ResourceState>,
    release_policy: ReleasePolicy,
}

impl GraphicsResource {
    pub fn new(
        resource: backend::Resource,
        desc: ResourceDesc,
        heap_type: HeapType,
        initial_state: ResourceStates,
        gpu_address: u64,
        name: &str,
        release_policy: ReleasePolicy,
    ) -> Self {
        Self {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            resource: ManuallyDrop::new(resource),
            global_state: Mutex::new(ResourceState::new(desc.subresource_count(), initial_state)),
            desc,
            heap_type,
            gpu_address,
            release_policy,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &backend::Resource {
        &self.resource
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    /// Zero for textures
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn subresource_count(&self) -> u32 {
        self.desc.subresource_count()
    }

    /// Snapshot of the state as of the last submission
    pub fn global_state(&self) -> ResourceState {
        self.global_state.lock().clone()
    }

    pub(crate) fn global_state_mut(&self) -> MutexGuard<ResourceState> {
        self.global_state.lock()
    }

    /// Override the global state, for resources transitioned outside of any context
    pub fn set_resource_state(&self, subresource: u32, state: ResourceStates) {
        self.global_state.lock().set(subresource, state);
    }
}

impl Drop for GraphicsResource {
    fn drop(&mut self) {
        // SAFETY: the resource is never touched again after this point
        let resource = unsafe { ManuallyDrop::take(&mut self.resource) };
        match &self.release_policy {
            ReleasePolicy::DeletionQueue(queue) => queue.enqueue(resource),
            ReleasePolicy::Immediate => drop(resource),
        }
    }
}

/// Anything backed by a [`GraphicsResource`] that a command context can transition
pub trait AsGraphicsResource {
    fn graphics_resource(&self) -> &Arc<GraphicsResource>;
}

impl AsGraphicsResource for Arc<GraphicsResource> {
    fn graphics_resource(&self) -> &Arc<GraphicsResource> {
        self
    }
}

/// Resources exposing shader views, cleared and bound through their views
pub trait ShaderResource: AsGraphicsResource {
    fn srv(&self) -> Option<&ResourceView>;
    fn uav(&self) -> Option<&ResourceView>;
}
