pub mod global_online;
pub mod offline;
pub mod online;

use crate::descriptor::global_online::{GlobalOnlineDescriptorHeap, PersistentDescriptor};
use crate::descriptor::offline::{OfflineDescriptor, OfflineDescriptorAllocator};
use std::sync::Arc;
use ze_gfx::backend::{CpuDescriptorHandle, DeviceError, GpuDescriptorHandle};

pub const INVALID_HEAP_INDEX: u32 = u32::MAX;

/// A descriptor inside a shader visible heap
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptorHandle,
    pub gpu: GpuDescriptorHandle,

    /// Index from the start of the heap, `INVALID_HEAP_INDEX` for dynamic descriptors
    pub heap_index: u32,
}

impl DescriptorHandle {
    pub fn offset(self, count: u32, increment: u32) -> Self {
        Self {
            cpu: self.cpu.offset(count, increment),
            gpu: self.gpu.offset(count, increment),
            heap_index: match self.heap_index {
                INVALID_HEAP_INDEX => INVALID_HEAP_INDEX,
                index => index + count,
            },
        }
    }
}

/// A contiguous range of the dynamic region of a shader visible heap
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorHeapBlock {
    pub start: DescriptorHandle,
    pub size: u32,

    /// Descriptors already handed out from this block
    pub offset: u32,

    /// Submission after which the block can be reused
    pub fence_value: u64,
}

impl DescriptorHeapBlock {
    pub fn remaining(&self) -> u32 {
        self.size - self.offset
    }
}

/// A view created in a CPU-only heap, optionally mirrored in the persistent region of the
/// shader visible heap so shaders can index it directly
pub struct ResourceView {
    offline: OfflineDescriptor,
    bindless: Option<PersistentDescriptor>,
}

impl ResourceView {
    pub(crate) fn new(
        offline_allocator: &Arc<OfflineDescriptorAllocator>,
        online_heap: Option<&Arc<GlobalOnlineDescriptorHeap>>,
        write: impl FnOnce(CpuDescriptorHandle),
    ) -> Result<Self, DeviceError> {
        let offline = offline_allocator.allocate_owned()?;
        write(offline.handle());

        let bindless = online_heap.map(|heap| {
            let descriptor = heap.allocate_persistent_owned();
            heap.copy_descriptor(descriptor.handle().cpu, offline.handle());
            descriptor
        });

        Ok(Self { offline, bindless })
    }

    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.offline.handle()
    }

    /// Index in the shader visible heap, for directly indexed access from shaders
    pub fn bindless_index(&self) -> Option<u32> {
        self.bindless
            .as_ref()
            .map(|descriptor| descriptor.handle().heap_index)
    }

    pub fn bindless_handle(&self) -> Option<DescriptorHandle> {
        self.bindless.as_ref().map(|descriptor| descriptor.handle())
    }
}
