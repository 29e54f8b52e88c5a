use crate::descriptor::{DescriptorHandle, DescriptorHeapBlock, INVALID_HEAP_INDEX};
use crate::fence::{Fence, QueueFences};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use ze_core::ze_info;
use ze_gfx::backend;
use ze_gfx::backend::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType, Device, DeviceError,
    GpuDescriptorHandle,
};

/// Smallest dynamic block, below that contexts would churn through blocks
pub const MIN_DYNAMIC_BLOCK_SIZE: u32 = 32;

struct PersistentState {
    free_indices: Vec<u32>,

    /// `(frame fence value, index)` pairs waiting for the frame to complete
    pending_frees: VecDeque<(u64, u32)>,
}

struct DynamicState {
    free_blocks: VecDeque<DescriptorHeapBlock>,

    /// Blocks waiting for the submission that used them
    released_blocks: Vec<DescriptorHeapBlock>,
}

/// The shader visible heap of one type. The first part holds persistent descriptors indexed
/// directly by shaders, the rest is split in fixed size blocks that contexts fill with
/// descriptor tables.
pub struct GlobalOnlineDescriptorHeap {
    device: Arc<dyn Device>,
    ty: DescriptorHeapType,
    heap: backend::DescriptorHeap,
    increment: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
    persistent_count: u32,
    dynamic_count: u32,
    block_size: u32,
    frame_fence: Arc<Fence>,
    queue_fences: Arc<QueueFences>,
    persistent: Mutex<PersistentState>,
    dynamic: Mutex<DynamicState>,
}

impl GlobalOnlineDescriptorHeap {
    /// Split `total_count` descriptors evenly between the persistent and dynamic regions
    pub fn new(
        device: Arc<dyn Device>,
        ty: DescriptorHeapType,
        total_count: u32,
        block_size: u32,
        frame_fence: Arc<Fence>,
        queue_fences: Arc<QueueFences>,
    ) -> Result<Self, DeviceError> {
        let persistent_count = total_count / 2;
        Self::with_layout(
            device,
            ty,
            persistent_count,
            total_count - persistent_count,
            block_size,
            frame_fence,
            queue_fences,
        )
    }

    pub fn with_layout(
        device: Arc<dyn Device>,
        ty: DescriptorHeapType,
        persistent_count: u32,
        dynamic_count: u32,
        block_size: u32,
        frame_fence: Arc<Fence>,
        queue_fences: Arc<QueueFences>,
    ) -> Result<Self, DeviceError> {
        assert!(ty.can_be_shader_visible(), "{:?} heaps cannot be shader visible", ty);
        assert!(
            block_size >= MIN_DYNAMIC_BLOCK_SIZE,
            "dynamic descriptor blocks must hold at least {} descriptors",
            MIN_DYNAMIC_BLOCK_SIZE
        );
        assert!(
            dynamic_count >= block_size,
            "dynamic region smaller than a single block"
        );
        assert!(
            dynamic_count % block_size == 0,
            "dynamic region of {} descriptors is not a multiple of the {} descriptors block size",
            dynamic_count,
            block_size
        );

        let heap = device.create_descriptor_heap(
            &DescriptorHeapDesc {
                ty,
                count: persistent_count + dynamic_count,
                shader_visible: true,
            },
            &format!("Global {:?} Descriptor Heap", ty),
        )?;

        let increment = device.descriptor_increment_size(ty);
        let cpu_start = device.descriptor_heap_cpu_start(&heap);
        let gpu_start = device.descriptor_heap_gpu_start(&heap);

        // Reversed so allocations come out in ascending order
        let free_indices = (0..persistent_count).rev().collect();

        let block_count = dynamic_count / block_size;
        let free_blocks = (0..block_count)
            .map(|block| DescriptorHeapBlock {
                start: DescriptorHandle {
                    cpu: cpu_start.offset(persistent_count + block * block_size, increment),
                    gpu: gpu_start.offset(persistent_count + block * block_size, increment),
                    heap_index: INVALID_HEAP_INDEX,
                },
                size: block_size,
                offset: 0,
                fence_value: 0,
            })
            .collect();

        ze_info!(
            "{:?} heap: {} persistent descriptors, {} dynamic blocks of {}",
            ty,
            persistent_count,
            block_count,
            block_size
        );

        Ok(Self {
            device,
            ty,
            heap,
            increment,
            cpu_start,
            gpu_start,
            persistent_count,
            dynamic_count,
            block_size,
            frame_fence,
            queue_fences,
            persistent: Mutex::new(PersistentState {
                free_indices,
                pending_frees: VecDeque::new(),
            }),
            dynamic: Mutex::new(DynamicState {
                free_blocks,
                released_blocks: vec![],
            }),
        })
    }

    /// Allocate a descriptor that stays at the same heap index until freed
    pub fn allocate_persistent(&self) -> DescriptorHandle {
        let mut persistent = self.persistent.lock();
        while let Some(&(fence_value, index)) = persistent.pending_frees.front() {
            if !self.frame_fence.is_complete(fence_value) {
                break;
            }

            persistent.pending_frees.pop_front();
            persistent.free_indices.push(index);
        }

        let index = persistent.free_indices.pop().unwrap_or_else(|| {
            panic!(
                "out of persistent {:?} descriptors ({} in use)",
                self.ty, self.persistent_count
            )
        });

        self.persistent_handle(index)
    }

    pub fn allocate_persistent_owned(self: &Arc<Self>) -> PersistentDescriptor {
        PersistentDescriptor {
            handle: self.allocate_persistent(),
            heap: self.clone(),
        }
    }

    /// The index becomes reusable once the current frame completes on the GPU
    pub fn free_persistent(&self, index: u32) {
        assert!(index < self.persistent_count, "{} is not a persistent index", index);
        let fence_value = self.frame_fence.next_value();
        self.persistent
            .lock()
            .pending_frees
            .push_back((fence_value, index));
    }

    pub fn persistent_handle(&self, index: u32) -> DescriptorHandle {
        debug_assert!(index < self.persistent_count);
        DescriptorHandle {
            cpu: self.cpu_start.offset(index, self.increment),
            gpu: self.gpu_start.offset(index, self.increment),
            heap_index: index,
        }
    }

    /// Take a free dynamic block, recycling released blocks whose submission has completed
    pub fn allocate_block(&self) -> DescriptorHeapBlock {
        let mut dynamic = self.dynamic.lock();
        let DynamicState {
            free_blocks,
            released_blocks,
        } = &mut *dynamic;

        let mut index = 0;
        while index < released_blocks.len() {
            if self.queue_fences.is_complete(released_blocks[index].fence_value) {
                free_blocks.push_back(released_blocks.swap_remove(index));
            } else {
                index += 1;
            }
        }

        free_blocks.pop_front().unwrap_or_else(|| {
            panic!(
                "out of dynamic {:?} descriptor blocks ({} pending release)",
                self.ty,
                released_blocks.len()
            )
        })
    }

    /// Return a block used by the submission signaling `fence_value`
    pub fn release_block(&self, mut block: DescriptorHeapBlock, fence_value: u64) {
        block.offset = 0;
        block.fence_value = fence_value;
        self.dynamic.lock().released_blocks.push(block);
    }

    pub fn copy_descriptor(&self, dst: CpuDescriptorHandle, src: CpuDescriptorHandle) {
        self.device.copy_descriptors_simple(1, dst, src, self.ty);
    }

    pub fn raw(&self) -> &backend::DescriptorHeap {
        &self.heap
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn persistent_count(&self) -> u32 {
        self.persistent_count
    }

    pub fn dynamic_count(&self) -> u32 {
        self.dynamic_count
    }
}

/// A persistent descriptor freed through the frame fence when dropped
pub struct PersistentDescriptor {
    handle: DescriptorHandle,
    heap: Arc<GlobalOnlineDescriptorHeap>,
}

impl PersistentDescriptor {
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }
}

impl Drop for PersistentDescriptor {
    fn drop(&mut self) {
        self.heap.free_persistent(self.handle.heap_index);
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::global_online::GlobalOnlineDescriptorHeap;
    use crate::fence::{Fence, QueueFences};
    use std::sync::Arc;
    use ze_gfx::backend::{DescriptorHeapType, Device, QueueType};
    use ze_gfx::null::NullDevice;

    struct Fixture {
        null: Arc<NullDevice>,
        device: Arc<dyn Device>,
        frame_fence: Arc<Fence>,
        queue_fences: Arc<QueueFences>,
    }

    fn fixture() -> Fixture {
        let null = Arc::new(NullDevice::new());
        null.set_auto_complete(false);
        let device: Arc<dyn Device> = null.clone();
        let frame_fence =
            Arc::new(Fence::new(device.clone(), QueueType::Direct, "Frame", None).unwrap());
        let queue_fences = Arc::new(QueueFences::new(&device, None).unwrap());
        Fixture {
            null,
            device,
            frame_fence,
            queue_fences,
        }
    }

    #[test]
    fn even_split() {
        let f = fixture();
        let heap = GlobalOnlineDescriptorHeap::new(
            f.device.clone(),
            DescriptorHeapType::View,
            1024,
            64,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();
        assert_eq!(heap.persistent_count(), 512);
        assert_eq!(heap.dynamic_count(), 512);
        assert_eq!(heap.allocate_persistent().heap_index, 0);
        assert_eq!(heap.allocate_persistent().heap_index, 1);
    }

    #[test]
    fn persistent_index_reused_after_frame() {
        let f = fixture();
        let queue = f.device.create_queue(QueueType::Direct, "Direct").unwrap();
        let heap = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::View,
            2,
            64,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();

        let first = heap.allocate_persistent();
        let _second = heap.allocate_persistent();
        heap.free_persistent(first.heap_index);

        f.frame_fence.signal(&queue);
        f.null.complete_all_fences();
        let reused = heap.allocate_persistent();
        assert_eq!(reused.heap_index, first.heap_index);
        assert_eq!(reused.cpu, first.cpu);
    }

    #[test]
    #[should_panic(expected = "out of persistent")]
    fn persistent_exhaustion_panics() {
        let f = fixture();
        let heap = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::Sampler,
            1,
            32,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();
        let index = heap.allocate_persistent().heap_index;
        // Freed during the current frame, not reusable yet
        heap.free_persistent(index);
        heap.allocate_persistent();
    }

    #[test]
    fn persistent_indices_have_a_single_holder() {
        let f = fixture();
        let queue = f.device.create_queue(QueueType::Direct, "Direct").unwrap();
        let capacity = 8;
        let heap = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::View,
            capacity,
            32,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();

        let mut live: Vec<u32> = vec![];
        // Freed during the current frame, and freed in frames signaled but not completed
        let mut freed_this_frame = 0;
        let mut freed_in_flight = 0;
        let mut seed = 0x2545_f491_u32;
        for step in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let roll = (seed >> 16) % 8;

            if !live.is_empty() && roll < 3 {
                let index = live.swap_remove((seed >> 8) as usize % live.len());
                heap.free_persistent(index);
                freed_this_frame += 1;
            } else if live.len() + freed_this_frame + freed_in_flight < capacity as usize {
                let index = heap.allocate_persistent().heap_index;
                assert!(
                    !live.contains(&index),
                    "index {} handed out twice at step {}",
                    index,
                    step
                );
                live.push(index);
            }

            // Frames end at irregular intervals, sometimes without the GPU catching up
            if roll == 7 {
                f.frame_fence.signal(&queue);
                freed_in_flight += freed_this_frame;
                freed_this_frame = 0;
                if step % 3 != 0 {
                    f.null.complete_all_fences();
                    freed_in_flight = 0;
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn dynamic_region_is_made_of_whole_blocks() {
        let f = fixture();
        let _ = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::View,
            0,
            48,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        );
    }

    #[test]
    fn blocks_recycle_through_submission_fence() {
        let f = fixture();
        let compute = f
            .device
            .create_queue(QueueType::Compute, "Compute")
            .unwrap();
        let heap = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::View,
            0,
            64,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();

        let first = heap.allocate_block();
        let _second = heap.allocate_block();
        let fence_value = f.queue_fences.fence(QueueType::Compute).signal(&compute);
        heap.release_block(first, fence_value);

        f.null.complete_all_fences();
        let recycled = heap.allocate_block();
        assert_eq!(recycled.start, first.start);
        assert_eq!(recycled.offset, 0);
    }

    #[test]
    #[should_panic(expected = "out of dynamic")]
    fn blocks_exhaust_while_pending() {
        let f = fixture();
        let compute = f
            .device
            .create_queue(QueueType::Compute, "Compute")
            .unwrap();
        let heap = GlobalOnlineDescriptorHeap::with_layout(
            f.device.clone(),
            DescriptorHeapType::View,
            0,
            32,
            32,
            f.frame_fence.clone(),
            f.queue_fences.clone(),
        )
        .unwrap();

        let block = heap.allocate_block();
        let fence_value = f.queue_fences.fence(QueueType::Compute).signal(&compute);
        heap.release_block(block, fence_value);
        heap.allocate_block();
    }
}
