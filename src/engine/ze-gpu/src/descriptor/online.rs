use crate::descriptor::global_online::GlobalOnlineDescriptorHeap;
use crate::descriptor::{DescriptorHandle, DescriptorHeapBlock};
use crate::root_signature::{RootSignature, MAX_ROOT_PARAMETERS};
use std::sync::Arc;
use ze_gfx::backend;
use ze_gfx::backend::{
    CpuDescriptorHandle, DescriptorHeapType, Device, PipelineBindPoint,
    UNBOUNDED_DESCRIPTOR_COUNT,
};

#[derive(Clone, Default)]
struct StagedTable {
    /// Range of the shader visible heap holding the table
    range: Option<DescriptorHandle>,

    /// Set once `range` has been bound, further writes must go to a fresh range
    bound: bool,

    /// CPU handles staged so far, null for slots never written
    handles: Vec<CpuDescriptorHandle>,
}

/// Stages descriptor tables of one heap type for a single command context, copying them into
/// blocks of the global shader visible heap
pub struct OnlineDescriptorAllocator {
    heap: Arc<GlobalOnlineDescriptorHeap>,
    current_block: Option<DescriptorHeapBlock>,
    retired_blocks: Vec<DescriptorHeapBlock>,
    table_mask: u64,
    table_sizes: [u32; MAX_ROOT_PARAMETERS],
    stale_tables: u64,
    tables: Vec<StagedTable>,
}

impl OnlineDescriptorAllocator {
    pub fn new(heap: Arc<GlobalOnlineDescriptorHeap>) -> Self {
        Self {
            heap,
            current_block: None,
            retired_blocks: vec![],
            table_mask: 0,
            table_sizes: [0; MAX_ROOT_PARAMETERS],
            stale_tables: 0,
            tables: vec![StagedTable::default(); MAX_ROOT_PARAMETERS],
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.heap.ty()
    }

    /// Read the table layout of a newly bound root signature, dropping anything staged
    pub fn parse_root_signature(&mut self, root_signature: &RootSignature) {
        self.table_mask = root_signature.descriptor_table_mask(self.heap.ty());
        self.table_sizes = *root_signature.table_sizes();
        self.stale_tables = 0;
        for table in &mut self.tables {
            table.range = None;
            table.bound = false;
            table.handles.clear();
        }
    }

    /// Stage `handles` at `offset` in the table bound at `root_index`
    pub fn set_descriptors(
        &mut self,
        root_index: u32,
        offset: u32,
        handles: &[CpuDescriptorHandle],
    ) {
        assert!(
            (root_index as usize) < MAX_ROOT_PARAMETERS
                && self.table_mask & (1 << root_index) != 0,
            "root parameter {} is not a {:?} descriptor table",
            root_index,
            self.heap.ty()
        );

        let table_size = self.table_sizes[root_index as usize];
        assert_ne!(
            table_size, UNBOUNDED_DESCRIPTOR_COUNT,
            "root parameter {} is an unbounded table, use persistent descriptors",
            root_index
        );
        assert!(
            offset as usize + handles.len() <= table_size as usize,
            "writing {} descriptors at {} overflows table {} of {} descriptors",
            handles.len(),
            offset,
            root_index,
            table_size
        );

        let needs_new_range = {
            let table = &self.tables[root_index as usize];
            table.range.is_none() || table.bound
        };

        let range = if needs_new_range {
            let range = self.allocate(table_size);
            let table = &mut self.tables[root_index as usize];

            // Carry over what was staged before, except slots about to be overwritten
            for (slot, handle) in table.handles.iter().enumerate() {
                let slot = slot as u32;
                let overwritten = slot >= offset && slot < offset + handles.len() as u32;
                if !handle.is_null() && !overwritten {
                    self.heap
                        .copy_descriptor(range.cpu.offset(slot, self.heap.increment()), *handle);
                }
            }

            table.range = Some(range);
            table.bound = false;
            range
        } else {
            match self.tables[root_index as usize].range {
                Some(range) => range,
                None => unreachable!(),
            }
        };

        let table = &mut self.tables[root_index as usize];
        if table.handles.len() < table_size as usize {
            table
                .handles
                .resize(table_size as usize, CpuDescriptorHandle::NULL);
        }

        for (i, handle) in handles.iter().enumerate() {
            let slot = offset + i as u32;
            table.handles[slot as usize] = *handle;
            if !handle.is_null() {
                self.heap
                    .copy_descriptor(range.cpu.offset(slot, self.heap.increment()), *handle);
            }
        }

        self.stale_tables |= 1 << root_index;
    }

    /// Bind every table modified since the last call
    pub fn bind_staged_descriptors(
        &mut self,
        device: &dyn Device,
        command_list: &mut backend::CommandList,
        bind_point: PipelineBindPoint,
    ) {
        let mut stale = self.stale_tables;
        while stale != 0 {
            let root_index = stale.trailing_zeros();
            stale &= stale - 1;

            let table = &mut self.tables[root_index as usize];
            if let Some(range) = table.range {
                device.cmd_set_root_descriptor_table(command_list, bind_point, root_index, range.gpu);
                table.bound = true;
            }
        }

        self.stale_tables = 0;
    }

    /// Contiguous shader visible descriptors valid until the context is submitted
    pub fn allocate(&mut self, count: u32) -> DescriptorHandle {
        assert!(
            count <= self.heap.block_size(),
            "{} descriptors don't fit in a block of {}",
            count,
            self.heap.block_size()
        );

        let fits = matches!(&self.current_block, Some(block) if block.remaining() >= count);
        if !fits {
            if let Some(block) = self.current_block.take() {
                self.retired_blocks.push(block);
            }
            self.current_block = Some(self.heap.allocate_block());
        }

        match &mut self.current_block {
            Some(block) => {
                let handle = block.start.offset(block.offset, self.heap.increment());
                block.offset += count;
                handle
            }
            None => unreachable!(),
        }
    }

    /// Copy a single descriptor into a range only valid for this submission
    pub fn allocate_transient(&mut self, src: CpuDescriptorHandle) -> DescriptorHandle {
        let handle = self.allocate(1);
        self.heap.copy_descriptor(handle.cpu, src);
        handle
    }

    /// Give every block used so far back to the global heap, reusable once `fence_value` completes
    pub fn release_used_heaps(&mut self, fence_value: u64) {
        for block in self
            .retired_blocks
            .drain(..)
            .chain(self.current_block.take())
        {
            self.heap.release_block(block, fence_value);
        }

        self.stale_tables = 0;
        for table in &mut self.tables {
            table.range = None;
            table.bound = false;
            table.handles.clear();
        }
    }

    pub fn heap(&self) -> &Arc<GlobalOnlineDescriptorHeap> {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::global_online::GlobalOnlineDescriptorHeap;
    use crate::descriptor::online::OnlineDescriptorAllocator;
    use crate::fence::{Fence, QueueFences};
    use crate::root_signature::RootSignature;
    use std::sync::Arc;
    use ze_gfx::backend::{
        ConstantBufferViewDesc, CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType,
        DescriptorRange, DescriptorRangeType, Device, PipelineBindPoint, QueueType,
        RootParameter, RootSignatureDesc, ShaderVisibility, DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    use ze_gfx::null::{Command, NullDescriptor, NullDevice};

    struct Fixture {
        null: Arc<NullDevice>,
        allocator: OnlineDescriptorAllocator,
        sources: Vec<CpuDescriptorHandle>,
    }

    fn fixture() -> Fixture {
        let null = Arc::new(NullDevice::new());
        let device: Arc<dyn Device> = null.clone();
        let frame_fence =
            Arc::new(Fence::new(device.clone(), QueueType::Direct, "Frame", None).unwrap());
        let queue_fences = Arc::new(QueueFences::new(&device, None).unwrap());
        let heap = Arc::new(
            GlobalOnlineDescriptorHeap::with_layout(
                device.clone(),
                DescriptorHeapType::View,
                0,
                128,
                32,
                frame_fence,
                queue_fences,
            )
            .unwrap(),
        );

        let root_signature = RootSignature::new(
            &*device,
            RootSignatureDesc {
                parameters: vec![
                    RootParameter::ConstantBufferView {
                        shader_register: 0,
                        register_space: 0,
                        visibility: ShaderVisibility::All,
                    },
                    RootParameter::DescriptorTable {
                        ranges: vec![DescriptorRange {
                            ty: DescriptorRangeType::Srv,
                            num_descriptors: 4,
                            base_shader_register: 0,
                            register_space: 0,
                            offset_in_descriptors_from_table_start: DESCRIPTOR_RANGE_OFFSET_APPEND,
                        }],
                        visibility: ShaderVisibility::All,
                    },
                ],
                ..Default::default()
            },
            "Test",
        )
        .unwrap();

        // Distinct CBVs to tell descriptors apart
        let cpu_heap = device
            .create_descriptor_heap(
                &DescriptorHeapDesc {
                    ty: DescriptorHeapType::View,
                    count: 4,
                    shader_visible: false,
                },
                "",
            )
            .unwrap();
        let start = device.descriptor_heap_cpu_start(&cpu_heap);
        let increment = device.descriptor_increment_size(DescriptorHeapType::View);
        let sources = (0..4)
            .map(|i| {
                let handle = start.offset(i, increment);
                device.create_constant_buffer_view(
                    &ConstantBufferViewDesc {
                        buffer_location: 256 * (i as u64 + 1),
                        size_in_bytes: 256,
                    },
                    handle,
                );
                handle
            })
            .collect();

        let mut allocator = OnlineDescriptorAllocator::new(heap);
        allocator.parse_root_signature(&root_signature);
        Fixture {
            null,
            allocator,
            sources,
        }
    }

    fn bound_tables(
        null: &NullDevice,
        mut f: impl FnMut(&mut ze_gfx::backend::CommandList),
    ) -> Vec<Command> {
        let allocator = null.create_command_allocator(QueueType::Direct).unwrap();
        let mut list = null
            .create_command_list(QueueType::Direct, &allocator, "")
            .unwrap();
        f(&mut list);
        null.close_command_list(&mut list).unwrap();
        let queue = null.create_queue(QueueType::Direct, "").unwrap();
        null.queue_execute(&queue, &[&list]);
        null.executed_commands(QueueType::Direct)
    }

    #[test]
    fn staged_descriptors_are_copied_at_offset() {
        let mut f = fixture();
        f.allocator.set_descriptors(1, 1, &f.sources[0..2]);

        let null = f.null.clone();
        let allocator = &mut f.allocator;
        let commands = bound_tables(&null, |list| {
            allocator.bind_staged_descriptors(&*null, list, PipelineBindPoint::Graphics)
        });

        let base = match &commands[..] {
            [Command::SetRootDescriptorTable {
                root_index: 1,
                base,
                ..
            }] => *base,
            commands => panic!("unexpected commands {:?}", commands),
        };

        let increment = null.descriptor_increment_size(DescriptorHeapType::View);
        for i in 0..2 {
            assert_eq!(
                null.descriptor_at_gpu(base.offset(1 + i, increment)),
                null.descriptor(f.sources[i as usize])
            );
        }
        assert!(matches!(
            null.descriptor_at_gpu(base.offset(1, increment)),
            Some(NullDescriptor::ConstantBufferView(_))
        ));
    }

    #[test]
    fn writes_after_bind_use_a_new_range() {
        let mut f = fixture();
        f.allocator.set_descriptors(1, 0, &f.sources[0..1]);

        let null = f.null.clone();
        let allocator = &mut f.allocator;
        let commands = bound_tables(&null, |list| {
            allocator.bind_staged_descriptors(&*null, list, PipelineBindPoint::Compute);
            allocator.set_descriptors(1, 2, &f.sources[2..3]);
            allocator.bind_staged_descriptors(&*null, list, PipelineBindPoint::Compute);
        });

        let bases: Vec<_> = commands
            .iter()
            .filter_map(|command| match command {
                Command::SetRootDescriptorTable { base, .. } => Some(*base),
                _ => None,
            })
            .collect();
        assert_eq!(bases.len(), 2);
        assert_ne!(bases[0], bases[1]);

        // The second range still holds the first descriptor
        let increment = null.descriptor_increment_size(DescriptorHeapType::View);
        assert_eq!(null.descriptor_at_gpu(bases[1]), null.descriptor(f.sources[0]));
        assert_eq!(
            null.descriptor_at_gpu(bases[1].offset(2, increment)),
            null.descriptor(f.sources[2])
        );
    }

    #[test]
    #[should_panic(expected = "overflows table")]
    fn table_overflow_panics() {
        let mut f = fixture();
        let handles = f.sources.clone();
        f.allocator.set_descriptors(1, 1, &handles);
    }

    #[test]
    #[should_panic(expected = "is not a")]
    fn non_table_parameter_panics() {
        let mut f = fixture();
        let handles = f.sources.clone();
        f.allocator.set_descriptors(0, 0, &handles[0..1]);
    }

    #[test]
    fn allocations_spill_to_new_blocks() {
        let mut f = fixture();
        let first = f.allocator.allocate(30);
        let second = f.allocator.allocate(4);
        assert_ne!(
            first.cpu.offset(30, f.null.descriptor_increment_size(DescriptorHeapType::View)),
            second.cpu
        );
        f.allocator.release_used_heaps(0);
    }
}
