use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use ze_core::ze_verbose;
use ze_gfx::backend;
use ze_gfx::backend::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType, Device, DeviceError,
};

pub const DESCRIPTORS_PER_PAGE: u32 = 256;

/// Half-open range `[start, end)` of free descriptor indices
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FreeRange {
    start: u32,
    end: u32,
}

struct Page {
    _heap: backend::DescriptorHeap,
    cpu_start: CpuDescriptorHandle,

    /// Sorted, never adjacent
    free_ranges: Vec<FreeRange>,
}

#[derive(Default)]
struct State {
    pages: Vec<Page>,
    pages_with_free_space: BTreeSet<usize>,
}

/// Hands out single descriptors from CPU-only heaps created on demand in pages of
/// [`DESCRIPTORS_PER_PAGE`]
pub struct OfflineDescriptorAllocator {
    device: Arc<dyn Device>,
    ty: DescriptorHeapType,
    increment: u32,
    state: Mutex<State>,
}

impl OfflineDescriptorAllocator {
    pub fn new(device: Arc<dyn Device>, ty: DescriptorHeapType) -> Self {
        let increment = device.descriptor_increment_size(ty);
        Self {
            device,
            ty,
            increment,
            state: Mutex::new(State::default()),
        }
    }

    pub fn allocate(&self) -> Result<CpuDescriptorHandle, DeviceError> {
        let mut state = self.state.lock();

        let page_index = match state.pages_with_free_space.iter().next() {
            Some(index) => *index,
            None => {
                let heap = self.device.create_descriptor_heap(
                    &DescriptorHeapDesc {
                        ty: self.ty,
                        count: DESCRIPTORS_PER_PAGE,
                        shader_visible: false,
                    },
                    &format!("Offline {:?} Descriptor Page", self.ty),
                )?;
                let cpu_start = self.device.descriptor_heap_cpu_start(&heap);
                ze_verbose!(
                    "New offline {:?} descriptor page ({} pages)",
                    self.ty,
                    state.pages.len() + 1
                );

                state.pages.push(Page {
                    _heap: heap,
                    cpu_start,
                    free_ranges: vec![FreeRange {
                        start: 0,
                        end: DESCRIPTORS_PER_PAGE,
                    }],
                });
                let index = state.pages.len() - 1;
                state.pages_with_free_space.insert(index);
                index
            }
        };

        let page = &mut state.pages[page_index];
        let range = &mut page.free_ranges[0];
        let index = range.start;
        range.start += 1;
        if range.start == range.end {
            page.free_ranges.remove(0);
        }

        let cpu_start = page.cpu_start;
        if page.free_ranges.is_empty() {
            state.pages_with_free_space.remove(&page_index);
        }

        Ok(cpu_start.offset(index, self.increment))
    }

    /// Allocate a descriptor released automatically when dropped
    pub fn allocate_owned(self: &Arc<Self>) -> Result<OfflineDescriptor, DeviceError> {
        Ok(OfflineDescriptor {
            handle: self.allocate()?,
            allocator: self.clone(),
        })
    }

    pub fn free(&self, handle: CpuDescriptorHandle) {
        let mut state = self.state.lock();
        let page_size = DESCRIPTORS_PER_PAGE as usize * self.increment as usize;
        let page_index = state
            .pages
            .iter()
            .position(|page| {
                handle.0 >= page.cpu_start.0 && handle.0 < page.cpu_start.0 + page_size
            })
            .unwrap_or_else(|| panic!("descriptor {:?} was not allocated here", handle));

        let page = &mut state.pages[page_index];
        let index = ((handle.0 - page.cpu_start.0) / self.increment as usize) as u32;
        let position = page
            .free_ranges
            .iter()
            .position(|range| range.start > index)
            .unwrap_or(page.free_ranges.len());

        debug_assert!(
            position == 0 || page.free_ranges[position - 1].end <= index,
            "descriptor {} freed twice",
            index
        );

        let merges_previous = position > 0 && page.free_ranges[position - 1].end == index;
        let merges_next =
            position < page.free_ranges.len() && page.free_ranges[position].start == index + 1;

        match (merges_previous, merges_next) {
            (true, true) => {
                page.free_ranges[position - 1].end = page.free_ranges[position].end;
                page.free_ranges.remove(position);
            }
            (true, false) => page.free_ranges[position - 1].end += 1,
            (false, true) => page.free_ranges[position].start = index,
            (false, false) => page.free_ranges.insert(
                position,
                FreeRange {
                    start: index,
                    end: index + 1,
                },
            ),
        }

        state.pages_with_free_space.insert(page_index);
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Number of free ranges of `page`, exposed for tests
    #[cfg(test)]
    fn free_range_count(&self, page: usize) -> usize {
        self.state.lock().pages[page].free_ranges.len()
    }
}

/// A descriptor returned to its allocator when dropped
pub struct OfflineDescriptor {
    handle: CpuDescriptorHandle,
    allocator: Arc<OfflineDescriptorAllocator>,
}

impl OfflineDescriptor {
    pub fn handle(&self) -> CpuDescriptorHandle {
        self.handle
    }
}

impl Drop for OfflineDescriptor {
    fn drop(&mut self) {
        self.allocator.free(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::offline::{OfflineDescriptorAllocator, DESCRIPTORS_PER_PAGE};
    use std::sync::Arc;
    use ze_gfx::backend::DescriptorHeapType;
    use ze_gfx::null::NullDevice;

    #[test]
    fn pages_are_created_on_demand() {
        let allocator =
            OfflineDescriptorAllocator::new(Arc::new(NullDevice::new()), DescriptorHeapType::Rtv);
        let handles: Vec<_> = (0..DESCRIPTORS_PER_PAGE + 1)
            .map(|_| allocator.allocate().unwrap())
            .collect();
        assert_eq!(allocator.page_count(), 2);

        // Freeing in the first page makes it the preferred page again
        allocator.free(handles[10]);
        assert_eq!(allocator.allocate().unwrap(), handles[10]);
    }

    #[test]
    fn free_ranges_merge() {
        let allocator =
            OfflineDescriptorAllocator::new(Arc::new(NullDevice::new()), DescriptorHeapType::View);
        let handles: Vec<_> = (0..8).map(|_| allocator.allocate().unwrap()).collect();
        assert_eq!(allocator.free_range_count(0), 1);

        allocator.free(handles[2]);
        allocator.free(handles[4]);
        assert_eq!(allocator.free_range_count(0), 3);

        // Bridges [2, 3) and [4, 5)
        allocator.free(handles[3]);
        assert_eq!(allocator.free_range_count(0), 2);

        allocator.free(handles[7]);
        assert_eq!(allocator.free_range_count(0), 2);

        assert_eq!(allocator.allocate().unwrap(), handles[2]);
    }

    #[test]
    fn owned_descriptors_free_on_drop() {
        let allocator = Arc::new(OfflineDescriptorAllocator::new(
            Arc::new(NullDevice::new()),
            DescriptorHeapType::Dsv,
        ));
        let first = allocator.allocate_owned().unwrap();
        let handle = first.handle();
        drop(first);
        assert_eq!(allocator.allocate().unwrap(), handle);
    }
}
