use crate::fence::QueueFences;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;
use ze_core::{ze_verbose, ze_warn};
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, HeapType, ResourceDesc, ResourceFlags, ResourceStates};
use ze_gfx::utils::align_up;

pub const DEFAULT_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// CPU pointer into persistently mapped upload memory
#[derive(Copy, Clone, Debug)]
struct MappedPtr(NonNull<u8>);

// Upload memory is only written through allocations, which never overlap
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    fn new(ptr: *mut u8) -> Result<Self, DeviceError> {
        NonNull::new(ptr).map(Self).ok_or(DeviceError::Unknown)
    }

    /// # Safety
    /// `offset` must be inside the mapping
    unsafe fn add(self, offset: u64) -> Self {
        Self(NonNull::new_unchecked(self.0.as_ptr().add(offset as usize)))
    }
}

/// An upload resource mapped for its whole lifetime
pub struct UploadPage {
    resource: Arc<backend::Resource>,
    cpu: MappedPtr,
    gpu_address: u64,
    size: u64,

    /// Bumped every time the page is handed back, outdating the allocations made from it.
    /// Writes hold the lock so a stale allocation can never race a fresh one.
    generation: Arc<Mutex<u64>>,
}

impl UploadPage {
    fn new(device: &dyn Device, size: u64, name: &str) -> Result<Self, DeviceError> {
        let resource = device.create_committed_resource(
            &ResourceDesc::buffer(size, ResourceFlags::empty()),
            HeapType::Upload,
            ResourceStates::GENERIC_READ,
            None,
            name,
        )?;
        let cpu = MappedPtr::new(device.map_resource(&resource)?)?;
        let gpu_address = device.resource_gpu_address(&resource);

        Ok(Self {
            resource: Arc::new(resource),
            cpu,
            gpu_address,
            size,
            generation: Arc::new(Mutex::new(0)),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn retire(&self) {
        *self.generation.lock() += 1;
    }
}

/// A slice of upload memory valid until the context that allocated it is submitted.
///
/// Once the context hands its pages back the allocation is stale: [`DynamicAllocation::write`]
/// panics and the memory may already belong to another allocation.
pub struct DynamicAllocation {
    resource: Arc<backend::Resource>,
    offset: u64,
    size: u64,
    cpu: MappedPtr,
    gpu_address: u64,
    page_generation: Arc<Mutex<u64>>,
    generation: u64,
}

impl DynamicAllocation {
    fn new(page: &UploadPage, offset: u64, size: u64) -> Self {
        debug_assert!(offset + size <= page.size);
        Self {
            resource: page.resource.clone(),
            offset,
            size,
            // SAFETY: checked above, the range is inside the page
            cpu: unsafe { page.cpu.add(offset) },
            gpu_address: page.gpu_address + offset,
            page_generation: page.generation.clone(),
            generation: *page.generation.lock(),
        }
    }

    /// The page has not been handed back since this allocation was made
    pub fn is_live(&self) -> bool {
        *self.page_generation.lock() == self.generation
    }

    /// The upload resource holding this allocation
    pub fn resource(&self) -> &backend::Resource {
        &self.resource
    }

    /// Offset of the allocation inside [`DynamicAllocation::resource`]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Start of the mapped range, only valid to write while [`DynamicAllocation::is_live`]
    pub fn cpu_ptr(&self) -> *mut u8 {
        self.cpu.0.as_ptr()
    }

    /// Copy `data` at `offset` bytes from the start of the allocation
    pub fn write(&mut self, offset: u64, data: &[u8]) {
        assert!(
            offset + data.len() as u64 <= self.size,
            "writing {} bytes at {} overflows a {} bytes allocation",
            data.len(),
            offset,
            self.size
        );

        let generation = self.page_generation.lock();
        assert_eq!(
            *generation, self.generation,
            "upload allocation written after its context was submitted"
        );

        // SAFETY: bounds checked above, the page is still owned by the allocating context and
        // live allocations never overlap
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.cpu.0.as_ptr().add(offset as usize),
                data.len(),
            );
        }
    }

    /// # Safety
    /// The slice must not be used after the allocating context is submitted or reset, the
    /// page is then recycled for other allocations.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(self.is_live(), "upload allocation used after its context was submitted");
        std::slice::from_raw_parts_mut(self.cpu.0.as_ptr(), self.size as usize)
    }
}

struct ManagerState {
    available_pages: Vec<UploadPage>,

    /// Pages waiting for the submission that used them, tagged fence values
    retired_pages: Vec<(u64, UploadPage)>,

    /// Oversized pages waiting to be destroyed
    retired_large_pages: Vec<(u64, UploadPage)>,
    page_count: usize,
}

/// Owns every upload page and recycles them once their submission completes
pub struct DynamicAllocationManager {
    device: Arc<dyn Device>,
    page_size: u64,
    queue_fences: Arc<QueueFences>,
    state: Mutex<ManagerState>,
}

impl DynamicAllocationManager {
    pub fn new(device: Arc<dyn Device>, page_size: u64, queue_fences: Arc<QueueFences>) -> Self {
        Self {
            device,
            page_size,
            queue_fences,
            state: Mutex::new(ManagerState {
                available_pages: vec![],
                retired_pages: vec![],
                retired_large_pages: vec![],
                page_count: 0,
            }),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of regular pages created so far
    pub fn page_count(&self) -> usize {
        self.state.lock().page_count
    }

    pub fn request_page(&self) -> Result<UploadPage, DeviceError> {
        let mut state = self.state.lock();
        self.collect_completed(&mut state);

        if let Some(page) = state.available_pages.pop() {
            return Ok(page);
        }
        drop(state);

        let page = UploadPage::new(&*self.device, self.page_size, "Upload Page")?;
        let page_count = {
            let mut state = self.state.lock();
            state.page_count += 1;
            state.page_count
        };
        ze_verbose!(
            "New upload page of {} bytes ({} pages)",
            self.page_size,
            page_count
        );
        Ok(page)
    }

    /// A page dedicated to one allocation bigger than the page size, never recycled
    pub fn request_large_page(&self, size: u64) -> Result<UploadPage, DeviceError> {
        ze_warn!(
            "Allocating a dedicated {} bytes upload page, above the {} bytes page size",
            size,
            self.page_size
        );
        UploadPage::new(&*self.device, size, "Large Upload Page")
    }

    /// Hand pages back, they are reused (or destroyed for large pages) once `fence_value` completes
    pub fn free_pages(&self, fence_value: u64, pages: Vec<UploadPage>, large_pages: Vec<UploadPage>) {
        let mut state = self.state.lock();
        state
            .retired_pages
            .extend(pages.into_iter().map(|page| (fence_value, page)));
        state
            .retired_large_pages
            .extend(large_pages.into_iter().map(|page| (fence_value, page)));
    }

    fn collect_completed(&self, state: &mut ManagerState) {
        let mut index = 0;
        while index < state.retired_pages.len() {
            if self.queue_fences.is_complete(state.retired_pages[index].0) {
                let (_, page) = state.retired_pages.swap_remove(index);
                state.available_pages.push(page);
            } else {
                index += 1;
            }
        }

        let queue_fences = &self.queue_fences;
        state
            .retired_large_pages
            .retain(|(fence_value, _)| !queue_fences.is_complete(*fence_value));
    }
}

/// Linear allocator over upload pages, owned by a single command context
pub struct DynamicResourceAllocator {
    manager: Arc<DynamicAllocationManager>,
    current_page: Option<UploadPage>,
    current_offset: u64,
    retired_pages: Vec<UploadPage>,
    large_pages: Vec<UploadPage>,
}

impl DynamicResourceAllocator {
    pub fn new(manager: Arc<DynamicAllocationManager>) -> Self {
        Self {
            manager,
            current_page: None,
            current_offset: 0,
            retired_pages: vec![],
            large_pages: vec![],
        }
    }

    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<DynamicAllocation, DeviceError> {
        let size = align_up(size.max(1), alignment);
        let page_size = self.manager.page_size();

        if size > page_size {
            let page = self.manager.request_large_page(size)?;
            let allocation = DynamicAllocation::new(&page, 0, size);
            self.large_pages.push(page);
            return Ok(allocation);
        }

        let offset = align_up(self.current_offset, alignment);
        let fits = matches!(&self.current_page, Some(page) if offset + size <= page.size);
        let offset = if fits {
            offset
        } else {
            if let Some(page) = self.current_page.take() {
                self.retired_pages.push(page);
            }
            self.current_page = Some(self.manager.request_page()?);
            0
        };

        match &self.current_page {
            Some(page) => {
                self.current_offset = offset + size;
                Ok(DynamicAllocation::new(page, offset, size))
            }
            None => unreachable!(),
        }
    }

    /// Return every page to the manager, reusable once `fence_value` completes
    pub fn free(&mut self, fence_value: u64) {
        let mut pages: Vec<_> = self.retired_pages.drain(..).collect();
        pages.extend(self.current_page.take());
        self.current_offset = 0;

        let large_pages = std::mem::take(&mut self.large_pages);
        for page in pages.iter().chain(large_pages.iter()) {
            page.retire();
        }
        self.manager.free_pages(fence_value, pages, large_pages);
    }
}

#[cfg(test)]
mod tests {
    use crate::dynamic_allocator::{DynamicAllocationManager, DynamicResourceAllocator};
    use crate::fence::QueueFences;
    use std::sync::Arc;
    use ze_gfx::backend::{Device, QueueType};
    use ze_gfx::null::NullDevice;

    const PAGE_SIZE: u64 = 4096;

    fn manager(null: &Arc<NullDevice>) -> (Arc<DynamicAllocationManager>, Arc<QueueFences>) {
        let device: Arc<dyn Device> = null.clone();
        let fences = Arc::new(QueueFences::new(&device, None).unwrap());
        (
            Arc::new(DynamicAllocationManager::new(device, PAGE_SIZE, fences.clone())),
            fences,
        )
    }

    #[test]
    fn allocations_are_aligned() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        let first = allocator.allocate(10, 16).unwrap();
        let second = allocator.allocate(100, 256).unwrap();
        assert_eq!(first.offset(), 0);
        assert_eq!(first.size(), 16);
        assert_eq!(second.offset(), 256);
        assert_eq!(second.gpu_address() - first.gpu_address(), 256);
        assert_eq!(manager.page_count(), 1);
    }

    #[test]
    fn exact_page_size_fits_a_regular_page() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        let _small = allocator.allocate(16, 16).unwrap();
        let full = allocator.allocate(PAGE_SIZE, 16).unwrap();
        assert_eq!(full.offset(), 0);
        assert_eq!(manager.page_count(), 2);

        let large = allocator.allocate(PAGE_SIZE + 1, 16).unwrap();
        assert_eq!(large.offset(), 0);
        assert_eq!(large.size(), PAGE_SIZE + 16);
        assert_eq!(manager.page_count(), 2);
    }

    #[test]
    fn pages_recycle_after_fence() {
        let null = Arc::new(NullDevice::new());
        null.set_auto_complete(false);
        let (manager, fences) = manager(&null);
        let queue = null.create_queue(QueueType::Copy, "Copy").unwrap();
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        let mut allocation = allocator.allocate(64, 4).unwrap();
        allocation.write(0, &[1, 2, 3, 4]);
        assert_eq!(&null.read_buffer(allocation.resource())[0..4], &[1, 2, 3, 4]);

        let fence_value = fences.fence(QueueType::Copy).signal(&queue);
        allocator.free(fence_value);

        // Still in flight, a new page is needed
        allocator.allocate(64, 4).unwrap();
        assert_eq!(manager.page_count(), 2);
        allocator.free(fence_value);

        null.complete_all_fences();
        allocator.allocate(64, 4).unwrap();
        assert_eq!(manager.page_count(), 2);
    }

    #[test]
    fn stale_allocations_are_detected() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        let stale = allocator.allocate(64, 4).unwrap();
        assert!(stale.is_live());
        allocator.free(0);
        assert!(!stale.is_live());

        // Same bytes, handed to a new allocation
        let mut fresh = allocator.allocate(64, 4).unwrap();
        assert_eq!(fresh.cpu_ptr(), stale.cpu_ptr());
        assert!(fresh.is_live());
        fresh.write(0, &[7; 4]);
        assert_eq!(&null.read_buffer(fresh.resource())[0..4], &[7; 4]);
    }

    #[test]
    #[should_panic(expected = "after its context was submitted")]
    fn writing_a_stale_allocation_panics() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager);

        let mut stale = allocator.allocate(64, 4).unwrap();
        allocator.free(0);
        let _fresh = allocator.allocate(64, 4).unwrap();
        stale.write(0, &[42]);
    }

    #[test]
    fn failed_page_creation_is_not_counted() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        null.fail_next_resource_creation();
        assert!(allocator.allocate(16, 16).is_err());
        assert_eq!(manager.page_count(), 0);

        allocator.allocate(16, 16).unwrap();
        assert_eq!(manager.page_count(), 1);
    }

    #[test]
    fn large_pages_are_released() {
        let null = Arc::new(NullDevice::new());
        let (manager, _) = manager(&null);
        let mut allocator = DynamicResourceAllocator::new(manager.clone());

        drop(allocator.allocate(PAGE_SIZE * 2, 256).unwrap());
        assert_eq!(null.live_resource_count(), 1);
        allocator.free(0);

        // The next request sweeps completed large pages
        allocator.allocate(16, 16).unwrap();
        assert_eq!(null.live_resource_count(), 1);
    }
}
