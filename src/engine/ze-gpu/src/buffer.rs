use crate::descriptor::ResourceView;
use crate::device::GraphicsDevice;
use crate::resource::{AsGraphicsResource, GraphicsResource, ReleasePolicy, ShaderResource};
use enumflags2::{bitflags, BitFlags};
use std::ptr::NonNull;
use std::sync::Arc;
use ze_gfx::backend::{
    DescriptorHeapType, DeviceError, HeapType, IndexBufferFormat, IndexBufferView,
    ResourceDesc, ResourceFlagBits, ResourceFlags, ResourceStates, ShaderResourceViewDesc,
    ShaderResourceViewDimension, UnorderedAccessViewDesc, UnorderedAccessViewDimension,
    VertexBufferView,
};
use ze_gfx::PixelFormat;

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BufferFlag {
    ShaderResource = 1 << 0,
    UnorderedAccess = 1 << 1,

    /// Elements are `element_size` bytes structures
    Structured = 1 << 2,

    /// Viewed as raw 32-bit words
    ByteAddress = 1 << 3,

    /// CPU writable, GPU readable
    Upload = 1 << 4,

    /// GPU writable, CPU readable
    Readback = 1 << 5,
    AccelerationStructure = 1 << 6,

    /// Source of indirect draw and dispatch arguments
    IndirectArguments = 1 << 7,
}
pub type BufferFlags = BitFlags<BufferFlag>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub element_size: u32,
    pub element_count: u32,

    /// Element format of typed views
    pub format: PixelFormat,
    pub flags: BufferFlags,
}

impl BufferDesc {
    pub fn structured(element_size: u32, element_count: u32, flags: BufferFlags) -> Self {
        Self {
            element_size,
            element_count,
            format: PixelFormat::Unknown,
            flags: flags | BufferFlag::Structured,
        }
    }

    pub fn byte_address(size: u32, flags: BufferFlags) -> Self {
        Self {
            element_size: 4,
            element_count: (size + 3) / 4,
            format: PixelFormat::Unknown,
            flags: flags | BufferFlag::ByteAddress,
        }
    }

    pub fn typed(format: PixelFormat, element_count: u32, flags: BufferFlags) -> Self {
        Self {
            element_size: format.bytes_size() as u32,
            element_count,
            format,
            flags,
        }
    }

    pub fn upload(size: u32) -> Self {
        Self {
            element_size: 1,
            element_count: size,
            format: PixelFormat::Unknown,
            flags: BufferFlag::Upload.into(),
        }
    }

    pub fn readback(size: u32) -> Self {
        Self {
            element_size: 1,
            element_count: size,
            format: PixelFormat::Unknown,
            flags: BufferFlag::Readback.into(),
        }
    }

    pub fn acceleration_structure(size: u32) -> Self {
        Self {
            element_size: 1,
            element_count: size,
            format: PixelFormat::Unknown,
            flags: BufferFlag::AccelerationStructure | BufferFlag::ShaderResource,
        }
    }

    pub fn size(&self) -> u64 {
        self.element_size as u64 * self.element_count as u64
    }

    fn validate(&self) {
        assert!(self.size() > 0, "buffers cannot be empty");
        assert!(
            !(self.flags.contains(BufferFlag::Upload) && self.flags.contains(BufferFlag::Readback)),
            "a buffer is either an upload or a readback buffer"
        );
        assert!(
            !(self.flags.contains(BufferFlag::Structured)
                && self.flags.contains(BufferFlag::ByteAddress)),
            "a buffer cannot be both structured and byte address"
        );
        assert!(
            !(self.is_cpu_visible() && self.flags.contains(BufferFlag::UnorderedAccess)),
            "CPU visible buffers cannot have unordered access"
        );
        assert!(
            !self.flags.contains(BufferFlag::AccelerationStructure)
                || !self.is_cpu_visible(),
            "acceleration structures live in GPU memory"
        );
    }

    fn is_cpu_visible(&self) -> bool {
        self.flags
            .intersects(BufferFlag::Upload | BufferFlag::Readback)
    }

    fn heap_type(&self) -> HeapType {
        if self.flags.contains(BufferFlag::Upload) {
            HeapType::Upload
        } else if self.flags.contains(BufferFlag::Readback) {
            HeapType::Readback
        } else {
            HeapType::Default
        }
    }

    fn initial_state(&self) -> ResourceStates {
        match self.heap_type() {
            HeapType::Upload => ResourceStates::GENERIC_READ,
            HeapType::Readback => ResourceStates::COPY_DEST,
            HeapType::Default if self.flags.contains(BufferFlag::AccelerationStructure) => {
                ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE
            }
            HeapType::Default => ResourceStates::COMMON,
        }
    }

    fn resource_flags(&self) -> ResourceFlags {
        let mut flags = ResourceFlags::empty();
        if self
            .flags
            .intersects(BufferFlag::UnorderedAccess | BufferFlag::AccelerationStructure)
        {
            flags |= ResourceFlagBits::AllowUnorderedAccess;
        }
        if self.flags.contains(BufferFlag::AccelerationStructure) {
            flags |= ResourceFlagBits::RaytracingAccelerationStructure;
        }
        flags
    }
}

#[derive(Copy, Clone)]
struct MappedMemory(NonNull<u8>);

// The mapping lives as long as the resource, writes are synchronized by the caller
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

pub struct Buffer {
    resource: Arc<GraphicsResource>,
    desc: BufferDesc,
    mapped: Option<MappedMemory>,
    srv: Option<ResourceView>,
    uav: Option<ResourceView>,
}

impl Buffer {
    pub fn new(device: &GraphicsDevice, desc: BufferDesc, name: &str) -> Result<Self, DeviceError> {
        desc.validate();

        let raw_device = device.raw();
        let resource_desc = ResourceDesc::buffer(desc.size(), desc.resource_flags());
        let heap_type = desc.heap_type();
        let initial_state = desc.initial_state();
        let raw = raw_device.create_committed_resource(
            &resource_desc,
            heap_type,
            initial_state,
            None,
            name,
        )?;

        let mapped = if desc.is_cpu_visible() {
            let ptr = raw_device.map_resource(&raw)?;
            Some(MappedMemory(NonNull::new(ptr).ok_or(DeviceError::Unknown)?))
        } else {
            None
        };

        let gpu_address = raw_device.resource_gpu_address(&raw);
        let resource = Arc::new(GraphicsResource::new(
            raw,
            resource_desc,
            heap_type,
            initial_state,
            gpu_address,
            name,
            ReleasePolicy::DeletionQueue(device.deferred_delete_queue().clone()),
        ));

        let view_heap = device.online_heap(DescriptorHeapType::View);
        let offline = device.offline_allocator(DescriptorHeapType::View);

        let srv = if desc.flags.contains(BufferFlag::ShaderResource) {
            let srv_desc = Self::srv_desc(&desc, gpu_address);
            let is_acceleration_structure = desc.flags.contains(BufferFlag::AccelerationStructure);
            Some(ResourceView::new(offline, Some(view_heap), |handle| {
                // Acceleration structures are located through the view, not a resource
                let view_resource = (!is_acceleration_structure).then(|| resource.raw());
                raw_device.create_shader_resource_view(view_resource, &srv_desc, handle)
            })?)
        } else {
            None
        };

        let uav = if desc.flags.contains(BufferFlag::UnorderedAccess) {
            let uav_desc = Self::uav_desc(&desc);
            Some(ResourceView::new(offline, Some(view_heap), |handle| {
                raw_device.create_unordered_access_view(resource.raw(), None, &uav_desc, handle)
            })?)
        } else {
            None
        };

        Ok(Self {
            resource,
            desc,
            mapped,
            srv,
            uav,
        })
    }

    fn srv_desc(desc: &BufferDesc, gpu_address: u64) -> ShaderResourceViewDesc {
        if desc.flags.contains(BufferFlag::AccelerationStructure) {
            return ShaderResourceViewDesc {
                format: PixelFormat::Unknown,
                dimension: ShaderResourceViewDimension::RaytracingAccelerationStructure {
                    location: gpu_address,
                },
            };
        }

        let (format, num_elements, structure_byte_stride, raw) = Self::view_layout(desc);
        ShaderResourceViewDesc {
            format,
            dimension: ShaderResourceViewDimension::Buffer {
                first_element: 0,
                num_elements,
                structure_byte_stride,
                raw,
            },
        }
    }

    fn uav_desc(desc: &BufferDesc) -> UnorderedAccessViewDesc {
        let (format, num_elements, structure_byte_stride, raw) = Self::view_layout(desc);
        UnorderedAccessViewDesc {
            format,
            dimension: UnorderedAccessViewDimension::Buffer {
                first_element: 0,
                num_elements,
                structure_byte_stride,
                counter_offset_in_bytes: 0,
                raw,
            },
        }
    }

    /// `(format, element count, structure stride, raw)` of a buffer view
    fn view_layout(desc: &BufferDesc) -> (PixelFormat, u32, u32, bool) {
        if desc.flags.contains(BufferFlag::Structured) {
            (PixelFormat::Unknown, desc.element_count, desc.element_size, false)
        } else if desc.flags.contains(BufferFlag::ByteAddress) {
            (PixelFormat::R32Typeless, (desc.size() / 4) as u32, 0, true)
        } else {
            (desc.format, desc.element_count, 0, false)
        }
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn size(&self) -> u64 {
        self.desc.size()
    }

    pub fn gpu_address(&self) -> u64 {
        self.resource.gpu_address()
    }

    pub fn srv(&self) -> Option<&ResourceView> {
        self.srv.as_ref()
    }

    pub fn uav(&self) -> Option<&ResourceView> {
        self.uav.as_ref()
    }

    pub fn bindless_srv(&self) -> Option<u32> {
        self.srv.as_ref().and_then(ResourceView::bindless_index)
    }

    pub fn bindless_uav(&self) -> Option<u32> {
        self.uav.as_ref().and_then(ResourceView::bindless_index)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Write into an upload buffer. The GPU must not be reading the range.
    pub fn write(&self, offset: u64, data: &[u8]) {
        let mapped = self
            .mapped
            .unwrap_or_else(|| panic!("buffer {} is not CPU visible", self.resource.name()));
        assert!(
            offset + data.len() as u64 <= self.size(),
            "write of {} bytes at {} overflows buffer {}",
            data.len(),
            offset,
            self.resource.name()
        );

        // SAFETY: bounds checked above
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.0.as_ptr().add(offset as usize),
                data.len(),
            );
        }
    }

    /// Read from a readback or upload buffer. The GPU must be done writing the range.
    pub fn read(&self, offset: u64, out: &mut [u8]) {
        let mapped = self
            .mapped
            .unwrap_or_else(|| panic!("buffer {} is not CPU visible", self.resource.name()));
        assert!(
            offset + out.len() as u64 <= self.size(),
            "read of {} bytes at {} overflows buffer {}",
            out.len(),
            offset,
            self.resource.name()
        );

        // SAFETY: bounds checked above
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapped.0.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    pub fn vertex_buffer_view(&self) -> VertexBufferView {
        VertexBufferView {
            buffer_location: self.gpu_address(),
            size_in_bytes: self.size() as u32,
            stride_in_bytes: self.desc.element_size,
        }
    }

    pub fn index_buffer_view(&self, format: IndexBufferFormat) -> IndexBufferView {
        IndexBufferView {
            buffer_location: self.gpu_address(),
            size_in_bytes: self.size() as u32,
            format,
        }
    }
}

impl AsGraphicsResource for Buffer {
    fn graphics_resource(&self) -> &Arc<GraphicsResource> {
        &self.resource
    }
}

impl AsGraphicsResource for Arc<Buffer> {
    fn graphics_resource(&self) -> &Arc<GraphicsResource> {
        &self.resource
    }
}

impl ShaderResource for Buffer {
    fn srv(&self) -> Option<&ResourceView> {
        self.srv.as_ref()
    }

    fn uav(&self) -> Option<&ResourceView> {
        self.uav.as_ref()
    }
}

impl ShaderResource for Arc<Buffer> {
    fn srv(&self) -> Option<&ResourceView> {
        self.as_ref().srv.as_ref()
    }

    fn uav(&self) -> Option<&ResourceView> {
        self.as_ref().uav.as_ref()
    }
}
