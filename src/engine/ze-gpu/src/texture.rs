use crate::descriptor::offline::{OfflineDescriptor, OfflineDescriptorAllocator};
use crate::descriptor::ResourceView;
use crate::device::GraphicsDevice;
use crate::resource::{AsGraphicsResource, GraphicsResource, ReleasePolicy, ShaderResource};
use enumflags2::{bitflags, BitFlags};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use ze_gfx::backend;
use ze_gfx::backend::{
    ClearValue, CpuDescriptorHandle, DepthStencilViewDesc, DepthStencilViewDimension,
    DescriptorHeapType, Device, DeviceError, HeapType, OptimizedClearValue,
    RenderTargetViewDesc, RenderTargetViewDimension, ResourceDesc, ResourceDimension,
    ResourceFlagBits, ResourceFlags, ResourceStates, ShaderResourceViewDesc,
    ShaderResourceViewDimension, UnorderedAccessViewDesc, UnorderedAccessViewDimension,
};
use ze_gfx::{PixelFormat, SampleDesc};

#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TextureFlag {
    ShaderResource = 1 << 0,
    UnorderedAccess = 1 << 1,
    RenderTarget = 1 << 2,
    DepthStencil = 1 << 3,
}
pub type TextureFlags = BitFlags<TextureFlag>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture3D,

    /// `depth_or_array_size` counts faces and must be 6
    TextureCube,

    /// `depth_or_array_size` counts faces and must be a multiple of 6
    TextureCubeArray,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub format: PixelFormat,
    pub sample_count: u32,
    pub flags: TextureFlags,

    /// Clear value render targets and depth buffers are optimized for
    pub clear_value: Option<ClearValue>,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            width: 1,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: PixelFormat::R8G8B8A8Unorm,
            sample_count: 1,
            flags: TextureFlag::ShaderResource.into(),
            clear_value: None,
        }
    }
}

impl TextureDesc {
    pub fn texture_2d(width: u32, height: u32, format: PixelFormat, flags: TextureFlags) -> Self {
        Self {
            width,
            height,
            format,
            flags,
            ..Default::default()
        }
    }

    pub fn array_size(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture3D => 1,
            _ => self.depth_or_array_size.max(1),
        }
    }

    /// Stencil is a separate plane, planar formats count each plane's subresources
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels.max(1) * self.array_size() * self.format.plane_count()
    }

    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        self.plane_subresource_index(mip, array_slice, 0)
    }

    pub fn plane_subresource_index(&self, mip: u32, array_slice: u32, plane: u32) -> u32 {
        assert!(
            plane < self.format.plane_count(),
            "{:?} has no plane {}",
            self.format,
            plane
        );
        mip + array_slice * self.mip_levels.max(1)
            + plane * self.mip_levels.max(1) * self.array_size()
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    fn validate(&self) {
        assert!(self.width > 0 && self.height > 0, "textures cannot be empty");
        assert!(
            !(self.flags.contains(TextureFlag::RenderTarget)
                && self.flags.contains(TextureFlag::DepthStencil)),
            "a texture is either a render target or a depth stencil"
        );
        assert_eq!(
            self.flags.contains(TextureFlag::DepthStencil),
            self.format.is_depth(),
            "depth stencil textures need a depth format and vice versa"
        );
        assert!(
            !(self.is_multisampled() && self.flags.contains(TextureFlag::UnorderedAccess)),
            "multisampled textures cannot have unordered access"
        );
        assert!(
            !(self.is_multisampled() && self.mip_levels > 1),
            "multisampled textures cannot have mips"
        );
        match self.dimension {
            TextureDimension::TextureCube => assert_eq!(self.depth_or_array_size, 6),
            TextureDimension::TextureCubeArray => assert_eq!(self.depth_or_array_size % 6, 0),
            _ => {}
        }
    }

    fn resource_dimension(&self) -> ResourceDimension {
        match self.dimension {
            TextureDimension::Texture1D | TextureDimension::Texture1DArray => {
                ResourceDimension::Texture1D
            }
            TextureDimension::Texture3D => ResourceDimension::Texture3D,
            _ => ResourceDimension::Texture2D,
        }
    }

    fn resource_format(&self) -> PixelFormat {
        // Sampled depth buffers need a typeless resource to alias both views
        if self.format.is_depth() && self.flags.contains(TextureFlag::ShaderResource) {
            self.format.depth_resource_format()
        } else {
            self.format
        }
    }

    fn resource_desc(&self) -> ResourceDesc {
        let mut flags = ResourceFlags::empty();
        if self.flags.contains(TextureFlag::RenderTarget) {
            flags |= ResourceFlagBits::AllowRenderTarget;
        }
        if self.flags.contains(TextureFlag::DepthStencil) {
            flags |= ResourceFlagBits::AllowDepthStencil;
            if !self.flags.contains(TextureFlag::ShaderResource) {
                flags |= ResourceFlagBits::DenyShaderResource;
            }
        }
        if self.flags.contains(TextureFlag::UnorderedAccess) {
            flags |= ResourceFlagBits::AllowUnorderedAccess;
        }

        ResourceDesc {
            dimension: self.resource_dimension(),
            width: self.width as u64,
            height: self.height,
            depth_or_array_size: self.depth_or_array_size as u16,
            mip_levels: self.mip_levels as u16,
            format: self.resource_format(),
            sample_desc: SampleDesc {
                count: self.sample_count,
                quality: 0,
            },
            flags,
        }
    }

    fn initial_state(&self) -> ResourceStates {
        if self.flags.contains(TextureFlag::DepthStencil) {
            ResourceStates::DEPTH_WRITE
        } else if self.flags.contains(TextureFlag::RenderTarget) {
            ResourceStates::RENDER_TARGET
        } else {
            ResourceStates::COMMON
        }
    }

    fn optimized_clear_value(&self) -> Option<OptimizedClearValue> {
        if !self
            .flags
            .intersects(TextureFlag::RenderTarget | TextureFlag::DepthStencil)
        {
            return None;
        }

        let value = self.clear_value.unwrap_or(if self.format.is_depth() {
            ClearValue::DepthStencil((1.0, 0))
        } else {
            ClearValue::Color([0.0; 4])
        });

        Some(OptimizedClearValue {
            format: self.format,
            value,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct AttachmentKey {
    mip: u32,
    array_slice: u32,
    read_only: bool,
}

pub struct Texture {
    resource: Arc<GraphicsResource>,
    desc: TextureDesc,
    device: Arc<dyn Device>,
    srv: Option<ResourceView>,
    uav: Option<ResourceView>,
    attachment_allocator: Option<Arc<OfflineDescriptorAllocator>>,
    attachment_views: Mutex<FnvHashMap<AttachmentKey, OfflineDescriptor>>,
}

impl Texture {
    pub fn new(device: &GraphicsDevice, desc: TextureDesc, name: &str) -> Result<Self, DeviceError> {
        desc.validate();

        let resource_desc = desc.resource_desc();
        let initial_state = desc.initial_state();
        let clear_value = desc.optimized_clear_value();
        let raw = device.raw().create_committed_resource(
            &resource_desc,
            HeapType::Default,
            initial_state,
            clear_value.as_ref(),
            name,
        )?;

        Self::from_raw(
            device,
            raw,
            desc,
            initial_state,
            name,
            ReleasePolicy::DeletionQueue(device.deferred_delete_queue().clone()),
        )
    }

    /// Wrap a resource owned by a swapchain
    pub(crate) fn from_swapchain(
        device: &GraphicsDevice,
        raw: backend::Resource,
        desc: TextureDesc,
        name: &str,
    ) -> Result<Self, DeviceError> {
        Self::from_raw(
            device,
            raw,
            desc,
            ResourceStates::PRESENT,
            name,
            ReleasePolicy::Immediate,
        )
    }

    fn from_raw(
        device: &GraphicsDevice,
        raw: backend::Resource,
        desc: TextureDesc,
        initial_state: ResourceStates,
        name: &str,
        release_policy: ReleasePolicy,
    ) -> Result<Self, DeviceError> {
        let raw_device = device.raw();
        let resource = Arc::new(GraphicsResource::new(
            raw,
            desc.resource_desc(),
            HeapType::Default,
            initial_state,
            0,
            name,
            release_policy,
        ));

        let view_heap = device.online_heap(DescriptorHeapType::View);
        let offline = device.offline_allocator(DescriptorHeapType::View);

        let srv = if desc.flags.contains(TextureFlag::ShaderResource) {
            let srv_desc = Self::srv_desc(&desc);
            Some(ResourceView::new(offline, Some(view_heap), |handle| {
                raw_device.create_shader_resource_view(Some(resource.raw()), &srv_desc, handle)
            })?)
        } else {
            None
        };

        let uav = if desc.flags.contains(TextureFlag::UnorderedAccess) {
            let uav_desc = Self::uav_desc(&desc, 0);
            Some(ResourceView::new(offline, Some(view_heap), |handle| {
                raw_device.create_unordered_access_view(resource.raw(), None, &uav_desc, handle)
            })?)
        } else {
            None
        };

        let attachment_allocator = if desc.flags.contains(TextureFlag::RenderTarget) {
            Some(device.offline_allocator(DescriptorHeapType::Rtv).clone())
        } else if desc.flags.contains(TextureFlag::DepthStencil) {
            Some(device.offline_allocator(DescriptorHeapType::Dsv).clone())
        } else {
            None
        };

        let texture = Self {
            resource,
            desc,
            device: raw_device.clone(),
            srv,
            uav,
            attachment_allocator,
            attachment_views: Mutex::new(FnvHashMap::default()),
        };

        // The first mip/slice views are nearly always needed, create them upfront
        if desc.flags.contains(TextureFlag::RenderTarget) {
            texture.rtv(0, 0)?;
        } else if desc.flags.contains(TextureFlag::DepthStencil) {
            texture.dsv(0, 0)?;
            texture.read_only_dsv(0, 0)?;
        }

        Ok(texture)
    }

    fn srv_desc(desc: &TextureDesc) -> ShaderResourceViewDesc {
        let mip_levels = desc.mip_levels.max(1);
        let array_size = desc.array_size();
        let dimension = match desc.dimension {
            TextureDimension::Texture1D => ShaderResourceViewDimension::Texture1D {
                most_detailed_mip: 0,
                mip_levels,
            },
            TextureDimension::Texture1DArray => ShaderResourceViewDimension::Texture1DArray {
                most_detailed_mip: 0,
                mip_levels,
                first_array_slice: 0,
                array_size,
            },
            TextureDimension::Texture2D if desc.is_multisampled() => {
                ShaderResourceViewDimension::Texture2DMs
            }
            TextureDimension::Texture2D => ShaderResourceViewDimension::Texture2D {
                most_detailed_mip: 0,
                mip_levels,
                plane_slice: 0,
            },
            TextureDimension::Texture2DArray if desc.is_multisampled() => {
                ShaderResourceViewDimension::Texture2DMsArray {
                    first_array_slice: 0,
                    array_size,
                }
            }
            TextureDimension::Texture2DArray => ShaderResourceViewDimension::Texture2DArray {
                most_detailed_mip: 0,
                mip_levels,
                first_array_slice: 0,
                array_size,
                plane_slice: 0,
            },
            TextureDimension::Texture3D => ShaderResourceViewDimension::Texture3D {
                most_detailed_mip: 0,
                mip_levels,
            },
            TextureDimension::TextureCube => ShaderResourceViewDimension::TextureCube {
                most_detailed_mip: 0,
                mip_levels,
            },
            TextureDimension::TextureCubeArray => ShaderResourceViewDimension::TextureCubeArray {
                most_detailed_mip: 0,
                mip_levels,
                first_2d_array_face: 0,
                num_cubes: array_size / 6,
            },
        };

        ShaderResourceViewDesc {
            format: desc.format.depth_srv_format(),
            dimension,
        }
    }

    fn uav_desc(desc: &TextureDesc, mip: u32) -> UnorderedAccessViewDesc {
        let array_size = desc.array_size();
        let dimension = match desc.dimension {
            TextureDimension::Texture1D => UnorderedAccessViewDimension::Texture1D { mip_slice: mip },
            TextureDimension::Texture1DArray => UnorderedAccessViewDimension::Texture1DArray {
                mip_slice: mip,
                first_array_slice: 0,
                array_size,
            },
            TextureDimension::Texture2D => UnorderedAccessViewDimension::Texture2D {
                mip_slice: mip,
                plane_slice: 0,
            },
            TextureDimension::Texture2DArray
            | TextureDimension::TextureCube
            | TextureDimension::TextureCubeArray => UnorderedAccessViewDimension::Texture2DArray {
                mip_slice: mip,
                first_array_slice: 0,
                array_size,
                plane_slice: 0,
            },
            TextureDimension::Texture3D => UnorderedAccessViewDimension::Texture3D {
                mip_slice: mip,
                first_w_slice: 0,
                w_size: (desc.depth_or_array_size >> mip).max(1),
            },
        };

        UnorderedAccessViewDesc {
            format: desc.format,
            dimension,
        }
    }

    fn is_array(&self) -> bool {
        !matches!(
            self.desc.dimension,
            TextureDimension::Texture1D | TextureDimension::Texture2D | TextureDimension::Texture3D
        )
    }

    fn attachment_view(
        &self,
        key: AttachmentKey,
        create: impl FnOnce(&dyn Device, CpuDescriptorHandle),
    ) -> Result<CpuDescriptorHandle, DeviceError> {
        let allocator = self.attachment_allocator.as_ref().ok_or(DeviceError::InvalidParameters)?;
        assert!(
            key.mip < self.desc.mip_levels.max(1) && key.array_slice < self.desc.array_size(),
            "mip {} slice {} out of range for {}",
            key.mip,
            key.array_slice,
            self.resource.name()
        );

        let mut views = self.attachment_views.lock();
        if let Some(view) = views.get(&key) {
            return Ok(view.handle());
        }

        let view = allocator.allocate_owned()?;
        create(&*self.device, view.handle());
        let handle = view.handle();
        views.insert(key, view);
        Ok(handle)
    }

    /// Render target view of one mip of one array slice
    pub fn rtv(&self, mip: u32, array_slice: u32) -> Result<CpuDescriptorHandle, DeviceError> {
        if !self.desc.flags.contains(TextureFlag::RenderTarget) {
            return Err(DeviceError::InvalidParameters);
        }

        let dimension = match (self.desc.dimension, self.desc.is_multisampled()) {
            (TextureDimension::Texture1D, _) => RenderTargetViewDimension::Texture1D { mip_slice: mip },
            (TextureDimension::Texture1DArray, _) => RenderTargetViewDimension::Texture1DArray {
                mip_slice: mip,
                first_array_slice: array_slice,
                array_size: 1,
            },
            (TextureDimension::Texture3D, _) => RenderTargetViewDimension::Texture3D {
                mip_slice: mip,
                first_w_slice: 0,
                w_size: u32::MAX,
            },
            (TextureDimension::Texture2D, true) => RenderTargetViewDimension::Texture2DMs,
            (TextureDimension::Texture2D, false) => RenderTargetViewDimension::Texture2D {
                mip_slice: mip,
                plane_slice: 0,
            },
            (_, true) => RenderTargetViewDimension::Texture2DMsArray {
                first_array_slice: array_slice,
                array_size: 1,
            },
            (_, false) => RenderTargetViewDimension::Texture2DArray {
                mip_slice: mip,
                first_array_slice: array_slice,
                array_size: 1,
                plane_slice: 0,
            },
        };

        let desc = RenderTargetViewDesc {
            format: self.desc.format,
            dimension,
        };
        let resource = self.resource.clone();
        self.attachment_view(
            AttachmentKey {
                mip,
                array_slice,
                read_only: false,
            },
            |device, handle| device.create_render_target_view(resource.raw(), &desc, handle),
        )
    }

    pub fn dsv(&self, mip: u32, array_slice: u32) -> Result<CpuDescriptorHandle, DeviceError> {
        self.depth_stencil_view(mip, array_slice, false)
    }

    /// Depth stencil view that can be bound while the texture is also sampled
    pub fn read_only_dsv(&self, mip: u32, array_slice: u32) -> Result<CpuDescriptorHandle, DeviceError> {
        self.depth_stencil_view(mip, array_slice, true)
    }

    fn depth_stencil_view(
        &self,
        mip: u32,
        array_slice: u32,
        read_only: bool,
    ) -> Result<CpuDescriptorHandle, DeviceError> {
        if !self.desc.flags.contains(TextureFlag::DepthStencil) {
            return Err(DeviceError::InvalidParameters);
        }

        let dimension = match (self.is_array(), self.desc.is_multisampled()) {
            (false, false) if self.desc.dimension == TextureDimension::Texture1D => {
                DepthStencilViewDimension::Texture1D { mip_slice: mip }
            }
            (false, false) => DepthStencilViewDimension::Texture2D { mip_slice: mip },
            (false, true) => DepthStencilViewDimension::Texture2DMs,
            (true, true) => DepthStencilViewDimension::Texture2DMsArray {
                first_array_slice: array_slice,
                array_size: 1,
            },
            (true, false) if self.desc.dimension == TextureDimension::Texture1DArray => {
                DepthStencilViewDimension::Texture1DArray {
                    mip_slice: mip,
                    first_array_slice: array_slice,
                    array_size: 1,
                }
            }
            (true, false) => DepthStencilViewDimension::Texture2DArray {
                mip_slice: mip,
                first_array_slice: array_slice,
                array_size: 1,
            },
        };

        let desc = DepthStencilViewDesc {
            format: self.desc.format,
            dimension,
            read_only_depth: read_only,
            read_only_stencil: read_only && self.desc.format.has_stencil(),
        };
        let resource = self.resource.clone();
        self.attachment_view(
            AttachmentKey {
                mip,
                array_slice,
                read_only,
            },
            |device, handle| device.create_depth_stencil_view(resource.raw(), &desc, handle),
        )
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn srv(&self) -> Option<&ResourceView> {
        self.srv.as_ref()
    }

    pub fn uav(&self) -> Option<&ResourceView> {
        self.uav.as_ref()
    }

    /// Index of the SRV in the bindless table
    pub fn bindless_srv(&self) -> Option<u32> {
        self.srv.as_ref().and_then(ResourceView::bindless_index)
    }

    pub fn bindless_uav(&self) -> Option<u32> {
        self.uav.as_ref().and_then(ResourceView::bindless_index)
    }

    /// Clear value the texture was created with
    pub fn clear_value(&self) -> Option<ClearValue> {
        self.desc.optimized_clear_value().map(|value| value.value)
    }

    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        self.desc.subresource_index(mip, array_slice)
    }

    pub fn plane_subresource_index(&self, mip: u32, array_slice: u32, plane: u32) -> u32 {
        self.desc.plane_subresource_index(mip, array_slice, plane)
    }
}

impl AsGraphicsResource for Texture {
    fn graphics_resource(&self) -> &Arc<GraphicsResource> {
        &self.resource
    }
}

impl AsGraphicsResource for Arc<Texture> {
    fn graphics_resource(&self) -> &Arc<GraphicsResource> {
        &self.resource
    }
}

impl ShaderResource for Texture {
    fn srv(&self) -> Option<&ResourceView> {
        self.srv.as_ref()
    }

    fn uav(&self) -> Option<&ResourceView> {
        self.uav.as_ref()
    }
}

impl ShaderResource for Arc<Texture> {
    fn srv(&self) -> Option<&ResourceView> {
        self.as_ref().srv.as_ref()
    }

    fn uav(&self) -> Option<&ResourceView> {
        self.as_ref().uav.as_ref()
    }
}
