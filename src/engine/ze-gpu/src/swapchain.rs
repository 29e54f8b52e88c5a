use crate::device::GraphicsDevice;
use crate::texture::{Texture, TextureDesc, TextureDimension, TextureFlag};
use std::sync::Arc;
use ze_core::ze_verbose;
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, QueueType, SwapChainDesc};

pub struct SwapChain {
    /// Released before the swapchain owning them
    backbuffers: Vec<Arc<Texture>>,
    swapchain: backend::SwapChain,
    device: Arc<dyn Device>,
    desc: SwapChainDesc,
}

impl SwapChain {
    pub(crate) fn new(device: &GraphicsDevice, desc: SwapChainDesc) -> Result<Self, DeviceError> {
        let swapchain = device
            .raw()
            .create_swapchain(&desc, device.queue(QueueType::Direct).raw())?;
        let backbuffers = Self::create_backbuffers(device, &swapchain, &desc)?;
        Ok(Self {
            device: device.raw().clone(),
            swapchain,
            desc,
            backbuffers,
        })
    }

    fn create_backbuffers(
        device: &GraphicsDevice,
        swapchain: &backend::SwapChain,
        desc: &SwapChainDesc,
    ) -> Result<Vec<Arc<Texture>>, DeviceError> {
        (0..desc.buffer_count)
            .map(|index| {
                let raw = device.raw().swapchain_backbuffer(swapchain, index)?;
                let texture_desc = TextureDesc {
                    dimension: TextureDimension::Texture2D,
                    width: desc.width,
                    height: desc.height,
                    format: desc.format,
                    sample_count: desc.sample_desc.count,
                    flags: TextureFlag::RenderTarget.into(),
                    ..Default::default()
                };
                Ok(Arc::new(Texture::from_swapchain(
                    device,
                    raw,
                    texture_desc,
                    &format!("Backbuffer {}", index),
                )?))
            })
            .collect()
    }

    /// The backbuffer to render to this frame, it must be in the `PRESENT` state before
    /// [`SwapChain::present`] is called
    pub fn current_backbuffer(&self) -> &Arc<Texture> {
        &self.backbuffers[self.current_backbuffer_index() as usize]
    }

    pub fn current_backbuffer_index(&self) -> u32 {
        self.device.swapchain_backbuffer_index(&self.swapchain)
    }

    pub fn backbuffers(&self) -> &[Arc<Texture>] {
        &self.backbuffers
    }

    pub fn present(&self, vsync: bool) -> Result<(), DeviceError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        self.device
            .present(&self.swapchain, if vsync { 1 } else { 0 })
    }

    /// Idles the device, every backbuffer must have been released by the caller
    pub fn resize(&mut self, device: &GraphicsDevice, width: u32, height: u32) -> Result<(), DeviceError> {
        if width == self.desc.width && height == self.desc.height {
            return Ok(());
        }

        device.wait_for_idle();

        // Native backbuffers must all be released before the swapchain can resize them
        for backbuffer in &self.backbuffers {
            assert_eq!(
                Arc::strong_count(backbuffer),
                1,
                "backbuffers are still referenced while resizing the swapchain"
            );
        }
        self.backbuffers.clear();

        self.device.resize_swapchain(&self.swapchain, width, height)?;
        self.desc.width = width;
        self.desc.height = height;
        self.backbuffers = Self::create_backbuffers(device, &self.swapchain, &self.desc)?;

        ze_verbose!("Swapchain resized to {}x{}", width, height);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    pub fn raw(&self) -> &backend::SwapChain {
        &self.swapchain
    }
}
