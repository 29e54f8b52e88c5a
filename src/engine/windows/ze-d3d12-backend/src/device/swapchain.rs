use crate::utils::*;
use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use windows::core::Interface;
use windows::Win32::Foundation::{BOOL, HWND};
use windows::Win32::Graphics::Direct3D12::{ID3D12CommandQueue, ID3D12Resource};
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use ze_gfx::backend::{
    DeviceError, ResourceDesc, ResourceDimension, ResourceFlagBits, SwapChainDesc,
};
use ze_gfx::{PixelFormat, SampleDesc};

pub(crate) struct D3D12SwapChain {
    swapchain: SendableIUnknown<IDXGISwapChain3>,
    buffer_count: u32,
    format: PixelFormat,
    sample_desc: SampleDesc,
    size: Mutex<(u32, u32)>,
    need_restart: AtomicBool,
}

impl D3D12SwapChain {
    pub fn new(
        factory: &IDXGIFactory4,
        queue: &ID3D12CommandQueue,
        desc: &SwapChainDesc,
    ) -> Result<Self, DeviceError> {
        if desc.buffer_count < 2 {
            return Err(DeviceError::InvalidParameters);
        }

        let hwnd = match desc.window_handle {
            RawWindowHandle::Win32(handle) => HWND(handle.hwnd as isize),
            _ => return Err(DeviceError::InvalidParameters),
        };

        let d3d_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: get_dxgi_format_from_ze_format(desc.format),
            Stereo: BOOL::from(false),
            SampleDesc: get_dxgi_sample_desc_from_ze_sample_desc(desc.sample_desc),
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: 0,
        };

        let swapchain = unsafe { factory.CreateSwapChainForHwnd(queue, hwnd, &d3d_desc, None, None) }
            .map_err(convert_d3d_error_to_ze_device_error)?;
        let swapchain: IDXGISwapChain3 = swapchain
            .cast()
            .map_err(convert_d3d_error_to_ze_device_error)?;

        Ok(Self {
            swapchain: swapchain.into(),
            buffer_count: desc.buffer_count,
            format: desc.format,
            sample_desc: desc.sample_desc,
            size: Mutex::new((desc.width, desc.height)),
            need_restart: AtomicBool::new(true),
        })
    }

    pub fn backbuffer(&self, index: u32) -> Result<(ID3D12Resource, ResourceDesc), DeviceError> {
        if index >= self.buffer_count {
            return Err(DeviceError::InvalidParameters);
        }

        let buffer: ID3D12Resource = unsafe { self.swapchain.GetBuffer(index) }
            .map_err(convert_d3d_error_to_ze_device_error)?;
        set_resource_name(
            &buffer.cast().map_err(convert_d3d_error_to_ze_device_error)?,
            &format!("Backbuffer {}", index),
        );

        let (width, height) = *self.size.lock();
        Ok((
            buffer,
            ResourceDesc {
                dimension: ResourceDimension::Texture2D,
                width: width as u64,
                height,
                depth_or_array_size: 1,
                mip_levels: 1,
                format: self.format,
                sample_desc: self.sample_desc,
                flags: ResourceFlagBits::AllowRenderTarget.into(),
            },
        ))
    }

    pub fn current_backbuffer_index(&self) -> u32 {
        unsafe { self.swapchain.GetCurrentBackBufferIndex() }
    }

    /// Every backbuffer reference must have been released
    pub fn resize(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        unsafe {
            self.swapchain.ResizeBuffers(
                self.buffer_count,
                width,
                height,
                get_dxgi_format_from_ze_format(self.format),
                0,
            )
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        *self.size.lock() = (width, height);
        Ok(())
    }

    pub fn present(&self, sync_interval: u32) -> Result<(), DeviceError> {
        let mut flags = 0;
        if self.need_restart.swap(false, Ordering::SeqCst) {
            flags |= DXGI_PRESENT_RESTART;
        }

        unsafe { self.swapchain.Present(sync_interval, flags) }
            .ok()
            .map_err(convert_d3d_error_to_ze_device_error)
    }
}
