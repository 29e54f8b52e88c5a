use crate::device::D3D12Device;
use crate::utils::SendableIUnknown;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Diagnostics::Debug::IsDebuggerPresent;
use windows::Win32::System::Threading::Sleep;
use ze_core::{ze_info, ze_warn};
use ze_gfx::backend::*;

pub struct D3D12Backend {
    factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
    devices: Mutex<Vec<Weak<D3D12Device>>>,
    debug_layer_enabled: Mutex<bool>,
}

impl D3D12Backend {
    pub fn new() -> Result<Arc<D3D12Backend>, BackendError> {
        // The factory is created with debug flags on debug builds, the debug layer itself is
        // toggled per device
        let factory: IDXGIFactory4 = unsafe {
            let flags = if cfg!(debug_assertions) {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                0
            };
            match CreateDXGIFactory2::<IDXGIFactory4>(flags) {
                Ok(factory) => factory,
                Err(_) => return Err(BackendError::Unsupported),
            }
        };

        Ok(Arc::new(D3D12Backend {
            factory: Arc::new(Mutex::new(factory.into())),
            devices: Default::default(),
            debug_layer_enabled: Mutex::new(false),
        }))
    }

    fn enable_debug_layer(&self) {
        let mut enabled = self.debug_layer_enabled.lock();
        if *enabled {
            return;
        }

        unsafe {
            let mut debug: Option<ID3D12Debug> = None;
            if D3D12GetDebugInterface(&mut debug).is_err() {
                ze_warn!("D3D12 debug layer requested but not installed");
                return;
            }

            if let Some(debug) = debug {
                debug.EnableDebugLayer();
                if let Ok(debug) = debug.cast::<ID3D12Debug1>() {
                    debug.SetEnableGPUBasedValidation(false);
                }
                *enabled = true;
                ze_info!("Using D3D12 debug layer");
            }
        }
    }

    fn wait_for_debugger() {
        ze_info!("Waiting for a debugger to attach");
        unsafe {
            while !IsDebuggerPresent().as_bool() {
                Sleep(100);
            }
        }
    }
}

impl Drop for D3D12Backend {
    fn drop(&mut self) {
        for device in self.devices.lock().iter() {
            assert_eq!(device.strong_count(), 0);
        }

        if *self.debug_layer_enabled.lock() {
            unsafe {
                if let Ok(debug) = DXGIGetDebugInterface1::<IDXGIDebug1>(0) {
                    let _ = debug.ReportLiveObjects(
                        DXGI_DEBUG_ALL,
                        DXGI_DEBUG_RLO_FLAGS(
                            DXGI_DEBUG_RLO_DETAIL.0 | DXGI_DEBUG_RLO_IGNORE_INTERNAL.0,
                        ),
                    );
                }
            }
        }
    }
}

impl Backend for D3D12Backend {
    fn create_device(&self, options: &DeviceOptions) -> Result<Arc<dyn Device>, BackendError> {
        if options.wait_for_debugger {
            Self::wait_for_debugger();
        }

        if options.enable_debug_layer {
            self.enable_debug_layer();
        }

        let factory = self.factory.lock();

        unsafe {
            // Search for a compatible adapter
            let mut adapter_index = 0;
            let mut adapter_to_use = None;

            while let Ok(adapter) = factory.EnumAdapters1(adapter_index) {
                adapter_index += 1;

                let desc = match adapter.GetDesc1() {
                    Ok(desc) => desc,
                    Err(_) => continue,
                };

                if DXGI_ADAPTER_FLAG(desc.Flags) & DXGI_ADAPTER_FLAG_SOFTWARE
                    == DXGI_ADAPTER_FLAG_SOFTWARE
                {
                    continue;
                }

                let adapter_name = String::from_utf16_lossy(&desc.Description);
                let adapter_name = adapter_name.trim_matches(char::from(0));
                ze_info!("Found compatible adapter: {}", adapter_name);

                adapter_to_use = Some(adapter);
                break;
            }

            let adapter = adapter_to_use.ok_or(BackendError::NoCompatibleAdapter)?;
            let mut device: Option<ID3D12Device> = None;
            if D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, &mut device).is_err() {
                return Err(BackendError::Unsupported);
            }

            let device = device.ok_or(BackendError::Unsupported)?;
            let device: ID3D12Device5 = device.cast().map_err(|_| BackendError::Unsupported)?;

            if options.stable_power_state {
                if device.SetStablePowerState(true).is_err() {
                    ze_warn!("Stable power state requires developer mode");
                } else {
                    ze_info!("Using stable power state");
                }
            }

            if options.break_on_validation && *self.debug_layer_enabled.lock() {
                if let Ok(info_queue) = device.cast::<ID3D12InfoQueue>() {
                    let _ = info_queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_CORRUPTION, true);
                    let _ = info_queue.SetBreakOnSeverity(D3D12_MESSAGE_SEVERITY_ERROR, true);
                }
            }

            let device = Arc::new(D3D12Device::new(self.factory.clone(), device.into()));
            self.devices.lock().push(Arc::downgrade(&device));
            Ok(device)
        }
    }

    fn name(&self) -> &str {
        "D3D12"
    }
}
