//! Direct3D 12 implementation of [`ze_gfx::backend::Device`].
//!
//! Only built on Windows, other platforms get an empty crate.

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod backend;
        mod device;
        mod utils;

        pub use backend::D3D12Backend;
    }
}
