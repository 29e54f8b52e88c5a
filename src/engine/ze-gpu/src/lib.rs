//! Command execution and resource lifetime on top of an explicit GPU API.
//!
//! A [`GraphicsDevice`] owns one queue per [`QueueType`], the descriptor heaps, the upload
//! pages and the deferred deletion queue. Work is recorded into a [`CommandContext`] which
//! tracks resource states locally; the queue resolves the first use of each resource against
//! its global state when the context is submitted.

pub mod barrier_batcher;
pub mod buffer;
pub mod command_allocator_pool;
pub mod command_queue;
pub mod command_signature;
pub mod context;
pub mod deferred_delete;
pub mod descriptor;
pub mod device;
pub mod dynamic_allocator;
pub mod fence;
pub mod pipeline;
pub mod profiler;
pub mod render_pass;
pub mod resource;
pub mod resource_state;
pub mod root_signature;
pub mod shader_binding_table;
pub mod swapchain;
pub mod texture;

#[cfg(test)]
mod tests;

pub use buffer::{Buffer, BufferDesc, BufferFlag, BufferFlags};
pub use context::CommandContext;
pub use device::{GraphicsDevice, GraphicsDeviceDesc, GraphicsDeviceOptions};
pub use fence::Fence;
pub use resource::{AsGraphicsResource, GraphicsResource, ResourceId};
pub use resource_state::ResourceState;
pub use texture::{Texture, TextureDesc, TextureDimension, TextureFlag, TextureFlags};
pub use ze_gfx::backend::{QueueType, ResourceStates, ALL_SUBRESOURCES};
