use crate::context::CommandContext;
use crate::resource::GraphicsResource;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use ze_gfx::backend::ResourceStates;

/// Keeps a resource in a state for a scope and moves it back to where it was on drop.
/// Commands are recorded through the guard.
pub struct ScopedBarrier<'c, 'd> {
    context: &'c mut CommandContext<'d>,
    resource: Arc<GraphicsResource>,

    /// `(subresource, state)` to restore, a single `ALL_SUBRESOURCES` entry when uniform
    previous: Vec<(u32, ResourceStates)>,
}

impl<'c, 'd> ScopedBarrier<'c, 'd> {
    pub(crate) fn new(
        context: &'c mut CommandContext<'d>,
        resource: Arc<GraphicsResource>,
        previous: Vec<(u32, ResourceStates)>,
    ) -> Self {
        Self {
            context,
            resource,
            previous,
        }
    }
}

impl<'c, 'd> Deref for ScopedBarrier<'c, 'd> {
    type Target = CommandContext<'d>;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl<'c, 'd> DerefMut for ScopedBarrier<'c, 'd> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl<'c, 'd> Drop for ScopedBarrier<'c, 'd> {
    fn drop(&mut self) {
        for (subresource, state) in self.previous.drain(..) {
            self.context
                .insert_resource_barrier(&self.resource, state, subresource);
        }
    }
}
