use crate::context::CommandContext;
use crate::resource::AsGraphicsResource;
use crate::texture::{Texture, TextureFlag};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;
use std::sync::Arc;
use ze_gfx::backend::{
    ClearFlagBits, ClearFlags, ClearValue, CpuDescriptorHandle, DeviceError, OptimizedClearValue,
    QueueType, Rect, RenderPassBeginningAccess, RenderPassDepthStencilDesc,
    RenderPassEndingAccess, RenderPassFlagBits, RenderPassFlags, RenderPassRenderTargetDesc,
    ResourceStates, Viewport, ALL_SUBRESOURCES,
};
use ze_gfx::pipeline_stream::MAX_RENDER_TARGETS;
use ze_gfx::utils::mip_size;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum RenderPassBeginAccess {
    DontCare = 0,
    Load = 1,
    Clear = 2,
    NoAccess = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum RenderPassEndAccess {
    DontCare = 0,
    Store = 1,

    /// Stored, then resolved or copied into the attachment's resolve target
    Resolve = 2,
    NoAccess = 3,
}

/// What happens to an attachment at the start and at the end of a pass, packed in a byte:
/// the beginning access in the low nibble, the ending access in the high nibble
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassAccess(u8);

impl RenderPassAccess {
    pub const CLEAR_STORE: Self = Self::new(RenderPassBeginAccess::Clear, RenderPassEndAccess::Store);
    pub const LOAD_STORE: Self = Self::new(RenderPassBeginAccess::Load, RenderPassEndAccess::Store);
    pub const DONT_CARE_STORE: Self =
        Self::new(RenderPassBeginAccess::DontCare, RenderPassEndAccess::Store);
    pub const CLEAR_DONT_CARE: Self =
        Self::new(RenderPassBeginAccess::Clear, RenderPassEndAccess::DontCare);
    pub const CLEAR_RESOLVE: Self =
        Self::new(RenderPassBeginAccess::Clear, RenderPassEndAccess::Resolve);
    pub const LOAD_RESOLVE: Self = Self::new(RenderPassBeginAccess::Load, RenderPassEndAccess::Resolve);
    pub const NO_ACCESS: Self =
        Self::new(RenderPassBeginAccess::NoAccess, RenderPassEndAccess::NoAccess);

    pub const fn new(begin: RenderPassBeginAccess, end: RenderPassEndAccess) -> Self {
        Self(begin as u8 | (end as u8) << 4)
    }

    pub fn begin(self) -> RenderPassBeginAccess {
        RenderPassBeginAccess::from_u8(self.0 & 0xF).unwrap_or(RenderPassBeginAccess::DontCare)
    }

    pub fn end(self) -> RenderPassEndAccess {
        RenderPassEndAccess::from_u8(self.0 >> 4).unwrap_or(RenderPassEndAccess::DontCare)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for RenderPassAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.begin(), self.end())
    }
}

#[derive(Clone)]
pub struct RenderTargetAttachment {
    pub texture: Arc<Texture>,
    pub resolve_target: Option<Arc<Texture>>,
    pub mip: u32,
    pub array_slice: u32,
    pub access: RenderPassAccess,
}

impl RenderTargetAttachment {
    pub fn new(texture: Arc<Texture>, access: RenderPassAccess) -> Self {
        Self {
            texture,
            resolve_target: None,
            mip: 0,
            array_slice: 0,
            access,
        }
    }

    fn subresource(&self) -> u32 {
        self.texture.subresource_index(self.mip, self.array_slice)
    }
}

#[derive(Clone)]
pub struct DepthStencilAttachment {
    pub texture: Arc<Texture>,
    pub access: RenderPassAccess,
    pub stencil_access: RenderPassAccess,

    /// Bound read-only when false, the depth buffer can then be sampled during the pass
    pub write: bool,
}

#[derive(Clone, Default)]
pub struct RenderPassInfo {
    pub render_targets: Vec<RenderTargetAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
    pub allow_uav_writes: bool,
}

impl RenderPassInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_target(mut self, attachment: RenderTargetAttachment) -> Self {
        self.render_targets.push(attachment);
        self
    }

    pub fn depth_stencil(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil = Some(attachment);
        self
    }

    /// Size of the area rendered to, taken from the first attachment
    fn extent(&self) -> (u32, u32) {
        if let Some(attachment) = self.render_targets.first() {
            let desc = attachment.texture.desc();
            return (
                mip_size(desc.width as u64, attachment.mip) as u32,
                mip_size(desc.height as u64, attachment.mip) as u32,
            );
        }

        match &self.depth_stencil {
            Some(attachment) => {
                let desc = attachment.texture.desc();
                (desc.width, desc.height)
            }
            None => panic!("render pass without any attachment"),
        }
    }
}

/// A pass begun on a context and not ended yet
pub(crate) struct ActiveRenderPass {
    info: RenderPassInfo,
    native: bool,
}

fn color_clear_value(texture: &Texture) -> OptimizedClearValue {
    let value = match texture.clear_value() {
        Some(value @ ClearValue::Color(_)) => value,
        _ => ClearValue::Color([0.0; 4]),
    };
    OptimizedClearValue {
        format: texture.desc().format,
        value,
    }
}

fn depth_clear_value(texture: &Texture) -> (f32, u8) {
    match texture.clear_value() {
        Some(ClearValue::DepthStencil(value)) => value,
        _ => (1.0, 0),
    }
}

fn beginning_access(access: RenderPassAccess, clear_value: OptimizedClearValue) -> RenderPassBeginningAccess {
    match access.begin() {
        RenderPassBeginAccess::DontCare => RenderPassBeginningAccess::Discard,
        RenderPassBeginAccess::Load => RenderPassBeginningAccess::Preserve,
        RenderPassBeginAccess::Clear => RenderPassBeginningAccess::Clear(clear_value),
        RenderPassBeginAccess::NoAccess => RenderPassBeginningAccess::NoAccess,
    }
}

/// Resolves are recorded after the pass, the attachment itself is preserved
fn ending_access(access: RenderPassAccess) -> RenderPassEndingAccess {
    match access.end() {
        RenderPassEndAccess::DontCare => RenderPassEndingAccess::Discard,
        RenderPassEndAccess::Store | RenderPassEndAccess::Resolve => RenderPassEndingAccess::Preserve,
        RenderPassEndAccess::NoAccess => RenderPassEndingAccess::NoAccess,
    }
}

impl<'d> CommandContext<'d> {
    /// Transition the attachments, bind them and clear those asking for it.
    /// Native render passes are used when the device supports them.
    pub fn begin_render_pass(&mut self, info: &RenderPassInfo) -> Result<(), DeviceError> {
        assert_eq!(
            self.queue_type(),
            QueueType::Direct,
            "render passes need a direct queue"
        );
        assert!(
            self.state().render_pass.is_none(),
            "render pass already open, end it before beginning another one"
        );
        assert!(
            info.render_targets.len() <= MAX_RENDER_TARGETS,
            "{} render targets bound, at most {} are supported",
            info.render_targets.len(),
            MAX_RENDER_TARGETS
        );

        let mut rtvs: Vec<CpuDescriptorHandle> = Vec::with_capacity(info.render_targets.len());
        for attachment in &info.render_targets {
            assert!(
                attachment
                    .texture
                    .desc()
                    .flags
                    .contains(TextureFlag::RenderTarget),
                "{} is not a render target",
                attachment.texture.graphics_resource().name()
            );
            self.insert_resource_barrier(
                &attachment.texture,
                ResourceStates::RENDER_TARGET,
                attachment.subresource(),
            );
            rtvs.push(attachment.texture.rtv(attachment.mip, attachment.array_slice)?);
        }

        let dsv = match &info.depth_stencil {
            Some(attachment) => {
                let clears = attachment.access.begin() == RenderPassBeginAccess::Clear
                    || attachment.stencil_access.begin() == RenderPassBeginAccess::Clear;
                assert!(
                    attachment.write || !clears,
                    "read-only depth stencil attachments cannot be cleared"
                );

                if attachment.write {
                    self.insert_resource_barrier(
                        &attachment.texture,
                        ResourceStates::DEPTH_WRITE,
                        ALL_SUBRESOURCES,
                    );
                    Some(attachment.texture.dsv(0, 0)?)
                } else {
                    self.insert_resource_barrier(
                        &attachment.texture,
                        ResourceStates::DEPTH_READ,
                        ALL_SUBRESOURCES,
                    );
                    Some(attachment.texture.read_only_dsv(0, 0)?)
                }
            }
            None => None,
        };

        self.flush_resource_barriers();

        let native = self.device().capabilities().render_passes;
        if native {
            self.record_native_begin(info, &rtvs, dsv);
        } else {
            self.record_emulated_begin(info, &rtvs, dsv);
        }

        let (width, height) = info.extent();
        self.set_viewport(Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(Rect {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        });

        self.state_mut().render_pass = Some(ActiveRenderPass {
            info: info.clone(),
            native,
        });
        Ok(())
    }

    fn record_native_begin(
        &mut self,
        info: &RenderPassInfo,
        rtvs: &[CpuDescriptorHandle],
        dsv: Option<CpuDescriptorHandle>,
    ) {
        let render_targets: Vec<RenderPassRenderTargetDesc> = info
            .render_targets
            .iter()
            .zip(rtvs)
            .map(|(attachment, rtv)| RenderPassRenderTargetDesc {
                descriptor: *rtv,
                beginning_access: beginning_access(
                    attachment.access,
                    color_clear_value(&attachment.texture),
                ),
                ending_access: ending_access(attachment.access),
            })
            .collect();

        let depth_stencil = match (&info.depth_stencil, dsv) {
            (Some(attachment), Some(dsv)) => {
                let clear_value = OptimizedClearValue {
                    format: attachment.texture.desc().format,
                    value: ClearValue::DepthStencil(depth_clear_value(&attachment.texture)),
                };
                Some(RenderPassDepthStencilDesc {
                    descriptor: dsv,
                    depth_beginning_access: beginning_access(attachment.access, clear_value),
                    stencil_beginning_access: beginning_access(attachment.stencil_access, clear_value),
                    depth_ending_access: ending_access(attachment.access),
                    stencil_ending_access: ending_access(attachment.stencil_access),
                })
            }
            _ => None,
        };

        let mut flags = RenderPassFlags::empty();
        if info.allow_uav_writes {
            flags |= RenderPassFlagBits::AllowUavWrites;
        }

        let device = self.device().raw();
        device.cmd_begin_render_pass(
            &mut self.state_mut().command_list,
            &render_targets,
            depth_stencil.as_ref(),
            flags,
        );
    }

    fn record_emulated_begin(
        &mut self,
        info: &RenderPassInfo,
        rtvs: &[CpuDescriptorHandle],
        dsv: Option<CpuDescriptorHandle>,
    ) {
        let device = self.device().raw();
        let command_list = &mut self.state_mut().command_list;

        for (attachment, rtv) in info.render_targets.iter().zip(rtvs) {
            if attachment.access.begin() == RenderPassBeginAccess::Clear {
                let color = match color_clear_value(&attachment.texture).value {
                    ClearValue::Color(color) => color,
                    ClearValue::DepthStencil(_) => [0.0; 4],
                };
                device.cmd_clear_render_target_view(command_list, *rtv, color);
            }
        }

        if let (Some(attachment), Some(dsv)) = (&info.depth_stencil, dsv) {
            let mut flags = ClearFlags::empty();
            if attachment.access.begin() == RenderPassBeginAccess::Clear {
                flags |= ClearFlagBits::Depth;
            }
            if attachment.stencil_access.begin() == RenderPassBeginAccess::Clear
                && attachment.texture.desc().format.has_stencil()
            {
                flags |= ClearFlagBits::Stencil;
            }

            if !flags.is_empty() {
                let (depth, stencil) = depth_clear_value(&attachment.texture);
                device.cmd_clear_depth_stencil_view(command_list, dsv, flags, depth, stencil);
            }
        }

        device.cmd_set_render_targets(command_list, rtvs, dsv);
    }

    /// End the open render pass and resolve the attachments marked for it
    pub fn end_render_pass(&mut self) {
        let pass = match self.state_mut().render_pass.take() {
            Some(pass) => pass,
            None => panic!("end_render_pass called without an open render pass"),
        };

        if pass.native {
            let device = self.device().raw();
            device.cmd_end_render_pass(&mut self.state_mut().command_list);
        }

        for attachment in &pass.info.render_targets {
            if attachment.access.end() != RenderPassEndAccess::Resolve {
                continue;
            }

            let target = match &attachment.resolve_target {
                Some(target) => target,
                None => panic!(
                    "{} is resolved at the end of the pass but has no resolve target",
                    attachment.texture.graphics_resource().name()
                ),
            };

            let dst_subresource = target.subresource_index(attachment.mip, attachment.array_slice);
            if attachment.texture.desc().is_multisampled() {
                self.resolve_resource(
                    target,
                    dst_subresource,
                    &attachment.texture,
                    attachment.subresource(),
                    target.desc().format,
                );
            } else {
                self.copy_texture_region(
                    target,
                    dst_subresource,
                    [0, 0, 0],
                    &attachment.texture,
                    attachment.subresource(),
                    None,
                );
            }
        }
    }

    pub fn is_in_render_pass(&self) -> bool {
        self.state().render_pass.is_some()
    }
}

#[cfg(test)]
mod tests {
    use crate::render_pass::{RenderPassAccess, RenderPassBeginAccess, RenderPassEndAccess};

    #[test]
    fn access_packs_into_nibbles() {
        let access = RenderPassAccess::CLEAR_RESOLVE;
        assert_eq!(access.bits(), 0x22);
        assert_eq!(access.begin(), RenderPassBeginAccess::Clear);
        assert_eq!(access.end(), RenderPassEndAccess::Resolve);

        let access = RenderPassAccess::new(RenderPassBeginAccess::NoAccess, RenderPassEndAccess::Store);
        assert_eq!(access.bits(), 0x13);
        assert_eq!(format!("{:?}", access), "NoAccess/Store");
    }
}
