use crate::buffer::{BufferDesc, BufferFlag};
use crate::command_signature::CommandSignatureBuilder;
use crate::context::CommandContext;
use crate::device::{GraphicsDevice, GraphicsDeviceDesc, GraphicsDeviceOptions};
use crate::fence::{fence_value_counter, fence_value_queue_type};
use crate::render_pass::{DepthStencilAttachment, RenderPassAccess, RenderPassInfo, RenderTargetAttachment};
use crate::resource::AsGraphicsResource;
use crate::texture::{TextureDesc, TextureFlag};
use raw_window_handle::{RawWindowHandle, Win32WindowHandle};
use std::sync::Arc;
use ze_core::command_line::CommandLine;
use ze_core::logger::{MemorySink, Severity};
use ze_gfx::backend::{
    ClearFlagBits, ClearValue, DescriptorHeapType, DescriptorRange, DescriptorRangeType,
    DeviceCapabilities, PipelineBindPoint, QueueType, ResourceStates, RootParameter,
    RootSignatureDesc, ShaderVisibility, SwapChainDesc, ALL_SUBRESOURCES, DESCRIPTOR_RANGE_OFFSET_APPEND,
};
use ze_gfx::null::{Command, ExecutedCommandList, NullDevice, RecordedBarrier};
use ze_gfx::{PixelFormat, SampleDesc};

fn device_with(null: &Arc<NullDevice>, desc: GraphicsDeviceDesc) -> GraphicsDevice {
    GraphicsDevice::new(null.clone(), desc).unwrap()
}

fn device() -> (Arc<NullDevice>, GraphicsDevice) {
    let null = Arc::new(NullDevice::new());
    let device = device_with(&null, GraphicsDeviceDesc::default());
    (null, device)
}

fn uav_buffer(device: &GraphicsDevice, name: &str) -> Arc<crate::Buffer> {
    device
        .create_buffer(
            BufferDesc::structured(16, 64, BufferFlag::UnorderedAccess | BufferFlag::ShaderResource),
            name,
        )
        .unwrap()
}

fn last_submission(null: &NullDevice, ty: QueueType) -> Vec<ExecutedCommandList> {
    null.submissions(ty).pop().unwrap_or_default()
}

fn transition(
    null: &NullDevice,
    resource: &impl AsGraphicsResource,
    subresource: u32,
    before: ResourceStates,
    after: ResourceStates,
) -> RecordedBarrier {
    RecordedBarrier::Transition {
        resource: null.resource_id(resource.graphics_resource().raw()),
        subresource,
        before,
        after,
    }
}

fn barriers(list: &ExecutedCommandList) -> Vec<RecordedBarrier> {
    list.commands
        .iter()
        .filter_map(|command| match command {
            Command::ResourceBarrier(barriers) => Some(barriers.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn first_use_is_resolved_in_a_prelude() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Particles");

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    context.dispatch(4, 1, 1);
    let fence_value = context.execute(false);

    assert_eq!(fence_value_queue_type(fence_value), QueueType::Direct);
    assert_eq!(fence_value_counter(fence_value), 1);

    let submission = last_submission(&null, QueueType::Direct);
    assert_eq!(submission.len(), 2);
    assert_eq!(submission[0].name, "Barrier Prelude");
    assert_eq!(
        barriers(&submission[0]),
        vec![transition(
            &null,
            &buffer,
            ALL_SUBRESOURCES,
            ResourceStates::COMMON,
            ResourceStates::UNORDERED_ACCESS
        )]
    );

    // The context itself records no barrier for a first use
    assert!(barriers(&submission[1]).is_empty());
    assert!(submission[1]
        .commands
        .contains(&Command::Dispatch { x: 4, y: 1, z: 1 }));
    assert_eq!(
        buffer.graphics_resource().global_state().get(0),
        ResourceStates::UNORDERED_ACCESS
    );
}

#[test]
fn batched_contexts_resolve_against_each_other() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Shared");

    let mut writer = device.allocate_context(QueueType::Direct).unwrap();
    writer.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    let mut reader = device.allocate_context(QueueType::Direct).unwrap();
    reader.insert_resource_barrier(
        &buffer,
        ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        ALL_SUBRESOURCES,
    );

    CommandContext::execute_many(vec![writer, reader], false);

    let submission = last_submission(&null, QueueType::Direct);
    let names: Vec<&str> = submission.iter().map(|list| list.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Barrier Prelude",
            "Direct Command List",
            "Barrier Prelude",
            "Direct Command List"
        ]
    );
    assert_eq!(
        barriers(&submission[2]),
        vec![transition(
            &null,
            &buffer,
            ALL_SUBRESOURCES,
            ResourceStates::UNORDERED_ACCESS,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE
        )]
    );
    assert_eq!(
        buffer.graphics_resource().global_state().get(0),
        ResourceStates::NON_PIXEL_SHADER_RESOURCE
    );
}

#[test]
fn matching_global_state_needs_no_prelude() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let mut context = device.allocate_context(QueueType::Compute).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    context.execute(false);

    let mut context = device.allocate_context(QueueType::Compute).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    context.execute(false);

    let submission = last_submission(&null, QueueType::Compute);
    assert_eq!(submission.len(), 1);
    assert_eq!(submission[0].name, "Compute Command List");
}

#[test]
fn known_states_transition_inside_the_context() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    context.insert_resource_barrier(&buffer, ResourceStates::COPY_SOURCE, ALL_SUBRESOURCES);
    assert_eq!(
        context.resource_state(&buffer, 0),
        ResourceStates::COPY_SOURCE
    );
    context.execute(false);

    let submission = last_submission(&null, QueueType::Direct);
    assert_eq!(
        barriers(&submission[1]),
        vec![transition(
            &null,
            &buffer,
            ALL_SUBRESOURCES,
            ResourceStates::UNORDERED_ACCESS,
            ResourceStates::COPY_SOURCE
        )]
    );
}

#[test]
fn read_states_are_combined() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(
        &buffer,
        ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        ALL_SUBRESOURCES,
    );
    context.insert_resource_barrier(&buffer, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);

    let combined =
        ResourceStates::NON_PIXEL_SHADER_RESOURCE | ResourceStates::PIXEL_SHADER_RESOURCE;
    assert_eq!(context.resource_state(&buffer, 0), combined);

    // Already covered by the combined state
    context.insert_resource_barrier(
        &buffer,
        ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        ALL_SUBRESOURCES,
    );
    context.execute(false);

    let submission = last_submission(&null, QueueType::Direct);
    assert_eq!(
        barriers(&submission[1]),
        vec![transition(
            &null,
            &buffer,
            ALL_SUBRESOURCES,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            combined
        )]
    );
}

#[test]
fn untouched_resources_fall_back_to_the_global_state() {
    let (_null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let context = device.allocate_context(QueueType::Direct).unwrap();
    assert!(context.resource_state(&buffer, 0).is_unknown());
    assert_eq!(
        context.resource_state_with_fallback(&buffer, 0),
        ResourceStates::COMMON
    );
}

#[test]
fn texture_subresources_are_tracked_separately() {
    let (null, device) = device();
    let texture = device
        .create_texture(
            TextureDesc {
                mip_levels: 3,
                ..TextureDesc::texture_2d(64, 64, PixelFormat::R8G8B8A8Unorm, TextureFlag::ShaderResource.into())
            },
            "Mipped",
        )
        .unwrap();

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&texture, ResourceStates::COPY_DEST, 1);
    context.execute(false);

    let global = texture.graphics_resource().global_state();
    assert_eq!(global.get(0), ResourceStates::COMMON);
    assert_eq!(global.get(1), ResourceStates::COPY_DEST);
    assert_eq!(global.get(2), ResourceStates::COMMON);

    // A whole-resource request expands to every subresource that differs
    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&texture, ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);
    context.execute(false);

    let submission = last_submission(&null, QueueType::Direct);
    assert_eq!(
        barriers(&submission[0]),
        (0..3)
            .map(|subresource| transition(
                &null,
                &texture,
                subresource,
                if subresource == 1 {
                    ResourceStates::COPY_DEST
                } else {
                    ResourceStates::COMMON
                },
                ResourceStates::PIXEL_SHADER_RESOURCE
            ))
            .collect::<Vec<_>>()
    );
    assert!(texture.graphics_resource().global_state().is_uniform());
}

#[test]
fn depth_stencil_textures_track_the_stencil_plane() {
    let (_null, device) = device();
    let texture = device
        .create_texture(
            TextureDesc {
                mip_levels: 2,
                ..TextureDesc::texture_2d(64, 64, PixelFormat::D24UnormS8Uint, TextureFlag::DepthStencil.into())
            },
            "ShadowMap",
        )
        .unwrap();

    assert_eq!(texture.desc().subresource_count(), 4);
    assert_eq!(texture.graphics_resource().global_state().subresource_count(), 4);
    assert_eq!(texture.plane_subresource_index(0, 0, 1), 2);
    assert_eq!(texture.plane_subresource_index(1, 0, 1), 3);

    let stencil = texture.plane_subresource_index(0, 0, 1);
    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&texture, ResourceStates::PIXEL_SHADER_RESOURCE, stencil);
    context.execute(false);

    let global = texture.graphics_resource().global_state();
    assert_eq!(global.get(0), ResourceStates::DEPTH_WRITE);
    assert_eq!(global.get(stencil), ResourceStates::PIXEL_SHADER_RESOURCE);
    assert_eq!(global.get(3), ResourceStates::DEPTH_WRITE);
}

#[test]
fn scoped_barrier_restores_the_previous_state() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    {
        let _scope = context.scoped_barrier(&buffer, ResourceStates::COPY_SOURCE);
    }
    assert_eq!(
        context.resource_state(&buffer, 0),
        ResourceStates::UNORDERED_ACCESS
    );
    context.execute(false);

    // The pair cancels out in the batcher
    let submission = last_submission(&null, QueueType::Direct);
    assert!(barriers(&submission[1]).is_empty());
}

#[test]
fn dynamic_constant_buffers_use_upload_memory() {
    let (null, device) = device();
    let mut context = device.allocate_context(QueueType::Compute).unwrap();

    let first = context.allocate_upload(16, 4).unwrap();
    let data: Vec<u8> = (0..64).collect();
    context
        .set_dynamic_constant_buffer_view(PipelineBindPoint::Compute, 2, &data)
        .unwrap();
    context.execute(true);

    let expected_address = first.gpu_address() + 256;
    assert!(null
        .executed_commands(QueueType::Compute)
        .contains(&Command::SetRootConstantBufferView {
            bind_point: PipelineBindPoint::Compute,
            root_index: 2,
            address: expected_address,
        }));

    let page = null.read_buffer(first.resource());
    let offset = (first.offset() + 256) as usize;
    assert_eq!(&page[offset..offset + data.len()], data.as_slice());
}

#[test]
fn buffer_initialization_goes_through_upload_memory() {
    let (null, device) = device();
    let buffer = device
        .create_buffer(BufferDesc::byte_address(256, BufferFlag::ShaderResource.into()), "Vertices")
        .unwrap();

    let data: Vec<u8> = (0..128).map(|i| i as u8).collect();
    let mut context = device.allocate_context(QueueType::Copy).unwrap();
    context.initialize_buffer(&buffer, 64, &data).unwrap();
    context.execute(true);

    let contents = null.read_buffer(buffer.graphics_resource().raw());
    assert_eq!(&contents[64..192], data.as_slice());
    assert_eq!(
        buffer.graphics_resource().global_state().get(0),
        ResourceStates::COMMON
    );
}

#[test]
fn mapped_buffers_are_written_directly() {
    let (null, device) = device();
    let buffer = device.create_buffer(BufferDesc::upload(64), "Staging").unwrap();

    let mut context = device.allocate_context(QueueType::Copy).unwrap();
    context.initialize_buffer(&buffer, 0, &[7; 64]).unwrap();
    context.execute(false);

    assert_eq!(null.read_buffer(buffer.graphics_resource().raw()), vec![7; 64]);
    assert!(last_submission(&null, QueueType::Copy)[0].commands.is_empty());
}

#[test]
#[should_panic(expected = "cannot be transitioned")]
fn copy_queues_reject_shader_states() {
    let (_null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");
    let mut context = device.allocate_context(QueueType::Copy).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
}

#[test]
#[should_panic(expected = "not supported on a Compute queue")]
fn compute_queues_cannot_draw() {
    let (_null, device) = device();
    let mut context = device.allocate_context(QueueType::Compute).unwrap();
    context.draw(3, 0);
}

#[test]
fn contexts_are_recycled() {
    let (null, device) = device();

    let context = device.allocate_context(QueueType::Direct).unwrap();
    context.execute(false);
    let context = device.allocate_context(QueueType::Direct).unwrap();
    context.execute(false);

    // Executed twice through the same list, each time with the descriptor heaps bound
    let submissions = null.submissions(QueueType::Direct);
    assert_eq!(submissions.len(), 2);
    for submission in &submissions {
        assert!(matches!(
            submission[0].commands.first(),
            Some(Command::SetDescriptorHeaps(heaps)) if heaps.len() == 2
        ));
    }

    // Copy queues cannot see shader visible heaps
    let context = device.allocate_context(QueueType::Copy).unwrap();
    context.execute(false);
    assert!(last_submission(&null, QueueType::Copy)[0].commands.is_empty());
}

#[test]
fn discarded_contexts_never_reach_the_queue() {
    let (null, device) = device();
    let buffer = uav_buffer(&device, "Buffer");

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
    drop(context);

    assert!(null.submissions(QueueType::Direct).is_empty());
    assert_eq!(
        buffer.graphics_resource().global_state().get(0),
        ResourceStates::COMMON
    );

    // The pooled state is usable again
    let context = device.allocate_context(QueueType::Direct).unwrap();
    context.execute(false);
    assert_eq!(null.submissions(QueueType::Direct).len(), 1);
}

#[test]
fn queue_waits_use_the_signaling_fence() {
    let (null, device) = device();

    let context = device.allocate_context(QueueType::Compute).unwrap();
    let fence_value = context.execute(false);

    let direct = device.queue(QueueType::Direct);
    direct.insert_wait_for_fence(fence_value);

    let compute_fence = device.queue(QueueType::Compute).fence();
    assert_eq!(
        null.queue_waits(QueueType::Direct),
        vec![(null.fence_id(compute_fence.raw()), fence_value)]
    );
    assert!(direct.is_fence_complete(fence_value));
}

#[test]
fn command_allocators_wait_for_their_submission() {
    let null = Arc::new(NullDevice::new());
    null.set_auto_complete(false);
    let device = device_with(&null, GraphicsDeviceDesc::default());

    let context = device.allocate_context(QueueType::Direct).unwrap();
    let fence_value = context.execute(false);
    assert!(!device.queue(QueueType::Direct).is_fence_complete(fence_value));

    // The first allocator is still in flight, a second one gets created
    let context = device.allocate_context(QueueType::Direct).unwrap();
    assert_eq!(device.queue(QueueType::Direct).allocator_count(), 2);
    drop(context);

    null.complete_all_fences();
    let context = device.allocate_context(QueueType::Direct).unwrap();
    assert_eq!(device.queue(QueueType::Direct).allocator_count(), 2);
    context.execute(true);
}

#[test]
fn emulated_render_pass_clears_attachments() {
    let null = Arc::new(NullDevice::new());
    null.set_capabilities(DeviceCapabilities {
        render_passes: false,
        mesh_shaders: true,
        raytracing: true,
        variable_rate_shading: true,
    });
    let device = device_with(&null, GraphicsDeviceDesc::default());

    let color = device
        .create_texture(
            TextureDesc {
                clear_value: Some(ClearValue::Color([0.1, 0.2, 0.3, 1.0])),
                ..TextureDesc::texture_2d(
                    320,
                    240,
                    PixelFormat::R8G8B8A8Unorm,
                    TextureFlag::RenderTarget.into(),
                )
            },
            "Color",
        )
        .unwrap();
    let depth = device
        .create_texture(
            TextureDesc {
                clear_value: Some(ClearValue::DepthStencil((0.0, 0))),
                ..TextureDesc::texture_2d(
                    320,
                    240,
                    PixelFormat::D32Float,
                    TextureFlag::DepthStencil.into(),
                )
            },
            "Depth",
        )
        .unwrap();

    let info = RenderPassInfo::new()
        .render_target(RenderTargetAttachment::new(color.clone(), RenderPassAccess::CLEAR_STORE))
        .depth_stencil(DepthStencilAttachment {
            texture: depth.clone(),
            access: RenderPassAccess::CLEAR_STORE,
            stencil_access: RenderPassAccess::CLEAR_STORE,
            write: true,
        });

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.begin_render_pass(&info).unwrap();
    assert!(context.is_in_render_pass());
    context.draw(3, 0);
    context.end_render_pass();
    context.execute(false);

    let rtv = color.rtv(0, 0).unwrap();
    let dsv = depth.dsv(0, 0).unwrap();
    let commands = null.executed_commands(QueueType::Direct);
    assert!(commands.contains(&Command::ClearRenderTargetView {
        rtv,
        color: [0.1, 0.2, 0.3, 1.0],
    }));

    // D32 has no stencil plane to clear
    assert!(commands.contains(&Command::ClearDepthStencilView {
        dsv,
        flags: ClearFlagBits::Depth.into(),
        depth: 0.0,
        stencil: 0,
    }));
    assert!(commands.contains(&Command::SetRenderTargets {
        render_targets: vec![rtv],
        depth_stencil: Some(dsv),
    }));
    assert!(!commands
        .iter()
        .any(|command| matches!(command, Command::BeginRenderPass { .. } | Command::EndRenderPass)));
}

#[test]
fn native_render_pass_is_recorded() {
    let (null, device) = device();
    let color = device
        .create_texture(
            TextureDesc::texture_2d(64, 64, PixelFormat::R8G8B8A8Unorm, TextureFlag::RenderTarget.into()),
            "Color",
        )
        .unwrap();

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context
        .begin_render_pass(
            &RenderPassInfo::new()
                .render_target(RenderTargetAttachment::new(color.clone(), RenderPassAccess::LOAD_STORE)),
        )
        .unwrap();
    context.end_render_pass();
    context.execute(false);

    let commands = null.executed_commands(QueueType::Direct);
    assert!(commands
        .iter()
        .any(|command| matches!(command, Command::BeginRenderPass { render_targets, .. } if render_targets.len() == 1)));
    assert!(commands.contains(&Command::EndRenderPass));
    assert_eq!(
        color.graphics_resource().global_state().get(0),
        ResourceStates::RENDER_TARGET
    );
}

#[test]
fn resolve_targets_are_written_after_the_pass() {
    let (null, device) = device();
    let msaa = device
        .create_texture(
            TextureDesc {
                sample_count: 4,
                ..TextureDesc::texture_2d(64, 64, PixelFormat::R8G8B8A8Unorm, TextureFlag::RenderTarget.into())
            },
            "MSAA",
        )
        .unwrap();
    let resolved = device
        .create_texture(
            TextureDesc::texture_2d(64, 64, PixelFormat::R8G8B8A8Unorm, TextureFlag::ShaderResource.into()),
            "Resolved",
        )
        .unwrap();

    let mut attachment = RenderTargetAttachment::new(msaa.clone(), RenderPassAccess::CLEAR_RESOLVE);
    attachment.resolve_target = Some(resolved.clone());

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context
        .begin_render_pass(&RenderPassInfo::new().render_target(attachment))
        .unwrap();
    context.end_render_pass();
    context.execute(false);

    let commands = null.executed_commands(QueueType::Direct);
    let end = commands
        .iter()
        .position(|command| *command == Command::EndRenderPass)
        .unwrap();
    let resolve = commands
        .iter()
        .position(|command| matches!(command, Command::ResolveSubresource { .. }))
        .unwrap();
    assert!(resolve > end);
    assert_eq!(
        resolved.graphics_resource().global_state().get(0),
        ResourceStates::RESOLVE_DEST
    );
}

#[test]
#[should_panic(expected = "render pass already open")]
fn render_passes_cannot_nest() {
    let (_null, device) = device();
    let color = device
        .create_texture(
            TextureDesc::texture_2d(8, 8, PixelFormat::R8G8B8A8Unorm, TextureFlag::RenderTarget.into()),
            "Color",
        )
        .unwrap();
    let info = RenderPassInfo::new()
        .render_target(RenderTargetAttachment::new(color, RenderPassAccess::DONT_CARE_STORE));

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.begin_render_pass(&info).unwrap();
    let _ = context.begin_render_pass(&info);
}

#[test]
#[should_panic(expected = "without an open render pass")]
fn ending_a_missing_render_pass_panics() {
    let (_null, device) = device();
    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.end_render_pass();
}

#[test]
#[should_panic(expected = "render pass still open")]
fn executing_inside_a_render_pass_panics() {
    let (_null, device) = device();
    let color = device
        .create_texture(
            TextureDesc::texture_2d(8, 8, PixelFormat::R8G8B8A8Unorm, TextureFlag::RenderTarget.into()),
            "Color",
        )
        .unwrap();

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context
        .begin_render_pass(
            &RenderPassInfo::new()
                .render_target(RenderTargetAttachment::new(color, RenderPassAccess::CLEAR_STORE)),
        )
        .unwrap();
    context.execute(false);
}

#[test]
fn indirect_arguments_are_transitioned() {
    let (null, device) = device();
    let arguments = device
        .create_buffer(
            BufferDesc::byte_address(1024, BufferFlag::IndirectArguments | BufferFlag::UnorderedAccess),
            "Arguments",
        )
        .unwrap();
    let signature = device
        .create_command_signature(CommandSignatureBuilder::new().add_dispatch(), None)
        .unwrap();

    let mut context = device.allocate_context(QueueType::Compute).unwrap();
    context.execute_indirect(&signature, 8, &arguments, 0, None, 0);
    context.execute(false);

    let submission = last_submission(&null, QueueType::Compute);
    assert_eq!(
        barriers(&submission[0]),
        vec![transition(
            &null,
            &arguments,
            ALL_SUBRESOURCES,
            ResourceStates::COMMON,
            ResourceStates::INDIRECT_ARGUMENT
        )]
    );
    assert!(submission[1].commands.iter().any(|command| matches!(
        command,
        Command::ExecuteIndirect { max_command_count: 8, count_buffer: None, .. }
    )));
}

#[test]
fn persistent_descriptors_wait_for_the_frame() {
    let (_null, device) = device();
    let desc = TextureDesc::texture_2d(4, 4, PixelFormat::R8G8B8A8Unorm, TextureFlag::ShaderResource.into());

    let first = device.create_texture(desc, "First").unwrap();
    let index = first.bindless_srv().unwrap();
    drop(first);

    let second = device.create_texture(desc, "Second").unwrap();
    assert_ne!(second.bindless_srv(), Some(index));

    device.end_frame();
    let third = device.create_texture(desc, "Third").unwrap();
    assert_eq!(third.bindless_srv(), Some(index));
}

#[test]
fn dropped_resources_are_released_at_frame_end() {
    let null = Arc::new(NullDevice::new());
    let baseline = null.live_resource_count();
    {
        let device = device_with(&null, GraphicsDeviceDesc::default());
        let buffer = uav_buffer(&device, "Transient");
        let kept = uav_buffer(&device, "Kept");

        let mut context = device.allocate_context(QueueType::Direct).unwrap();
        context.insert_resource_barrier(&buffer, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
        context.set_dynamic_constant_buffer_view(PipelineBindPoint::Compute, 0, &[0; 16]).unwrap();
        context.execute(false);

        let before_drop = null.live_resource_count();
        drop(buffer);
        assert_eq!(null.live_resource_count(), before_drop);
        assert_eq!(device.deferred_delete_queue().len(), 1);

        device.end_frame();
        assert_eq!(null.live_resource_count(), before_drop - 1);
        assert!(device.deferred_delete_queue().is_empty());

        // Still queued at shutdown, released when the device goes away
        drop(kept);
        assert_eq!(device.deferred_delete_queue().len(), 1);
    }
    assert_eq!(null.live_resource_count(), baseline);
}

#[test]
fn deletes_keep_the_frame_they_were_dropped_in() {
    let null = Arc::new(NullDevice::new());
    let baseline = null.live_resource_count();
    let device = device_with(&null, GraphicsDeviceDesc::default());
    null.set_auto_complete(false);

    let first = uav_buffer(&device, "First");
    let second = uav_buffer(&device, "Second");
    drop(first);
    device.end_frame();
    drop(second);

    let deletes = device.deferred_delete_queue().clone();
    let values = deletes.pending_fence_values();
    assert_eq!(values.len(), 2);
    assert!(values[0] < values[1]);

    // Neither frame completed, shutdown still releases both
    drop(device);
    assert!(deletes.is_empty());
    assert_eq!(null.live_resource_count(), baseline);
}

#[test]
fn switching_bind_points_restages_the_root_signature() {
    let (null, device) = device();
    let graphics = device
        .create_root_signature(
            RootSignatureDesc {
                parameters: vec![
                    RootParameter::ConstantBufferView {
                        shader_register: 0,
                        register_space: 0,
                        visibility: ShaderVisibility::All,
                    },
                    RootParameter::DescriptorTable {
                        ranges: vec![DescriptorRange {
                            ty: DescriptorRangeType::Srv,
                            num_descriptors: 4,
                            base_shader_register: 0,
                            register_space: 0,
                            offset_in_descriptors_from_table_start: DESCRIPTOR_RANGE_OFFSET_APPEND,
                        }],
                        visibility: ShaderVisibility::Pixel,
                    },
                ],
                ..Default::default()
            },
            "Graphics",
        )
        .unwrap();
    let compute = device
        .create_root_signature(
            RootSignatureDesc {
                parameters: vec![RootParameter::Constants {
                    shader_register: 0,
                    register_space: 0,
                    num_32bit_values: 4,
                    visibility: ShaderVisibility::All,
                }],
                ..Default::default()
            },
            "Compute",
        )
        .unwrap();
    let texture_view = device.offline_allocator(DescriptorHeapType::View).allocate().unwrap();

    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context.set_graphics_root_signature(&graphics);
    context.set_compute_root_signature(&compute);
    context.set_root_constants(PipelineBindPoint::Compute, 0, &[1, 2, 3, 4], 0);
    context.dispatch(1, 1, 1);

    // Already bound on the graphics bind point, the staged table layout must follow it again
    context.set_graphics_root_signature(&graphics);
    context.set_descriptors(1, 0, &[texture_view]);
    context.draw(3, 0);
    context.execute(false);

    let submission = last_submission(&null, QueueType::Direct);
    let commands = submission.iter().flat_map(|list| list.commands.iter());
    let graphics_sets = commands
        .clone()
        .filter(|command| {
            matches!(
                command,
                Command::SetRootSignature { bind_point: PipelineBindPoint::Graphics, .. }
            )
        })
        .count();
    assert_eq!(graphics_sets, 1);
    assert!(commands.clone().any(|command| matches!(
        command,
        Command::SetRootDescriptorTable { bind_point: PipelineBindPoint::Graphics, root_index: 1, .. }
    )));
}

#[test]
fn frames_in_flight_are_throttled() {
    let null = Arc::new(NullDevice::new());
    null.set_auto_complete(false);
    let device = device_with(
        &null,
        GraphicsDeviceDesc {
            max_frames_in_flight: 2,
            ..Default::default()
        },
    );

    let frame_fence = device.frame_fence().clone();
    let first = frame_fence.next_value();
    device.end_frame();
    device.end_frame();
    assert!(!frame_fence.is_complete(first));

    // A third frame cannot start before the first one completed
    device.end_frame();
    assert!(frame_fence.is_complete(first));
    assert!(!frame_fence.is_complete(first + 1));
}

#[test]
fn async_queues_are_covered_by_the_frame_fence() {
    let null = Arc::new(NullDevice::new());
    null.set_auto_complete(false);
    let device = device_with(&null, GraphicsDeviceDesc::default());

    let context = device.allocate_context(QueueType::Copy).unwrap();
    let fence_value = context.execute(false);
    device.end_frame();

    let copy_fence = device.queue(QueueType::Copy).fence();
    assert_eq!(
        null.queue_waits(QueueType::Direct),
        vec![(null.fence_id(copy_fence.raw()), fence_value)]
    );
}

#[test]
fn device_removal_is_fatal() {
    let null = Arc::new(NullDevice::new());
    let sink = MemorySink::new();
    let device = device_with(
        &null,
        GraphicsDeviceDesc {
            log_sink: Some(sink.clone()),
            ..Default::default()
        },
    );

    null.simulate_device_removed("page fault on Buffer 12");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| device.end_frame()));
    assert!(result.is_err());
    assert!(sink.contains(Severity::Fatal, "page fault on Buffer 12"));
}

#[test]
fn swapchain_backbuffers_follow_presents() {
    let (null, device) = device();
    let mut swapchain = device
        .create_swapchain(SwapChainDesc {
            width: 1280,
            height: 720,
            format: PixelFormat::B8G8R8A8Unorm,
            buffer_count: 3,
            sample_desc: SampleDesc::default(),
            window_handle: RawWindowHandle::Win32(Win32WindowHandle::empty()),
        })
        .unwrap();

    assert_eq!(swapchain.backbuffers().len(), 3);
    assert_eq!(swapchain.current_backbuffer_index(), 0);

    let backbuffer = swapchain.current_backbuffer().clone();
    let mut context = device.allocate_context(QueueType::Direct).unwrap();
    context
        .begin_render_pass(
            &RenderPassInfo::new()
                .render_target(RenderTargetAttachment::new(backbuffer.clone(), RenderPassAccess::CLEAR_STORE)),
        )
        .unwrap();
    context.end_render_pass();
    context.insert_resource_barrier(&backbuffer, ResourceStates::PRESENT, ALL_SUBRESOURCES);
    context.execute(false);
    drop(backbuffer);

    let submission = last_submission(&null, QueueType::Direct);
    assert_eq!(submission[0].name, "Barrier Prelude");

    swapchain.present(true).unwrap();
    assert_eq!(null.swapchain_present_count(swapchain.raw()), 1);
    assert_eq!(swapchain.current_backbuffer_index(), 1);

    swapchain.resize(&device, 640, 480).unwrap();
    assert_eq!(swapchain.current_backbuffer_index(), 0);
    assert_eq!(swapchain.current_backbuffer().desc().width, 640);
}

#[test]
fn options_come_from_the_command_line() {
    let command_line = CommandLine::parse(["-debuggerwait", "--stablepowerstate", "-d3dbreakvalidation"]);
    let options = GraphicsDeviceOptions::from_command_line(&command_line);
    assert!(options.wait_for_debugger);
    assert!(options.stable_power_state);
    assert!(!options.shader_hot_reload);

    let device_options = options.to_device_options();
    assert!(device_options.break_on_validation);
    assert!(device_options.enable_debug_layer);
}
