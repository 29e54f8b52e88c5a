//! Command contexts record work for one queue.
//!
//! Each context tracks the states it moves resources into without looking at other
//! contexts. The first time a subresource is used its previous state is unknown, the
//! transition is kept as a pending barrier and resolved by the queue at submission time
//! against the global state left by earlier submissions.

mod scoped_barrier;
pub(crate) mod state;

pub use scoped_barrier::ScopedBarrier;

use crate::buffer::Buffer;
use crate::command_signature::CommandSignature;
use crate::device::GraphicsDevice;
use crate::dynamic_allocator::DynamicAllocation;
use crate::pipeline::{PipelineState, StateObject};
use crate::resource::{AsGraphicsResource, GraphicsResource, ShaderResource};
use crate::root_signature::RootSignature;
use crate::shader_binding_table::ShaderBindingTable;
use crate::texture::Texture;
use state::ContextState;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use ze_core::ze_error;
use ze_gfx::backend;
use ze_gfx::backend::{
    CopyBox, CpuDescriptorHandle, DeviceError, IndexBufferFormat, IndexBufferView,
    PipelineBindPoint, PlacedSubresourceFootprint, PrimitiveTopology, QueueType, Rect,
    ResourceStates, ShadingRate, ShadingRateCombiner, TextureCopyLocation, VertexBufferView,
    Viewport, ALL_SUBRESOURCES,
};
use ze_gfx::utils::{CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT, TEXTURE_DATA_PLACEMENT_ALIGNMENT};
use ze_gfx::PixelFormat;

/// Initial data of one texture subresource
#[derive(Copy, Clone, Debug)]
pub struct SubresourceData<'a> {
    pub data: &'a [u8],
    pub row_pitch: u64,
    pub slice_pitch: u64,
}

pub struct CommandContext<'d> {
    device: &'d GraphicsDevice,
    state: ManuallyDrop<ContextState>,
}

impl<'d> CommandContext<'d> {
    pub(crate) fn new(device: &'d GraphicsDevice, state: ContextState) -> Self {
        Self {
            device,
            state: ManuallyDrop::new(state),
        }
    }

    pub fn device(&self) -> &'d GraphicsDevice {
        self.device
    }

    pub fn queue_type(&self) -> QueueType {
        self.state.queue_type
    }

    pub(crate) fn state_mut(&mut self) -> &mut ContextState {
        &mut self.state
    }

    pub(crate) fn state(&self) -> &ContextState {
        &self.state
    }

    fn assert_queue(&self, operation: &str, allowed: &[QueueType]) {
        assert!(
            allowed.contains(&self.state.queue_type),
            "{} is not supported on a {} queue",
            operation,
            self.state.queue_type
        );
    }

    /** Resource states */

    pub fn insert_resource_barrier(
        &mut self,
        resource: &impl AsGraphicsResource,
        state: ResourceStates,
        subresource: u32,
    ) {
        let device = self.device.raw();
        self.state
            .transition(&**device, resource.graphics_resource(), state, subresource);
    }

    /// Order unordered accesses to `resource` before the next ones
    pub fn insert_uav_barrier(&mut self, resource: &impl AsGraphicsResource) {
        let device = self.device.raw();
        let ContextState {
            batcher,
            command_list,
            ..
        } = &mut *self.state;
        batcher.add_uav(&**device, command_list, Some(resource.graphics_resource()));
    }

    /// Order every unordered access before the next ones
    pub fn insert_global_uav_barrier(&mut self) {
        let device = self.device.raw();
        let ContextState {
            batcher,
            command_list,
            ..
        } = &mut *self.state;
        batcher.add_uav(&**device, command_list, None);
    }

    pub fn flush_resource_barriers(&mut self) {
        self.state.flush_barriers(&**self.device.raw());
    }

    /// State this context left the subresource in, `UNKNOWN` when it did not use it
    pub fn resource_state(&self, resource: &impl AsGraphicsResource, subresource: u32) -> ResourceStates {
        self.state
            .local_state(resource.graphics_resource(), subresource)
    }

    /// Like [`CommandContext::resource_state`] but falls back to the state of the last
    /// submission when this context did not use the subresource
    pub fn resource_state_with_fallback(
        &self,
        resource: &impl AsGraphicsResource,
        subresource: u32,
    ) -> ResourceStates {
        let resource = resource.graphics_resource();
        let local = self.state.local_state(resource, subresource);
        if local.is_unknown() {
            resource.global_state().get(subresource)
        } else {
            local
        }
    }

    /// Transition `resource` to `state` until the returned guard is dropped
    pub fn scoped_barrier<'c>(
        &'c mut self,
        resource: &impl AsGraphicsResource,
        state: ResourceStates,
    ) -> ScopedBarrier<'c, 'd> {
        let resource = resource.graphics_resource().clone();
        let states: Vec<ResourceStates> = (0..resource.subresource_count())
            .map(|subresource| self.resource_state_with_fallback(&resource, subresource))
            .collect();

        let previous = if states.iter().all(|state| *state == states[0]) {
            vec![(ALL_SUBRESOURCES, states[0])]
        } else {
            states.into_iter().enumerate().map(|(i, state)| (i as u32, state)).collect()
        };

        self.insert_resource_barrier(&resource, state, ALL_SUBRESOURCES);
        ScopedBarrier::new(self, resource, previous)
    }

    /** Root bindings */

    pub fn set_graphics_root_signature(&mut self, root_signature: &Arc<RootSignature>) {
        self.assert_queue("graphics root signature", &[QueueType::Direct]);
        if !matches!(&self.state.graphics_root_signature, Some(current) if Arc::ptr_eq(current, root_signature))
        {
            let device = self.device.raw();
            device.cmd_set_root_signature(
                &mut self.state.command_list,
                PipelineBindPoint::Graphics,
                root_signature.raw(),
            );
            self.state.graphics_root_signature = Some(root_signature.clone());
        }

        self.parse_staged_root_signature(root_signature);
    }

    pub fn set_compute_root_signature(&mut self, root_signature: &Arc<RootSignature>) {
        self.assert_queue("compute root signature", &[QueueType::Direct, QueueType::Compute]);
        if !matches!(&self.state.compute_root_signature, Some(current) if Arc::ptr_eq(current, root_signature))
        {
            let device = self.device.raw();
            device.cmd_set_root_signature(
                &mut self.state.command_list,
                PipelineBindPoint::Compute,
                root_signature.raw(),
            );
            self.state.compute_root_signature = Some(root_signature.clone());
        }

        self.parse_staged_root_signature(root_signature);
    }

    /// The staging allocators hold a single layout, re-parse whenever the last bound
    /// signature of either bind point changes
    fn parse_staged_root_signature(&mut self, root_signature: &Arc<RootSignature>) {
        let state = &mut *self.state;
        if matches!(&state.staged_root_signature, Some(current) if Arc::ptr_eq(current, root_signature))
        {
            return;
        }

        state.view_allocator.parse_root_signature(root_signature);
        state.sampler_allocator.parse_root_signature(root_signature);
        state.staged_root_signature = Some(root_signature.clone());
    }

    /// Binds the root signature of the pipeline too
    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        if pipeline.is_compute() {
            self.set_compute_root_signature(pipeline.root_signature());
        } else {
            self.set_graphics_root_signature(pipeline.root_signature());
        }

        let device = self.device.raw();
        device.cmd_set_pipeline_state(&mut self.state.command_list, pipeline.raw());
    }

    pub fn set_state_object(&mut self, state_object: &StateObject) {
        self.assert_queue("ray tracing", &[QueueType::Direct, QueueType::Compute]);
        let device = self.device.raw();
        device.cmd_set_state_object(&mut self.state.command_list, state_object.raw());
    }

    /// Stage shader resource, unordered access or constant buffer views in a descriptor table
    pub fn set_descriptors(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptorHandle]) {
        self.state
            .view_allocator
            .set_descriptors(root_index, offset, handles);
    }

    pub fn set_samplers(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptorHandle]) {
        self.state
            .sampler_allocator
            .set_descriptors(root_index, offset, handles);
    }

    pub fn set_root_constants(
        &mut self,
        bind_point: PipelineBindPoint,
        root_index: u32,
        values: &[u32],
        dest_offset: u32,
    ) {
        let device = self.device.raw();
        device.cmd_set_root_32bit_constants(
            &mut self.state.command_list,
            bind_point,
            root_index,
            values,
            dest_offset,
        );
    }

    pub fn set_root_constant_buffer_view(&mut self, bind_point: PipelineBindPoint, root_index: u32, address: u64) {
        let device = self.device.raw();
        device.cmd_set_root_constant_buffer_view(
            &mut self.state.command_list,
            bind_point,
            root_index,
            address,
        );
    }

    pub fn set_root_shader_resource_view(&mut self, bind_point: PipelineBindPoint, root_index: u32, address: u64) {
        let device = self.device.raw();
        device.cmd_set_root_shader_resource_view(
            &mut self.state.command_list,
            bind_point,
            root_index,
            address,
        );
    }

    pub fn set_root_unordered_access_view(&mut self, bind_point: PipelineBindPoint, root_index: u32, address: u64) {
        let device = self.device.raw();
        device.cmd_set_root_unordered_access_view(
            &mut self.state.command_list,
            bind_point,
            root_index,
            address,
        );
    }

    /// Transient upload memory, valid until this context's submission completes
    pub fn allocate_upload(&mut self, size: u64, alignment: u64) -> Result<DynamicAllocation, DeviceError> {
        self.state.upload_allocator.allocate(size, alignment)
    }

    /// Copy `data` to upload memory and bind it as a root constant buffer
    pub fn set_dynamic_constant_buffer_view(
        &mut self,
        bind_point: PipelineBindPoint,
        root_index: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut allocation =
            self.allocate_upload(data.len() as u64, CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT)?;
        allocation.write(0, data);
        self.set_root_constant_buffer_view(bind_point, root_index, allocation.gpu_address());
        Ok(())
    }

    pub fn set_dynamic_vertex_buffer(&mut self, slot: u32, data: &[u8], stride: u32) -> Result<(), DeviceError> {
        self.assert_queue("vertex buffers", &[QueueType::Direct]);
        let mut allocation = self.allocate_upload(data.len() as u64, 16)?;
        allocation.write(0, data);
        self.set_vertex_buffers(
            slot,
            &[VertexBufferView {
                buffer_location: allocation.gpu_address(),
                size_in_bytes: data.len() as u32,
                stride_in_bytes: stride,
            }],
        );
        Ok(())
    }

    pub fn set_dynamic_index_buffer(&mut self, data: &[u8], format: IndexBufferFormat) -> Result<(), DeviceError> {
        self.assert_queue("index buffers", &[QueueType::Direct]);
        let mut allocation = self.allocate_upload(data.len() as u64, format.size_in_bytes() as u64)?;
        allocation.write(0, data);
        self.set_index_buffer(&IndexBufferView {
            buffer_location: allocation.gpu_address(),
            size_in_bytes: data.len() as u32,
            format,
        });
        Ok(())
    }

    /** Input assembler & rasterizer */

    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        let device = self.device.raw();
        device.cmd_set_vertex_buffers(&mut self.state.command_list, start_slot, views);
    }

    pub fn set_index_buffer(&mut self, view: &IndexBufferView) {
        let device = self.device.raw();
        device.cmd_set_index_buffer(&mut self.state.command_list, view);
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        let device = self.device.raw();
        device.cmd_set_primitive_topology(&mut self.state.command_list, topology);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.set_viewports(&[viewport]);
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        let device = self.device.raw();
        device.cmd_set_viewports(&mut self.state.command_list, viewports);
    }

    pub fn set_scissor(&mut self, scissor: Rect) {
        let device = self.device.raw();
        device.cmd_set_scissors(&mut self.state.command_list, &[scissor]);
    }

    pub fn set_shading_rate(&mut self, rate: ShadingRate, combiners: [ShadingRateCombiner; 2]) {
        self.assert_queue("variable rate shading", &[QueueType::Direct]);
        let device = self.device.raw();
        device.cmd_set_shading_rate(&mut self.state.command_list, rate, combiners);
    }

    /** Draws & dispatches */

    /// Flush barriers and bind the descriptor tables staged since the last draw or dispatch
    pub fn prepare_draw(&mut self, bind_point: PipelineBindPoint) {
        let device = self.device.raw();
        let state = &mut *self.state;
        state.batcher.flush(&**device, &mut state.command_list);
        state
            .view_allocator
            .bind_staged_descriptors(&**device, &mut state.command_list, bind_point);
        state
            .sampler_allocator
            .bind_staged_descriptors(&**device, &mut state.command_list, bind_point);
    }

    pub fn draw(&mut self, vertex_count: u32, start_vertex: u32) {
        self.draw_instanced(vertex_count, 1, start_vertex, 0);
    }

    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) {
        self.assert_queue("draw", &[QueueType::Direct]);
        self.prepare_draw(PipelineBindPoint::Graphics);
        let device = self.device.raw();
        device.cmd_draw_instanced(
            &mut self.state.command_list,
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        );
    }

    pub fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        self.draw_indexed_instanced(index_count, 1, start_index, base_vertex, 0);
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.assert_queue("draw", &[QueueType::Direct]);
        self.prepare_draw(PipelineBindPoint::Graphics);
        let device = self.device.raw();
        device.cmd_draw_indexed_instanced(
            &mut self.state.command_list,
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.assert_queue("dispatch", &[QueueType::Direct, QueueType::Compute]);
        self.prepare_draw(PipelineBindPoint::Compute);
        let device = self.device.raw();
        device.cmd_dispatch(&mut self.state.command_list, x, y, z);
    }

    pub fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) {
        self.assert_queue("mesh dispatch", &[QueueType::Direct]);
        self.prepare_draw(PipelineBindPoint::Graphics);
        let device = self.device.raw();
        device.cmd_dispatch_mesh(&mut self.state.command_list, x, y, z);
    }

    /// Upload the shader tables of `sbt` and launch `width * height * depth` rays
    pub fn dispatch_rays(
        &mut self,
        sbt: &mut ShaderBindingTable,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), DeviceError> {
        self.assert_queue("ray tracing", &[QueueType::Direct, QueueType::Compute]);
        let desc = sbt.commit(self, width, height, depth)?;
        self.prepare_draw(PipelineBindPoint::Compute);
        let device = self.device.raw();
        device.cmd_dispatch_rays(&mut self.state.command_list, &desc);
        Ok(())
    }

    pub fn execute_indirect(
        &mut self,
        signature: &CommandSignature,
        max_command_count: u32,
        arguments: &Buffer,
        arguments_offset: u64,
        count: Option<&Buffer>,
        count_offset: u64,
    ) {
        let allowed: &[QueueType] = if signature.is_compute() {
            &[QueueType::Direct, QueueType::Compute]
        } else {
            &[QueueType::Direct]
        };
        self.assert_queue("indirect execution", allowed);

        self.insert_resource_barrier(arguments, ResourceStates::INDIRECT_ARGUMENT, ALL_SUBRESOURCES);
        if let Some(count) = count {
            self.insert_resource_barrier(count, ResourceStates::INDIRECT_ARGUMENT, ALL_SUBRESOURCES);
        }

        self.prepare_draw(if signature.is_compute() {
            PipelineBindPoint::Compute
        } else {
            PipelineBindPoint::Graphics
        });

        let device = self.device.raw();
        device.cmd_execute_indirect(
            &mut self.state.command_list,
            signature.raw(),
            max_command_count,
            arguments.graphics_resource().raw(),
            arguments_offset,
            count.map(|count| count.graphics_resource().raw()),
            count_offset,
        );
    }

    /** Copies */

    pub fn copy_buffer(
        &mut self,
        dst: &impl AsGraphicsResource,
        dst_offset: u64,
        src: &impl AsGraphicsResource,
        src_offset: u64,
        size: u64,
    ) {
        self.insert_resource_barrier(dst, ResourceStates::COPY_DEST, ALL_SUBRESOURCES);
        self.insert_resource_barrier(src, ResourceStates::COPY_SOURCE, ALL_SUBRESOURCES);
        self.record_buffer_copy(
            dst.graphics_resource(),
            dst_offset,
            src.graphics_resource().raw(),
            src_offset,
            size,
        );
    }

    fn record_buffer_copy(
        &mut self,
        dst: &GraphicsResource,
        dst_offset: u64,
        src: &backend::Resource,
        src_offset: u64,
        size: u64,
    ) {
        assert!(
            dst_offset + size <= dst.desc().width,
            "copy of {} bytes at {} overflows {}",
            size,
            dst_offset,
            dst.name()
        );

        self.flush_resource_barriers();
        let device = self.device.raw();
        device.cmd_copy_buffer_region(
            &mut self.state.command_list,
            dst.raw(),
            dst_offset,
            src,
            src_offset,
            size,
        );
    }

    /// Copy a whole resource into another of the same size and format
    pub fn copy_texture(&mut self, dst: &impl AsGraphicsResource, src: &impl AsGraphicsResource) {
        self.insert_resource_barrier(dst, ResourceStates::COPY_DEST, ALL_SUBRESOURCES);
        self.insert_resource_barrier(src, ResourceStates::COPY_SOURCE, ALL_SUBRESOURCES);
        self.flush_resource_barriers();

        let device = self.device.raw();
        device.cmd_copy_resource(
            &mut self.state.command_list,
            dst.graphics_resource().raw(),
            src.graphics_resource().raw(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture_region(
        &mut self,
        dst: &impl AsGraphicsResource,
        dst_subresource: u32,
        dst_position: [u32; 3],
        src: &impl AsGraphicsResource,
        src_subresource: u32,
        src_box: Option<CopyBox>,
    ) {
        self.insert_resource_barrier(dst, ResourceStates::COPY_DEST, dst_subresource);
        self.insert_resource_barrier(src, ResourceStates::COPY_SOURCE, src_subresource);
        self.flush_resource_barriers();

        let device = self.device.raw();
        device.cmd_copy_texture_region(
            &mut self.state.command_list,
            &TextureCopyLocation::Subresource(dst.graphics_resource().raw(), dst_subresource),
            dst_position[0],
            dst_position[1],
            dst_position[2],
            &TextureCopyLocation::Subresource(src.graphics_resource().raw(), src_subresource),
            src_box.as_ref(),
        );
    }

    /// Resolve a multisampled subresource into a single sampled one
    pub fn resolve_resource(
        &mut self,
        dst: &impl AsGraphicsResource,
        dst_subresource: u32,
        src: &impl AsGraphicsResource,
        src_subresource: u32,
        format: PixelFormat,
    ) {
        self.assert_queue("resolve", &[QueueType::Direct]);
        self.insert_resource_barrier(dst, ResourceStates::RESOLVE_DEST, dst_subresource);
        self.insert_resource_barrier(src, ResourceStates::RESOLVE_SOURCE, src_subresource);
        self.flush_resource_barriers();

        let device = self.device.raw();
        device.cmd_resolve_subresource(
            &mut self.state.command_list,
            dst.graphics_resource().raw(),
            dst_subresource,
            src.graphics_resource().raw(),
            src_subresource,
            format,
        );
    }

    /// Fill `buffer` at `offset` with `data`, CPU visible buffers are written directly
    pub fn initialize_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        if buffer.is_mapped() {
            buffer.write(offset, data);
            return Ok(());
        }

        let mut upload = self.allocate_upload(data.len() as u64, 4)?;
        upload.write(0, data);

        let mut scope = self.scoped_barrier(buffer, ResourceStates::COPY_DEST);
        scope.record_buffer_copy(
            buffer.graphics_resource(),
            offset,
            upload.resource(),
            upload.offset(),
            data.len() as u64,
        );
        Ok(())
    }

    /// Upload `data` into consecutive subresources starting at `first_subresource`
    pub fn initialize_texture(
        &mut self,
        texture: &Texture,
        first_subresource: u32,
        data: &[SubresourceData],
    ) -> Result<(), DeviceError> {
        let resource = texture.graphics_resource();
        assert!(
            first_subresource as usize + data.len() <= resource.subresource_count() as usize,
            "too many subresources for {}",
            resource.name()
        );

        let footprints = self.device.raw().copyable_footprints(
            resource.desc(),
            first_subresource,
            data.len() as u32,
            0,
        );
        let mut upload = self.allocate_upload(footprints.total_bytes, TEXTURE_DATA_PLACEMENT_ALIGNMENT)?;

        for (index, subresource) in data.iter().enumerate() {
            let layout = footprints.layouts[index];
            let rows = footprints.num_rows[index] as u64;
            let row_size = footprints.row_sizes_in_bytes[index];
            let dst_row_pitch = layout.footprint.row_pitch as u64;

            for slice in 0..layout.footprint.depth as u64 {
                for row in 0..rows {
                    let src = (slice * subresource.slice_pitch + row * subresource.row_pitch) as usize;
                    let dst = layout.offset + (slice * rows + row) * dst_row_pitch;
                    upload.write(dst, &subresource.data[src..src + row_size as usize]);
                }
            }
        }

        let device = self.device;
        let mut scope = self.scoped_barrier(texture, ResourceStates::COPY_DEST);
        scope.flush_resource_barriers();
        let device = device.raw();
        for (index, layout) in footprints.layouts.iter().enumerate() {
            device.cmd_copy_texture_region(
                &mut scope.state.command_list,
                &TextureCopyLocation::Subresource(resource.raw(), first_subresource + index as u32),
                0,
                0,
                0,
                &TextureCopyLocation::PlacedFootprint(
                    upload.resource(),
                    PlacedSubresourceFootprint {
                        offset: layout.offset + upload.offset(),
                        footprint: layout.footprint,
                    },
                ),
                None,
            );
        }
        Ok(())
    }

    /** Clears */

    pub fn clear_uav_uint(&mut self, resource: &impl ShaderResource, values: [u32; 4]) {
        let (gpu, cpu) = self.prepare_uav_clear(resource);
        let device = self.device.raw();
        device.cmd_clear_unordered_access_view_uint(
            &mut self.state.command_list,
            gpu,
            cpu,
            resource.graphics_resource().raw(),
            values,
        );
    }

    pub fn clear_uav_float(&mut self, resource: &impl ShaderResource, values: [f32; 4]) {
        let (gpu, cpu) = self.prepare_uav_clear(resource);
        let device = self.device.raw();
        device.cmd_clear_unordered_access_view_float(
            &mut self.state.command_list,
            gpu,
            cpu,
            resource.graphics_resource().raw(),
            values,
        );
    }

    fn prepare_uav_clear(
        &mut self,
        resource: &impl ShaderResource,
    ) -> (backend::GpuDescriptorHandle, CpuDescriptorHandle) {
        self.assert_queue("unordered access clear", &[QueueType::Direct, QueueType::Compute]);
        let cpu = match resource.uav() {
            Some(uav) => uav.cpu_handle(),
            None => panic!(
                "{} has no unordered access view to clear",
                resource.graphics_resource().name()
            ),
        };

        // Clears need the view in both a CPU-only and a shader visible heap
        let transient = self.state.view_allocator.allocate_transient(cpu);
        self.insert_resource_barrier(resource, ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
        self.flush_resource_barriers();
        (transient.gpu, cpu)
    }

    /** Debug markers */

    pub fn begin_event(&mut self, name: &str) {
        let device = self.device.raw();
        device.cmd_begin_event(&mut self.state.command_list, name);
    }

    pub fn end_event(&mut self) {
        let device = self.device.raw();
        device.cmd_end_event(&mut self.state.command_list);
    }

    /** Submission */

    /// Submit the context to its queue. Returns the fence value signaled after it.
    pub fn execute(mut self, wait_for_completion: bool) -> u64 {
        let device = self.device;
        let queue = device.queue(self.queue_type());
        let fence_value = queue.execute_contexts(&mut [&mut self]);
        if wait_for_completion {
            queue.wait_for_fence(fence_value);
        }
        fence_value
    }

    /// Submit several contexts of the same queue type in one batch, in order
    pub fn execute_many(mut contexts: Vec<CommandContext<'d>>, wait_for_completion: bool) -> u64 {
        assert!(!contexts.is_empty(), "nothing to execute");
        let device = contexts[0].device;
        let queue = device.queue(contexts[0].queue_type());

        let mut refs: Vec<&mut CommandContext<'d>> = contexts.iter_mut().collect();
        let fence_value = queue.execute_contexts(&mut refs);
        if wait_for_completion {
            queue.wait_for_fence(fence_value);
        }
        fence_value
    }
}

impl<'d> Drop for CommandContext<'d> {
    fn drop(&mut self) {
        // SAFETY: the state is never accessed again
        let mut state = unsafe { ManuallyDrop::take(&mut self.state) };

        // Dropped without being executed, nothing it recorded ever reaches the GPU
        if state.recording {
            let device = self.device.raw();
            state.flush_barriers(&**device);
            if let Err(error) = device.close_command_list(&mut state.command_list) {
                ze_error!("Failed to close discarded command list: {}", error);
            }

            let queue = self.device.queue(state.queue_type);
            state.retire(queue.fence().last_completed_value(), queue);
        }

        self.device.recycle_context(state);
    }
}
