use ash::vk;
use std::ffi::CString;
use std::ops::Range;

use crate::{
    error::{DeviceResultExt, SampleError},
    graphics,
};

pub struct CommandPool {
    name: String,
    handle: vk::CommandPool,
    command_buffers: Vec<CommandBuffer>,
    used_buffers: usize,
}

impl CommandPool {
    pub fn new(device: &graphics::Device, name: &str) -> Result<Self, SampleError> {
        let command_pool_create_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.queue.family.index);

        let handle =
            unsafe { device.raw.create_command_pool(&command_pool_create_info, None) }.tagged("create_command_pool")?;

        device.set_debug_name(handle, &format!("{name}_command_pool"));

        Ok(Self {
            name: name.to_owned(),
            handle,
            command_buffers: Vec::new(),
            used_buffers: 0,
        })
    }

    #[inline(always)]
    pub fn buffers(&self) -> &[CommandBuffer] {
        &self.command_buffers[0..self.used_buffers]
    }

    pub fn reset(&mut self, device: &graphics::Device) -> Result<(), SampleError> {
        unsafe { device.raw.reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty()) }
            .tagged("reset_command_pool")?;

        for command_buffer in self.command_buffers.iter_mut() {
            command_buffer.wait_infos.clear();
            command_buffer.signal_infos.clear();
        }
        self.used_buffers = 0;

        Ok(())
    }

    pub fn begin_new(&mut self, device: &graphics::Device) -> Result<&mut CommandBuffer, SampleError> {
        if self.used_buffers >= self.command_buffers.len() {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(self.handle)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffer =
                unsafe { device.raw.allocate_command_buffers(&alloc_info) }.tagged("allocate_command_buffers")?[0];

            let index = self.command_buffers.len();
            device.set_debug_name(command_buffer, &format!("{}_command_buffer_#{index}", self.name));

            self.command_buffers.push(CommandBuffer {
                command_buffer_info: vk::CommandBufferSubmitInfo {
                    command_buffer,
                    ..Default::default()
                },
                wait_infos: Vec::new(),
                signal_infos: Vec::new(),
            })
        }

        let index = self.used_buffers;
        self.used_buffers += 1;

        Ok(&mut self.command_buffers[index])
    }

    pub fn destroy(&self, device: &graphics::Device) {
        unsafe {
            device.raw.destroy_command_pool(self.handle, None);
        }
    }
}

#[derive(Debug)]
pub struct CommandBuffer {
    command_buffer_info: vk::CommandBufferSubmitInfo,
    pub wait_infos: Vec<vk::SemaphoreSubmitInfo>,
    pub signal_infos: Vec<vk::SemaphoreSubmitInfo>,
}

impl CommandBuffer {
    #[inline(always)]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer_info.command_buffer
    }

    pub fn submit_info(&self) -> vk::SubmitInfo2 {
        vk::SubmitInfo2::builder()
            .command_buffer_infos(std::slice::from_ref(&self.command_buffer_info))
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
            .build()
    }

    pub fn wait_semaphore(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) {
        self.wait_infos
            .push(vk::SemaphoreSubmitInfo::builder().semaphore(semaphore).stage_mask(stage).build())
    }

    pub fn signal_semaphore(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) {
        self.signal_infos
            .push(vk::SemaphoreSubmitInfo::builder().semaphore(semaphore).stage_mask(stage).build())
    }

    pub fn record<'a>(
        &'a mut self,
        device: &'a graphics::Device,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<CommandRecorder<'a>, SampleError> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe { device.raw.begin_command_buffer(self.handle(), &begin_info) }.tagged("begin_command_buffer")?;

        Ok(CommandRecorder {
            device,
            command_buffer: self,
        })
    }
}

/// Records into a command buffer, ending it when dropped.
pub struct CommandRecorder<'a> {
    pub device: &'a graphics::Device,
    pub command_buffer: &'a mut CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    #[inline(always)]
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.command_buffer.handle()
    }

    pub fn begin_debug_label(&self, name: &str, color: Option<[f32; 4]>) {
        let Some(ref debug_utils) = self.device.debug_utils_fns else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            return;
        };

        let label = vk::DebugUtilsLabelEXT::builder().label_name(cname.as_c_str()).color(color.unwrap_or([0.0; 4]));
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(self.buffer(), &label);
        }
    }

    #[inline(always)]
    pub fn end_debug_label(&self) {
        if let Some(ref debug_utils) = self.device.debug_utils_fns {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.buffer());
            }
        }
    }

    #[inline(always)]
    pub fn copy_buffer(&self, src_handle: vk::Buffer, dst_handle: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.raw.cmd_copy_buffer(self.buffer(), src_handle, dst_handle, regions) }
    }

    #[inline(always)]
    pub fn barrier(
        &self,
        buffer_barriers: &[vk::BufferMemoryBarrier2],
        image_barriers: &[vk::ImageMemoryBarrier2],
        memory_barriers: &[vk::MemoryBarrier2],
    ) {
        let dependency_info = vk::DependencyInfo::builder()
            .buffer_memory_barriers(buffer_barriers)
            .image_memory_barriers(image_barriers)
            .memory_barriers(memory_barriers);

        unsafe {
            self.device.raw.cmd_pipeline_barrier2(self.buffer(), &dependency_info);
        }
    }

    /// Begins dynamic rendering with a y-up viewport covering the render area.
    #[inline(always)]
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device.raw.cmd_begin_rendering(self.buffer(), rendering_info);

            let offset = rendering_info.render_area.offset;
            let extent = rendering_info.render_area.extent;

            self.device.raw.cmd_set_viewport(
                self.buffer(),
                0,
                &[vk::Viewport {
                    x: offset.x as f32,
                    y: offset.y as f32 + extent.height as f32,
                    width: extent.width as f32,
                    height: -(extent.height as f32),
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );

            self.device.raw.cmd_set_scissor(self.buffer(), 0, std::slice::from_ref(&rendering_info.render_area));
        }
    }

    #[inline(always)]
    pub fn end_rendering(&self) {
        unsafe {
            self.device.raw.cmd_end_rendering(self.buffer());
        }
    }

    #[inline(always)]
    pub fn bind_raster_pipeline(&self, pipeline: graphics::RasterPipeline) {
        unsafe {
            self.device.raw.cmd_bind_pipeline(self.buffer(), vk::PipelineBindPoint::GRAPHICS, pipeline.handle);
        }
    }

    /// Binds the vertex buffer. Index buffer and draws go through the returned token.
    #[inline(always)]
    pub fn bind_vertex_buffer(&self, binding: u32, buffer: &graphics::Buffer, offset: u64) -> VertexBinding<'_, 'a> {
        unsafe { self.device.raw.cmd_bind_vertex_buffers(self.buffer(), binding, &[buffer.handle], &[offset]) }
        VertexBinding { recorder: self }
    }

    #[inline(always)]
    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        constants: &[u8],
    ) {
        unsafe { self.device.raw.cmd_push_constants(self.buffer(), layout, stages, offset, constants) }
    }

    pub fn build_constants<'r>(&'r self, program: &'r graphics::ShaderProgram) -> PushConstantBuilder<'r, 'a> {
        PushConstantBuilder::new(self, program)
    }

    #[inline(always)]
    pub fn draw(&self, vertices: Range<u32>, instances: Range<u32>) {
        unsafe {
            self.device.raw.cmd_draw(
                self.buffer(),
                vertices.len() as u32,
                instances.len() as u32,
                vertices.start,
                instances.start,
            );
        }
    }

    #[inline(always)]
    pub fn draw_indexed(&self, indices: Range<u32>, instances: Range<u32>, vertex_offset: i32) {
        unsafe {
            self.device.raw.cmd_draw_indexed(
                self.buffer(),
                indices.len() as u32,
                instances.len() as u32,
                indices.start,
                vertex_offset,
                instances.start,
            );
        }
    }

    #[inline(always)]
    pub fn draw_indirect(&self, indirect_buffer: &graphics::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        unsafe {
            self.device.raw.cmd_draw_indirect(self.buffer(), indirect_buffer.handle, offset, draw_count, stride);
        }
    }

    #[inline(always)]
    pub fn draw_indexed_indirect(
        &self,
        indirect_buffer: &graphics::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indexed_indirect(
                self.buffer(),
                indirect_buffer.handle,
                offset,
                draw_count,
                stride,
            );
        }
    }
}

impl Drop for CommandRecorder<'_> {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.device.raw.end_command_buffer(self.buffer()) } {
            log::error!("failed to end command buffer: {err}");
        }
    }
}

/// Proof that a vertex buffer is bound.
pub struct VertexBinding<'r, 'a> {
    recorder: &'r CommandRecorder<'a>,
}

impl<'r, 'a> VertexBinding<'r, 'a> {
    #[inline(always)]
    pub fn recorder(&self) -> &'r CommandRecorder<'a> {
        self.recorder
    }

    #[inline(always)]
    pub fn bind_index_buffer(
        self,
        buffer: &graphics::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) -> IndexedBinding<'r, 'a> {
        unsafe {
            self.recorder.device.raw.cmd_bind_index_buffer(self.recorder.buffer(), buffer.handle, offset, index_type);
        }

        IndexedBinding {
            recorder: self.recorder,
            index_type,
        }
    }
}

/// Proof that a vertex buffer and then an index buffer are bound.
pub struct IndexedBinding<'r, 'a> {
    recorder: &'r CommandRecorder<'a>,
    index_type: vk::IndexType,
}

impl<'r, 'a> IndexedBinding<'r, 'a> {
    #[inline(always)]
    pub fn recorder(&self) -> &'r CommandRecorder<'a> {
        self.recorder
    }

    #[inline(always)]
    pub fn index_type(&self) -> vk::IndexType {
        self.index_type
    }
}

pub struct PushConstantBuilder<'r, 'a> {
    constants: [u8; 128],
    size: usize,
    program: &'r graphics::ShaderProgram,
    command_recorder: &'r CommandRecorder<'a>,
}

impl<'r, 'a> PushConstantBuilder<'r, 'a> {
    pub fn new(command_recorder: &'r CommandRecorder<'a>, program: &'r graphics::ShaderProgram) -> Self {
        Self {
            constants: [0; 128],
            size: program.push_constant_size() as usize,
            program,
            command_recorder,
        }
    }

    #[track_caller]
    #[inline(always)]
    fn write_bytes(mut self, uniform: &graphics::PushConstantMember, bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() as u32 <= uniform.size, "'{}' is smaller than the written value", uniform.name);

        let offset = uniform.offset as usize;
        self.constants[offset..offset + bytes.len()].copy_from_slice(bytes);

        self
    }

    #[track_caller]
    #[inline(always)]
    pub fn vec4(self, uniform: &graphics::PushConstantMember, val: impl Into<glam::Vec4>) -> Self {
        let val = val.into();
        self.write_bytes(uniform, bytemuck::bytes_of(&val))
    }

    #[track_caller]
    #[inline(always)]
    pub fn mat4(self, uniform: &graphics::PushConstantMember, val: &glam::Mat4) -> Self {
        self.write_bytes(uniform, bytemuck::bytes_of(val))
    }

    pub fn push(self) {}
}

impl Drop for PushConstantBuilder<'_, '_> {
    fn drop(&mut self) {
        self.command_recorder.push_constants(
            self.program.layout,
            self.program.push_constant_stages,
            0,
            &self.constants[0..self.size],
        );
    }
}
