//! Draws a quad whose draw parameters live in a device buffer.

use std::{path::PathBuf, str::FromStr};

use ash::vk;
use glam::{Mat4, Vec3, Vec4};

use crate::{
    error::SampleError,
    geometry::{GeometryBuffers, VertexArray, VertexGeometry},
    graphics,
    indirect::{CommandStream, DrawIndexedIndirectCommand, IndirectBuffer, IndirectDrawError},
    sample::{Sample, SampleDesc, ViewState},
    utils,
};

pub const SAMPLE: SampleDesc = SampleDesc {
    name: "Vulkan multi draw indirect",
    window_size: [640, 480],
    api_version: vk::API_VERSION_1_3,
    capabilities: &[graphics::Capability::MultiDrawIndirect],
};

const VERTEX_SHADER: &str = "flat_color.vert";
const FRAGMENT_SHADER: &str = "flat_color.frag";

const DIFFUSE: Vec4 = Vec4::new(1.0, 0.5, 0.0, 1.0);
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// How the draw records are laid out in the indirect buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandLayout {
    /// One record drawing all six indices.
    #[default]
    Single,
    /// One record per triangle, packed.
    Split,
    /// One record per triangle, starting at byte 32 and 32 bytes apart.
    Strided,
}

impl CommandLayout {
    const STRIDED_OFFSET: u64 = 32;
    const STRIDED_ALIGNMENT: usize = 32;

    pub fn stream(self) -> Result<CommandStream<DrawIndexedIndirectCommand>, IndirectDrawError> {
        let per_triangle = [
            DrawIndexedIndirectCommand::new(3, 1, 0, 0),
            DrawIndexedIndirectCommand::new(3, 1, 3, 0),
        ];

        match self {
            CommandLayout::Single => Ok(CommandStream::packed(&[DrawIndexedIndirectCommand::new(6, 1, 0, 0)])),
            CommandLayout::Split => Ok(CommandStream::packed(&per_triangle)),
            CommandLayout::Strided => {
                let stride = utils::aligned_size(
                    std::mem::size_of::<DrawIndexedIndirectCommand>(),
                    Self::STRIDED_ALIGNMENT,
                );
                CommandStream::strided(&per_triangle, Self::STRIDED_OFFSET, stride as u32)
            }
        }
    }
}

impl FromStr for CommandLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(CommandLayout::Single),
            "split" => Ok(CommandLayout::Split),
            "strided" => Ok(CommandLayout::Strided),
            _ => Err(format!("unknown layout '{s}', expected one of: single, split, strided")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrawPath {
    #[default]
    Indirect,
    /// The same records, issued one by one from the CPU.
    Direct,
}

#[derive(Debug, Clone)]
pub struct DrawIndirectOptions {
    pub shader_dir: PathBuf,
    pub layout: CommandLayout,
    pub draw_path: DrawPath,
}

impl Default for DrawIndirectOptions {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            layout: CommandLayout::default(),
            draw_path: DrawPath::default(),
        }
    }
}

pub fn model_view_projection(aspect: f32, view: &ViewState) -> Mat4 {
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    let view_translate = Mat4::from_translation(Vec3::new(0.0, 0.0, -view.distance()));
    let view_rotate_x = Mat4::from_rotation_x(view.rotation.y.to_radians());
    let view_rotate_y = Mat4::from_rotation_y(view.rotation.x.to_radians());

    projection * view_translate * view_rotate_x * view_rotate_y
}

/// Runs a device error check after a setup step, releasing `value` if it fails.
fn checked<T>(
    context: &graphics::Context,
    tag: &'static str,
    value: T,
    release: impl FnOnce(T, &graphics::Context),
) -> Result<T, SampleError> {
    match context.device.check_errors(tag) {
        Ok(()) => Ok(value),
        Err(err) => {
            release(value, context);
            Err(err)
        }
    }
}

pub struct DrawIndirect {
    program: graphics::ShaderProgram,
    mvp: graphics::PushConstantMember,
    diffuse: graphics::PushConstantMember,
    geometry: GeometryBuffers,
    indirect_buffer: IndirectBuffer<DrawIndexedIndirectCommand>,
    vertex_array: VertexArray,
    draw_path: DrawPath,
    direct_records: Vec<DrawIndexedIndirectCommand>,
}

impl DrawIndirect {
    fn init_program(context: &graphics::Context, shader_dir: &std::path::Path) -> Result<graphics::ShaderProgram, SampleError> {
        let vertex = graphics::compile_shader(graphics::ShaderKind::Vertex, &shader_dir.join(VERTEX_SHADER))?;
        let fragment = graphics::compile_shader(graphics::ShaderKind::Fragment, &shader_dir.join(FRAGMENT_SHADER))?;

        let program = graphics::ShaderProgram::link(
            context,
            "flat_color",
            &vertex,
            &fragment,
            &graphics::ProgramDesc {
                vertex_input: VertexArray::vertex_input(),
                rasterizer: graphics::RasterizerDesc::default(),
                color_attachments: &[graphics::PipelineColorAttachment {
                    format: context.swapchain_format(),
                    ..Default::default()
                }],
            },
        )?;

        checked(context, "init_program", program, graphics::ShaderProgram::destroy)
    }

    fn init_array_buffer(context: &graphics::Context) -> Result<GeometryBuffers, SampleError> {
        let geometry = GeometryBuffers::create(context, "quad", &VertexGeometry::QUAD)?;
        checked(context, "init_array_buffer", geometry, GeometryBuffers::destroy)
    }

    fn init_indirect_buffer(
        context: &graphics::Context,
        stream: &CommandStream<DrawIndexedIndirectCommand>,
    ) -> Result<IndirectBuffer<DrawIndexedIndirectCommand>, SampleError> {
        let indirect_buffer = IndirectBuffer::create(context, "draw_indirect_buffer", stream)?;

        match indirect_buffer.verify_upload(context, stream) {
            Ok(records) => log::debug!("indirect records on device: {records:?}"),
            Err(err) => {
                indirect_buffer.destroy(context);
                return Err(err);
            }
        }

        checked(context, "init_indirect_buffer", indirect_buffer, IndirectBuffer::destroy)
    }

    fn init_vertex_array(context: &graphics::Context, geometry: &GeometryBuffers) -> Result<VertexArray, SampleError> {
        let vertex_array = VertexArray::for_buffers(geometry)?;
        checked(context, "init_vertex_array", vertex_array, |_, _| {})
    }
}

impl Sample for DrawIndirect {
    type Options = DrawIndirectOptions;

    fn begin(context: &graphics::Context, options: DrawIndirectOptions) -> Result<Self, SampleError> {
        let stream = options.layout.stream()?;
        let direct_records = stream.records()?;

        let program = Self::init_program(context, &options.shader_dir)?;
        let release_program = |program: graphics::ShaderProgram, err: SampleError| {
            program.destroy(context);
            err
        };

        let (mvp, diffuse) = match (program.require_uniform("MVP"), program.require_uniform("Diffuse")) {
            (Ok(mvp), Ok(diffuse)) => (mvp, diffuse),
            (Err(err), _) | (_, Err(err)) => return Err(release_program(program, err)),
        };

        let geometry = match Self::init_array_buffer(context) {
            Ok(geometry) => geometry,
            Err(err) => return Err(release_program(program, err)),
        };

        let indirect_buffer = match Self::init_indirect_buffer(context, &stream) {
            Ok(indirect_buffer) => indirect_buffer,
            Err(err) => {
                geometry.destroy(context);
                return Err(release_program(program, err));
            }
        };

        let vertex_array = match Self::init_vertex_array(context, &geometry) {
            Ok(vertex_array) => vertex_array,
            Err(err) => {
                indirect_buffer.destroy(context);
                geometry.destroy(context);
                return Err(release_program(program, err));
            }
        };

        log::info!(
            "drawing {:?} layout {:?} with {:?}",
            options.draw_path,
            options.layout,
            stream.draw()
        );

        Ok(Self {
            program,
            mvp,
            diffuse,
            geometry,
            indirect_buffer,
            vertex_array,
            draw_path: options.draw_path,
            direct_records,
        })
    }

    fn display(&mut self, context: &mut graphics::Context, view: &ViewState) -> Result<(), SampleError> {
        context.draw_frame(|recorder, image| {
            let aspect = image.extent.width as f32 / image.extent.height.max(1) as f32;
            let mvp = model_view_projection(aspect, view);

            let color_attachment = vk::RenderingAttachmentInfo::builder()
                .image_view(image.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue { float32: CLEAR_COLOR },
                })
                .store_op(vk::AttachmentStoreOp::STORE);

            let rendering_info = vk::RenderingInfo::builder()
                .render_area(image.full_rect())
                .layer_count(1)
                .color_attachments(std::slice::from_ref(&color_attachment));

            recorder.begin_debug_label("draw_indirect", None);
            recorder.begin_rendering(&rendering_info);

            recorder.bind_raster_pipeline(self.program.pipeline);
            recorder
                .build_constants(&self.program)
                .mat4(&self.mvp, &mvp)
                .vec4(&self.diffuse, DIFFUSE)
                .push();

            let binding = self.vertex_array.bind(recorder, &self.geometry);

            let result = match self.draw_path {
                DrawPath::Indirect => self
                    .indirect_buffer
                    .draw(&binding, self.indirect_buffer.default_draw())
                    .map_err(SampleError::from),
                DrawPath::Direct => {
                    for record in self.direct_records.iter() {
                        let indices = record.first_index..record.first_index + record.index_count;
                        let first_instance = record.reserved_must_be_zero;
                        let instances = first_instance..first_instance + record.instance_count;
                        binding.recorder().draw_indexed(indices, instances, record.base_vertex);
                    }
                    Ok(())
                }
            };

            recorder.end_rendering();
            recorder.end_debug_label();

            result
        })
    }

    fn end(self, context: &graphics::Context) -> Result<(), SampleError> {
        self.indirect_buffer.destroy(context);
        self.geometry.destroy(context);
        self.program.destroy(context);

        log::info!("released sample resources, {} allocations left", context.device.allocation_count());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_parse_from_their_names() {
        assert_eq!("single".parse::<CommandLayout>(), Ok(CommandLayout::Single));
        assert_eq!("split".parse::<CommandLayout>(), Ok(CommandLayout::Split));
        assert_eq!("strided".parse::<CommandLayout>(), Ok(CommandLayout::Strided));
        assert!("packed".parse::<CommandLayout>().is_err());
    }

    #[test]
    fn single_layout_is_one_twenty_byte_record() {
        let stream = CommandLayout::Single.stream().unwrap();

        assert_eq!(stream.bytes().len(), 20);
        assert_eq!(stream.draw().count, 1);
        assert_eq!(stream.records().unwrap(), vec![DrawIndexedIndirectCommand::new(6, 1, 0, 0)]);
    }

    #[test]
    fn strided_layout_starts_at_32_with_stride_32() {
        let draw = CommandLayout::Strided.stream().unwrap().draw();

        assert_eq!(draw.offset, 32);
        assert_eq!(draw.stride, 32);
        assert_eq!(draw.record_offsets().collect::<Vec<_>>(), vec![32, 64]);
    }

    #[test]
    fn every_layout_draws_the_whole_quad() {
        let quad = VertexGeometry::QUAD;
        let expected: Vec<_> = quad.triangles().collect();

        for layout in [CommandLayout::Single, CommandLayout::Split, CommandLayout::Strided] {
            let triangles: Vec<_> = layout
                .stream()
                .unwrap()
                .records()
                .unwrap()
                .iter()
                .flat_map(|record| {
                    assert_eq!(record.instance_count, 1);
                    quad.triangles_in(record.first_index, record.index_count, record.base_vertex).unwrap()
                })
                .collect();

            assert_eq!(triangles, expected, "{layout:?}");
        }
    }

    #[test]
    fn quad_is_in_front_of_the_camera() {
        let mvp = model_view_projection(640.0 / 480.0, &ViewState::default());

        for corner in VertexGeometry::QUAD.positions {
            let clip = mvp * Vec4::new(corner.x, corner.y, 0.0, 1.0);
            assert!(clip.w > 0.0);

            let ndc = clip / clip.w;
            assert!(ndc.x.abs() < 1.0 && ndc.y.abs() < 1.0, "{corner} -> {ndc}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn rotation_turns_the_quad() {
        let mut view = ViewState::default();
        let still = model_view_projection(1.0, &view);

        view.drag(glam::Vec2::new(90.0, 0.0), true, false);
        let turned = model_view_projection(1.0, &view);

        // edge on after a quarter turn around y
        let corner = turned * Vec4::new(1.0, 0.0, 0.0, 1.0);
        let center = turned * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((corner.x / corner.w - center.x / center.w).abs() < 1e-4);
        assert_ne!(still, turned);
    }
}
