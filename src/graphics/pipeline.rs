use crate::{
    error::{DeviceResultExt, SampleError},
    graphics,
};

use ash::vk;
use std::ffi::CStr;

// guaranteed minimum of maxPushConstantsSize
const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy)]
pub struct RasterPipeline {
    pub handle: vk::Pipeline,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderStage<'a> {
    pub module: vk::ShaderModule,
    pub entry: &'a CStr,
}

impl<'a> ShaderStage<'a> {
    fn to_vk(&self) -> vk::PipelineShaderStageCreateInfoBuilder<'a> {
        vk::PipelineShaderStageCreateInfo::builder().module(self.module).name(self.entry)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VertexInput<'a> {
    pub bindings: &'a [vk::VertexInputBindingDescription],
    pub attributes: &'a [vk::VertexInputAttributeDescription],
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizerDesc {
    pub primitive_topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub line_width: f32,
    pub front_face: vk::FrontFace,
    pub cull_mode: vk::CullModeFlags,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            cull_mode: vk::CullModeFlags::NONE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineColorAttachment {
    pub format: vk::Format,
    pub color_mask: vk::ColorComponentFlags,
}

impl Default for PipelineColorAttachment {
    fn default() -> Self {
        Self {
            format: Default::default(),
            color_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl PipelineColorAttachment {
    fn color_blend_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(self.color_mask)
            .build()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RasterPipelineDesc<'a> {
    pub vertex_stage: ShaderStage<'a>,
    pub fragment_stage: ShaderStage<'a>,
    pub vertex_input: VertexInput<'a>,
    pub rasterizer: RasterizerDesc,
    pub color_attachments: &'a [PipelineColorAttachment],
}

impl RasterPipeline {
    pub fn create_impl(
        device: &graphics::Device,
        layout: vk::PipelineLayout,
        name: &str,
        desc: &RasterPipelineDesc,
    ) -> Result<RasterPipeline, vk::Result> {
        let stages = [
            desc.vertex_stage.to_vk().stage(vk::ShaderStageFlags::VERTEX).build(),
            desc.fragment_stage.to_vk().stage(vk::ShaderStageFlags::FRAGMENT).build(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_input.bindings)
            .vertex_attribute_descriptions(desc.vertex_input.attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(desc.rasterizer.primitive_topology);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(desc.rasterizer.polygon_mode)
            .line_width(desc.rasterizer.line_width)
            .cull_mode(desc.rasterizer.cull_mode)
            .front_face(desc.rasterizer.front_face);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);

        let multisample_state =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment: Vec<_> =
            desc.color_attachments.iter().map(|attachment| attachment.color_blend_vk()).collect();

        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::builder().logic_op_enable(false).attachments(&color_blend_attachment);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_attachment_formats: Vec<_> =
            desc.color_attachments.iter().map(|attachment| attachment.format).collect();

        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_attachment_formats);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .rasterization_state(&rasterization)
            .viewport_state(&viewport_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .depth_stencil_state(&depth_stencil_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let handle = unsafe {
            device.raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_create_info),
                None,
            )
        }
        .map_err(|(_, result)| result)?[0];

        device.set_debug_name(handle, name);

        Ok(RasterPipeline { handle })
    }
}

pub fn create_shader_module(device: &graphics::Device, spv: &[u32], name: &str) -> Result<vk::ShaderModule, SampleError> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(spv);
    let handle = unsafe { device.raw.create_shader_module(&create_info, None) }.tagged("create_shader_module")?;
    device.set_debug_name(handle, name);
    Ok(handle)
}

/// Merges the push constant blocks of every stage into one range. Members with the
/// same name must agree on placement.
pub fn link_push_constants(
    shaders: &[&graphics::CompiledShader],
) -> Result<(Vec<graphics::PushConstantMember>, u32), String> {
    let mut members: Vec<graphics::PushConstantMember> = Vec::new();
    let mut size = 0;

    for shader in shaders {
        size = u32::max(size, shader.push_constant_size);

        for member in shader.push_constants.iter() {
            match members.iter().find(|linked| linked.name == member.name) {
                Some(linked) if linked != member => {
                    return Err(format!(
                        "push constant '{}' at offset {} in '{}' conflicts with offset {}",
                        member.name,
                        member.offset,
                        shader.path.display(),
                        linked.offset
                    ));
                }
                Some(_) => {}
                None => members.push(member.clone()),
            }
        }
    }

    if size > MAX_PUSH_CONSTANT_SIZE {
        return Err(format!("push constant block is {size} bytes, at most {MAX_PUSH_CONSTANT_SIZE} supported"));
    }

    members.sort_by_key(|member| member.offset);

    Ok((members, size))
}

fn find_uniform(
    uniforms: &[graphics::PushConstantMember],
    name: &str,
) -> Result<graphics::PushConstantMember, SampleError> {
    uniforms
        .iter()
        .find(|uniform| uniform.name == name)
        .cloned()
        .ok_or_else(|| SampleError::Link {
            message: format!("uniform '{name}' not found"),
        })
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc<'a> {
    pub vertex_input: VertexInput<'a>,
    pub rasterizer: RasterizerDesc,
    pub color_attachments: &'a [PipelineColorAttachment],
}

/// A linked vertex and fragment shader pair: pipeline, layout and the named push constants.
#[derive(Debug)]
pub struct ShaderProgram {
    pub pipeline: RasterPipeline,
    pub layout: vk::PipelineLayout,
    pub push_constant_stages: vk::ShaderStageFlags,
    uniforms: Vec<graphics::PushConstantMember>,
    push_constant_size: u32,
}

impl ShaderProgram {
    pub fn link(
        context: &graphics::Context,
        name: &str,
        vertex: &graphics::CompiledShader,
        fragment: &graphics::CompiledShader,
        desc: &ProgramDesc,
    ) -> Result<Self, SampleError> {
        let link_error = |message: String| SampleError::Link { message };

        if vertex.kind != graphics::ShaderKind::Vertex || fragment.kind != graphics::ShaderKind::Fragment {
            return Err(link_error(format!(
                "expected a vertex and a fragment shader, got {:?} and {:?}",
                vertex.kind, fragment.kind
            )));
        }

        let (uniforms, push_constant_size) = link_push_constants(&[vertex, fragment]).map_err(link_error)?;

        let device = &context.device;
        let push_constant_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let push_constant_range = vk::PushConstantRange {
            stage_flags: push_constant_stages,
            offset: 0,
            size: push_constant_size,
        };
        let push_constant_ranges: &[vk::PushConstantRange] =
            if push_constant_size > 0 { std::slice::from_ref(&push_constant_range) } else { &[] };

        let layout_create_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(push_constant_ranges);
        let layout =
            unsafe { device.raw.create_pipeline_layout(&layout_create_info, None) }.tagged("create_pipeline_layout")?;
        device.set_debug_name(layout, &format!("{name}_layout"));

        let vertex_module = match create_shader_module(device, &vertex.spirv, &vertex.path.to_string_lossy()) {
            Ok(module) => module,
            Err(err) => {
                unsafe { device.raw.destroy_pipeline_layout(layout, None) };
                return Err(err);
            }
        };

        let fragment_module = match create_shader_module(device, &fragment.spirv, &fragment.path.to_string_lossy()) {
            Ok(module) => module,
            Err(err) => {
                unsafe {
                    device.raw.destroy_shader_module(vertex_module, None);
                    device.raw.destroy_pipeline_layout(layout, None);
                }
                return Err(err);
            }
        };

        let entry = cstr::cstr!("main");
        let pipeline = RasterPipeline::create_impl(
            device,
            layout,
            name,
            &RasterPipelineDesc {
                vertex_stage: ShaderStage {
                    module: vertex_module,
                    entry,
                },
                fragment_stage: ShaderStage {
                    module: fragment_module,
                    entry,
                },
                vertex_input: desc.vertex_input,
                rasterizer: desc.rasterizer,
                color_attachments: desc.color_attachments,
            },
        );

        // the pipeline keeps what it needs
        unsafe {
            device.raw.destroy_shader_module(vertex_module, None);
            device.raw.destroy_shader_module(fragment_module, None);
        }

        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(result) => {
                unsafe { device.raw.destroy_pipeline_layout(layout, None) };
                return Err(link_error(format!("failed to create pipeline '{name}': {result}")));
            }
        };

        log::info!("linked program '{name}' with uniforms {:?}", uniforms);

        Ok(Self {
            pipeline,
            layout,
            push_constant_stages,
            uniforms,
            push_constant_size,
        })
    }

    /// Looks up a uniform by name, the way `glGetUniformLocation` would.
    pub fn require_uniform(&self, name: &str) -> Result<graphics::PushConstantMember, SampleError> {
        find_uniform(&self.uniforms, name)
    }

    #[inline]
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }

    pub fn destroy(self, context: &graphics::Context) {
        unsafe {
            context.device.raw.destroy_pipeline(self.pipeline.handle, None);
            context.device.raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}
