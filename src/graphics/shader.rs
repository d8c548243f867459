//! GLSL to SPIR-V compilation with push constant reflection.

use std::path::{Path, PathBuf};

use ash::vk;
use naga::{
    back::spv,
    front::glsl,
    valid::{Capabilities, ValidationFlags, Validator},
};

use crate::error::SampleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderKind::Vertex => naga::ShaderStage::Vertex,
            ShaderKind::Fragment => naga::ShaderStage::Fragment,
        }
    }

    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderKind::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// A named member of a push constant block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantMember {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub path: PathBuf,
    pub kind: ShaderKind,
    pub spirv: Vec<u32>,
    pub push_constants: Vec<PushConstantMember>,
    pub push_constant_size: u32,
}

pub fn compile_shader(kind: ShaderKind, path: &Path) -> Result<CompiledShader, SampleError> {
    let source = std::fs::read_to_string(path).map_err(|err| SampleError::Compile {
        path: path.to_owned(),
        message: format!("failed to read source: {err}"),
    })?;

    compile_shader_source(kind, path, &source)
}

fn parse_errors_to_string(errors: &[glsl::Error], source: &str) -> String {
    errors
        .iter()
        .map(|err| {
            if err.meta.is_defined() {
                let location = err.meta.location(source);
                format!("{}:{}: {err}", location.line_number, location.line_position)
            } else {
                err.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn compile_shader_source(kind: ShaderKind, path: &Path, source: &str) -> Result<CompiledShader, SampleError> {
    let compile_error = |message: String| SampleError::Compile {
        path: path.to_owned(),
        message,
    };

    let module = glsl::Frontend::default()
        .parse(&glsl::Options::from(kind.to_naga()), source)
        .map_err(|errors| compile_error(parse_errors_to_string(&errors, source)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;

    let mut options = spv::Options::default();
    // the y-up viewport set in begin_rendering already flips clip space
    options.flags.remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    let pipeline_options = spv::PipelineOptions {
        shader_stage: kind.to_naga(),
        entry_point: "main".into(),
    };

    let spirv = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|err| compile_error(err.to_string()))?;

    let (push_constants, push_constant_size) = reflect_push_constants(&module);

    log::debug!(
        "compiled '{}': {} words, push constants {:?}",
        path.display(),
        spirv.len(),
        push_constants
    );

    Ok(CompiledShader {
        path: path.to_owned(),
        kind,
        spirv,
        push_constants,
        push_constant_size,
    })
}

fn reflect_push_constants(module: &naga::Module) -> (Vec<PushConstantMember>, u32) {
    let mut members = Vec::new();
    let mut block_size = 0;

    for (_, global) in module.global_variables.iter() {
        if global.space != naga::AddressSpace::PushConstant {
            continue;
        }

        let naga::TypeInner::Struct { members: struct_members, span } = &module.types[global.ty].inner else {
            continue;
        };

        block_size = block_size.max(*span);

        for (index, member) in struct_members.iter().enumerate() {
            let end = struct_members.get(index + 1).map_or(*span, |next| next.offset);

            members.push(PushConstantMember {
                name: member.name.clone().unwrap_or_default(),
                offset: member.offset,
                size: end - member.offset,
            });
        }
    }

    (members, block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders").join(name)
    }

    #[test]
    fn bundled_vertex_shader_exposes_mvp_and_diffuse() {
        let shader = compile_shader(ShaderKind::Vertex, &shader_path("flat_color.vert")).unwrap();

        assert!(!shader.spirv.is_empty());
        assert_eq!(shader.spirv[0], 0x0723_0203); // SPIR-V magic
        assert_eq!(shader.push_constant_size, 80);
        assert_eq!(
            shader.push_constants,
            vec![
                PushConstantMember {
                    name: "MVP".into(),
                    offset: 0,
                    size: 64
                },
                PushConstantMember {
                    name: "Diffuse".into(),
                    offset: 64,
                    size: 16
                },
            ]
        );
    }

    #[test]
    fn bundled_fragment_shader_compiles() {
        let shader = compile_shader(ShaderKind::Fragment, &shader_path("flat_color.frag")).unwrap();

        assert_eq!(shader.kind, ShaderKind::Fragment);
        assert_eq!(shader.push_constant_size, 80);
        assert!(shader.push_constants.iter().any(|member| member.name == "Diffuse" && member.offset == 64));
    }

    #[test]
    fn syntax_error_is_a_compile_error() {
        let path = Path::new("broken.vert");
        let result = compile_shader_source(ShaderKind::Vertex, path, "#version 450\nvoid main() { gl_Position = ; }\n");

        match result {
            Err(SampleError::Compile { path, message }) => {
                assert_eq!(path, Path::new("broken.vert"));
                assert!(message.starts_with("2:"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parse_errors_are_listed_with_their_line() {
        let source = "#version 450\nvoid main() {\n    x = 1;\n}\n";
        let errors = [
            glsl::Error {
                kind: glsl::ErrorKind::SemanticError("Unknown variable: x".into()),
                meta: naga::Span::new(31, 32),
            },
            glsl::Error {
                kind: glsl::ErrorKind::SemanticError("no location".into()),
                meta: naga::Span::default(),
            },
        ];

        assert_eq!(
            parse_errors_to_string(&errors, source),
            "3:5: Unknown variable: x\nno location"
        );
    }

    #[test]
    fn missing_file_is_a_compile_error() {
        let result = compile_shader(ShaderKind::Fragment, &shader_path("does_not_exist.frag"));
        assert!(matches!(result, Err(SampleError::Compile { .. })));
    }
}
