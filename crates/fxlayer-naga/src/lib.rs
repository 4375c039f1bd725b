//! WGSL effect compiler built on `naga`.
//!
//! Effects are written in WGSL. [`NagaCompiler`] parses and validates the
//! source once, then emits one entry point per request as WGSL, desktop GLSL
//! or MSL, and reflects every uniform and texture the entry point uses.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use fxlayer_core::{
    CompileFlags, CompileRequest, CompiledProgram, Compiler, FxError, ParameterType, Profile,
    Result, ShaderStage, UniformDesc, Version,
};
use naga::back::glsl;
use naga::{AddressSpace, GlobalVariable, Handle, ImageDimension, ScalarKind, TypeInner, VectorSize};
use tracing::{debug, trace};

/// Desktop GLSL versions the naga backend can write.
pub const GLSL_VERSIONS: [u16; 10] = [140, 150, 330, 400, 410, 420, 430, 440, 450, 460];

struct ParsedModule {
    module: naga::Module,
    info: naga::valid::ModuleInfo,
}

/// Compiler for WGSL effect sources.
///
/// Parsed modules are cached per source text, so compiling every entry point
/// of one effect parses it once.
#[derive(Default)]
pub struct NagaCompiler {
    cache: RefCell<HashMap<u64, Rc<ParsedModule>>>,
}

impl NagaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached module.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn parse(&self, name: &str, source: &str) -> Result<Rc<ParsedModule>> {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let key = hasher.finish();

        if let Some(parsed) = self.cache.borrow().get(&key) {
            return Ok(parsed.clone());
        }

        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| FxError::compile_failed(name, e.emit_to_string(source)))?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| FxError::compile_failed(name, e.emit_to_string(source)))?;

        debug!(
            "parsed {name}: {} entry points, {} globals",
            module.entry_points.len(),
            module.global_variables.len()
        );

        let parsed = Rc::new(ParsedModule { module, info });
        self.cache.borrow_mut().insert(key, parsed.clone());
        Ok(parsed)
    }
}

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        ShaderStage::Hull | ShaderStage::Domain | ShaderStage::Geometry => None,
    }
}

/// Parameter type of a global, or `None` when it has no parameter form
/// (structs, storage buffers, standalone samplers).
fn parameter_type(space: AddressSpace, inner: &TypeInner) -> Option<ParameterType> {
    match (space, inner) {
        (AddressSpace::Uniform, TypeInner::Scalar(scalar)) => match scalar.kind {
            ScalarKind::Bool => Some(ParameterType::Bool),
            ScalarKind::Sint | ScalarKind::Uint => Some(ParameterType::Int),
            ScalarKind::Float => Some(ParameterType::Float1),
            _ => None,
        },
        (AddressSpace::Uniform, TypeInner::Vector { size, scalar })
            if scalar.kind == ScalarKind::Float =>
        {
            ParameterType::float(*size as usize)
        }
        (
            AddressSpace::Uniform,
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                ..
            },
        ) => Some(ParameterType::Float4x4),
        (AddressSpace::Handle, TypeInner::Image { dim, .. }) => Some(match dim {
            ImageDimension::D1 => ParameterType::Sampler1D,
            ImageDimension::D2 => ParameterType::Sampler2D,
            ImageDimension::D3 => ParameterType::Sampler3D,
            ImageDimension::Cube => ParameterType::SamplerCube,
        }),
        _ => None,
    }
}

fn reflect_uniforms(
    parsed: &ParsedModule,
    entry_index: usize,
    backend_name: impl Fn(Handle<GlobalVariable>, &str) -> Option<String>,
) -> Vec<UniformDesc> {
    let function_info = parsed.info.get_entry_point(entry_index);
    let mut uniforms = Vec::new();

    for (handle, var) in parsed.module.global_variables.iter() {
        if function_info[handle].is_empty() {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var
            .name
            .clone()
            .unwrap_or_else(|| format!("group{}_binding{}", binding.group, binding.binding));
        let Some(ty) = parameter_type(var.space, &parsed.module.types[var.ty].inner) else {
            trace!("global {name} has no parameter form, skipping");
            continue;
        };
        let Some(backend_name) = backend_name(handle, &name) else {
            trace!("global {name} was not emitted, skipping");
            continue;
        };
        uniforms.push(UniformDesc {
            name,
            ty,
            group: binding.group,
            binding: binding.binding,
            backend_name,
        });
    }

    uniforms
}

fn write_glsl(
    request: &CompileRequest<'_>,
    parsed: &ParsedModule,
    entry_index: usize,
    stage: naga::ShaderStage,
    version: u16,
) -> Result<(String, Vec<UniformDesc>)> {
    let mut writer_flags = glsl::WriterFlags::empty();
    if request.flags.contains(CompileFlags::ADJUST_COORDINATE_SPACE) {
        writer_flags |= glsl::WriterFlags::ADJUST_COORDINATE_SPACE;
    }
    if request.flags.contains(CompileFlags::FORCE_POINT_SIZE) {
        writer_flags |= glsl::WriterFlags::FORCE_POINT_SIZE;
    }

    let options = glsl::Options {
        version: glsl::Version::Desktop(version),
        writer_flags,
        binding_map: Default::default(),
        zero_initialize_workgroup_memory: true,
    };
    let pipeline = glsl::PipelineOptions {
        shader_stage: stage,
        entry_point: request.entry_point.to_string(),
        multiview: None,
    };

    let mut code = String::new();
    let reflection = {
        let mut writer = glsl::Writer::new(
            &mut code,
            &parsed.module,
            &parsed.info,
            &options,
            &pipeline,
            naga::proc::BoundsCheckPolicies::default(),
        )
        .map_err(|e| FxError::compile_failed(request.name, e.to_string()))?;

        writer
            .write()
            .map_err(|e| FxError::compile_failed(request.name, e.to_string()))?
    };

    let uniforms = reflect_uniforms(parsed, entry_index, |handle, _| {
        if let Some(block) = reflection.uniforms.get(&handle) {
            return Some(block.clone());
        }
        reflection
            .texture_mapping
            .iter()
            .find(|(_, mapping)| mapping.texture == handle)
            .map(|(glsl_name, _)| glsl_name.clone())
    });

    Ok((code, uniforms))
}

impl Compiler for NagaCompiler {
    fn version(&self) -> Version {
        Version::from_pkg("fxlayer-naga", env!("CARGO_PKG_VERSION"))
    }

    fn supports(&self, profile: Profile, stage: ShaderStage) -> bool {
        if naga_stage(stage).is_none() {
            return false;
        }
        match profile {
            Profile::Wgsl | Profile::Msl => true,
            Profile::Glsl(version) => {
                GLSL_VERSIONS.contains(&version)
                    && (stage != ShaderStage::Compute || version >= 430)
            }
        }
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledProgram> {
        if !self.supports(request.profile, request.stage) {
            return Err(FxError::InvalidProfile(format!(
                "{} cannot target {} programs",
                request.profile, request.stage
            )));
        }
        let stage = naga_stage(request.stage)
            .ok_or_else(|| FxError::InvalidProfile(request.stage.to_string()))?;

        let parsed = self.parse(request.name, request.source)?;

        let entry_index = parsed
            .module
            .entry_points
            .iter()
            .position(|ep| ep.name == request.entry_point && ep.stage == stage)
            .ok_or_else(|| {
                FxError::compile_failed(
                    request.name,
                    format!(
                        "no {} entry point named {}",
                        request.stage, request.entry_point
                    ),
                )
            })?;

        let (code, uniforms) = match request.profile {
            Profile::Wgsl => {
                let uniforms = reflect_uniforms(&parsed, entry_index, |_, name| Some(name.to_string()));
                (request.source.to_string(), uniforms)
            }
            Profile::Glsl(version) => write_glsl(request, &parsed, entry_index, stage, version)?,
            Profile::Msl => {
                let (code, _) = naga::back::msl::write_string(
                    &parsed.module,
                    &parsed.info,
                    &naga::back::msl::Options::default(),
                    &naga::back::msl::PipelineOptions::default(),
                )
                .map_err(|e| FxError::compile_failed(request.name, e.to_string()))?;
                let uniforms = reflect_uniforms(&parsed, entry_index, |_, name| Some(name.to_string()));
                (code, uniforms)
            }
        };

        if request.flags.contains(CompileFlags::DEBUG) {
            trace!("{}:{} ({}):\n{code}", request.name, request.entry_point, request.profile);
        }
        debug!(
            "compiled {}:{} as {} with {} uniforms",
            request.name,
            request.entry_point,
            request.profile,
            uniforms.len()
        );

        Ok(CompiledProgram {
            stage: request.stage,
            entry_point: request.entry_point.to_string(),
            profile: request.profile,
            code,
            uniforms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
@group(0) @binding(0) var<uniform> time: f32;
@group(0) @binding(1) var<uniform> tint: vec4<f32>;
@group(0) @binding(2) var<uniform> unused: vec2<f32>;
@group(1) @binding(0) var src: texture_2d<f32>;
@group(1) @binding(1) var src_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec4<f32>, @location(2) uv: vec4<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = position;
    out.uv = uv.xy;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let color = textureSample(src, src_sampler, in.uv);
    return color * tint * (0.5 + 0.5 * sin(time));
}
"#;

    fn request<'a>(entry_point: &'a str, stage: ShaderStage, profile: Profile) -> CompileRequest<'a> {
        CompileRequest {
            name: "test.fx",
            source: SOURCE,
            entry_point,
            stage,
            profile,
            flags: CompileFlags::empty(),
        }
    }

    #[test]
    fn reflects_used_uniforms_only() {
        let compiler = NagaCompiler::new();
        let program = compiler
            .compile(&request("fs_main", ShaderStage::Fragment, Profile::Wgsl))
            .unwrap();

        let names: Vec<_> = program.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["time", "tint", "src"]);
        assert_eq!(program.uniforms[0].ty, ParameterType::Float1);
        assert_eq!(program.uniforms[1].ty, ParameterType::Float4);
        assert_eq!(program.uniforms[2].ty, ParameterType::Sampler2D);
        assert_eq!((program.uniforms[2].group, program.uniforms[2].binding), (1, 0));
    }

    #[test]
    fn vertex_stage_sees_no_fragment_uniforms() {
        let compiler = NagaCompiler::new();
        let program = compiler
            .compile(&request("vs_main", ShaderStage::Vertex, Profile::Wgsl))
            .unwrap();
        assert!(program.uniforms.is_empty());
    }

    #[test]
    fn glsl_output_names_uniform_blocks() {
        let compiler = NagaCompiler::new();
        let program = compiler
            .compile(&request("fs_main", ShaderStage::Fragment, Profile::Glsl(330)))
            .unwrap();

        assert!(program.code.starts_with("#version 330"));
        assert_eq!(program.uniforms.len(), 3);
        for uniform in &program.uniforms {
            assert!(!uniform.backend_name.is_empty());
            assert!(
                program.code.contains(&uniform.backend_name),
                "{} missing from generated code",
                uniform.backend_name
            );
        }
    }

    #[test]
    fn shared_uniform_gets_a_block_per_stage() {
        let source = r#"
@group(0) @binding(0) var<uniform> time: f32;

@vertex
fn vs_main(@location(0) position: vec4<f32>) -> @builtin(position) vec4<f32> {
    return position * time;
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(time);
}
"#;
        let compiler = NagaCompiler::new();
        let compile = |entry_point, stage| {
            compiler
                .compile(&CompileRequest {
                    source,
                    ..request(entry_point, stage, Profile::Glsl(330))
                })
                .unwrap()
        };
        let vs = compile("vs_main", ShaderStage::Vertex);
        let fs = compile("fs_main", ShaderStage::Fragment);

        assert_eq!(vs.uniforms[0].name, "time");
        assert_eq!(fs.uniforms[0].name, "time");
        assert_ne!(vs.uniforms[0].backend_name, fs.uniforms[0].backend_name);
    }

    #[test]
    fn msl_output() {
        let compiler = NagaCompiler::new();
        let program = compiler
            .compile(&request("fs_main", ShaderStage::Fragment, Profile::Msl))
            .unwrap();
        assert!(program.code.contains("metal"));
    }

    #[test]
    fn missing_entry_point_fails() {
        let compiler = NagaCompiler::new();
        let err = compiler
            .compile(&request("ps_missing", ShaderStage::Fragment, Profile::Wgsl))
            .unwrap_err();
        assert!(matches!(err, FxError::CompileFailed { .. }));

        // Right name, wrong stage.
        let err = compiler
            .compile(&request("fs_main", ShaderStage::Vertex, Profile::Wgsl))
            .unwrap_err();
        assert!(matches!(err, FxError::CompileFailed { .. }));
    }

    #[test]
    fn syntax_errors_carry_diagnostics() {
        let compiler = NagaCompiler::new();
        let err = compiler
            .compile(&CompileRequest {
                source: "fn broken( {",
                ..request("broken", ShaderStage::Fragment, Profile::Wgsl)
            })
            .unwrap_err();
        match err {
            FxError::CompileFailed { name, errors } => {
                assert_eq!(name, "test.fx");
                assert_eq!(errors.len(), 1);
                assert!(!errors[0].is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn profile_support() {
        let compiler = NagaCompiler::new();
        assert!(compiler.supports(Profile::Glsl(330), ShaderStage::Fragment));
        assert!(!compiler.supports(Profile::Glsl(120), ShaderStage::Fragment));
        assert!(!compiler.supports(Profile::Glsl(330), ShaderStage::Compute));
        assert!(!compiler.supports(Profile::Wgsl, ShaderStage::Geometry));
        assert_eq!(
            compiler.best_profile(
                ShaderStage::Fragment,
                &[Profile::Glsl(120), Profile::Glsl(410), Profile::Wgsl]
            ),
            Some(Profile::Glsl(410))
        );

        let err = compiler
            .compile(&request("fs_main", ShaderStage::Geometry, Profile::Wgsl))
            .unwrap_err();
        assert!(matches!(err, FxError::InvalidProfile(_)));
    }
}
