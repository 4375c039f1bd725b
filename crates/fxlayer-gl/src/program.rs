//! Shader objects, program linking and uniform storage.

use std::ffi::CString;

use anyhow::{anyhow, bail, Context as _, Result};
use fxlayer::Pass;
use fxlayer_core::{Identifiable, ParameterType, ShaderStage};
use gl::types::{GLchar, GLenum, GLint, GLuint};

use crate::state::drain_gl_errors;

/// Used when a pass has no vertex program. Feeds the first texture
/// coordinate to fragment input location 0 under naga's varying name.
pub(crate) fn passthrough_vertex(version: u16) -> String {
    format!(
        "#version {version} core\n\
         layout(location = 0) in vec4 position;\n\
         layout(location = 2) in vec4 tex_coord0;\n\
         smooth out vec2 _vs2fs_location0;\n\
         void main() {{\n\
         \x20   gl_Position = position;\n\
         \x20   _vs2fs_location0 = tex_coord0.xy;\n\
         }}\n"
    )
}

/// Fail with every pending GL error code.
pub fn check_gl_error(what: &str) -> Result<()> {
    let errors = drain_gl_errors();
    if errors.is_empty() {
        return Ok(());
    }
    let codes: Vec<String> = errors.iter().map(|e| format!("0x{e:04x}")).collect();
    bail!("{what}: GL error {}", codes.join(", "))
}

fn shader_kind(stage: ShaderStage) -> Option<GLenum> {
    match stage {
        ShaderStage::Vertex => Some(gl::VERTEX_SHADER),
        ShaderStage::Fragment => Some(gl::FRAGMENT_SHADER),
        ShaderStage::Compute => Some(gl::COMPUTE_SHADER),
        ShaderStage::Geometry => Some(gl::GEOMETRY_SHADER),
        ShaderStage::Hull => Some(gl::TESS_CONTROL_SHADER),
        ShaderStage::Domain => Some(gl::TESS_EVALUATION_SHADER),
    }
}

/// # Safety
///
/// A GL context must be current.
pub(crate) unsafe fn compile_shader(stage: ShaderStage, source: &str) -> Result<GLuint> {
    let kind = shader_kind(stage).ok_or_else(|| anyhow!("no GL shader kind for {stage}"))?;
    let source = CString::new(source).context("shader source contains a NUL byte")?;

    let shader = gl::CreateShader(kind);
    if shader == 0 {
        bail!("glCreateShader failed for a {stage} shader");
    }
    let ptr = source.as_ptr();
    gl::ShaderSource(shader, 1, &ptr, std::ptr::null());
    gl::CompileShader(shader);

    let mut status: GLint = 0;
    gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
    if status != gl::TRUE as GLint {
        let log = info_log(shader, gl::GetShaderiv, gl::GetShaderInfoLog);
        gl::DeleteShader(shader);
        bail!("{stage} shader failed to compile:\n{log}");
    }
    Ok(shader)
}

/// Link `shaders` into a program. The shaders are deleted either way.
///
/// # Safety
///
/// A GL context must be current and `shaders` must be compiled shader names.
pub(crate) unsafe fn link_program(shaders: &[GLuint]) -> Result<GLuint> {
    let program = gl::CreateProgram();
    for &shader in shaders {
        gl::AttachShader(program, shader);
    }
    gl::LinkProgram(program);
    for &shader in shaders {
        gl::DetachShader(program, shader);
        gl::DeleteShader(shader);
    }

    let mut status: GLint = 0;
    gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
    if status != gl::TRUE as GLint {
        let log = info_log(program, gl::GetProgramiv, gl::GetProgramInfoLog);
        gl::DeleteProgram(program);
        bail!("program failed to link:\n{log}");
    }
    Ok(program)
}

type GetIv = unsafe fn(GLuint, GLenum, *mut GLint);
type GetLog = unsafe fn(GLuint, i32, *mut i32, *mut GLchar);

unsafe fn info_log(object: GLuint, get_iv: GetIv, get_log: GetLog) -> String {
    let mut len: GLint = 0;
    get_iv(object, gl::INFO_LOG_LENGTH, &mut len);
    if len <= 0 {
        return String::new();
    }
    let mut buf = vec![0u8; len as usize];
    let mut written: GLint = 0;
    get_log(object, len, &mut written, buf.as_mut_ptr().cast());
    buf.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buf).trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Uniform storage
// ---------------------------------------------------------------------------

/// Bytes a uniform of `ty` occupies in a std140 block, or `None` for types
/// that do not live in blocks.
pub fn std140_size(ty: ParameterType) -> Option<usize> {
    match ty {
        ParameterType::Bool | ParameterType::Int | ParameterType::Float1 => Some(4),
        ParameterType::Float2 => Some(8),
        ParameterType::Float3 => Some(12),
        ParameterType::Float4 => Some(16),
        ParameterType::Float4x4 => Some(64),
        _ => None,
    }
}

/// Encode a cached scalar value for upload. Bools and ints are converted
/// from the float cache to 32-bit integers.
pub fn std140_bytes(ty: ParameterType, values: &[f32]) -> Vec<u8> {
    let Some(size) = std140_size(ty) else {
        return Vec::new();
    };
    let mut bytes = Vec::with_capacity(size);
    match ty {
        ParameterType::Bool => {
            let value = values.first().is_some_and(|v| *v != 0.0);
            bytes.extend_from_slice(&u32::from(value).to_ne_bytes());
        }
        ParameterType::Int => {
            let value = values.first().copied().unwrap_or(0.0) as i32;
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        _ => {
            for i in 0..size / 4 {
                bytes.extend_from_slice(&values.get(i).copied().unwrap_or(0.0).to_ne_bytes());
            }
        }
    }
    bytes
}

/// A uniform block owned by a loaded pass.
#[derive(Debug)]
pub(crate) struct BlockSlot {
    pub(crate) buffer: GLuint,
    pub(crate) binding: GLuint,
    pub(crate) size: usize,
}

/// A sampler uniform and the texture unit it reads.
#[derive(Debug)]
pub(crate) struct SamplerSlot {
    pub(crate) unit: GLuint,
}

/// Uniform slots of one linked program, keyed by the block or sampler
/// name in the generated code. naga names blocks per stage, so a uniform
/// shared by two stages owns two slots.
#[derive(Debug, Default)]
pub(crate) struct UniformSlots {
    blocks: Vec<(String, BlockSlot)>,
    samplers: Vec<(String, SamplerSlot)>,
}

impl UniformSlots {
    /// Binding point the next block takes.
    pub(crate) fn next_binding(&self) -> GLuint {
        self.blocks.len() as GLuint
    }

    /// Texture unit the next sampler takes.
    pub(crate) fn next_unit(&self) -> GLuint {
        self.samplers.len() as GLuint
    }

    pub(crate) fn has_block(&self, backend_name: &str) -> bool {
        self.block(backend_name).is_some()
    }

    pub(crate) fn has_sampler(&self, backend_name: &str) -> bool {
        self.sampler(backend_name).is_some()
    }

    pub(crate) fn insert_block(&mut self, backend_name: &str, slot: BlockSlot) {
        self.blocks.push((backend_name.to_string(), slot));
    }

    pub(crate) fn insert_sampler(&mut self, backend_name: &str, slot: SamplerSlot) {
        self.samplers.push((backend_name.to_string(), slot));
    }

    pub(crate) fn block(&self, backend_name: &str) -> Option<&BlockSlot> {
        self.blocks.iter().find(|(n, _)| n == backend_name).map(|(_, b)| b)
    }

    pub(crate) fn sampler(&self, backend_name: &str) -> Option<&SamplerSlot> {
        self.samplers.iter().find(|(n, _)| n == backend_name).map(|(_, s)| s)
    }

    pub(crate) fn blocks(&self) -> impl Iterator<Item = &BlockSlot> {
        self.blocks.iter().map(|(_, b)| b)
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = GLuint> + '_ {
        self.samplers.iter().map(|(_, s)| s.unit)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn sampler_count(&self) -> usize {
        self.samplers.len()
    }
}

/// GL objects of one loaded pass.
#[derive(Debug)]
pub(crate) struct GlPass {
    pub(crate) name: String,
    pub(crate) program: GLuint,
    pub(crate) framebuffer: GLuint,
    pub(crate) slots: UniformSlots,
}

impl GlPass {
    /// Compile and link every program of `pass`, then lay out its uniforms.
    ///
    /// # Safety
    ///
    /// A GL context must be current.
    pub(crate) unsafe fn load(pass: &Pass, fallback_version: u16) -> Result<Self> {
        let mut shaders = Vec::new();
        let compiled = (|| -> Result<()> {
            if pass.program(ShaderStage::Vertex).is_none() {
                shaders.push(compile_shader(ShaderStage::Vertex, &passthrough_vertex(fallback_version))?);
            }
            for program in pass.programs() {
                let shader = compile_shader(program.stage(), program.code())
                    .with_context(|| program.full_name())?;
                shaders.push(shader);
            }
            Ok(())
        })();
        if let Err(err) = compiled {
            for shader in shaders {
                gl::DeleteShader(shader);
            }
            return Err(err);
        }

        let program = link_program(&shaders).with_context(|| pass.full_name())?;
        let mut gl_pass = Self {
            name: pass.full_name(),
            program,
            framebuffer: 0,
            slots: UniformSlots::default(),
        };
        // From here on dropping `gl_pass` releases what was created.
        gl_pass.bind_uniforms(pass)?;
        gl::GenFramebuffers(1, &mut gl_pass.framebuffer);
        check_gl_error("pass load")?;
        Ok(gl_pass)
    }

    unsafe fn bind_uniforms(&mut self, pass: &Pass) -> Result<()> {
        let mut previous_program: GLint = 0;
        gl::GetIntegerv(gl::CURRENT_PROGRAM, &mut previous_program);
        gl::UseProgram(self.program);

        let result = (|| -> Result<()> {
            for uniform in pass.uniforms() {
                let Some(binding) = uniform.binding() else {
                    continue;
                };
                let key = binding.backend_name.as_str();
                let backend = CString::new(key)?;
                if uniform.ty().is_sampler() {
                    if self.slots.has_sampler(key) {
                        continue;
                    }
                    let location = gl::GetUniformLocation(self.program, backend.as_ptr());
                    if location < 0 {
                        tracing::debug!("{}: sampler {key} was optimized out", self.name);
                        continue;
                    }
                    let unit = self.slots.next_unit();
                    gl::Uniform1i(location, unit as GLint);
                    self.slots.insert_sampler(key, SamplerSlot { unit });
                } else {
                    if self.slots.has_block(key) {
                        continue;
                    }
                    let index = gl::GetUniformBlockIndex(self.program, backend.as_ptr());
                    if index == gl::INVALID_INDEX {
                        tracing::debug!("{}: block {key} was optimized out", self.name);
                        continue;
                    }
                    let mut size: GLint = 0;
                    gl::GetActiveUniformBlockiv(self.program, index, gl::UNIFORM_BLOCK_DATA_SIZE, &mut size);
                    let size = (size.max(0) as usize).max(std140_size(uniform.ty()).unwrap_or(0));
                    let binding_point = self.slots.next_binding();
                    gl::UniformBlockBinding(self.program, index, binding_point);

                    let mut buffer: GLuint = 0;
                    gl::GenBuffers(1, &mut buffer);
                    gl::BindBuffer(gl::UNIFORM_BUFFER, buffer);
                    gl::BufferData(
                        gl::UNIFORM_BUFFER,
                        size as isize,
                        std::ptr::null(),
                        gl::DYNAMIC_DRAW,
                    );
                    gl::BindBuffer(gl::UNIFORM_BUFFER, 0);
                    self.slots.insert_block(
                        key,
                        BlockSlot {
                            buffer,
                            binding: binding_point,
                            size,
                        },
                    );
                }
            }
            check_gl_error("uniform layout")
        })();

        gl::UseProgram(previous_program as GLuint);
        result
    }
}

impl Drop for GlPass {
    fn drop(&mut self) {
        unsafe {
            for block in self.slots.blocks() {
                gl::DeleteBuffers(1, &block.buffer);
            }
            if self.framebuffer != 0 {
                gl::DeleteFramebuffers(1, &self.framebuffer);
            }
            gl::DeleteProgram(self.program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        assert_eq!(std140_size(ParameterType::Float1), Some(4));
        assert_eq!(std140_size(ParameterType::Float3), Some(12));
        assert_eq!(std140_size(ParameterType::Float4x4), Some(64));
        assert_eq!(std140_size(ParameterType::Sampler2D), None);
        assert_eq!(std140_size(ParameterType::String), None);
    }

    #[test]
    fn values_pack_tightly() {
        let bytes = std140_bytes(ParameterType::Float2, &[1.0, 2.0, 3.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[4..8], &2.0f32.to_ne_bytes());

        assert_eq!(std140_bytes(ParameterType::Int, &[7.0]), 7i32.to_ne_bytes().to_vec());
        assert_eq!(std140_bytes(ParameterType::Bool, &[0.5]), 1u32.to_ne_bytes().to_vec());
        assert_eq!(std140_bytes(ParameterType::Float4x4, &[]).len(), 64);
        assert!(std140_bytes(ParameterType::Texture, &[1.0]).is_empty());
    }

    #[test]
    fn stages_sharing_a_uniform_get_their_own_blocks() {
        let mut slots = UniformSlots::default();
        for (key, buffer) in [("type_block_0Vertex", 11), ("type_block_0Fragment", 12)] {
            let binding = slots.next_binding();
            slots.insert_block(key, BlockSlot { buffer, binding, size: 4 });
        }

        let vertex = slots.block("type_block_0Vertex").unwrap();
        let fragment = slots.block("type_block_0Fragment").unwrap();
        assert_eq!((vertex.buffer, vertex.binding), (11, 0));
        assert_eq!((fragment.buffer, fragment.binding), (12, 1));
        assert!(slots.block("time").is_none());
        assert_eq!(slots.block_count(), 2);
    }

    #[test]
    fn sampler_units_follow_insertion() {
        let mut slots = UniformSlots::default();
        for key in ["_group_0_binding_1_fs", "_group_0_binding_2_fs"] {
            let unit = slots.next_unit();
            slots.insert_sampler(key, SamplerSlot { unit });
        }
        assert!(slots.has_sampler("_group_0_binding_2_fs"));
        assert_eq!(slots.sampler("_group_0_binding_2_fs").unwrap().unit, 1);
        assert_eq!(slots.units().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn passthrough_names_its_version() {
        let source = passthrough_vertex(410);
        assert!(source.starts_with("#version 410 core\n"));
        assert!(source.contains("_vs2fs_location0"));
    }
}
