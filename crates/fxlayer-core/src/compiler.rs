//! Contract between the engine and a shader compiler toolchain.

use bitflags::bitflags;

use crate::error::Result;
use crate::types::{ParameterType, Profile, ShaderStage, Version};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct CompileFlags: u32 {
        /// Flip clip-space Y and remap depth for GL-style targets.
        const ADJUST_COORDINATE_SPACE = 1 << 0;
        const FORCE_POINT_SIZE = 1 << 1;
        /// Log generated code at trace level.
        const DEBUG = 1 << 2;
    }
}

impl CompileFlags {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "adjust_coordinate_space" => Some(Self::ADJUST_COORDINATE_SPACE),
            "force_point_size" => Some(Self::FORCE_POINT_SIZE),
            "debug" => Some(Self::DEBUG),
            _ => None,
        }
    }
}

/// One entry point to compile.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Used in error messages only.
    pub name: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub stage: ShaderStage,
    pub profile: Profile,
    pub flags: CompileFlags,
}

/// A uniform or sampler statically used by a compiled entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDesc {
    /// Name in the effect source.
    pub name: String,
    pub ty: ParameterType,
    pub group: u32,
    pub binding: u32,
    /// Name of the object in the generated code (uniform block, sampler).
    pub backend_name: String,
}

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub profile: Profile,
    pub code: String,
    pub uniforms: Vec<UniformDesc>,
}

pub trait Compiler {
    fn version(&self) -> Version;

    /// Whether `profile` can be generated for `stage` at all.
    fn supports(&self, profile: Profile, stage: ShaderStage) -> bool;

    /// Compile one entry point. Failures are `FxError::CompileFailed` with
    /// every diagnostic the toolchain produced.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledProgram>;

    /// First of `candidates` (best first) this compiler can generate.
    fn best_profile(&self, stage: ShaderStage, candidates: &[Profile]) -> Option<Profile> {
        candidates
            .iter()
            .copied()
            .find(|&profile| self.supports(profile, stage))
    }
}
