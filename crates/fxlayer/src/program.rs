//! One compiled shader stage of a pass.

use std::cell::RefCell;
use std::collections::BTreeMap;

use fxlayer_core::{CompiledProgram, Identifiable, Profile, ShaderStage, UniformDesc};

use crate::parameter::{Parameter, ParameterBinding, ParameterRef};
use crate::pass::PassId;

/// A program only exists fully compiled: it is built from the compiler's
/// output and never changes afterwards.
#[derive(Debug)]
pub struct Program {
    pass: PassId,
    owner: String,
    compiled: CompiledProgram,
    // Created on first access.
    uniforms: RefCell<BTreeMap<String, ParameterRef>>,
}

impl Program {
    pub(crate) fn new(pass: PassId, owner: &str, compiled: CompiledProgram) -> Self {
        Self {
            pass,
            owner: owner.to_string(),
            compiled,
            uniforms: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn pass_id(&self) -> PassId {
        self.pass
    }

    pub fn stage(&self) -> ShaderStage {
        self.compiled.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.compiled.entry_point
    }

    pub fn profile(&self) -> Profile {
        self.compiled.profile
    }

    /// Generated backend code.
    pub fn code(&self) -> &str {
        &self.compiled.code
    }

    pub fn uniform_descs(&self) -> &[UniformDesc] {
        &self.compiled.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<ParameterRef> {
        let desc = self.compiled.uniforms.iter().find(|u| u.name == name)?;
        Some(self.parameter_for(desc))
    }

    /// Every uniform, in reflection order.
    pub fn uniforms(&self) -> Vec<ParameterRef> {
        self.compiled
            .uniforms
            .iter()
            .map(|desc| self.parameter_for(desc))
            .collect()
    }

    fn parameter_for(&self, desc: &UniformDesc) -> ParameterRef {
        self.uniforms
            .borrow_mut()
            .entry(desc.name.clone())
            .or_insert_with(|| {
                let binding = ParameterBinding {
                    pass: self.pass,
                    stage: self.compiled.stage,
                    group: desc.group,
                    binding: desc.binding,
                    backend_name: desc.backend_name.clone(),
                };
                Parameter::new_bound(&self.owner, desc, binding)
            })
            .clone()
    }
}

impl Identifiable for Program {
    fn name(&self) -> &str {
        &self.compiled.entry_point
    }

    fn full_name(&self) -> String {
        format!("{}:{}", self.owner, self.compiled.entry_point)
    }
}
