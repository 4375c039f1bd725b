//! Parameters and the attachment graph.
//!
//! A parameter is either *virtual* (created by the Core or an effect, no
//! program uniform behind it) or *bound* to one uniform of one compiled
//! program. Virtual parameters can be attached to other parameters of the
//! same type; every value written to a virtual parameter is copied into all
//! of its attachments, transitively, before the setter returns.
//!
//! Attachments are counted references, so an attached parameter lives at
//! least as long as the parameter feeding it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use fxlayer_core::{FxError, Identifiable, ParameterType, Result, ShaderStage, UniformDesc};

use crate::pass::PassId;
use crate::texture::TextureRef;

pub type ParameterRef = Rc<Parameter>;

/// Where a bound parameter lives in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub pass: PassId,
    pub stage: ShaderStage,
    pub group: u32,
    pub binding: u32,
    /// Uniform block or sampler name in the generated code.
    pub backend_name: String,
}

/// CPU-side value of a parameter.
#[derive(Debug, Clone)]
pub enum ParameterValue {
    /// Bool, int and float types. Only the first `components()` slots are used.
    Scalar([f32; 16]),
    String(String),
    Texture(Option<TextureRef>),
}

impl ParameterValue {
    fn initial(ty: ParameterType) -> Self {
        if ty.is_scalar() {
            Self::Scalar([0.0; 16])
        } else if ty == ParameterType::String {
            Self::String(String::new())
        } else {
            Self::Texture(None)
        }
    }
}

struct ParameterState {
    value: ParameterValue,
    dirty: bool,
    attached: Vec<ParameterRef>,
}

pub struct Parameter {
    name: String,
    owner: Option<String>,
    ty: ParameterType,
    binding: Option<ParameterBinding>,
    state: RefCell<ParameterState>,
}

impl Parameter {
    pub(crate) fn new_virtual(owner: Option<&str>, name: &str, ty: ParameterType) -> ParameterRef {
        Self::new(owner, name, ty, None)
    }

    pub(crate) fn new_bound(owner: &str, desc: &UniformDesc, binding: ParameterBinding) -> ParameterRef {
        Self::new(Some(owner), &desc.name, desc.ty, Some(binding))
    }

    fn new(
        owner: Option<&str>,
        name: &str,
        ty: ParameterType,
        binding: Option<ParameterBinding>,
    ) -> ParameterRef {
        Rc::new(Self {
            name: name.to_string(),
            owner: owner.map(str::to_string),
            ty,
            binding,
            state: RefCell::new(ParameterState {
                value: ParameterValue::initial(ty),
                dirty: true,
                attached: Vec::new(),
            }),
        })
    }

    pub fn ty(&self) -> ParameterType {
        self.ty
    }

    pub fn is_virtual(&self) -> bool {
        self.binding.is_none()
    }

    pub fn binding(&self) -> Option<&ParameterBinding> {
        self.binding.as_ref()
    }

    /// Float count of the value, derived from the type alone.
    pub fn components(&self) -> usize {
        self.ty.components()
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Copy up to `components()` floats into the value and every attachment.
    pub fn set_scalar(&self, values: &[f32]) -> Result<()> {
        if !self.ty.is_scalar() {
            return Err(FxError::InvalidArgument(format!(
                "{} is {:?}, not a scalar parameter",
                self.full_name(),
                self.ty
            )));
        }
        if values.is_empty() {
            return Err(FxError::InvalidArgument(format!(
                "no values given for {}",
                self.full_name()
            )));
        }
        let count = values.len().min(self.components());
        self.propagate(&|value| {
            if let ParameterValue::Scalar(slots) = value {
                slots[..count].copy_from_slice(&values[..count]);
            }
        });
        Ok(())
    }

    pub fn set_bool(&self, value: bool) -> Result<()> {
        self.set_scalar(&[if value { 1.0 } else { 0.0 }])
    }

    pub fn set_int(&self, value: i32) -> Result<()> {
        self.set_scalar(&[value as f32])
    }

    /// Bind a texture to a sampler parameter and every attachment.
    pub fn set_texture(&self, texture: &TextureRef) -> Result<()> {
        if !self.ty.is_sampler() {
            return Err(FxError::InvalidArgument(format!(
                "{} is {:?}; only samplers take textures",
                self.full_name(),
                self.ty
            )));
        }
        self.propagate(&|value| *value = ParameterValue::Texture(Some(texture.clone())));
        Ok(())
    }

    pub fn set_string(&self, text: &str) -> Result<()> {
        if self.ty != ParameterType::String {
            return Err(FxError::InvalidArgument(format!(
                "{} is {:?}, not a string parameter",
                self.full_name(),
                self.ty
            )));
        }
        self.propagate(&|value| *value = ParameterValue::String(text.to_string()));
        Ok(())
    }

    pub fn value(&self) -> ParameterValue {
        self.state.borrow().value.clone()
    }

    /// The `components()` floats of a scalar parameter, empty otherwise.
    pub fn scalar(&self) -> Vec<f32> {
        match &self.state.borrow().value {
            ParameterValue::Scalar(slots) => slots[..self.components()].to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn texture(&self) -> Option<TextureRef> {
        match &self.state.borrow().value {
            ParameterValue::Texture(texture) => texture.clone(),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<String> {
        match &self.state.borrow().value {
            ParameterValue::String(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn propagate(&self, update: &dyn Fn(&mut ParameterValue)) {
        let attached = {
            let mut state = self.state.borrow_mut();
            update(&mut state.value);
            state.dirty = true;
            state.attached.clone()
        };
        for parameter in attached {
            parameter.propagate(update);
        }
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    /// Feed every future value of `self` into `other`.
    ///
    /// Only virtual parameters accept attachments. The current value is
    /// copied into `other` immediately.
    pub fn attach(&self, other: &ParameterRef) -> Result<()> {
        if !self.is_virtual() {
            return Err(FxError::InvalidCall(format!(
                "cannot attach to non-virtual parameter {}",
                self.full_name()
            )));
        }
        if other.ty != self.ty {
            return Err(FxError::InvalidArgument(format!(
                "cannot attach {} ({:?}) to {} ({:?})",
                other.full_name(),
                other.ty,
                self.full_name(),
                self.ty
            )));
        }
        if other.reaches(self) {
            return Err(FxError::InvalidArgument(format!(
                "attaching {} to {} would form a cycle",
                other.full_name(),
                self.full_name()
            )));
        }

        let value = {
            let mut state = self.state.borrow_mut();
            if state.attached.iter().any(|p| Rc::ptr_eq(p, other)) {
                return Ok(());
            }
            state.attached.push(other.clone());
            state.value.clone()
        };
        other.propagate(&|slot| *slot = value.clone());
        Ok(())
    }

    /// Returns whether `other` was attached.
    pub fn detach(&self, other: &Parameter) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.attached.len();
        state.attached.retain(|p| !std::ptr::eq(p.as_ref(), other));
        state.attached.len() != before
    }

    pub fn attached(&self) -> Vec<ParameterRef> {
        self.state.borrow().attached.clone()
    }

    /// Whether `target` is `self` or reachable through attachments.
    fn reaches(&self, target: &Parameter) -> bool {
        std::ptr::eq(self, target) || self.state.borrow().attached.iter().any(|p| p.reaches(target))
    }

    /// Bound parameters reachable from `self`, including `self`.
    pub(crate) fn bound_leaves(self: &Rc<Self>) -> Vec<ParameterRef> {
        if !self.is_virtual() {
            return vec![self.clone()];
        }
        self.attached()
            .iter()
            .flat_map(|p| p.bound_leaves())
            .collect()
    }

    /// Values of `self` and everything reachable from it, for [`Self::rollback`].
    pub(crate) fn snapshot(self: &Rc<Self>) -> Vec<(ParameterRef, ParameterValue, bool)> {
        let mut seen: Vec<ParameterRef> = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(parameter) = pending.pop() {
            if seen.iter().any(|p| Rc::ptr_eq(p, &parameter)) {
                continue;
            }
            pending.extend(parameter.attached());
            seen.push(parameter);
        }
        seen.into_iter()
            .map(|p| {
                let (value, dirty) = {
                    let state = p.state.borrow();
                    (state.value.clone(), state.dirty)
                };
                (p, value, dirty)
            })
            .collect()
    }

    /// Put back the values a [`Self::snapshot`] recorded.
    pub(crate) fn rollback(snapshot: Vec<(ParameterRef, ParameterValue, bool)>) {
        for (parameter, value, dirty) in snapshot {
            let mut state = parameter.state.borrow_mut();
            state.value = value;
            state.dirty = dirty;
        }
    }

    // -----------------------------------------------------------------------
    // Dirty tracking
    // -----------------------------------------------------------------------

    /// Changed since the value was last pushed to the device.
    pub fn is_dirty(&self) -> bool {
        self.state.borrow().dirty
    }

    pub(crate) fn take_dirty(&self) -> bool {
        std::mem::replace(&mut self.state.borrow_mut().dirty, false)
    }

    pub(crate) fn mark_dirty(&self) {
        self.state.borrow_mut().dirty = true;
    }
}

impl Identifiable for Parameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Parameter")
            .field("name", &self.full_name())
            .field("ty", &self.ty)
            .field("virtual", &self.is_virtual())
            .field("dirty", &state.dirty)
            .field("attached", &state.attached.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(name: &str, ty: ParameterType) -> ParameterRef {
        let desc = UniformDesc {
            name: name.into(),
            ty,
            group: 0,
            binding: 0,
            backend_name: name.into(),
        };
        let binding = ParameterBinding {
            pass: PassId::next(),
            stage: ShaderStage::Fragment,
            group: 0,
            binding: 0,
            backend_name: name.into(),
        };
        Parameter::new_bound("fx", &desc, binding)
    }

    #[test]
    fn values_reach_every_level() {
        let global = Parameter::new_virtual(None, "g_time", ParameterType::Float1);
        let effect = Parameter::new_virtual(Some("fx"), "time", ParameterType::Float1);
        let vs = bound("time", ParameterType::Float1);
        let fs = bound("time", ParameterType::Float1);

        effect.attach(&vs).unwrap();
        effect.attach(&fs).unwrap();
        global.attach(&effect).unwrap();

        global.set_scalar(&[12.5]).unwrap();
        for p in [&effect, &vs, &fs] {
            assert_eq!(p.scalar(), vec![12.5]);
            assert!(p.is_dirty());
        }
    }

    #[test]
    fn set_scalar_copies_only_type_width() {
        let p = Parameter::new_virtual(None, "tint", ParameterType::Float2);
        p.set_scalar(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(p.scalar(), vec![1.0, 2.0]);
        p.set_scalar(&[9.0]).unwrap();
        assert_eq!(p.scalar(), vec![9.0, 2.0]);
        assert!(p.set_scalar(&[]).is_err());
    }

    #[test]
    fn attach_requires_virtual_source() {
        let program_uniform = bound("time", ParameterType::Float1);
        let other = Parameter::new_virtual(None, "other", ParameterType::Float1);
        other.set_scalar(&[3.0]).unwrap();

        let err = program_uniform.attach(&other).unwrap_err();
        assert!(matches!(err, FxError::InvalidCall(_)));
        assert!(program_uniform.attached().is_empty());
        assert_eq!(other.scalar(), vec![3.0]);
    }

    #[test]
    fn attach_pushes_current_value() {
        let global = Parameter::new_virtual(None, "g", ParameterType::Float4);
        global.set_scalar(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let target = bound("color", ParameterType::Float4);
        global.attach(&target).unwrap();
        assert_eq!(target.scalar(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn cycles_and_mismatches_are_rejected() {
        let a = Parameter::new_virtual(None, "a", ParameterType::Float1);
        let b = Parameter::new_virtual(None, "b", ParameterType::Float1);
        let c = Parameter::new_virtual(None, "c", ParameterType::Float1);
        a.attach(&b).unwrap();
        b.attach(&c).unwrap();
        assert!(c.attach(&a).is_err());
        assert!(a.attach(&a).is_err());

        let v = Parameter::new_virtual(None, "v", ParameterType::Float3);
        assert!(matches!(a.attach(&v), Err(FxError::InvalidArgument(_))));
    }

    #[test]
    fn attaching_twice_is_idempotent() {
        let a = Parameter::new_virtual(None, "a", ParameterType::Int);
        let b = Parameter::new_virtual(None, "b", ParameterType::Int);
        a.attach(&b).unwrap();
        a.attach(&b).unwrap();
        assert_eq!(a.attached().len(), 1);
        assert!(a.detach(&b));
        assert!(!a.detach(&b));
    }

    #[test]
    fn strings_and_scalars_do_not_mix() {
        let s = Parameter::new_virtual(None, "label", ParameterType::String);
        assert!(s.set_scalar(&[1.0]).is_err());
        s.set_string("hello").unwrap();
        assert_eq!(s.string().as_deref(), Some("hello"));

        let f = Parameter::new_virtual(None, "f", ParameterType::Float1);
        assert!(f.set_string("x").is_err());
        assert_eq!(f.components(), 1);
    }

    #[test]
    fn dirty_flag_clears_once() {
        let p = bound("time", ParameterType::Float1);
        assert!(p.take_dirty());
        assert!(!p.take_dirty());
        p.set_scalar(&[1.0]).unwrap();
        assert!(p.take_dirty());
    }

    #[test]
    fn bound_leaves_walk_virtual_chains() {
        let global = Parameter::new_virtual(None, "g", ParameterType::Sampler2D);
        let effect = Parameter::new_virtual(Some("fx"), "src", ParameterType::Sampler2D);
        let leaf = bound("src", ParameterType::Sampler2D);
        effect.attach(&leaf).unwrap();
        global.attach(&effect).unwrap();
        let leaves = global.bound_leaves();
        assert_eq!(leaves.len(), 1);
        assert!(Rc::ptr_eq(&leaves[0], &leaf));
    }
}
