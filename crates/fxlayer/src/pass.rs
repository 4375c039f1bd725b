//! Passes: the programs for one draw plus their render targets.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use fxlayer_core::{FxError, Identifiable, Properties, PropertyBag, Result, ShaderStage};
use tracing::debug;

use crate::context::{is_special_texture, Core};
use crate::effect::EffectId;
use crate::parameter::ParameterRef;
use crate::program::Program;
use crate::texture::TextureRef;

/// Render target slots per pass.
pub const MAX_TARGETS: usize = 4;

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pass identity, used by adapters to key native objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(u64);

impl PassId {
    pub fn next() -> Self {
        Self(NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass#{}", self.0)
    }
}

pub struct Pass {
    id: PassId,
    effect: EffectId,
    name: String,
    /// `effect:technique`
    owner: String,
    programs: Vec<Program>,
    targets: RefCell<[Option<TextureRef>; MAX_TARGETS]>,
    target_names: RefCell<[Option<String>; MAX_TARGETS]>,
    properties: Properties,
}

impl Pass {
    pub(crate) fn new(id: PassId, effect: EffectId, owner: String, name: &str, programs: Vec<Program>) -> Self {
        Self {
            id,
            effect,
            name: name.to_string(),
            owner,
            programs,
            targets: RefCell::new(Default::default()),
            target_names: RefCell::new(Default::default()),
            properties: Properties::new(),
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn effect_id(&self) -> EffectId {
        self.effect
    }

    pub fn program(&self, stage: ShaderStage) -> Option<&Program> {
        self.programs.iter().find(|p| p.stage() == stage)
    }

    /// Programs in pipeline order.
    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Uniform parameters of every program.
    pub fn uniforms(&self) -> Vec<ParameterRef> {
        self.programs.iter().flat_map(|p| p.uniforms()).collect()
    }

    /// First program uniform named `name`, in pipeline order.
    pub fn uniform(&self, name: &str) -> Option<ParameterRef> {
        self.programs.iter().find_map(|p| p.uniform(name))
    }

    // -----------------------------------------------------------------------
    // Targets
    // -----------------------------------------------------------------------

    /// Texture bound to slot `index`, or the adapter's default target when
    /// the slot is unset.
    pub fn target(&self, core: &Core, index: usize) -> Result<TextureRef> {
        check_slot(index)?;
        match &self.targets.borrow()[index] {
            Some(texture) => Ok(texture.clone()),
            None => core.default_target(),
        }
    }

    /// Explicitly set target, without the default fallback.
    pub fn explicit_target(&self, index: usize) -> Option<TextureRef> {
        self.targets.borrow().get(index).cloned().flatten()
    }

    /// Explicit targets by slot.
    pub fn targets(&self) -> Vec<Option<TextureRef>> {
        self.targets.borrow().to_vec()
    }

    /// Bind `texture` to slot `index`, or clear the slot with `None`.
    /// Only render-target textures are accepted.
    pub fn set_target(&self, index: usize, texture: Option<TextureRef>) -> Result<()> {
        check_slot(index)?;
        if let Some(texture) = &texture {
            if !texture.is_render_target() {
                return Err(FxError::InvalidArgument(format!(
                    "texture {} is not a render target",
                    texture.name()
                )));
            }
        }
        self.target_names.borrow_mut()[index] = texture.as_ref().map(|t| t.name().to_string());
        self.targets.borrow_mut()[index] = texture;
        Ok(())
    }

    /// Look special-name targets up again; the Core may have recreated them.
    pub(crate) fn refresh_special_targets(&self, core: &Core) {
        let names = self.target_names.borrow().clone();
        for (index, name) in names.iter().enumerate() {
            let Some(name) = name.as_deref().filter(|n| is_special_texture(n)) else {
                continue;
            };
            if let Some(texture) = core.texture(name) {
                self.targets.borrow_mut()[index] = Some(texture);
            } else {
                debug!("special target {name} is gone, pass {} keeps the old one", self.full_name());
            }
        }
    }
}

fn check_slot(index: usize) -> Result<()> {
    if index >= MAX_TARGETS {
        return Err(FxError::InvalidArgument(format!(
            "target slot {index} out of range (max {MAX_TARGETS})"
        )));
    }
    Ok(())
}

impl Identifiable for Pass {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> String {
        format!("{}:{}", self.owner, self.name)
    }
}

impl PropertyBag for Pass {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl fmt::Debug for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("id", &self.id)
            .field("name", &self.full_name())
            .field("programs", &self.programs.len())
            .finish()
    }
}
