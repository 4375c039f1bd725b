//! Effects: a parsed and compiled effect source.
//!
//! Building an effect walks the techniques in declaration order. A technique
//! whose passes all compile and load is valid; the first valid one becomes
//! the default. A technique that fails keeps its name and error but loses its
//! passes, and an effect with no valid technique is never handed out.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use fxlayer_core::{
    CompileRequest, Compiler, FxError, Identifiable, Profile, Properties, PropertyBag, Result, ShaderStage, Variant,
};
use tracing::{debug, error, info, warn};

use crate::adapter::StateScope;
use crate::context::{is_special_texture, Core};
use crate::parameter::{Parameter, ParameterRef};
use crate::parser::{self, EffectSource, PassDecl, TechniqueDecl};
use crate::pass::{Pass, PassId};
use crate::program::Program;
use crate::technique::Technique;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    pub fn next() -> Self {
        Self(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Unbound,
    Bound,
    /// Destroyed. Only inspection is legal.
    Invalid,
}

pub type EffectRef = Rc<Effect>;

/// A sampler uniform fed from a named Core texture.
struct TextureBinding {
    parameter: ParameterRef,
    texture: String,
}

pub struct Effect {
    id: EffectId,
    name: String,
    path: Option<PathBuf>,
    techniques: Vec<Technique>,
    parameters: BTreeMap<String, ParameterRef>,
    texture_bindings: Vec<TextureBinding>,
    /// `(core parameter, effect parameter)` pairs from `global` directives.
    globals: Vec<(ParameterRef, ParameterRef)>,
    default_technique: Cell<usize>,
    bound_technique: Cell<Option<usize>>,
    state: Cell<EffectState>,
    properties: Properties,
}

impl Effect {
    /// Parse, compile and load `source`. Fails with `CompileFailed` when no
    /// technique validates; nothing stays loaded on the adapter then.
    pub(crate) fn build(core: &Core, name: &str, path: Option<&Path>, source: &str) -> Result<EffectRef> {
        let parsed = parser::parse(source)
            .map_err(|e| e.to_string())
            .and_then(|parsed| match parsed.techniques.is_empty() {
                true => Err("no techniques declared".to_string()),
                false => Ok(parsed),
            });
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                let err = FxError::compile_failed(name, message);
                core.handle_error(name, &err);
                return Err(err);
            }
        };

        let id = EffectId::next();
        let mut techniques = Vec::with_capacity(parsed.techniques.len());
        let mut failures = Vec::new();
        for decl in &parsed.techniques {
            let technique = match build_technique(core, id, name, &parsed, decl) {
                Ok(technique) => technique,
                Err(err) => {
                    let context = format!("{name}:{}", decl.name);
                    core.handle_error(&context, &err);
                    failures.push(format!("{}: {err}", decl.name));
                    Technique::invalid(id, name, &decl.name, err.to_string())
                }
            };
            if let Err(err) = set_annotations(&technique, &decl.annotations) {
                warn!("{}: {err}", technique.full_name());
            }
            techniques.push(technique);
        }

        let Some(default_technique) = techniques.iter().position(Technique::is_valid) else {
            error!("effect {name} has no valid technique");
            return Err(FxError::CompileFailed {
                name: name.to_string(),
                errors: failures,
            });
        };

        let mut effect = Effect {
            id,
            name: name.to_string(),
            path: path.map(Path::to_path_buf),
            techniques,
            parameters: BTreeMap::new(),
            texture_bindings: Vec::new(),
            globals: Vec::new(),
            default_technique: Cell::new(default_technique),
            bound_technique: Cell::new(None),
            state: Cell::new(EffectState::Unbound),
            properties: Properties::new(),
        };

        if let Err(err) = effect.link(core, &parsed) {
            core.handle_error(name, &err);
            effect.unload(core);
            return Err(err);
        }

        info!(
            "effect {name}: {} techniques, default {}",
            effect.techniques.len(),
            effect.techniques[default_technique].name()
        );
        Ok(Rc::new(effect))
    }

    /// Create effect parameters and wire the `texture`/`global` directives.
    fn link(&mut self, core: &Core, parsed: &EffectSource) -> Result<()> {
        let owner = self.name.clone();
        for technique in self.techniques.iter().filter(|t| t.is_valid()) {
            for pass in technique.passes() {
                for program in pass.programs() {
                    for uniform in program.uniforms() {
                        let parameter = self
                            .parameters
                            .entry(uniform.name().to_string())
                            .or_insert_with(|| Parameter::new_virtual(Some(&owner), uniform.name(), uniform.ty()));
                        parameter.attach(&uniform)?;
                    }
                }
            }
        }

        for binding in &parsed.textures {
            let Some(parameter) = self.parameters.get(&binding.uniform) else {
                warn!(
                    "{}:{}: texture binding for unused uniform {}",
                    self.name, binding.line, binding.uniform
                );
                continue;
            };
            if !parameter.ty().is_sampler() {
                return Err(FxError::InvalidArgument(format!(
                    "{}:{}: {} is not a sampler",
                    self.name, binding.line, binding.uniform
                )));
            }
            let texture = core.texture(&binding.value).ok_or_else(|| {
                FxError::InvalidArgument(format!(
                    "{}:{}: unknown texture {}",
                    self.name, binding.line, binding.value
                ))
            })?;
            core.connect_texture(parameter, &texture)?;
            self.texture_bindings.push(TextureBinding {
                parameter: parameter.clone(),
                texture: binding.value.clone(),
            });
        }

        for binding in &parsed.globals {
            let Some(parameter) = self.parameters.get(&binding.uniform) else {
                warn!(
                    "{}:{}: global for unused uniform {}",
                    self.name, binding.line, binding.uniform
                );
                continue;
            };
            let global = core.parameter(&binding.value).ok_or_else(|| {
                FxError::InvalidArgument(format!(
                    "{}:{}: unknown parameter {}",
                    self.name, binding.line, binding.value
                ))
            })?;
            global.attach(parameter)?;
            self.globals.push((global, parameter.clone()));
        }
        Ok(())
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    /// File the effect was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> EffectState {
        self.state.get()
    }

    // -----------------------------------------------------------------------
    // Bind / reset
    // -----------------------------------------------------------------------

    /// Capture device state and make the default technique current.
    ///
    /// `clean` captures everything the adapter can restore; otherwise only the
    /// state passes are about to touch. Every successful `bind` needs exactly
    /// one [`Effect::reset`] before the next.
    pub fn bind(&self, core: &Core, clean: bool) -> Result<&Technique> {
        match self.state.get() {
            EffectState::Invalid => {
                return Err(FxError::InvalidCall(format!("effect {} was destroyed", self.name)));
            }
            EffectState::Bound => {
                return Err(FxError::InvalidCall(format!(
                    "effect {} is already bound; reset it first",
                    self.name
                )));
            }
            EffectState::Unbound => {}
        }

        let index = self.default_technique.get();
        let technique = self
            .techniques
            .get(index)
            .filter(|t| t.is_valid())
            .ok_or_else(|| FxError::InvalidCall(format!("effect {} has no valid technique", self.name)))?;

        let adapter = core.adapter()?;
        core.begin_effect(self.id)?;
        if let Err(err) = adapter.capture_state(StateScope::from_clean(clean)) {
            core.end_effect(self.id);
            error!("binding {}: {err}", technique.full_name());
            return Err(err);
        }

        self.refresh_special_textures(core);
        for pass in technique.passes() {
            pass.refresh_special_targets(core);
        }

        self.bound_technique.set(Some(index));
        self.state.set(EffectState::Bound);
        debug!("bound {}", technique.full_name());
        Ok(technique)
    }

    /// Restore the state captured by [`Effect::bind`]. A no-op unless bound.
    pub fn reset(&self, core: &Core) -> Result<()> {
        if self.state.get() != EffectState::Bound {
            return Ok(());
        }
        if let Some(id) = core.bound_pass_of(self.id) {
            let pass = self.techniques.iter().flat_map(Technique::passes).find(|p| p.id() == id);
            if let Some(pass) = pass {
                warn!("resetting {} with {} still bound", self.name, pass.full_name());
                if let Err(err) = core.reset_pass(pass) {
                    warn!("resetting {}: {err}", pass.full_name());
                }
            }
        }

        let result = core.adapter().and_then(|adapter| adapter.restore_state());
        self.bound_technique.set(None);
        self.state.set(EffectState::Unbound);
        core.end_effect(self.id);
        if let Err(err) = &result {
            error!("resetting {}: {err}", self.name);
        }
        result
    }

    fn refresh_special_textures(&self, core: &Core) {
        for binding in &self.texture_bindings {
            if !is_special_texture(&binding.texture) {
                continue;
            }
            let Some(texture) = core.texture(&binding.texture) else {
                debug!("{} is gone, {} keeps its texture", binding.texture, binding.parameter.full_name());
                continue;
            };
            if let Err(err) = core.connect_texture(&binding.parameter, &texture) {
                warn!("reconnecting {}: {err}", binding.parameter.full_name());
            }
        }
    }

    /// Unload every pass and detach from Core globals. The effect is
    /// `Invalid` afterwards.
    pub(crate) fn unload(&self, core: &Core) {
        if let Ok(adapter) = core.adapter() {
            for pass in self.techniques.iter().flat_map(Technique::passes) {
                if adapter.is_pass_loaded(pass) {
                    if let Err(err) = adapter.unload_pass(pass) {
                        warn!("unloading {}: {err}", pass.full_name());
                    }
                }
            }
        }
        for (global, parameter) in &self.globals {
            global.detach(parameter);
        }
        self.bound_technique.set(None);
        self.state.set(EffectState::Invalid);
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// The effect parameter feeding every program uniform called `name`.
    pub fn parameter(&self, name: &str) -> Option<ParameterRef> {
        self.parameters.get(name).cloned()
    }

    /// Effect parameters, by name.
    pub fn parameters(&self) -> Vec<ParameterRef> {
        self.parameters.values().cloned().collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    // -----------------------------------------------------------------------
    // Techniques
    // -----------------------------------------------------------------------

    pub fn technique_count(&self) -> usize {
        self.techniques.len()
    }

    pub fn technique(&self, index: usize) -> Option<&Technique> {
        self.techniques.get(index)
    }

    pub fn technique_by_name(&self, name: &str) -> Option<&Technique> {
        self.techniques.iter().find(|t| t.name() == name)
    }

    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn default_technique(&self) -> &Technique {
        &self.techniques[self.default_technique.get()]
    }

    /// Pick the technique the next [`Effect::bind`] uses.
    pub fn set_default_technique(&self, name: &str) -> Result<()> {
        let index = self
            .techniques
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| FxError::InvalidArgument(format!("effect {} has no technique {name}", self.name)))?;
        if let Some(error) = self.techniques[index].error() {
            return Err(FxError::InvalidArgument(format!(
                "technique {} is invalid: {error}",
                self.techniques[index].full_name()
            )));
        }
        self.default_technique.set(index);
        Ok(())
    }

    pub fn bound_technique(&self) -> Option<&Technique> {
        self.bound_technique.get().and_then(|i| self.techniques.get(i))
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn build_technique(
    core: &Core,
    effect: EffectId,
    effect_name: &str,
    parsed: &EffectSource,
    decl: &TechniqueDecl,
) -> Result<Technique> {
    if decl.passes.is_empty() {
        return Err(FxError::InvalidArgument(format!("technique {} has no passes", decl.name)));
    }
    let owner = format!("{effect_name}:{}", decl.name);
    let adapter = core.adapter()?;

    let mut passes: Vec<Pass> = Vec::with_capacity(decl.passes.len());
    for pass_decl in &decl.passes {
        let built = build_pass(core, effect, &owner, &parsed.shader, pass_decl)
            .and_then(|pass| adapter.load_pass(&pass).map(|()| pass));
        match built {
            Ok(pass) => passes.push(pass),
            Err(err) => {
                for pass in &passes {
                    if let Err(unload) = adapter.unload_pass(pass) {
                        warn!("unloading {}: {unload}", pass.full_name());
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(Technique::valid(effect, effect_name, &decl.name, passes))
}

fn build_pass(core: &Core, effect: EffectId, owner: &str, shader: &str, decl: &PassDecl) -> Result<Pass> {
    let id = PassId::next();
    let full_name = format!("{owner}:{}", decl.name);
    let adapter = core.adapter()?;
    let compiler = core.compiler();

    let mut programs = Vec::with_capacity(decl.stages.len());
    for (stage, entry_point) in &decl.stages {
        let available = adapter.profiles(*stage);
        if available.is_empty() {
            debug!("{full_name}: skipping {stage} program {entry_point}");
            continue;
        }
        let profile = choose_profile(compiler, *stage, decl.profile, &available, &full_name)?;
        let compiled = compiler.compile(&CompileRequest {
            name: &full_name,
            source: shader,
            entry_point,
            stage: *stage,
            profile,
            flags: core.config().compile_flags,
        })?;
        debug!("{full_name}: {stage} {entry_point} compiled as {profile}");
        programs.push(Program::new(id, &full_name, compiled));
    }
    if programs.is_empty() {
        return Err(FxError::InvalidProfile(format!(
            "pass {full_name} has no program the device can run"
        )));
    }

    let pass = Pass::new(id, effect, owner.to_string(), &decl.name, programs);
    for (slot, name) in &decl.targets {
        let texture = core
            .texture(name)
            .ok_or_else(|| FxError::InvalidArgument(format!("{full_name}: unknown target {name}")))?;
        pass.set_target(*slot, Some(texture))?;
    }
    set_annotations(&pass, &decl.annotations)?;
    Ok(pass)
}

fn choose_profile(
    compiler: &dyn Compiler,
    stage: ShaderStage,
    requested: Option<Profile>,
    available: &[Profile],
    pass: &str,
) -> Result<Profile> {
    match requested {
        Some(profile) if available.contains(&profile) && compiler.supports(profile, stage) => Ok(profile),
        Some(profile) => Err(FxError::InvalidProfile(format!(
            "{profile} cannot run {stage} programs of {pass} on this device"
        ))),
        None => compiler.best_profile(stage, available).ok_or_else(|| {
            FxError::InvalidProfile(format!("no profile for {stage} programs of {pass}"))
        }),
    }
}

fn set_annotations(target: &dyn PropertyBag, annotations: &[(String, String)]) -> Result<()> {
    for (key, value) in annotations {
        target.set_property(key, Variant::parse(value))?;
    }
    Ok(())
}

impl Identifiable for Effect {
    fn name(&self) -> &str {
        &self.name
    }
}

impl PropertyBag for Effect {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.get())
            .field("techniques", &self.techniques)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        if self.state.get() == EffectState::Bound {
            warn!("effect {} dropped while bound", self.name);
        }
    }
}
