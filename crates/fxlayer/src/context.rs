//! The Core: one adapter, one compiler, and the named registries every
//! other object is created through.
//!
//! There is no ambient global. The host builds a [`Core`], hands it an
//! adapter once the native device exists, and passes `&Core` to every effect
//! operation that reaches the device.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;

use fxlayer_core::{
    Compiler, CoreConfig, FileSystem, FrameData, FxError, Identifiable, Image, ParameterType, Properties, PropertyBag,
    Result, SearchPathFileSystem, TextureDesc, TextureFormat, TextureRegion, Version, Vertex, VertexFlags,
};
use once_cell::unsync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::effect::{Effect, EffectId, EffectRef, EffectState};
use crate::parameter::{Parameter, ParameterRef};
use crate::pass::{Pass, PassId};
use crate::texture::{Texture, TextureRef};

/// Render targets the Core keeps for effects, recreated on resize.
pub const SPECIAL_TEXTURES: [&str; 3] = [":lastpass", ":lastshader", ":thisframe"];

/// Resolves to the adapter's default target on every lookup.
pub const BACKBUFFER: &str = ":backbuffer";

pub const PARAM_TIME: &str = "fx_time";
pub const PARAM_VIEWPORT: &str = "fx_viewport";
pub const PARAM_FRAME: &str = "fx_frame";

const SYSTEM_PARAMETERS: [(&str, ParameterType); 3] = [
    (PARAM_TIME, ParameterType::Float1),
    (PARAM_VIEWPORT, ParameterType::Float4),
    (PARAM_FRAME, ParameterType::Float1),
];

pub(crate) fn is_special_texture(name: &str) -> bool {
    name == BACKBUFFER || SPECIAL_TEXTURES.contains(&name)
}

struct BoundPass {
    id: PassId,
    effect: EffectId,
    name: String,
    /// Virtual parameters of the owning effect, settled before `uniforms`.
    effect_params: Vec<ParameterRef>,
    uniforms: Vec<ParameterRef>,
}

pub struct Core {
    config: CoreConfig,
    compiler: Box<dyn Compiler>,
    fs: Box<dyn FileSystem>,
    adapter: OnceCell<Box<dyn Adapter>>,
    textures: RefCell<BTreeMap<String, TextureRef>>,
    parameters: RefCell<BTreeMap<String, ParameterRef>>,
    effects: RefCell<BTreeMap<String, EffectRef>>,
    bound_effect: Cell<Option<EffectId>>,
    bound_pass: RefCell<Option<BoundPass>>,
    properties: Properties,
    shut_down: bool,
}

impl Core {
    pub fn new(config: CoreConfig, compiler: Box<dyn Compiler>, fs: Box<dyn FileSystem>) -> Self {
        info!("{} with compiler {}", Self::version(), compiler.version());
        let parameters = SYSTEM_PARAMETERS
            .iter()
            .map(|&(name, ty)| (name.to_string(), Parameter::new_virtual(None, name, ty)))
            .collect();
        Self {
            config,
            compiler,
            fs,
            adapter: OnceCell::new(),
            textures: RefCell::new(BTreeMap::new()),
            parameters: RefCell::new(parameters),
            effects: RefCell::new(BTreeMap::new()),
            bound_effect: Cell::new(None),
            bound_pass: RefCell::new(None),
            properties: Properties::new(),
            shut_down: false,
        }
    }

    /// Core reading effect files from `config.search_paths`.
    pub fn with_search_paths(config: CoreConfig, compiler: Box<dyn Compiler>) -> Self {
        let fs = SearchPathFileSystem::new(config.search_paths.clone());
        Self::new(config, compiler, Box::new(fs))
    }

    pub fn version() -> Version {
        Version::from_pkg(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn compiler(&self) -> &dyn Compiler {
        self.compiler.as_ref()
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    // -----------------------------------------------------------------------
    // Adapter
    // -----------------------------------------------------------------------

    /// Attach the device adapter. Only one adapter is ever accepted.
    pub fn set_adapter(&self, adapter: Box<dyn Adapter>) -> Result<()> {
        if self.shut_down {
            return Err(FxError::NotInitialized("core was shut down".into()));
        }
        let version = adapter.version();
        self.adapter
            .set(adapter)
            .map_err(|_| FxError::AlreadySet("core already has an adapter".into()))?;
        info!("adapter {version}");
        let (width, height) = self.surface_size();
        self.create_special_textures(width, height);
        Ok(())
    }

    pub fn adapter(&self) -> Result<&dyn Adapter> {
        self.adapter
            .get()
            .map(Box::as_ref)
            .ok_or_else(|| FxError::NotInitialized("no adapter attached".into()))
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.get().is_some()
    }

    fn surface_size(&self) -> (u32, u32) {
        self.adapter()
            .ok()
            .and_then(|a| a.surface_size())
            .unwrap_or(self.config.surface_size)
    }

    fn create_special_textures(&self, width: u32, height: u32) {
        for name in SPECIAL_TEXTURES {
            let desc = TextureDesc::render_target(width, height, TextureFormat::Rgba8);
            if let Err(err) = self.insert_texture(name, desc) {
                warn!("special texture {name} unavailable: {err}");
            }
        }
    }

    /// Recreate the special render targets at a new surface size. Passes
    /// and effects pick the new ones up at their next bind.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.adapter()?;
        if width == 0 || height == 0 {
            return Err(FxError::InvalidArgument(format!("surface size {width}x{height}")));
        }
        {
            let mut textures = self.textures.borrow_mut();
            for name in SPECIAL_TEXTURES {
                textures.remove(name);
            }
        }
        debug!("recreating special textures at {width}x{height}");
        self.create_special_textures(width, height);
        Ok(())
    }

    pub fn default_target(&self) -> Result<TextureRef> {
        self.adapter()?
            .default_target()
            .ok_or_else(|| FxError::NotInitialized("adapter has no default target".into()))
    }

    /// Give the adapter a look at an error, then log it with any compiler
    /// listing.
    pub fn handle_error(&self, context: &str, err: &FxError) {
        if let Ok(adapter) = self.adapter() {
            adapter.handle_error(context, err);
        }
        if let FxError::CompileFailed { errors, .. } = err {
            for line in errors {
                debug!("{context}: {line}");
            }
        }
        warn!("{context}: {err}");
    }

    // -----------------------------------------------------------------------
    // Textures
    // -----------------------------------------------------------------------

    /// Create a named texture through the adapter. Names starting with `:`
    /// are reserved.
    pub fn create_texture(&self, name: &str, desc: TextureDesc) -> Result<TextureRef> {
        if name.is_empty() || name.starts_with(':') {
            return Err(FxError::InvalidArgument(format!("texture name {name:?} is reserved")));
        }
        self.insert_texture(name, desc)
    }

    fn insert_texture(&self, name: &str, desc: TextureDesc) -> Result<TextureRef> {
        let adapter = self.adapter()?;
        if self.textures.borrow().contains_key(name) {
            return Err(FxError::AlreadySet(format!("texture {name}")));
        }
        desc.validate()?;
        let native = adapter.create_texture(name, &desc).map_err(|err| {
            error!("creating texture {name}: {err}");
            err
        })?;
        let texture = Texture::new(name, desc, native);
        self.textures
            .borrow_mut()
            .insert(name.to_string(), texture.clone());
        debug!("created texture {name} {:?}", texture.desc().size);
        Ok(texture)
    }

    /// Named texture. [`BACKBUFFER`] is the adapter's current default target.
    pub fn texture(&self, name: &str) -> Option<TextureRef> {
        if name == BACKBUFFER {
            return self.adapter().ok().and_then(|a| a.default_target());
        }
        self.textures.borrow().get(name).cloned()
    }

    pub fn textures(&self) -> Vec<TextureRef> {
        self.textures.borrow().values().cloned().collect()
    }

    /// Drop the registry's reference. The native storage goes away once
    /// passes and parameters let go as well.
    pub fn remove_texture(&self, name: &str) -> Result<TextureRef> {
        if is_special_texture(name) {
            return Err(FxError::InvalidCall(format!("{name} is owned by the core")));
        }
        self.textures
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| FxError::InvalidArgument(format!("no texture {name}")))
    }

    /// Upload `image` into `region` of `texture`, or the whole texture.
    /// The image format must match the texture format exactly.
    pub fn load_texture(&self, texture: &Texture, image: &Image, region: Option<TextureRegion>) -> Result<()> {
        let adapter = self.adapter()?;
        let desc = texture.desc();
        if image.format != desc.format {
            return Err(FxError::InvalidArgument(format!(
                "image is {:?}, texture {} is {:?}",
                image.format,
                texture.name(),
                desc.format
            )));
        }
        let region = region.unwrap_or_else(|| TextureRegion::whole(desc));
        if !region.fits(desc) {
            return Err(FxError::InvalidArgument(format!(
                "region {region:?} outside texture {} {:?}",
                texture.name(),
                desc.size
            )));
        }
        if image.size != region.size {
            return Err(FxError::InvalidArgument(format!(
                "image is {:?}, region is {:?}",
                image.size, region.size
            )));
        }
        if image.data.len() != image.expected_len() {
            return Err(FxError::InvalidArgument(format!(
                "image has {} bytes, expected {}",
                image.data.len(),
                image.expected_len()
            )));
        }
        adapter.load_texture(texture, &region, image).map_err(|err| {
            error!("loading texture {}: {err}", texture.name());
            err
        })
    }

    /// Set a sampler parameter and connect every program uniform it feeds.
    ///
    /// On error the parameter and its attachments keep their old textures.
    pub fn connect_texture(&self, parameter: &ParameterRef, texture: &TextureRef) -> Result<()> {
        let leaves = parameter.bound_leaves();
        let adapter = if leaves.is_empty() { None } else { Some(self.adapter()?) };
        let saved = parameter.snapshot();
        parameter.set_texture(texture)?;
        let Some(adapter) = adapter else {
            return Ok(());
        };

        for (i, leaf) in leaves.iter().enumerate() {
            if let Err(err) = adapter.connect_texture(leaf, texture) {
                Parameter::rollback(saved);
                for connected in &leaves[..i] {
                    if let Err(undo) = adapter.apply_parameter(connected) {
                        warn!("restoring {}: {undo}", connected.full_name());
                    }
                }
                error!("connecting {} to {}: {err}", texture.name(), leaf.full_name());
                return Err(err);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Create a named virtual parameter.
    pub fn create_parameter(&self, name: &str, ty: ParameterType) -> Result<ParameterRef> {
        if name.is_empty() {
            return Err(FxError::InvalidArgument("empty parameter name".into()));
        }
        let mut parameters = self.parameters.borrow_mut();
        if parameters.contains_key(name) {
            return Err(FxError::AlreadySet(format!("parameter {name}")));
        }
        let parameter = Parameter::new_virtual(None, name, ty);
        parameters.insert(name.to_string(), parameter.clone());
        Ok(parameter)
    }

    pub fn parameter(&self, name: &str) -> Option<ParameterRef> {
        self.parameters.borrow().get(name).cloned()
    }

    pub fn parameters(&self) -> Vec<ParameterRef> {
        self.parameters.borrow().values().cloned().collect()
    }

    /// Drop the registry's reference. Attachments already made stay.
    pub fn remove_parameter(&self, name: &str) -> Result<ParameterRef> {
        if SYSTEM_PARAMETERS.iter().any(|&(system, _)| system == name) {
            return Err(FxError::InvalidCall(format!("{name} is owned by the core")));
        }
        self.parameters
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| FxError::InvalidArgument(format!("no parameter {name}")))
    }

    /// Feed host frame data into the system parameters.
    pub fn update_frame(&self, frame: &FrameData) -> Result<()> {
        let system = |name: &str| {
            self.parameter(name)
                .ok_or_else(|| FxError::NotInitialized(format!("system parameter {name} missing")))
        };
        let viewport = frame.viewport;
        system(PARAM_TIME)?.set_scalar(&[frame.elapsed().as_secs_f32()])?;
        system(PARAM_VIEWPORT)?.set_scalar(&[
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
        ])?;
        system(PARAM_FRAME)?.set_scalar(&[frame.frame as f32])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    /// Compile `source` into a named effect.
    pub fn create_effect(&self, name: &str, source: &str) -> Result<EffectRef> {
        self.register_effect(name, None, source)
    }

    /// Read and compile an effect file. The effect is named after the file
    /// stem.
    pub fn load_effect(&self, path: &str) -> Result<EffectRef> {
        let name = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| FxError::InvalidArgument(format!("no effect name in {path}")))?
            .to_string();
        let source = self.fs.read_to_string(path)?;
        self.register_effect(&name, Some(Path::new(path)), &source)
    }

    fn register_effect(&self, name: &str, path: Option<&Path>, source: &str) -> Result<EffectRef> {
        self.adapter()?;
        if self.effects.borrow().contains_key(name) {
            return Err(FxError::AlreadySet(format!("effect {name}")));
        }
        let effect = Effect::build(self, name, path, source)?;
        self.effects
            .borrow_mut()
            .insert(name.to_string(), effect.clone());
        Ok(effect)
    }

    pub fn effect(&self, name: &str) -> Option<EffectRef> {
        self.effects.borrow().get(name).cloned()
    }

    pub fn effects(&self) -> Vec<EffectRef> {
        self.effects.borrow().values().cloned().collect()
    }

    /// Reset the effect if bound, unload its passes and drop it from the
    /// registry. Outstanding references see it as `Invalid`.
    pub fn destroy_effect(&self, name: &str) -> Result<()> {
        let effect = self
            .effects
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| FxError::InvalidArgument(format!("no effect {name}")))?;
        if effect.state() == EffectState::Bound {
            if let Err(err) = effect.reset(self) {
                warn!("destroying {name}: {err}");
            }
        }
        effect.unload(self);
        debug!("destroyed effect {name}");
        Ok(())
    }

    pub(crate) fn begin_effect(&self, effect: EffectId) -> Result<()> {
        if let Some(bound) = self.bound_effect.get() {
            return Err(FxError::InvalidCall(format!(
                "{bound} is still bound; reset it before binding {effect}"
            )));
        }
        self.bound_effect.set(Some(effect));
        Ok(())
    }

    pub(crate) fn end_effect(&self, effect: EffectId) {
        if self.bound_effect.get() == Some(effect) {
            self.bound_effect.set(None);
        }
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Bind a pass of the bound effect and push its dirty parameters.
    ///
    /// Passes nest strictly: binding a pass while another one is bound is
    /// an `InvalidCall`, even within one technique.
    pub fn set_pass(&self, pass: &Pass) -> Result<()> {
        let adapter = self.adapter()?;
        if let Some(bound) = self.bound_pass.borrow().as_ref() {
            return Err(FxError::InvalidCall(format!(
                "{} is still bound; reset it before {}",
                bound.name,
                pass.full_name()
            )));
        }
        match self.bound_effect.get() {
            Some(effect) if effect == pass.effect_id() => {}
            Some(effect) => {
                return Err(FxError::InvalidCall(format!(
                    "{} belongs to another effect than the bound {effect}",
                    pass.full_name()
                )));
            }
            None => {
                return Err(FxError::InvalidCall(format!(
                    "bind the effect of {} first",
                    pass.full_name()
                )));
            }
        }
        let in_bound_technique = self
            .effects
            .borrow()
            .values()
            .find(|e| e.id() == pass.effect_id())
            .and_then(|e| e.bound_technique().map(|t| t.passes().iter().any(|p| p.id() == pass.id())));
        if in_bound_technique == Some(false) {
            return Err(FxError::InvalidCall(format!(
                "{} is not in the bound technique",
                pass.full_name()
            )));
        }
        if !adapter.is_pass_loaded(pass) {
            return Err(FxError::InvalidCall(format!("{} is not loaded", pass.full_name())));
        }

        adapter.set_pass(pass).map_err(|err| {
            error!("setting {}: {err}", pass.full_name());
            err
        })?;

        let effect_params = self
            .effects
            .borrow()
            .values()
            .find(|e| e.id() == pass.effect_id())
            .map(|e| e.parameters())
            .unwrap_or_default();
        *self.bound_pass.borrow_mut() = Some(BoundPass {
            id: pass.id(),
            effect: pass.effect_id(),
            name: pass.full_name(),
            effect_params,
            uniforms: pass.uniforms(),
        });
        self.flush_parameters(adapter);
        Ok(())
    }

    /// Unbind `pass`, which must be the bound one.
    pub fn reset_pass(&self, pass: &Pass) -> Result<()> {
        let adapter = self.adapter()?;
        {
            let bound = self.bound_pass.borrow();
            match bound.as_ref() {
                Some(bound) if bound.id == pass.id() => {}
                Some(bound) => {
                    return Err(FxError::InvalidCall(format!(
                        "{} is bound, not {}",
                        bound.name,
                        pass.full_name()
                    )));
                }
                None => {
                    return Err(FxError::InvalidCall(format!("{} is not bound", pass.full_name())));
                }
            }
        }
        self.bound_pass.borrow_mut().take();
        adapter.reset_pass(pass).map_err(|err| {
            error!("resetting {}: {err}", pass.full_name());
            err
        })
    }

    pub fn bound_pass(&self) -> Option<PassId> {
        self.bound_pass.borrow().as_ref().map(|b| b.id)
    }

    pub(crate) fn bound_pass_of(&self, effect: EffectId) -> Option<PassId> {
        self.bound_pass
            .borrow()
            .as_ref()
            .filter(|b| b.effect == effect)
            .map(|b| b.id)
    }

    /// Settle effect parameters, then push dirty uniforms of the bound pass.
    /// Failures leave the uniform dirty for the next attempt.
    fn flush_parameters(&self, adapter: &dyn Adapter) {
        let bound = self.bound_pass.borrow();
        let Some(bound) = bound.as_ref() else {
            return;
        };
        for parameter in &bound.effect_params {
            parameter.take_dirty();
        }
        for parameter in &bound.uniforms {
            if !parameter.take_dirty() {
                continue;
            }
            if let Err(err) = adapter.apply_parameter(parameter) {
                parameter.mark_dirty();
                warn!("applying {}: {err}", parameter.full_name());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Drawing
    // -----------------------------------------------------------------------

    /// Draw `count` triangles from `vertices`, starting at `offset`.
    pub fn draw_geometry(&self, offset: usize, count: usize, vertices: &[Vertex], flags: VertexFlags) -> Result<()> {
        let adapter = self.adapter()?;
        let end = count.checked_mul(3).and_then(|n| n.checked_add(offset));
        if count == 0 || end.map_or(true, |end| end > vertices.len()) {
            return Err(FxError::InvalidArgument(format!(
                "{count} triangles at {offset} need more than {} vertices",
                vertices.len()
            )));
        }
        self.flush_parameters(adapter);
        adapter
            .draw_geometry(offset, count, vertices, flags)
            .map_err(|err| {
                error!("draw_geometry: {err}");
                err
            })
    }

    /// Draw a quad, or a fullscreen quad for `None`.
    pub fn draw_quad(&self, vertices: Option<&[Vertex; 4]>) -> Result<()> {
        let adapter = self.adapter()?;
        self.flush_parameters(adapter);
        adapter.draw_quad(vertices).map_err(|err| {
            error!("draw_quad: {err}");
            err
        })
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Unbind, unload and release everything, then drop the adapter. Later
    /// calls that need the adapter fail with `NotInitialized`.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        // Effect::reset releases a pass its effect left bound.
        let effects = std::mem::take(&mut *self.effects.borrow_mut());
        for (name, effect) in effects {
            if let Err(err) = effect.reset(self) {
                warn!("resetting {name}: {err}");
            }
            effect.unload(self);
        }
        if let Some(bound) = self.bound_pass.borrow_mut().take() {
            warn!("shutting down with {} bound", bound.name);
        }
        self.bound_effect.set(None);
        self.textures.borrow_mut().clear();
        self.parameters.borrow_mut().clear();
        if let Some(adapter) = self.adapter.take() {
            info!("releasing adapter {}", adapter.version());
        }
    }
}

impl PropertyBag for Core {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.shutdown();
    }
}
