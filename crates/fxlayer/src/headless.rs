//! In-memory adapter.
//!
//! [`HeadlessAdapter`] behaves like a fixed-function device with D3D-style
//! render states but draws nothing. It records what a real backend would
//! have been asked to do: loaded passes, texture allocations and releases,
//! uploads, and one [`DrawRecord`] per draw with the render states, uniform
//! values, textures and targets in effect at that moment. Hosts use it to
//! run effects without a GPU; the test suite uses it as its device.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use fxlayer_core::{
    FxError, Identifiable, Image, Profile, PropertyBag, Result, ShaderStage, TextureDesc, TextureFormat,
    TextureRegion, Version, Vertex, VertexFlags,
};
use tracing::{debug, trace};

use crate::adapter::{Adapter, StateScope};
use crate::parameter::Parameter;
use crate::pass::{Pass, PassId, MAX_TARGETS};
use crate::texture::{NativeTexture, Texture, TextureRef};

pub const CULL_NONE: u32 = 1;
pub const CULL_CW: u32 = 2;
pub const CULL_CCW: u32 = 3;
pub const FILL_SOLID: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderState {
    ZEnable,
    ZWriteEnable,
    CullMode,
    AlphaBlendEnable,
    AlphaTestEnable,
    StencilEnable,
    FillMode,
    ColorWriteEnable,
}

impl RenderState {
    pub const ALL: [RenderState; 8] = [
        Self::ZEnable,
        Self::ZWriteEnable,
        Self::CullMode,
        Self::AlphaBlendEnable,
        Self::AlphaTestEnable,
        Self::StencilEnable,
        Self::FillMode,
        Self::ColorWriteEnable,
    ];

    fn default_value(self) -> u32 {
        match self {
            Self::ZEnable | Self::ZWriteEnable => 1,
            Self::CullMode => CULL_CCW,
            Self::AlphaBlendEnable | Self::AlphaTestEnable | Self::StencilEnable => 0,
            Self::FillMode => FILL_SOLID,
            Self::ColorWriteEnable => 0xf,
        }
    }
}

/// States passes and draws may change; all a partial capture saves.
pub const PASS_STATES: [RenderState; 6] = [
    RenderState::ZEnable,
    RenderState::ZWriteEnable,
    RenderState::CullMode,
    RenderState::AlphaBlendEnable,
    RenderState::AlphaTestEnable,
    RenderState::StencilEnable,
];

/// Forced for the duration of every draw.
pub const DRAW_STATES: [(RenderState, u32); 5] = [
    (RenderState::ZEnable, 0),
    (RenderState::ZWriteEnable, 0),
    (RenderState::CullMode, CULL_NONE),
    (RenderState::AlphaTestEnable, 0),
    (RenderState::StencilEnable, 0),
];

const SUPPORTED_FORMATS: [TextureFormat; 7] = [
    TextureFormat::Rgb8,
    TextureFormat::Rgba8,
    TextureFormat::Rgba16F,
    TextureFormat::Rgba32F,
    TextureFormat::D16,
    TextureFormat::D24S8,
    TextureFormat::D32,
];

pub type StateBlock = BTreeMap<RenderState, u32>;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawKind {
    Quad,
    Geometry { offset: usize, count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub kind: DrawKind,
    pub pass: Option<PassId>,
    pub vertices: usize,
    pub states: StateBlock,
    /// Applied uniform values of the bound pass, by uniform name.
    pub uniforms: BTreeMap<String, Vec<f32>>,
    /// Connected sampler textures of the bound pass, by uniform name.
    pub textures: BTreeMap<String, String>,
    /// Render target per slot; slot 0 falls back to the backbuffer.
    pub targets: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub name: String,
    pub desc: TextureDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub texture: String,
    pub region: TextureRegion,
    pub bytes: usize,
}

#[derive(Debug, Default)]
struct LoadedPass {
    name: String,
    uniforms: BTreeMap<String, Vec<f32>>,
    textures: BTreeMap<String, String>,
}

/// Device bookkeeping, shared between the adapter and the host through
/// [`HeadlessAdapter::device`].
#[derive(Debug)]
pub struct HeadlessDevice {
    states: StateBlock,
    loaded: BTreeMap<PassId, LoadedPass>,
    bound: Option<PassId>,
    pass_saved: Option<StateBlock>,
    captured: Option<StateBlock>,
    targets: Vec<Option<String>>,
    next_texture: u64,
    /// Live textures by id.
    pub textures: BTreeMap<u64, TextureRecord>,
    /// Names of released textures, in release order.
    pub released: Vec<String>,
    pub uploads: Vec<Upload>,
    pub draws: Vec<DrawRecord>,
    pub captures: Vec<StateScope>,
    pub errors: Vec<String>,
    /// Pass names `load_pass` refuses.
    pub reject_passes: BTreeSet<String>,
}

impl HeadlessDevice {
    fn new() -> Self {
        Self {
            states: RenderState::ALL.iter().map(|&s| (s, s.default_value())).collect(),
            loaded: BTreeMap::new(),
            bound: None,
            pass_saved: None,
            captured: None,
            targets: vec![None; MAX_TARGETS],
            next_texture: 1,
            textures: BTreeMap::new(),
            released: Vec::new(),
            uploads: Vec::new(),
            draws: Vec::new(),
            captures: Vec::new(),
            errors: Vec::new(),
            reject_passes: BTreeSet::new(),
        }
    }

    pub fn state(&self, state: RenderState) -> u32 {
        self.states.get(&state).copied().unwrap_or_else(|| state.default_value())
    }

    /// Change a state the way the host application would between draws.
    pub fn set_state(&mut self, state: RenderState, value: u32) {
        self.states.insert(state, value);
    }

    pub fn states(&self) -> StateBlock {
        self.states.clone()
    }

    pub fn bound_pass(&self) -> Option<PassId> {
        self.bound
    }

    pub fn is_loaded(&self, pass: PassId) -> bool {
        self.loaded.contains_key(&pass)
    }

    pub fn loaded_passes(&self) -> Vec<String> {
        self.loaded.values().map(|p| p.name.clone()).collect()
    }

    pub fn live_textures(&self) -> Vec<String> {
        self.textures.values().map(|t| t.name.clone()).collect()
    }

    fn snapshot(&self, states: &[RenderState]) -> StateBlock {
        states.iter().map(|&s| (s, self.state(s))).collect()
    }

    fn restore(&mut self, block: StateBlock) {
        self.states.extend(block);
    }
}

pub type DeviceHandle = Rc<RefCell<HeadlessDevice>>;

#[derive(Debug)]
pub struct HeadlessTexture {
    id: u64,
    device: DeviceHandle,
}

impl HeadlessTexture {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl NativeTexture for HeadlessTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HeadlessTexture {
    fn drop(&mut self) {
        // The backbuffer alias has no record.
        if let Ok(mut device) = self.device.try_borrow_mut() {
            if let Some(record) = device.textures.remove(&self.id) {
                trace!("headless: released {}", record.name);
                device.released.push(record.name);
            }
        }
    }
}

pub struct HeadlessAdapter {
    device: DeviceHandle,
    size: (u32, u32),
    backbuffer: TextureRef,
}

impl HeadlessAdapter {
    pub fn new(width: u32, height: u32) -> Self {
        let device = Rc::new(RefCell::new(HeadlessDevice::new()));
        let backbuffer = Texture::new(
            "backbuffer",
            TextureDesc::render_target(width, height, TextureFormat::Rgba8),
            Box::new(HeadlessTexture {
                id: 0,
                device: device.clone(),
            }),
        );
        Self {
            device,
            size: (width, height),
            backbuffer,
        }
    }

    /// Shared view of the device, still valid after the adapter is handed
    /// to a Core.
    pub fn device(&self) -> DeviceHandle {
        self.device.clone()
    }

    fn require_loaded(&self, pass: &Pass) -> Result<()> {
        if self.device.borrow().is_loaded(pass.id()) {
            Ok(())
        } else {
            Err(FxError::InvalidCall(format!("{} is not loaded", pass.full_name())))
        }
    }

    fn draw(&self, kind: DrawKind, vertices: usize) {
        let mut device = self.device.borrow_mut();
        let saved = device.snapshot(&DRAW_STATES.map(|(s, _)| s));
        for (state, value) in DRAW_STATES {
            device.set_state(state, value);
        }

        let pass = device.bound;
        let (uniforms, textures) = pass
            .and_then(|id| device.loaded.get(&id))
            .map(|p| (p.uniforms.clone(), p.textures.clone()))
            .unwrap_or_default();
        let record = DrawRecord {
            kind,
            pass,
            vertices,
            states: device.states(),
            uniforms,
            textures,
            targets: device.targets.clone(),
        };
        trace!("headless: draw {:?}", record.kind);
        device.draws.push(record);
        device.restore(saved);
    }
}

fn pass_states(pass: &Pass) -> Vec<(RenderState, u32)> {
    let mut states = Vec::new();
    if let Some(blend) = pass.property("blend").and_then(|v| v.as_bool()) {
        states.push((RenderState::AlphaBlendEnable, blend as u32));
    }
    if let Some(depth) = pass.property("depth").and_then(|v| v.as_bool()) {
        states.push((RenderState::ZEnable, depth as u32));
        states.push((RenderState::ZWriteEnable, depth as u32));
    }
    let cull = pass.property("cull");
    match cull.as_ref().and_then(|v| v.as_str()) {
        Some("none") => states.push((RenderState::CullMode, CULL_NONE)),
        Some("cw") => states.push((RenderState::CullMode, CULL_CW)),
        Some("ccw") => states.push((RenderState::CullMode, CULL_CCW)),
        _ => {}
    }
    states
}

impl Adapter for HeadlessAdapter {
    fn version(&self) -> Version {
        Version::from_pkg("fxlayer-headless", env!("CARGO_PKG_VERSION"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn profiles(&self, stage: ShaderStage) -> Vec<Profile> {
        match stage {
            ShaderStage::Vertex | ShaderStage::Fragment | ShaderStage::Compute => vec![Profile::Wgsl],
            ShaderStage::Hull | ShaderStage::Domain | ShaderStage::Geometry => Vec::new(),
        }
    }

    fn surface_size(&self) -> Option<(u32, u32)> {
        Some(self.size)
    }

    fn default_target(&self) -> Option<TextureRef> {
        Some(self.backbuffer.clone())
    }

    fn load_pass(&self, pass: &Pass) -> Result<()> {
        let mut device = self.device.borrow_mut();
        if device.reject_passes.contains(pass.name()) {
            return Err(FxError::Api(format!("device refused {}", pass.full_name())));
        }
        if let Some(program) = pass.programs().iter().find(|p| p.profile() != Profile::Wgsl) {
            return Err(FxError::InvalidProfile(format!(
                "{} is {}, the headless device runs wgsl",
                program.full_name(),
                program.profile()
            )));
        }
        device.loaded.insert(
            pass.id(),
            LoadedPass {
                name: pass.full_name(),
                ..Default::default()
            },
        );
        debug!("headless: loaded {}", pass.full_name());
        Ok(())
    }

    fn is_pass_loaded(&self, pass: &Pass) -> bool {
        self.device.borrow().is_loaded(pass.id())
    }

    fn unload_pass(&self, pass: &Pass) -> Result<()> {
        let mut device = self.device.borrow_mut();
        if device.bound == Some(pass.id()) {
            return Err(FxError::InvalidCall(format!("{} is bound", pass.full_name())));
        }
        device
            .loaded
            .remove(&pass.id())
            .map(|_| ())
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", pass.full_name())))
    }

    fn set_pass(&self, pass: &Pass) -> Result<()> {
        self.require_loaded(pass)?;
        let mut device = self.device.borrow_mut();
        if let Some(bound) = device.bound {
            return Err(FxError::InvalidCall(format!("{bound} is still bound")));
        }

        let saved = device.snapshot(&PASS_STATES);
        device.pass_saved = Some(saved);
        for (state, value) in pass_states(pass) {
            device.set_state(state, value);
        }

        let mut targets: Vec<Option<String>> = (0..MAX_TARGETS)
            .map(|i| pass.explicit_target(i).map(|t| t.name().to_string()))
            .collect();
        if targets[0].is_none() {
            targets[0] = Some(self.backbuffer.name().to_string());
        }
        device.targets = targets;
        device.bound = Some(pass.id());
        Ok(())
    }

    fn reset_pass(&self, pass: &Pass) -> Result<()> {
        let mut device = self.device.borrow_mut();
        if device.bound != Some(pass.id()) {
            return Err(FxError::InvalidCall(format!("{} is not bound", pass.full_name())));
        }
        if let Some(saved) = device.pass_saved.take() {
            device.restore(saved);
        }
        device.targets = vec![None; MAX_TARGETS];
        device.bound = None;
        Ok(())
    }

    fn capture_state(&self, scope: StateScope) -> Result<()> {
        let mut device = self.device.borrow_mut();
        if device.captured.is_some() {
            return Err(FxError::InvalidCall("device state already captured".into()));
        }
        let block = match scope {
            StateScope::Full => device.snapshot(&RenderState::ALL),
            StateScope::Partial => device.snapshot(&PASS_STATES),
        };
        device.captured = Some(block);
        device.captures.push(scope);
        Ok(())
    }

    fn restore_state(&self) -> Result<()> {
        let mut device = self.device.borrow_mut();
        let block = device
            .captured
            .take()
            .ok_or_else(|| FxError::InvalidCall("no captured device state".into()))?;
        device.restore(block);
        Ok(())
    }

    fn create_texture(&self, name: &str, desc: &TextureDesc) -> Result<Box<dyn NativeTexture>> {
        if !SUPPORTED_FORMATS.contains(&desc.format) {
            return Err(FxError::Api(format!("headless device cannot store {:?}", desc.format)));
        }
        let mut device = self.device.borrow_mut();
        let id = device.next_texture;
        device.next_texture += 1;
        device.textures.insert(
            id,
            TextureRecord {
                name: name.to_string(),
                desc: *desc,
            },
        );
        Ok(Box::new(HeadlessTexture {
            id,
            device: self.device.clone(),
        }))
    }

    fn load_texture(&self, texture: &Texture, region: &TextureRegion, image: &Image) -> Result<()> {
        let native = texture
            .native_as::<HeadlessTexture>()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is not a headless texture", texture.name())))?;
        let mut device = self.device.borrow_mut();
        if !device.textures.contains_key(&native.id) {
            return Err(FxError::InvalidArgument(format!("{} has no storage", texture.name())));
        }
        device.uploads.push(Upload {
            texture: texture.name().to_string(),
            region: *region,
            bytes: image.data.len(),
        });
        Ok(())
    }

    fn connect_texture(&self, parameter: &Parameter, texture: &TextureRef) -> Result<()> {
        let binding = parameter
            .binding()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is virtual", parameter.full_name())))?;
        if !parameter.ty().is_sampler() {
            return Err(FxError::InvalidArgument(format!("{} is not a sampler", parameter.full_name())));
        }
        let mut device = self.device.borrow_mut();
        let pass = device
            .loaded
            .get_mut(&binding.pass)
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", binding.pass)))?;
        pass.textures
            .insert(parameter.name().to_string(), texture.name().to_string());
        Ok(())
    }

    fn apply_parameter(&self, parameter: &Parameter) -> Result<()> {
        let binding = parameter
            .binding()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is virtual", parameter.full_name())))?;
        let mut device = self.device.borrow_mut();
        let pass = device
            .loaded
            .get_mut(&binding.pass)
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", binding.pass)))?;
        let name = parameter.name().to_string();
        if parameter.ty().is_sampler() {
            if let Some(texture) = parameter.texture() {
                pass.textures.insert(name, texture.name().to_string());
            }
        } else {
            pass.uniforms.insert(name, parameter.scalar());
        }
        Ok(())
    }

    fn draw_geometry(&self, offset: usize, count: usize, vertices: &[Vertex], _flags: VertexFlags) -> Result<()> {
        let in_range = count
            .checked_mul(3)
            .and_then(|n| n.checked_add(offset))
            .is_some_and(|end| end <= vertices.len());
        if !in_range {
            return Err(FxError::InvalidArgument("vertex range out of bounds".into()));
        }
        self.draw(DrawKind::Geometry { offset, count }, count * 3);
        Ok(())
    }

    fn draw_quad(&self, _vertices: Option<&[Vertex; 4]>) -> Result<()> {
        self.draw(DrawKind::Quad, 4);
        Ok(())
    }

    fn handle_error(&self, context: &str, error: &FxError) {
        self.device.borrow_mut().errors.push(format!("{context}: {error}"));
    }
}
