//! Adapter for hosts without a supported device. Every operation fails.

use std::any::Any;

use fxlayer_core::{
    FxError, Image, Profile, Result, ShaderStage, TextureDesc, TextureRegion, Version, Vertex, VertexFlags,
};

use crate::adapter::{Adapter, StateScope};
use crate::parameter::Parameter;
use crate::pass::Pass;
use crate::texture::{NativeTexture, Texture, TextureRef};

#[derive(Debug, Default)]
pub struct NullAdapter;

impl NullAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Adapter for NullAdapter {
    fn version(&self) -> Version {
        Version::from_pkg("fxlayer-null", env!("CARGO_PKG_VERSION"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn profiles(&self, _stage: ShaderStage) -> Vec<Profile> {
        Vec::new()
    }

    fn default_target(&self) -> Option<TextureRef> {
        None
    }

    fn load_pass(&self, _pass: &Pass) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::load_pass"))
    }

    fn is_pass_loaded(&self, _pass: &Pass) -> bool {
        false
    }

    fn unload_pass(&self, _pass: &Pass) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::unload_pass"))
    }

    fn set_pass(&self, _pass: &Pass) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::set_pass"))
    }

    fn reset_pass(&self, _pass: &Pass) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::reset_pass"))
    }

    fn capture_state(&self, _scope: StateScope) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::capture_state"))
    }

    fn restore_state(&self) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::restore_state"))
    }

    fn create_texture(&self, _name: &str, _desc: &TextureDesc) -> Result<Box<dyn NativeTexture>> {
        Err(FxError::NotImplemented("NullAdapter::create_texture"))
    }

    fn load_texture(&self, _texture: &Texture, _region: &TextureRegion, _image: &Image) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::load_texture"))
    }

    fn connect_texture(&self, _parameter: &Parameter, _texture: &TextureRef) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::connect_texture"))
    }

    fn apply_parameter(&self, _parameter: &Parameter) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::apply_parameter"))
    }

    fn draw_geometry(&self, _offset: usize, _count: usize, _vertices: &[Vertex], _flags: VertexFlags) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::draw_geometry"))
    }

    fn draw_quad(&self, _vertices: Option<&[Vertex; 4]>) -> Result<()> {
        Err(FxError::NotImplemented("NullAdapter::draw_quad"))
    }
}
