//! The boundary between the effect model and one native graphics device.
//!
//! The [`Core`](crate::Core) drives an adapter in a fixed order: passes are
//! loaded when their effect compiles, bound and reset in strict LIFO pairs at
//! draw time, and unloaded when the effect goes away. Every method takes
//! `&self`; adapters keep their device bookkeeping behind interior
//! mutability, the same way the engine objects do.

use std::any::Any;

use fxlayer_core::{
    FxError, Image, Profile, Result, ShaderStage, TextureDesc, TextureRegion, Version, Vertex, VertexFlags,
};

use crate::parameter::Parameter;
use crate::pass::Pass;
use crate::texture::{NativeTexture, Texture, TextureRef};

/// How much device state [`Adapter::capture_state`] saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// Everything the adapter knows how to restore.
    Full,
    /// Only the state passes and draws are about to modify.
    Partial,
}

impl StateScope {
    pub fn from_clean(clean: bool) -> Self {
        if clean {
            Self::Full
        } else {
            Self::Partial
        }
    }
}

pub trait Adapter {
    fn version(&self) -> Version;

    /// Downcast support for hosts that need the concrete adapter back.
    fn as_any(&self) -> &dyn Any;

    /// Profiles this device can run for `stage`, best first. An empty list
    /// means the stage is not supported and its programs are skipped.
    fn profiles(&self, stage: ShaderStage) -> Vec<Profile>;

    /// Size of the host surface, used for the special render targets.
    fn surface_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// What unset pass target slots render into, usually the backbuffer.
    fn default_target(&self) -> Option<TextureRef>;

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Upload the pass programs. A pass that failed to load is never bound.
    fn load_pass(&self, pass: &Pass) -> Result<()>;

    fn is_pass_loaded(&self, pass: &Pass) -> bool;

    fn unload_pass(&self, pass: &Pass) -> Result<()>;

    /// Bind programs and render targets. Unset target slots use
    /// [`Adapter::default_target`].
    fn set_pass(&self, pass: &Pass) -> Result<()>;

    /// Unbind the pass and put back every state `set_pass` changed.
    fn reset_pass(&self, pass: &Pass) -> Result<()>;

    // -----------------------------------------------------------------------
    // Device state
    // -----------------------------------------------------------------------

    fn capture_state(&self, scope: StateScope) -> Result<()>;

    /// Restore the last capture. Restoring with nothing captured is an
    /// `InvalidCall`.
    fn restore_state(&self) -> Result<()>;

    // -----------------------------------------------------------------------
    // Textures and parameters
    // -----------------------------------------------------------------------

    /// Allocate storage. `desc` has already passed
    /// [`TextureDesc::validate`]; adapters may still refuse formats they
    /// cannot back.
    fn create_texture(&self, name: &str, desc: &TextureDesc) -> Result<Box<dyn NativeTexture>>;

    /// Upload `image` into `region`. Formats and sizes were checked by the
    /// Core.
    fn load_texture(&self, texture: &Texture, region: &TextureRegion, image: &Image) -> Result<()>;

    /// Bind `texture` to a bound sampler parameter.
    fn connect_texture(&self, parameter: &Parameter, texture: &TextureRef) -> Result<()>;

    /// Push the cached value of one bound parameter to its uniform.
    fn apply_parameter(&self, parameter: &Parameter) -> Result<()>;

    // -----------------------------------------------------------------------
    // Drawing
    // -----------------------------------------------------------------------

    /// Draw `count` triangles starting at vertex `offset`, with depth,
    /// stencil, culling and alpha test disabled for the call.
    fn draw_geometry(&self, offset: usize, count: usize, vertices: &[Vertex], flags: VertexFlags) -> Result<()>;

    /// Draw a quad, in strip order, or a fullscreen quad when `None`.
    fn draw_quad(&self, vertices: Option<&[Vertex; 4]>) -> Result<()>;

    /// Called with errors the Core could not resolve, before the Core logs
    /// the compiler listing.
    fn handle_error(&self, _context: &str, _error: &FxError) {}
}
