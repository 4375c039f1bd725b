//! [`Adapter`] over the OpenGL context a host makes current.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use fxlayer::{Adapter, NativeTexture, Parameter, Pass, PassId, StateScope, Texture, TextureRef, MAX_TARGETS};
use fxlayer_core::{
    fullscreen_quad, FxError, Identifiable, Image, Profile, PropertyBag, Result, ShaderStage, TextureDesc,
    TextureFormat, TextureRegion, Version, Vertex, VertexFlags,
};
use gl::types::{GLenum, GLint, GLsizei, GLuint};
use glium::backend::Context;
use tracing::{debug, trace, warn};

use crate::backend::host_context;
use crate::bytes::{slice_as_bytes, VERTEX_ATTRIBUTES, VERTEX_STRIDE};
use crate::glsl::{context_versions, stage_profiles, GlslVersion};
use crate::program::{check_gl_error, std140_bytes, GlPass};
use crate::state::{drain_gl_errors, gl_reset, is_context_current, set_enabled, DrawCaps, SavedGlState};
use crate::texture::{attachment_point, GlTexture};

fn api(err: anyhow::Error) -> FxError {
    FxError::Api(format!("{err:#}"))
}

struct BoundGlPass {
    id: PassId,
    saved: SavedGlState,
    units: Vec<GLuint>,
}

/// Streamed vertex storage for draws.
struct DrawBuffers {
    vao: GLuint,
    vbo: GLuint,
}

impl DrawBuffers {
    unsafe fn new() -> Self {
        let mut vao: GLuint = 0;
        let mut vbo: GLuint = 0;
        gl::GenVertexArrays(1, &mut vao);
        gl::GenBuffers(1, &mut vbo);
        gl::BindVertexArray(vao);
        gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
        for (location, size, offset) in VERTEX_ATTRIBUTES {
            let (ty, normalized) = if location == 1 {
                (gl::UNSIGNED_BYTE, gl::TRUE)
            } else {
                (gl::FLOAT, gl::FALSE)
            };
            gl::EnableVertexAttribArray(location);
            gl::VertexAttribPointer(
                location,
                size,
                ty,
                normalized,
                VERTEX_STRIDE as GLsizei,
                offset as *const std::ffi::c_void,
            );
        }
        Self { vao, vbo }
    }
}

impl Drop for DrawBuffers {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteBuffers(1, &self.vbo);
            gl::DeleteVertexArrays(1, &self.vao);
        }
    }
}

/// Drives the host's current GL context.
///
/// Programs must be GLSL; the adapter offers every desktop version from
/// 3.30 the context reports. Unset pass targets render into the host
/// framebuffer.
pub struct GlAdapter {
    ctx: Rc<Context>,
    versions: Vec<GlslVersion>,
    size: Cell<(u32, u32)>,
    host_fbo: Cell<GLuint>,
    backbuffer: RefCell<TextureRef>,
    passes: RefCell<BTreeMap<PassId, GlPass>>,
    bound: RefCell<Option<BoundGlPass>>,
    captured: RefCell<Option<SavedGlState>>,
    draw_buffers: RefCell<Option<DrawBuffers>>,
}

impl GlAdapter {
    /// # Safety
    ///
    /// The host GL context must be current on this thread now and on every
    /// later call into the adapter. `host_fbo` must name the framebuffer
    /// the host expects output in (0 for the window).
    pub unsafe fn new(size: (u32, u32), host_fbo: GLuint) -> anyhow::Result<Self> {
        let ctx = host_context(size)?;
        let versions = context_versions(&*ctx);
        debug!("OPENGL_VERSION {}", ctx.get_opengl_version_string());
        debug!("GLSL versions: {versions:?}");
        if versions.is_empty() {
            anyhow::bail!("the context supports no GLSL version from 3.30 up");
        }

        Ok(Self {
            ctx,
            versions,
            size: Cell::new(size),
            host_fbo: Cell::new(host_fbo),
            backbuffer: RefCell::new(backbuffer(size)),
            passes: RefCell::new(BTreeMap::new()),
            bound: RefCell::new(None),
            captured: RefCell::new(None),
            draw_buffers: RefCell::new(None),
        })
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.ctx
    }

    /// Supported GLSL versions, best first.
    pub fn versions(&self) -> &[GlslVersion] {
        &self.versions
    }

    /// Track a new host surface. Call `Core::resize` as well so the special
    /// textures follow.
    pub fn resize(&self, width: u32, height: u32) {
        self.size.set((width, height));
        *self.backbuffer.borrow_mut() = backbuffer((width, height));
    }

    /// Hosts may switch framebuffers between frames.
    pub fn set_host_framebuffer(&self, fbo: GLuint) {
        self.host_fbo.set(fbo);
    }

    /// Unbind everything and rebind the host framebuffer, for hosts that
    /// want a known state after a frame instead of the captured one.
    pub fn reset_host_state(&self) {
        unsafe { gl_reset(self.host_fbo.get()) };
    }

    fn best_version(&self) -> u16 {
        self.versions.first().map_or(330, |v| v.number())
    }

    fn require_loaded(&self, pass: &Pass) -> Result<()> {
        if self.passes.borrow().contains_key(&pass.id()) {
            Ok(())
        } else {
            Err(FxError::InvalidCall(format!("{} is not loaded", pass.full_name())))
        }
    }

    fn is_bound(&self, id: PassId) -> bool {
        self.bound.borrow().as_ref().is_some_and(|b| b.id == id)
    }

    /// # Safety
    ///
    /// A GL context must be current and `texture` must be a GL texture.
    unsafe fn bind_unit(unit: GLuint, texture: Option<&Texture>) {
        gl::ActiveTexture(gl::TEXTURE0 + unit);
        match texture.and_then(|t| t.native_as::<GlTexture>()) {
            Some(native) if !native.is_host_framebuffer() => gl::BindTexture(native.target(), native.id()),
            _ => gl::BindTexture(gl::TEXTURE_2D, 0),
        }
    }

    /// Attach the explicit targets of `pass`, or bind the host framebuffer
    /// when it has none. Returns the viewport size.
    unsafe fn bind_targets(&self, pass: &Pass, gl_pass: &GlPass) -> anyhow::Result<(u32, u32)> {
        let targets = pass.targets();
        if targets.iter().all(Option::is_none) {
            gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, self.host_fbo.get());
            return Ok(self.size.get());
        }

        gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, gl_pass.framebuffer);
        let mut draw_buffers = [gl::NONE; MAX_TARGETS];
        let mut viewport = None;
        for (slot, target) in targets.iter().enumerate() {
            let color = gl::COLOR_ATTACHMENT0 + slot as GLenum;
            let Some(texture) = target else {
                gl::FramebufferTexture2D(gl::DRAW_FRAMEBUFFER, color, gl::TEXTURE_2D, 0, 0);
                continue;
            };
            let native = texture
                .native_as::<GlTexture>()
                .filter(|n| !n.is_host_framebuffer())
                .ok_or_else(|| anyhow::anyhow!("{} cannot be attached to a framebuffer", texture.name()))?;
            let attachment = attachment_point(native.format(), slot);
            gl::FramebufferTexture2D(gl::DRAW_FRAMEBUFFER, attachment, native.target(), native.id(), 0);
            if attachment == color {
                draw_buffers[slot] = color;
            }
            viewport.get_or_insert((texture.desc().size[0], texture.desc().size[1]));
        }
        gl::DrawBuffers(MAX_TARGETS as GLsizei, draw_buffers.as_ptr());

        let status = gl::CheckFramebufferStatus(gl::DRAW_FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            anyhow::bail!("framebuffer of {} is incomplete (0x{status:04x})", pass.full_name());
        }
        Ok(viewport.unwrap_or(self.size.get()))
    }

    fn draw(&self, mode: GLenum, vertices: &[Vertex]) -> Result<()> {
        if !is_context_current() {
            return Err(FxError::Api("no current GL context".into()));
        }
        let bytes = slice_as_bytes(vertices);
        let mut buffers = self.draw_buffers.borrow_mut();
        unsafe {
            let mut previous_vao: GLint = 0;
            let mut previous_buffer: GLint = 0;
            gl::GetIntegerv(gl::VERTEX_ARRAY_BINDING, &mut previous_vao);
            gl::GetIntegerv(gl::ARRAY_BUFFER_BINDING, &mut previous_buffer);

            let buffers = buffers.get_or_insert_with(|| DrawBuffers::new());
            gl::BindVertexArray(buffers.vao);
            gl::BindBuffer(gl::ARRAY_BUFFER, buffers.vbo);
            gl::BufferData(gl::ARRAY_BUFFER, bytes.len() as isize, bytes.as_ptr().cast(), gl::STREAM_DRAW);

            let caps = DrawCaps::disable();
            gl::DrawArrays(mode, 0, vertices.len() as GLsizei);
            caps.restore();

            gl::BindBuffer(gl::ARRAY_BUFFER, previous_buffer as GLuint);
            gl::BindVertexArray(previous_vao as GLuint);
        }
        check_gl_error("draw").map_err(api)
    }
}

fn backbuffer(size: (u32, u32)) -> TextureRef {
    Texture::new(
        "backbuffer",
        TextureDesc::render_target(size.0, size.1, TextureFormat::Rgba8),
        Box::new(GlTexture::host()),
    )
}

/// GL state a pass asks for through its `blend`, `depth` and `cull`
/// annotations.
unsafe fn apply_pass_states(pass: &Pass) {
    if let Some(blend) = pass.property("blend").and_then(|v| v.as_bool()) {
        set_enabled(gl::BLEND, blend);
        if blend {
            gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
        }
    }
    if let Some(depth) = pass.property("depth").and_then(|v| v.as_bool()) {
        set_enabled(gl::DEPTH_TEST, depth);
        gl::DepthMask(if depth { gl::TRUE } else { gl::FALSE });
    }
    let cull = pass.property("cull");
    match cull.as_ref().and_then(|v| v.as_str()) {
        Some("none") => gl::Disable(gl::CULL_FACE),
        // Back faces are culled; `cw` culls clockwise triangles.
        Some("cw") => {
            gl::Enable(gl::CULL_FACE);
            gl::FrontFace(gl::CCW);
        }
        Some("ccw") => {
            gl::Enable(gl::CULL_FACE);
            gl::FrontFace(gl::CW);
        }
        _ => {}
    }
}

impl Adapter for GlAdapter {
    fn version(&self) -> Version {
        Version::from_pkg("fxlayer-gl", env!("CARGO_PKG_VERSION"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn profiles(&self, stage: ShaderStage) -> Vec<Profile> {
        stage_profiles(&self.versions, stage)
    }

    fn surface_size(&self) -> Option<(u32, u32)> {
        Some(self.size.get())
    }

    fn default_target(&self) -> Option<TextureRef> {
        Some(self.backbuffer.borrow().clone())
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    fn load_pass(&self, pass: &Pass) -> Result<()> {
        if self.passes.borrow().contains_key(&pass.id()) {
            return Err(FxError::InvalidCall(format!("{} is already loaded", pass.full_name())));
        }
        let mut version = None;
        for program in pass.programs() {
            match program.profile() {
                Profile::Glsl(v) => {
                    version.get_or_insert(v);
                }
                other => {
                    return Err(FxError::InvalidProfile(format!(
                        "{} is {other}, the GL adapter runs glsl",
                        program.full_name()
                    )))
                }
            }
        }

        let gl_pass = unsafe { GlPass::load(pass, version.unwrap_or_else(|| self.best_version())) }.map_err(api)?;
        debug!(
            "gl: loaded {} ({} blocks, {} samplers)",
            gl_pass.name,
            gl_pass.slots.block_count(),
            gl_pass.slots.sampler_count()
        );
        self.passes.borrow_mut().insert(pass.id(), gl_pass);
        Ok(())
    }

    fn is_pass_loaded(&self, pass: &Pass) -> bool {
        self.passes.borrow().contains_key(&pass.id())
    }

    fn unload_pass(&self, pass: &Pass) -> Result<()> {
        if self.is_bound(pass.id()) {
            return Err(FxError::InvalidCall(format!("{} is bound", pass.full_name())));
        }
        self.passes
            .borrow_mut()
            .remove(&pass.id())
            .map(|gl_pass| trace!("gl: unloaded {}", gl_pass.name))
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", pass.full_name())))
    }

    fn set_pass(&self, pass: &Pass) -> Result<()> {
        self.require_loaded(pass)?;
        if let Some(bound) = self.bound.borrow().as_ref() {
            return Err(FxError::InvalidCall(format!("{} is still bound", bound.id)));
        }

        let passes = self.passes.borrow();
        let gl_pass = passes
            .get(&pass.id())
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", pass.full_name())))?;

        let saved = unsafe { SavedGlState::save(StateScope::Partial) };
        let result = unsafe {
            gl::UseProgram(gl_pass.program);
            for block in gl_pass.slots.blocks() {
                gl::BindBufferBase(gl::UNIFORM_BUFFER, block.binding, block.buffer);
            }
            for uniform in pass.uniforms().iter().filter(|u| u.ty().is_sampler()) {
                let Some(slot) = uniform.binding().and_then(|b| gl_pass.slots.sampler(&b.backend_name)) else {
                    continue;
                };
                Self::bind_unit(slot.unit, uniform.texture().as_deref());
            }
            self.bind_targets(pass, gl_pass).and_then(|(w, h)| {
                gl::Viewport(0, 0, w as GLint, h as GLint);
                apply_pass_states(pass);
                check_gl_error("set pass")
            })
        };
        if let Err(err) = result {
            unsafe { saved.restore() };
            return Err(api(err));
        }

        *self.bound.borrow_mut() = Some(BoundGlPass {
            id: pass.id(),
            saved,
            units: gl_pass.slots.units().collect(),
        });
        Ok(())
    }

    fn reset_pass(&self, pass: &Pass) -> Result<()> {
        if !self.is_bound(pass.id()) {
            return Err(FxError::InvalidCall(format!("{} is not bound", pass.full_name())));
        }
        if let Some(bound) = self.bound.borrow_mut().take() {
            unsafe {
                for unit in bound.units {
                    Self::bind_unit(unit, None);
                }
                bound.saved.restore();
            }
        }
        check_gl_error("reset pass").map_err(api)
    }

    // -----------------------------------------------------------------------
    // Device state
    // -----------------------------------------------------------------------

    fn capture_state(&self, scope: StateScope) -> Result<()> {
        if !is_context_current() {
            return Err(FxError::Api("no current GL context".into()));
        }
        let mut captured = self.captured.borrow_mut();
        if captured.is_some() {
            return Err(FxError::InvalidCall("GL state already captured".into()));
        }
        *captured = Some(unsafe { SavedGlState::save(scope) });
        Ok(())
    }

    fn restore_state(&self) -> Result<()> {
        let saved = self
            .captured
            .borrow_mut()
            .take()
            .ok_or_else(|| FxError::InvalidCall("no captured GL state".into()))?;
        unsafe { saved.restore() };
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Textures and parameters
    // -----------------------------------------------------------------------

    fn create_texture(&self, name: &str, desc: &TextureDesc) -> Result<Box<dyn NativeTexture>> {
        let texture = unsafe { GlTexture::allocate(desc) }.map_err(|e| api(e.context(name.to_string())))?;
        trace!("gl: texture {name} is {}", texture.id());
        Ok(Box::new(texture))
    }

    fn load_texture(&self, texture: &Texture, region: &TextureRegion, image: &Image) -> Result<()> {
        let native = texture
            .native_as::<GlTexture>()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is not a GL texture", texture.name())))?;
        unsafe { native.upload(region, &image.data) }.map_err(api)
    }

    fn connect_texture(&self, parameter: &Parameter, texture: &TextureRef) -> Result<()> {
        let binding = parameter
            .binding()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is virtual", parameter.full_name())))?;
        if !parameter.ty().is_sampler() {
            return Err(FxError::InvalidArgument(format!("{} is not a sampler", parameter.full_name())));
        }
        let passes = self.passes.borrow();
        let gl_pass = passes
            .get(&binding.pass)
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", binding.pass)))?;
        // Unbound passes pick the texture up from the parameter in set_pass.
        if let (Some(slot), true) = (gl_pass.slots.sampler(&binding.backend_name), self.is_bound(binding.pass)) {
            unsafe { Self::bind_unit(slot.unit, Some(texture)) };
        }
        Ok(())
    }

    fn apply_parameter(&self, parameter: &Parameter) -> Result<()> {
        let binding = parameter
            .binding()
            .ok_or_else(|| FxError::InvalidArgument(format!("{} is virtual", parameter.full_name())))?;
        let passes = self.passes.borrow();
        let gl_pass = passes
            .get(&binding.pass)
            .ok_or_else(|| FxError::InvalidCall(format!("{} is not loaded", binding.pass)))?;

        if parameter.ty().is_sampler() {
            if let (Some(slot), true) = (gl_pass.slots.sampler(&binding.backend_name), self.is_bound(binding.pass)) {
                unsafe { Self::bind_unit(slot.unit, parameter.texture().as_deref()) };
            }
            return Ok(());
        }

        let Some(block) = gl_pass.slots.block(&binding.backend_name) else {
            trace!("gl: {} has no live block", parameter.full_name());
            return Ok(());
        };
        let bytes = std140_bytes(parameter.ty(), &parameter.scalar());
        let len = bytes.len().min(block.size);
        unsafe {
            let mut previous: GLint = 0;
            gl::GetIntegerv(gl::UNIFORM_BUFFER_BINDING, &mut previous);
            gl::BindBuffer(gl::UNIFORM_BUFFER, block.buffer);
            gl::BufferSubData(gl::UNIFORM_BUFFER, 0, len as isize, bytes.as_ptr().cast());
            gl::BindBuffer(gl::UNIFORM_BUFFER, previous as GLuint);
        }
        check_gl_error("uniform upload").map_err(api)
    }

    // -----------------------------------------------------------------------
    // Drawing
    // -----------------------------------------------------------------------

    fn draw_geometry(&self, offset: usize, count: usize, vertices: &[Vertex], flags: VertexFlags) -> Result<()> {
        let end = count
            .checked_mul(3)
            .and_then(|n| n.checked_add(offset))
            .filter(|&end| end <= vertices.len())
            .ok_or_else(|| FxError::InvalidArgument("vertex range out of bounds".into()))?;
        if !flags.contains(VertexFlags::TRANSFORMED) {
            trace!("gl: untransformed vertices are drawn as clip-space positions");
        }
        self.draw(gl::TRIANGLES, &vertices[offset..end])
    }

    fn draw_quad(&self, vertices: Option<&[Vertex; 4]>) -> Result<()> {
        let quad = vertices.copied().unwrap_or_else(fullscreen_quad);
        self.draw(gl::TRIANGLE_STRIP, &quad)
    }

    fn handle_error(&self, context: &str, error: &FxError) {
        let pending = drain_gl_errors();
        if pending.is_empty() {
            debug!("gl: {context}: {error}");
        } else {
            warn!("gl: {context}: {error} (pending GL errors {pending:x?})");
        }
    }
}

impl Drop for GlAdapter {
    fn drop(&mut self) {
        if self.bound.get_mut().is_some() {
            warn!("gl adapter dropped with a pass bound");
        }
        let live = self.passes.get_mut().len();
        if live > 0 {
            debug!("gl: releasing {live} passes still loaded");
        }
    }
}
