//! Save and restore the slice of GL state effects touch.

use fxlayer::StateScope;
use gl::types::{GLboolean, GLenum, GLint, GLuint};

/// Capabilities a pass or a draw may toggle.
const CAPS: [GLenum; 4] = [gl::DEPTH_TEST, gl::BLEND, gl::CULL_FACE, gl::STENCIL_TEST];

/// Texture targets unbound by [`gl_reset`].
pub struct TextureType {
    pub target: u32,
    pub binding: u32,
}

pub const TEXTURE_TYPES: [TextureType; 3] = [
    TextureType {
        target: gl::TEXTURE_1D,
        binding: gl::TEXTURE_BINDING_1D,
    },
    TextureType {
        target: gl::TEXTURE_2D,
        binding: gl::TEXTURE_BINDING_2D,
    },
    TextureType {
        target: gl::TEXTURE_3D,
        binding: gl::TEXTURE_BINDING_3D,
    },
];

/// Extra state saved by a full capture only.
#[derive(Debug, Default)]
struct FullState {
    pack_buffer: GLint,
    unpack_buffer: GLint,
    color_mask: [GLboolean; 4],
    cull_face: GLint,
}

#[derive(Debug, Default)]
pub(crate) struct SavedGlState {
    caps: [GLboolean; 4],
    depth_mask: GLboolean,
    blend_src: GLint,
    blend_dst: GLint,
    front_face: GLint,
    program: GLint,
    draw_framebuffer: GLint,
    read_framebuffer: GLint,
    texture_2d: GLint,
    active_texture: GLint,
    array_buffer: GLint,
    uniform_buffer: GLint,
    vao: GLint,
    viewport: [GLint; 4],
    full: Option<FullState>,
}

impl SavedGlState {
    /// # Safety
    ///
    /// A GL context must be current.
    pub(crate) unsafe fn save(scope: StateScope) -> Self {
        let mut s = Self::default();
        for (i, cap) in CAPS.iter().enumerate() {
            s.caps[i] = gl::IsEnabled(*cap);
        }
        gl::GetBooleanv(gl::DEPTH_WRITEMASK, &mut s.depth_mask);
        gl::GetIntegerv(gl::BLEND_SRC_RGB, &mut s.blend_src);
        gl::GetIntegerv(gl::BLEND_DST_RGB, &mut s.blend_dst);
        gl::GetIntegerv(gl::FRONT_FACE, &mut s.front_face);
        gl::GetIntegerv(gl::CURRENT_PROGRAM, &mut s.program);
        gl::GetIntegerv(gl::DRAW_FRAMEBUFFER_BINDING, &mut s.draw_framebuffer);
        gl::GetIntegerv(gl::READ_FRAMEBUFFER_BINDING, &mut s.read_framebuffer);
        gl::GetIntegerv(gl::TEXTURE_BINDING_2D, &mut s.texture_2d);
        gl::GetIntegerv(gl::ACTIVE_TEXTURE, &mut s.active_texture);
        gl::GetIntegerv(gl::ARRAY_BUFFER_BINDING, &mut s.array_buffer);
        gl::GetIntegerv(gl::UNIFORM_BUFFER_BINDING, &mut s.uniform_buffer);
        gl::GetIntegerv(gl::VERTEX_ARRAY_BINDING, &mut s.vao);
        gl::GetIntegerv(gl::VIEWPORT, s.viewport.as_mut_ptr());

        if scope == StateScope::Full {
            let mut full = FullState::default();
            gl::GetIntegerv(gl::PIXEL_PACK_BUFFER_BINDING, &mut full.pack_buffer);
            gl::GetIntegerv(gl::PIXEL_UNPACK_BUFFER_BINDING, &mut full.unpack_buffer);
            gl::GetBooleanv(gl::COLOR_WRITEMASK, full.color_mask.as_mut_ptr());
            gl::GetIntegerv(gl::CULL_FACE_MODE, &mut full.cull_face);
            s.full = Some(full);
        }
        s
    }

    /// # Safety
    ///
    /// A GL context must be current, the same one `save` ran on.
    pub(crate) unsafe fn restore(&self) {
        for (cap, enabled) in CAPS.iter().zip(self.caps) {
            set_enabled(*cap, enabled == gl::TRUE);
        }
        gl::DepthMask(self.depth_mask);
        gl::BlendFunc(self.blend_src as GLenum, self.blend_dst as GLenum);
        gl::FrontFace(self.front_face as GLenum);
        gl::UseProgram(self.program as GLuint);
        gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, self.draw_framebuffer as GLuint);
        gl::BindFramebuffer(gl::READ_FRAMEBUFFER, self.read_framebuffer as GLuint);
        gl::ActiveTexture(self.active_texture as GLenum);
        gl::BindTexture(gl::TEXTURE_2D, self.texture_2d as GLuint);
        gl::BindBuffer(gl::ARRAY_BUFFER, self.array_buffer as GLuint);
        gl::BindBuffer(gl::UNIFORM_BUFFER, self.uniform_buffer as GLuint);
        gl::BindVertexArray(self.vao as GLuint);
        gl::Viewport(
            self.viewport[0],
            self.viewport[1],
            self.viewport[2],
            self.viewport[3],
        );

        if let Some(full) = &self.full {
            gl::BindBuffer(gl::PIXEL_PACK_BUFFER, full.pack_buffer as GLuint);
            gl::BindBuffer(gl::PIXEL_UNPACK_BUFFER, full.unpack_buffer as GLuint);
            let [r, g, b, a] = full.color_mask;
            gl::ColorMask(r, g, b, a);
            gl::CullFace(full.cull_face as GLenum);
        }
    }
}

/// Capability flags forced off for a draw, and what to put back.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DrawCaps {
    depth: bool,
    stencil: bool,
    cull: bool,
}

impl DrawCaps {
    /// Disable depth, stencil and culling, returning the previous flags.
    ///
    /// # Safety
    ///
    /// A GL context must be current.
    pub(crate) unsafe fn disable() -> Self {
        let caps = Self {
            depth: gl::IsEnabled(gl::DEPTH_TEST) == gl::TRUE,
            stencil: gl::IsEnabled(gl::STENCIL_TEST) == gl::TRUE,
            cull: gl::IsEnabled(gl::CULL_FACE) == gl::TRUE,
        };
        gl::Disable(gl::DEPTH_TEST);
        gl::Disable(gl::STENCIL_TEST);
        gl::Disable(gl::CULL_FACE);
        caps
    }

    /// # Safety
    ///
    /// A GL context must be current.
    pub(crate) unsafe fn restore(self) {
        set_enabled(gl::DEPTH_TEST, self.depth);
        set_enabled(gl::STENCIL_TEST, self.stencil);
        set_enabled(gl::CULL_FACE, self.cull);
    }
}

pub(crate) unsafe fn set_enabled(cap: GLenum, enabled: bool) {
    if enabled {
        gl::Enable(cap);
    } else {
        gl::Disable(cap);
    }
}

/// Put the context back to what hosts expect between plugins: no program,
/// no textures or buffers bound, blending off, `host_fbo` bound.
///
/// # Safety
///
/// A GL context must be current.
pub unsafe fn gl_reset(host_fbo: GLuint) {
    gl::UseProgram(0);

    let mut num_samplers = 0;
    gl::GetIntegerv(gl::MAX_TEXTURE_IMAGE_UNITS, &mut num_samplers);

    for texture_type in TEXTURE_TYPES.iter() {
        for sampler in 0..num_samplers {
            gl::ActiveTexture(gl::TEXTURE0 + sampler as u32);
            gl::BindTexture(texture_type.target, 0);
        }
    }

    gl::ActiveTexture(gl::TEXTURE0);

    gl::BindBuffer(gl::ARRAY_BUFFER, 0);
    gl::BindBuffer(gl::UNIFORM_BUFFER, 0);
    gl::BindVertexArray(0);
    gl::Disable(gl::BLEND);

    gl::BlendFunc(gl::ONE, gl::ZERO);

    gl::BindFramebuffer(gl::FRAMEBUFFER, host_fbo);
}

/// Drain the GL error queue, returning the codes in order.
pub fn drain_gl_errors() -> Vec<GLenum> {
    let mut errors = Vec::new();
    unsafe {
        loop {
            let err = gl::GetError();
            if err == gl::NO_ERROR || errors.len() >= 32 {
                break;
            }
            errors.push(err);
        }
    }
    errors
}

pub fn is_context_current() -> bool {
    unsafe { !gl::GetString(gl::VERSION).is_null() }
}
