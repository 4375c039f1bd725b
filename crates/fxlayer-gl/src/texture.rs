//! GL texture storage behind engine textures.

use std::any::Any;

use anyhow::{bail, Result};
use fxlayer::NativeTexture;
use fxlayer_core::{TextureDesc, TextureFlags, TextureFormat, TextureRegion};
use gl::types::{GLenum, GLint, GLsizei, GLuint};

use crate::program::check_gl_error;

/// Internal format, pixel format and pixel type for one texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlFormat {
    pub internal: GLenum,
    pub format: GLenum,
    pub ty: GLenum,
}

pub fn gl_format(format: TextureFormat) -> Option<GlFormat> {
    let (internal, format, ty) = match format {
        TextureFormat::Unknown | TextureFormat::Null => return None,
        TextureFormat::Rgb5A1 => (gl::RGB5_A1, gl::RGBA, gl::UNSIGNED_SHORT_5_5_5_1),
        TextureFormat::Rgb8 => (gl::RGB8, gl::RGB, gl::UNSIGNED_BYTE),
        TextureFormat::Rgba8 => (gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE),
        TextureFormat::Rgb10A2 => (gl::RGB10_A2, gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV),
        TextureFormat::Rgba16F => (gl::RGBA16F, gl::RGBA, gl::HALF_FLOAT),
        TextureFormat::Rgba32F => (gl::RGBA32F, gl::RGBA, gl::FLOAT),
        TextureFormat::D16 => (gl::DEPTH_COMPONENT16, gl::DEPTH_COMPONENT, gl::UNSIGNED_SHORT),
        TextureFormat::D24 => (gl::DEPTH_COMPONENT24, gl::DEPTH_COMPONENT, gl::UNSIGNED_INT),
        TextureFormat::D24S8 => (gl::DEPTH24_STENCIL8, gl::DEPTH_STENCIL, gl::UNSIGNED_INT_24_8),
        TextureFormat::D32 => (gl::DEPTH_COMPONENT32F, gl::DEPTH_COMPONENT, gl::FLOAT),
    };
    Some(GlFormat { internal, format, ty })
}

/// Framebuffer attachment point for a texture of `format` in color slot
/// `slot`.
pub fn attachment_point(format: TextureFormat, slot: usize) -> GLenum {
    match format {
        TextureFormat::D24S8 => gl::DEPTH_STENCIL_ATTACHMENT,
        f if f.is_depth() => gl::DEPTH_ATTACHMENT,
        _ => gl::COLOR_ATTACHMENT0 + slot as GLenum,
    }
}

/// A GL texture name. Id 0 stands for the host framebuffer.
#[derive(Debug)]
pub struct GlTexture {
    id: GLuint,
    target: GLenum,
    format: TextureFormat,
    auto_mipmap: bool,
    owned: bool,
}

impl GlTexture {
    /// The host framebuffer as a texture alias. Nothing is released on drop.
    pub fn host() -> Self {
        Self {
            id: 0,
            target: gl::TEXTURE_2D,
            format: TextureFormat::Rgba8,
            auto_mipmap: false,
            owned: false,
        }
    }

    /// Wrap a texture the host owns.
    ///
    /// # Safety
    ///
    /// `id` must name a live texture of `target` for as long as the wrapper
    /// is in use.
    pub unsafe fn borrowed(id: GLuint, target: GLenum, format: TextureFormat) -> Self {
        Self {
            id,
            target,
            format,
            auto_mipmap: false,
            owned: false,
        }
    }

    /// Allocate immutable storage for `desc`.
    ///
    /// # Safety
    ///
    /// A GL context must be current.
    pub(crate) unsafe fn allocate(desc: &TextureDesc) -> Result<Self> {
        let Some(fmt) = gl_format(desc.format) else {
            bail!("no GL storage for {:?}", desc.format);
        };
        let target = if desc.is_3d() { gl::TEXTURE_3D } else { gl::TEXTURE_2D };
        let [w, h, d] = desc.size.map(|s| s as GLsizei);
        let levels = desc.effective_levels() as GLsizei;

        let mut previous: GLint = 0;
        gl::GetIntegerv(binding_of(target), &mut previous);

        let mut id: GLuint = 0;
        gl::GenTextures(1, &mut id);
        gl::BindTexture(target, id);
        if target == gl::TEXTURE_3D && gl::TexStorage3D::is_loaded() {
            gl::TexStorage3D(target, levels, fmt.internal, w, h, d);
        } else if target == gl::TEXTURE_2D && gl::TexStorage2D::is_loaded() {
            gl::TexStorage2D(target, levels, fmt.internal, w, h);
        } else {
            // Pre-4.2 contexts without ARB_texture_storage.
            allocate_levels(target, fmt, desc.size, levels as u32);
        }
        let min_filter = if levels > 1 { gl::LINEAR_MIPMAP_LINEAR } else { gl::LINEAR };
        gl::TexParameteri(target, gl::TEXTURE_MIN_FILTER, min_filter as GLint);
        gl::TexParameteri(target, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        gl::TexParameteri(target, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
        gl::TexParameteri(target, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
        gl::BindTexture(target, previous as GLuint);

        let texture = Self {
            id,
            target,
            format: desc.format,
            auto_mipmap: desc.flags.contains(TextureFlags::AUTO_MIPMAP),
            owned: true,
        };
        // Dropping `texture` on error releases the name.
        check_gl_error("texture storage")?;
        Ok(texture)
    }

    pub fn id(&self) -> GLuint {
        self.id
    }

    pub fn target(&self) -> GLenum {
        self.target
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn is_host_framebuffer(&self) -> bool {
        self.id == 0
    }

    /// Copy `data` into `region` of level 0.
    ///
    /// # Safety
    ///
    /// A GL context must be current. `data` must hold the whole region in
    /// this texture's format, tightly packed.
    pub(crate) unsafe fn upload(&self, region: &TextureRegion, data: &[u8]) -> Result<()> {
        if self.is_host_framebuffer() {
            bail!("the host framebuffer cannot be uploaded to");
        }
        let Some(fmt) = gl_format(self.format) else {
            bail!("no GL storage for {:?}", self.format);
        };
        let [x, y, z] = region.origin.map(|o| o as GLint);
        let [w, h, d] = region.size.map(|s| s as GLsizei);

        let mut previous: GLint = 0;
        let mut unpack_buffer: GLint = 0;
        let mut alignment: GLint = 4;
        gl::GetIntegerv(binding_of(self.target), &mut previous);
        gl::GetIntegerv(gl::PIXEL_UNPACK_BUFFER_BINDING, &mut unpack_buffer);
        gl::GetIntegerv(gl::UNPACK_ALIGNMENT, &mut alignment);

        gl::BindBuffer(gl::PIXEL_UNPACK_BUFFER, 0);
        gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
        gl::BindTexture(self.target, self.id);
        let pixels = data.as_ptr().cast();
        if self.target == gl::TEXTURE_3D {
            gl::TexSubImage3D(self.target, 0, x, y, z, w, h, d, fmt.format, fmt.ty, pixels);
        } else {
            gl::TexSubImage2D(self.target, 0, x, y, w, h, fmt.format, fmt.ty, pixels);
        }
        if self.auto_mipmap {
            gl::GenerateMipmap(self.target);
        }

        gl::BindTexture(self.target, previous as GLuint);
        gl::PixelStorei(gl::UNPACK_ALIGNMENT, alignment);
        gl::BindBuffer(gl::PIXEL_UNPACK_BUFFER, unpack_buffer as GLuint);
        check_gl_error("texture upload")
    }
}

/// Extent of every mip level from `size` down, halving each axis and
/// clamping at one. Depth stays put for 2D textures.
pub fn level_sizes(size: [u32; 3], levels: u32, is_3d: bool) -> Vec<[u32; 3]> {
    (0..levels)
        .map(|level| {
            let [w, h, d] = size.map(|s| (s >> level).max(1));
            [w, h, if is_3d { d } else { size[2].max(1) }]
        })
        .collect()
}

/// Mutable per-level storage for contexts without `glTexStorage*`.
unsafe fn allocate_levels(target: GLenum, fmt: GlFormat, size: [u32; 3], levels: u32) {
    let is_3d = target == gl::TEXTURE_3D;
    let mut unpack_buffer: GLint = 0;
    gl::GetIntegerv(gl::PIXEL_UNPACK_BUFFER_BINDING, &mut unpack_buffer);
    gl::BindBuffer(gl::PIXEL_UNPACK_BUFFER, 0);

    for (level, [w, h, d]) in level_sizes(size, levels, is_3d).into_iter().enumerate() {
        let (level, w, h, d) = (level as GLint, w as GLsizei, h as GLsizei, d as GLsizei);
        if is_3d {
            gl::TexImage3D(target, level, fmt.internal as GLint, w, h, d, 0, fmt.format, fmt.ty, std::ptr::null());
        } else {
            gl::TexImage2D(target, level, fmt.internal as GLint, w, h, 0, fmt.format, fmt.ty, std::ptr::null());
        }
    }
    gl::TexParameteri(target, gl::TEXTURE_BASE_LEVEL, 0);
    gl::TexParameteri(target, gl::TEXTURE_MAX_LEVEL, levels.saturating_sub(1) as GLint);

    gl::BindBuffer(gl::PIXEL_UNPACK_BUFFER, unpack_buffer as GLuint);
}

impl NativeTexture for GlTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for GlTexture {
    fn drop(&mut self) {
        if self.owned && self.id != 0 {
            unsafe { gl::DeleteTextures(1, &self.id) };
        }
    }
}

pub(crate) fn binding_of(target: GLenum) -> GLenum {
    match target {
        gl::TEXTURE_1D => gl::TEXTURE_BINDING_1D,
        gl::TEXTURE_3D => gl::TEXTURE_BINDING_3D,
        gl::TEXTURE_CUBE_MAP => gl::TEXTURE_BINDING_CUBE_MAP,
        _ => gl::TEXTURE_BINDING_2D,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_creatable_format_maps() {
        for code in [0x102, 0x103, 0x104, 0x105, 0x201, 0x202, 0x401, 0x402, 0x403, 0x404] {
            let format = TextureFormat::from_code(code).unwrap();
            assert!(gl_format(format).is_some(), "{format:?}");
        }
        assert!(gl_format(TextureFormat::Unknown).is_none());
        assert!(gl_format(TextureFormat::Null).is_none());
    }

    #[test]
    fn depth_formats_attach_to_depth() {
        assert_eq!(attachment_point(TextureFormat::Rgba8, 2), gl::COLOR_ATTACHMENT2);
        assert_eq!(attachment_point(TextureFormat::D32, 0), gl::DEPTH_ATTACHMENT);
        assert_eq!(attachment_point(TextureFormat::D24S8, 0), gl::DEPTH_STENCIL_ATTACHMENT);
    }

    #[test]
    fn fallback_levels_halve_down_to_one() {
        assert_eq!(
            level_sizes([8, 2, 1], 4, false),
            vec![[8, 2, 1], [4, 1, 1], [2, 1, 1], [1, 1, 1]]
        );
        assert_eq!(level_sizes([4, 4, 4], 2, true), vec![[4, 4, 4], [2, 2, 2]]);
        assert_eq!(level_sizes([4, 4, 6], 2, false)[1], [2, 2, 6]);
    }
}
