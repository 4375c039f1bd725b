//! Format, stage and descriptor types.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

use crate::error::FxError;

// ---------------------------------------------------------------------------
// Textures
// ---------------------------------------------------------------------------

/// Pixel formats an adapter may be asked to allocate.
///
/// The numeric codes are stable: the high byte groups the format family
/// (0x1xx fixed point color, 0x2xx float color, 0x4xx depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum TextureFormat {
    Unknown = 0,
    Null = 0x001,
    Rgb5A1 = 0x102,
    Rgb8 = 0x103,
    Rgba8 = 0x104,
    Rgb10A2 = 0x105,
    Rgba16F = 0x201,
    Rgba32F = 0x202,
    D16 = 0x401,
    D24 = 0x402,
    D24S8 = 0x403,
    D32 = 0x404,
}

impl TextureFormat {
    pub fn from_code(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    pub fn code(self) -> u32 {
        self.to_u32().unwrap_or(0)
    }

    pub fn is_depth(self) -> bool {
        self.code() & 0x400 != 0
    }

    /// `Unknown` and `Null` describe "no storage" and can never be allocated.
    pub fn is_creatable(self) -> bool {
        !matches!(self, Self::Unknown | Self::Null)
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Unknown | Self::Null => 0,
            Self::Rgb5A1 | Self::D16 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Rgb10A2 | Self::D24 | Self::D24S8 | Self::D32 => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const DYNAMIC = 1 << 1;
        const MIPMAPS = 1 << 2;
        const AUTO_MIPMAP = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width, height, depth. Depth of 1 means a 2D texture.
    pub size: [u32; 3],
    pub levels: u32,
    pub flags: TextureFlags,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            size: [width, height, 1],
            levels: 1,
            flags: TextureFlags::empty(),
            format,
        }
    }

    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new_2d(width, height, format).with_flags(TextureFlags::RENDER_TARGET)
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn is_render_target(&self) -> bool {
        self.flags.contains(TextureFlags::RENDER_TARGET)
    }

    pub fn is_3d(&self) -> bool {
        self.size[2] > 1
    }

    /// Largest mip chain the size allows.
    pub fn max_levels(&self) -> u32 {
        let largest = self.size.iter().copied().max().unwrap_or(1).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// Level count actually allocated: 1 without `MIPMAPS`, otherwise the
    /// requested count clamped to the chain length (0 requests the full chain).
    pub fn effective_levels(&self) -> u32 {
        if !self.flags.intersects(TextureFlags::MIPMAPS | TextureFlags::AUTO_MIPMAP) {
            return 1;
        }
        let max = self.max_levels();
        if self.levels == 0 {
            max
        } else {
            num::clamp(self.levels, 1, max)
        }
    }

    /// Checks the parts of a descriptor every adapter rejects.
    pub fn validate(&self) -> Result<(), FxError> {
        if !self.format.is_creatable() {
            return Err(FxError::InvalidArgument(format!(
                "texture format {:?} cannot be created",
                self.format
            )));
        }
        if self.size.contains(&0) {
            return Err(FxError::InvalidArgument(format!(
                "texture size {:?} has a zero extent",
                self.size
            )));
        }
        if self.format.is_depth() && self.is_3d() {
            return Err(FxError::InvalidArgument("depth textures must be 2D".into()));
        }
        Ok(())
    }
}

/// Sub-box of a texture level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub origin: [u32; 3],
    pub size: [u32; 3],
}

impl TextureRegion {
    pub fn whole(desc: &TextureDesc) -> Self {
        Self {
            origin: [0; 3],
            size: desc.size,
        }
    }

    pub fn fits(&self, desc: &TextureDesc) -> bool {
        (0..3).all(|i| {
            self.origin[i]
                .checked_add(self.size[i])
                .is_some_and(|end| end <= desc.size[i])
        })
    }

    pub fn texel_count(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }
}

/// Raw pixel data to upload into a texture region.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub format: TextureFormat,
    pub size: [u32; 3],
    pub data: Vec<u8>,
}

impl Image {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            size: [width, height, 1],
            data,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product::<usize>() * self.format.bytes_per_pixel()
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterType {
    Bool,
    Int,
    Float1,
    Float2,
    Float3,
    Float4,
    Float4x4,
    String,
    Texture,
    Sampler1D,
    Sampler2D,
    Sampler3D,
    SamplerCube,
}

impl ParameterType {
    /// Number of float components the value occupies. Zero for non-scalar types.
    pub const fn components(self) -> usize {
        match self {
            Self::Bool | Self::Int | Self::Float1 => 1,
            Self::Float2 => 2,
            Self::Float3 => 3,
            Self::Float4 => 4,
            Self::Float4x4 => 16,
            Self::String | Self::Texture => 0,
            Self::Sampler1D | Self::Sampler2D | Self::Sampler3D | Self::SamplerCube => 0,
        }
    }

    pub const fn is_scalar(self) -> bool {
        self.components() > 0
    }

    pub const fn is_sampler(self) -> bool {
        matches!(
            self,
            Self::Sampler1D | Self::Sampler2D | Self::Sampler3D | Self::SamplerCube
        )
    }

    pub fn float(components: usize) -> Option<Self> {
        match components {
            1 => Some(Self::Float1),
            2 => Some(Self::Float2),
            3 => Some(Self::Float3),
            4 => Some(Self::Float4),
            16 => Some(Self::Float4x4),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stages and profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Pipeline order.
    pub const ALL: [ShaderStage; 6] = [
        Self::Vertex,
        Self::Hull,
        Self::Domain,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Hull => "hull",
            Self::Domain => "domain",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.keyword() == word)
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Target language a program is compiled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Wgsl,
    /// Desktop GLSL, version as in `#version` (330, 410, ...).
    Glsl(u16),
    Msl,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wgsl => f.write_str("wgsl"),
            Self::Glsl(v) => write!(f, "glsl{v}"),
            Self::Msl => f.write_str("msl"),
        }
    }
}

impl FromStr for Profile {
    type Err = FxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wgsl" => Ok(Self::Wgsl),
            "msl" => Ok(Self::Msl),
            _ => s
                .strip_prefix("glsl")
                .and_then(|v| v.parse::<u16>().ok())
                .map(Self::Glsl)
                .ok_or_else(|| FxError::InvalidProfile(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Vertex layout accepted by `draw_geometry`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [u8; 4],
    pub tex_coords: [[f32; 4]; 2],
}

impl Vertex {
    pub fn new(position: [f32; 4], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            color: [255; 4],
            tex_coords: [[tex_coord[0], tex_coord[1], 0.0, 0.0], [0.0; 4]],
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct VertexFlags: u32 {
        /// Positions are already in clip space.
        const TRANSFORMED = 1 << 0;
    }
}

/// Two triangles covering clip space, strip order.
pub fn fullscreen_quad() -> [Vertex; 4] {
    [
        Vertex::new([-1.0, -1.0, 0.0, 1.0], [0.0, 1.0]),
        Vertex::new([1.0, -1.0, 0.0, 1.0], [1.0, 1.0]),
        Vertex::new([-1.0, 1.0, 0.0, 1.0], [0.0, 0.0]),
        Vertex::new([1.0, 1.0, 0.0, 1.0], [1.0, 0.0]),
    ]
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub name: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub debug: bool,
}

impl Version {
    /// Version of the calling crate, from Cargo metadata.
    pub fn from_pkg(name: &str, version: &str) -> Self {
        let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            name: name.to_string(),
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
            debug: cfg!(debug_assertions),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}.{}", self.name, self.major, self.minor, self.patch)?;
        if self.debug {
            f.write_str(" (debug)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_codes_are_stable() {
        assert_eq!(TextureFormat::Rgba8.code(), 0x104);
        assert_eq!(TextureFormat::from_code(0x403), Some(TextureFormat::D24S8));
        assert_eq!(TextureFormat::from_code(0x999), None);
        assert!(TextureFormat::D32.is_depth());
        assert!(!TextureFormat::Rgba32F.is_depth());
    }

    #[test]
    fn unknown_and_null_formats_are_rejected() {
        for format in [TextureFormat::Unknown, TextureFormat::Null] {
            let err = TextureDesc::new_2d(4, 4, format).validate().unwrap_err();
            assert!(matches!(err, FxError::InvalidArgument(_)));
        }
        assert!(TextureDesc::new_2d(4, 4, TextureFormat::Rgba8).validate().is_ok());
        assert!(TextureDesc::new_2d(0, 4, TextureFormat::Rgba8).validate().is_err());
    }

    #[test]
    fn mip_levels_clamp_to_chain() {
        let desc = TextureDesc::new_2d(256, 64, TextureFormat::Rgba8);
        assert_eq!(desc.effective_levels(), 1);
        let desc = desc.with_flags(TextureFlags::MIPMAPS);
        assert_eq!(desc.max_levels(), 9);
        assert_eq!(desc.with_levels(0).effective_levels(), 9);
        assert_eq!(desc.with_levels(40).effective_levels(), 9);
        assert_eq!(desc.with_levels(3).effective_levels(), 3);
    }

    #[test]
    fn regions_must_fit() {
        let desc = TextureDesc::new_2d(8, 8, TextureFormat::Rgba8);
        let inside = TextureRegion { origin: [4, 4, 0], size: [4, 4, 1] };
        let outside = TextureRegion { origin: [5, 0, 0], size: [4, 4, 1] };
        assert!(inside.fits(&desc));
        assert!(!outside.fits(&desc));
        assert_eq!(inside.texel_count(), 16);
    }

    #[test]
    fn components_follow_type() {
        assert_eq!(ParameterType::Float3.components(), 3);
        assert_eq!(ParameterType::Float4x4.components(), 16);
        assert_eq!(ParameterType::Sampler2D.components(), 0);
        assert!(ParameterType::SamplerCube.is_sampler());
        assert!(!ParameterType::Texture.is_sampler());
    }

    #[test]
    fn profiles_parse() {
        assert_eq!("glsl330".parse::<Profile>().unwrap(), Profile::Glsl(330));
        assert_eq!("wgsl".parse::<Profile>().unwrap(), Profile::Wgsl);
        assert_eq!(Profile::Glsl(410).to_string(), "glsl410");
        assert!("hlsl".parse::<Profile>().is_err());
    }

    #[test]
    fn version_from_pkg() {
        let v = Version::from_pkg("fxlayer", "1.2.3");
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
    }
}
