//! GLSL versions the host context accepts.

use fxlayer_core::{Profile, ShaderStage};
use glium::CapabilitiesSource;

/// Desktop GLSL versions naga can target, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlslVersion {
    Glsl330,
    Glsl400,
    Glsl410,
    Glsl420,
    Glsl430,
    Glsl440,
    Glsl450,
    Glsl460,
}

impl GlslVersion {
    pub const ALL: [GlslVersion; 8] = [
        Self::Glsl330,
        Self::Glsl400,
        Self::Glsl410,
        Self::Glsl420,
        Self::Glsl430,
        Self::Glsl440,
        Self::Glsl450,
        Self::Glsl460,
    ];

    /// The number after `#version`.
    pub fn number(self) -> u16 {
        match self {
            Self::Glsl330 => 330,
            Self::Glsl400 => 400,
            Self::Glsl410 => 410,
            Self::Glsl420 => 420,
            Self::Glsl430 => 430,
            Self::Glsl440 => 440,
            Self::Glsl450 => 450,
            Self::Glsl460 => 460,
        }
    }

    pub fn profile(self) -> Profile {
        Profile::Glsl(self.number())
    }

    fn glium_version(self) -> glium::Version {
        let n = self.number();
        glium::Version(glium::Api::Gl, (n / 100) as u8, ((n % 100) / 10) as u8)
    }

    /// Whether programs for `stage` can be built at this version.
    pub fn runs(self, stage: ShaderStage) -> bool {
        match stage {
            ShaderStage::Vertex | ShaderStage::Fragment => true,
            ShaderStage::Compute => self >= Self::Glsl430,
            // naga has no GLSL writer for these.
            ShaderStage::Hull | ShaderStage::Domain | ShaderStage::Geometry => false,
        }
    }
}

/// Versions present in `reported`, best first.
pub fn supported_versions(reported: &[glium::Version]) -> Vec<GlslVersion> {
    let mut versions: Vec<GlslVersion> = GlslVersion::ALL
        .into_iter()
        .filter(|v| reported.contains(&v.glium_version()))
        .collect();
    versions.reverse();
    versions
}

/// Supported versions of a live context, best first.
pub fn context_versions(ctx: &impl CapabilitiesSource) -> Vec<GlslVersion> {
    supported_versions(&ctx.get_capabilities().supported_glsl_versions)
}

/// Profiles for `stage` out of `versions`, keeping their order.
pub fn stage_profiles(versions: &[GlslVersion], stage: ShaderStage) -> Vec<Profile> {
    versions
        .iter()
        .filter(|v| v.runs(stage))
        .map(|v| v.profile())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glium::{Api, Version};

    #[test]
    fn best_version_first() {
        let reported = [
            Version(Api::Gl, 1, 2),
            Version(Api::Gl, 3, 3),
            Version(Api::Gl, 4, 1),
            Version(Api::GlEs, 3, 0),
        ];
        assert_eq!(
            supported_versions(&reported),
            vec![GlslVersion::Glsl410, GlslVersion::Glsl330]
        );
        assert!(supported_versions(&[Version(Api::Gl, 1, 4)]).is_empty());
    }

    #[test]
    fn compute_needs_430() {
        let versions = [GlslVersion::Glsl450, GlslVersion::Glsl410, GlslVersion::Glsl330];
        assert_eq!(
            stage_profiles(&versions, ShaderStage::Fragment),
            vec![Profile::Glsl(450), Profile::Glsl(410), Profile::Glsl(330)]
        );
        assert_eq!(stage_profiles(&versions, ShaderStage::Compute), vec![Profile::Glsl(450)]);
        assert!(stage_profiles(&versions, ShaderStage::Geometry).is_empty());
    }
}
