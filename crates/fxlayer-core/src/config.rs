//! Process configuration for the engine core.

use std::path::PathBuf;

use thiserror::Error;

use crate::compiler::CompileFlags;

pub const ENV_PATH: &str = "FXLAYER_PATH";
pub const ENV_LOG: &str = "FXLAYER_LOG";
pub const ENV_COMPILE_FLAGS: &str = "FXLAYER_COMPILE_FLAGS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Directories searched, in order, for relative effect paths.
    pub search_paths: Vec<PathBuf>,
    /// `EnvFilter` directive handed to [`crate::logging::init`].
    pub log_filter: String,
    /// Flags applied to every program compile.
    pub compile_flags: CompileFlags,
    /// Size of the special render targets when the adapter reports none.
    pub surface_size: (u32, u32),
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
            log_filter: "info".into(),
            compile_flags: CompileFlags::empty(),
            surface_size: (1024, 768),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`CoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PATH) {
            let paths: Vec<PathBuf> = std::env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                config.search_paths = paths;
            }
        }

        if let Some(filter) = lookup(ENV_LOG) {
            let filter = filter.trim();
            if !filter.is_empty() {
                config.log_filter = filter.to_string();
            }
        }

        if let Some(raw) = lookup(ENV_COMPILE_FLAGS) {
            for word in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let flag = CompileFlags::from_keyword(word).ok_or_else(|| {
                    ConfigError::InvalidEnv {
                        var: ENV_COMPILE_FLAGS,
                        value: word.to_string(),
                    }
                })?;
                config.compile_flags |= flag;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn reads_flags_and_filter() {
        let config = CoreConfig::from_lookup(lookup(&[
            (ENV_LOG, "fxlayer=trace"),
            (ENV_COMPILE_FLAGS, "debug, force_point_size"),
        ]))
        .unwrap();
        assert_eq!(config.log_filter, "fxlayer=trace");
        assert_eq!(
            config.compile_flags,
            CompileFlags::DEBUG | CompileFlags::FORCE_POINT_SIZE
        );
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = CoreConfig::from_lookup(lookup(&[(ENV_COMPILE_FLAGS, "fast")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_COMPILE_FLAGS,
                value: "fast".into()
            }
        );
    }

    #[test]
    fn splits_search_paths() {
        let joined = std::env::join_paths(["/a", "/b"]).unwrap();
        let joined = joined.to_string_lossy().into_owned();
        let config = CoreConfig::from_lookup(lookup(&[(ENV_PATH, joined.as_str())])).unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
