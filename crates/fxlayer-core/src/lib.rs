//! Shared vocabulary for the fxlayer effect engine.
//!
//! Nothing in this crate talks to a graphics API. It defines the value and
//! format types every other crate agrees on, the error taxonomy, and the two
//! contracts the engine consumes from the outside world:
//!
//! - [`Compiler`] turns one shader entry point into backend code plus uniform
//!   reflection.
//! - [`FileSystem`] resolves effect paths to readable handles.
//!
//! [`CoreConfig`] and [`logging`] cover process setup, [`FrameData`] carries
//! per-frame host input.

pub mod compiler;
pub mod config;
pub mod error;
pub mod fs;
pub mod inputs;
pub mod logging;
pub mod object;
pub mod types;
pub mod variant;

pub use compiler::{CompileFlags, CompileRequest, CompiledProgram, Compiler, UniformDesc};
pub use config::{ConfigError, CoreConfig};
pub use error::{FxError, Result};
pub use fs::{FileHandle, FileSystem, MemoryFileSystem, SearchPathFileSystem};
pub use inputs::{FrameData, Viewport};
pub use object::{Identifiable, Properties, PropertyBag};
pub use types::*;
pub use variant::Variant;
