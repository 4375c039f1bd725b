//! Effect engine: techniques, passes, programs and a parameter graph bound
//! to a native device through an [`Adapter`].
//!
//! # Overview
//!
//! - [`Core`] owns the adapter, the compiler and the named registries, and is
//!   passed by reference to every operation that reaches the device.
//! - [`Effect`] is a compiled effect source: [`Technique`]s of [`Pass`]es of
//!   [`Program`]s, plus one virtual [`Parameter`] per uniform name.
//! - [`Parameter`]s form an attachment graph. Setting a virtual parameter
//!   pushes the value through the graph before the call returns.
//! - [`Adapter`] is what a backend implements. [`HeadlessAdapter`] records
//!   everything in memory, [`NullAdapter`] refuses everything.
//!
//! # Frame cycle
//!
//! ```rust,ignore
//! let technique = effect.bind(&core, true)?;
//! for pass in technique.passes() {
//!     core.set_pass(pass)?;
//!     core.draw_quad(None)?;
//!     core.reset_pass(pass)?;
//! }
//! effect.reset(&core)?;
//! ```

pub mod adapter;
pub mod context;
pub mod effect;
pub mod headless;
pub mod null;
pub mod parameter;
pub mod parser;
pub mod pass;
pub mod program;
pub mod technique;
pub mod texture;

pub use adapter::{Adapter, StateScope};
pub use context::{Core, BACKBUFFER, PARAM_FRAME, PARAM_TIME, PARAM_VIEWPORT, SPECIAL_TEXTURES};
pub use effect::{Effect, EffectId, EffectRef, EffectState};
pub use headless::HeadlessAdapter;
pub use null::NullAdapter;
pub use parameter::{Parameter, ParameterBinding, ParameterRef, ParameterValue};
pub use pass::{Pass, PassId, MAX_TARGETS};
pub use program::Program;
pub use technique::Technique;
pub use texture::{NativeTexture, Texture, TextureRef};

pub use fxlayer_core::*;
