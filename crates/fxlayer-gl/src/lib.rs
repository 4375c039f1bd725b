//! OpenGL adapter for fxlayer, running inside a host-owned GL context.
//!
//! Create a [`GlAdapter`] once the host has made its context current and
//! hand it to the [`fxlayer::Core`]:
//!
//! ```rust,ignore
//! let adapter = unsafe { GlAdapter::new((width, height), host_fbo)? };
//! core.set_adapter(Box::new(adapter))?;
//! ```
//!
//! Effects must be compiled to GLSL, which is what the Core picks when the
//! compiler supports the versions [`GlAdapter`] reports.
//!
//! ### Warning
//!
//! Every call assumes the host context is current on the calling thread.
//! The adapter never makes a context current itself.

mod adapter;
mod backend;
pub mod bytes;
pub mod glsl;
pub mod program;
pub mod state;
pub mod texture;

pub use adapter::GlAdapter;
pub use glsl::GlslVersion;
pub use texture::GlTexture;
