//! Textures: a descriptor plus the adapter's native storage.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use fxlayer_core::{Identifiable, Properties, PropertyBag, TextureDesc};
use tracing::trace;

/// Backend storage behind a [`Texture`].
///
/// Dropping the value releases the native resource, so it lives exactly as
/// long as the last [`TextureRef`] to its texture.
pub trait NativeTexture: Any + fmt::Debug {
    /// Downcast support, e.g. `native.as_any().downcast_ref::<GlTexture>()`.
    fn as_any(&self) -> &dyn Any;
}

pub type TextureRef = Rc<Texture>;

pub struct Texture {
    name: String,
    desc: TextureDesc,
    native: Box<dyn NativeTexture>,
    properties: Properties,
}

impl Texture {
    /// Wrap adapter-created storage. Adapters build their own aliases
    /// (e.g. the default target) with this too.
    pub fn new(name: impl Into<String>, desc: TextureDesc, native: Box<dyn NativeTexture>) -> TextureRef {
        Rc::new(Self {
            name: name.into(),
            desc,
            native,
            properties: Properties::new(),
        })
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn is_render_target(&self) -> bool {
        self.desc.is_render_target()
    }

    pub fn native(&self) -> &dyn NativeTexture {
        self.native.as_ref()
    }

    pub fn native_as<T: NativeTexture>(&self) -> Option<&T> {
        self.native.as_any().downcast_ref::<T>()
    }
}

impl Identifiable for Texture {
    fn name(&self) -> &str {
        &self.name
    }
}

impl PropertyBag for Texture {
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("native", &self.native)
            .finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        trace!("releasing texture {}", self.name);
    }
}
