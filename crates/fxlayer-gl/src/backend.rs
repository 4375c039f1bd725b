//! glium view of the host GL context, used to query capabilities.

use std::rc::Rc;
use std::sync::Once;

use anyhow::{anyhow, Result};
use glium::backend::Context;

pub(crate) static GL_INIT_ONCE: Once = Once::new();

/// Load GL function pointers. Runs once per process.
pub(crate) fn load_gl() {
    GL_INIT_ONCE.call_once(|| {
        gl_loader::init_gl();
        gl::load_with(|s| gl_loader::get_proc_address(s).cast());
    });
}

#[derive(Debug)]
pub(crate) struct HostGlBackend {
    pub(crate) size: (u32, u32),
}

impl HostGlBackend {
    pub(crate) fn new(size: (u32, u32)) -> Self {
        load_gl();
        Self { size }
    }
}

/// # Safety
///
/// Only valid while the host keeps its GL context current on the calling
/// thread. glium never switches contexts through this backend.
unsafe impl glium::backend::Backend for HostGlBackend {
    fn swap_buffers(&self) -> Result<(), glium::SwapBuffersError> {
        Ok(())
    }

    unsafe fn get_proc_address(&self, symbol: &str) -> *const std::os::raw::c_void {
        gl_loader::get_proc_address(symbol).cast()
    }

    fn get_framebuffer_dimensions(&self) -> (u32, u32) {
        self.size
    }

    fn is_current(&self) -> bool {
        true
    }

    unsafe fn make_current(&self) {}

    fn resize(&self, _new_size: (u32, u32)) {}
}

/// Wrap the current host context.
///
/// # Safety
///
/// A GL context must be current on this thread.
pub(crate) unsafe fn host_context(size: (u32, u32)) -> Result<Rc<Context>> {
    let backend = Rc::new(HostGlBackend::new(size));
    tracing::debug!("gl backend: {backend:?}");
    Context::new(backend, false, glium::debug::DebugCallbackBehavior::Ignore)
        .map_err(|e| anyhow!("host context is unusable: {e:?}"))
}
