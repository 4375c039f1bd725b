//! Per-frame data the host hands to the engine.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Standard data that hosts provide each frame
#[derive(Debug, Clone)]
pub struct FrameData {
    pub created_at: Instant,
    pub viewport: Viewport,
    pub host_time: SystemTime,
    pub frame: u64,
}

impl FrameData {
    pub fn new(viewport: Viewport) -> FrameData {
        Self {
            created_at: Instant::now(),
            viewport,
            host_time: SystemTime::now(),
            frame: 0,
        }
    }

    pub fn set_time(&mut self, host_millis: f64) {
        self.host_time = UNIX_EPOCH + Duration::from_secs_f64(host_millis / 1000.0)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Move to the next frame.
    pub fn advance(&mut self) {
        self.frame += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn get_dimensions(&self) -> (u32, u32) {
        (self.viewport.width, self.viewport.height)
    }
}
