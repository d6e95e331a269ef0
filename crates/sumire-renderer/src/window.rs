//! Window abstraction the renderer draws into.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use winit::window::Window;

use crate::error::{RenderError, RenderResult};

/// What the renderer needs from a window.
pub trait WindowProvider {
    /// Current framebuffer size in pixels. Zero while minimized.
    fn extent(&self) -> vk::Extent2D;

    /// Sticky flag set by the event loop when the window changed size.
    fn was_resized(&self) -> bool;

    fn reset_resized_flag(&self);

    fn raw_handles(&self) -> RenderResult<(RawDisplayHandle, RawWindowHandle)>;
}

/// winit-backed window with a resize flag the event loop sets.
pub struct SumiWindow {
    window: Arc<Window>,
    resized: AtomicBool,
}

impl SumiWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resized: AtomicBool::new(false),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn mark_resized(&self) {
        self.resized.store(true, Ordering::Release);
    }
}

impl WindowProvider for SumiWindow {
    fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn was_resized(&self) -> bool {
        self.resized.load(Ordering::Acquire)
    }

    fn reset_resized_flag(&self) {
        self.resized.store(false, Ordering::Release);
    }

    fn raw_handles(&self) -> RenderResult<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| RenderError::Window(format!("display handle unavailable: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| RenderError::Window(format!("window handle unavailable: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}
