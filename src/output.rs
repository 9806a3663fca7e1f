//! Renderer output targets.
//!
//! A renderer draws either into a window's swapchain or into one of its own
//! image resources. The target is a tagged variant, not a pair of nullable
//! fields; everything that needs the output's shape dispatches on the tag.

use std::sync::Arc;

use crate::resource::ResourceHandle;
use crate::swapchain::Surface;

/// Where a renderer's draws land.
#[derive(Debug, Clone)]
pub enum Output {
    /// Present to a window surface's swapchain. The render pass declares
    /// present-ready as the attachment's final layout.
    Surface(Arc<Surface>),
    /// Render into an owned image resource flagged `RENDER_OUTPUT`. The
    /// render pass leaves the attachment ready to be read by a subsequent
    /// pass.
    Offscreen(ResourceHandle),
}

impl Output {
    /// Whether this output presents to a window.
    pub fn is_window(&self) -> bool {
        matches!(self, Output::Surface(_))
    }
}
