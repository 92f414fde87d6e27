// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are zero: the window system has nothing to show (minimized).
    pub fn is_empty(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    pub fn has_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What one call to [`Renderer::render`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and handed to the presentation engine.
    Presented,
    /// The presentation chain was rebuilt instead; nothing was drawn.
    Rebuilt,
}

pub trait Renderer {
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_only_when_both_zero() {
        assert!(RenderSize::new(0, 0).is_empty());
        assert!(!RenderSize::new(0, 480).is_empty());
        assert!(RenderSize::new(0, 480).has_zero_area());
        assert!(!RenderSize::new(640, 480).has_zero_area());
    }
}
