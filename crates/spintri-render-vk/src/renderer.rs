// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use spintri_render::{FrameStatus, RenderSize, Renderer};
use tracing::info;

use crate::context::VkContext;
use crate::frame::{FrameOutcome, FrameSynchronizer};
use crate::presenter::VkPresenter;
use crate::recipe::RenderRecipe;

pub struct VkRenderer {
    frames: FrameSynchronizer<VkPresenter>,
}

impl VkRenderer {
    /// `recipe` builds the pipeline objects against the freshly created
    /// context; its render pass is what the swapchain framebuffers target.
    pub fn new<F>(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        recipe: F,
    ) -> Result<Self>
    where
        F: FnOnce(&Arc<VkContext>) -> Result<Box<dyn RenderRecipe>>,
    {
        let ctx = VkContext::new(window, display).context("initialising Vulkan")?;
        let recipe = recipe(&ctx).context("building render recipe")?;
        let presenter = VkPresenter::new(ctx, recipe, size).context("creating presenter")?;
        info!(
            "renderer ready at {}x{}",
            presenter.extent().map_or(0, |e| e.width),
            presenter.extent().map_or(0, |e| e.height)
        );
        Ok(Self {
            frames: FrameSynchronizer::new(presenter, size),
        })
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.frames.request_resize(size);
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        match self.frames.run_frame()? {
            FrameOutcome::Presented { .. } => Ok(FrameStatus::Presented),
            FrameOutcome::Recreated { extent } => {
                info!("swapchain rebuilt at {}x{}", extent.width, extent.height);
                Ok(FrameStatus::Rebuilt)
            }
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.backend_mut().set_clear_color(rgba);
    }
}
