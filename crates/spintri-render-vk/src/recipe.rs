// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::Result;

/// The fixed draw a presenter replays every frame.
///
/// The presenter owns the command buffer and the render pass instance; a
/// recipe only supplies the pass description and the commands recorded
/// inside it.
pub trait RenderRecipe {
    /// Color attachment format must be `swapchain::SURFACE_FORMAT`.
    fn render_pass(&self) -> vk::RenderPass;

    /// CPU-side writes for the coming frame. Called after the previous
    /// frame's fence has signaled and before the command buffer is recorded.
    fn prepare_frame(&mut self) -> Result<()>;

    /// # Safety
    /// `cmd` must be in the recording state inside a render pass begun with
    /// [`render_pass`](Self::render_pass), with viewport and scissor set.
    unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer);
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}
