// SPDX-License-Identifier: CEPL-1.0
//! The ash side of the frame loop: one command buffer, one sync set, and the
//! swapchain they target.

use std::sync::Arc;

use ash::vk;
use spintri_render::RenderSize;
use tracing::debug;

use crate::context::VkContext;
use crate::error::{GpuError, Result, VkResultExt};
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::recipe::{full_scissor, full_viewport, RenderRecipe};
use crate::swapchain::SwapchainManager;
use crate::sync::FrameSyncSet;

pub const DEFAULT_CLEAR: [f32; 4] = [0.2, 0.4, 0.9, 1.0];

pub struct VkPresenter {
    ctx: Arc<VkContext>,
    // Framebuffers reference the recipe's render pass, so the chain drops first.
    swapchains: SwapchainManager<VkContext>,
    recipe: Box<dyn RenderRecipe>,
    sync: FrameSyncSet,
    cmd_pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    clear: [f32; 4],
}

unsafe fn create_command_resources(device: &ash::Device, queue_family: u32) -> Result<(vk::CommandPool, vk::CommandBuffer)> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    let pool = unsafe { device.create_command_pool(&pool_info, None) }.op("vkCreateCommandPool")?;
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    match unsafe { device.allocate_command_buffers(&alloc_info) }.op("vkAllocateCommandBuffers") {
        Ok(bufs) => Ok((pool, bufs[0])),
        Err(e) => {
            unsafe { device.destroy_command_pool(pool, None) };
            Err(e)
        }
    }
}

impl VkPresenter {
    pub fn new(ctx: Arc<VkContext>, recipe: Box<dyn RenderRecipe>, size: RenderSize) -> Result<Self> {
        let swapchains = SwapchainManager::create(ctx.clone(), recipe.render_pass(), size)?;
        let device = ctx.device();
        let mut sync = unsafe { FrameSyncSet::new(device) }?;
        let (cmd_pool, cmd) = match unsafe { create_command_resources(device, ctx.queue_family()) } {
            Ok(c) => c,
            Err(e) => {
                unsafe { sync.destroy(device) };
                return Err(e);
            }
        };
        Ok(Self {
            ctx,
            swapchains,
            recipe,
            sync,
            cmd_pool,
            cmd,
            clear: DEFAULT_CLEAR,
        })
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchains.extent()
    }

    unsafe fn record_commands(&self, image_index: u32) -> Result<()> {
        let chain = self.swapchains.current().ok_or(GpuError::NoSwapchain)?;
        let framebuffer = chain.framebuffer(image_index)?;
        let extent = chain.extent();
        let device = self.ctx.device();
        let cmd = self.cmd;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device.begin_command_buffer(cmd, &begin).op("vkBeginCommandBuffer")?;

            let clear = vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear },
            };
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.recipe.render_pass(),
                framebuffer,
                render_area: full_scissor(extent),
                clear_value_count: 1,
                p_clear_values: &clear,
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
            self.recipe.draw(device, cmd);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd).op("vkEndCommandBuffer")?;
        }
        Ok(())
    }
}

impl FrameBackend for VkPresenter {
    fn wait_for_frame(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device()
                .wait_for_fences(&[self.sync.frame_complete], true, u64::MAX)
        }
        .op("vkWaitForFences")
    }

    fn acquire_image(&mut self) -> Result<AcquireOutcome> {
        let chain = self.swapchains.current().ok_or(GpuError::NoSwapchain)?;
        let acquired = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                chain.handle(),
                u64::MAX,
                self.sync.image_acquired,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("acquire: swapchain out of date");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(e) => Err(GpuError::vulkan("vkAcquireNextImageKHR", e)),
        }
    }

    fn reset_frame_fence(&mut self) -> Result<()> {
        unsafe { self.ctx.device().reset_fences(&[self.sync.frame_complete]) }.op("vkResetFences")
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        self.recipe.prepare_frame()?;
        unsafe { self.record_commands(image_index) }
    }

    fn submit(&mut self) -> Result<()> {
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.sync.image_acquired,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.queue(), &[submit], self.sync.frame_complete)
        }
        .op("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let swapchain = self.swapchains.current().ok_or(GpuError::NoSwapchain)?.handle();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.ctx.swapchain_loader().queue_present(self.ctx.queue(), &present) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => {
                debug!("present: swapchain suboptimal");
                Ok(PresentOutcome::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present: swapchain out of date");
                Ok(PresentOutcome::Stale)
            }
            Err(e) => Err(GpuError::vulkan("vkQueuePresentKHR", e)),
        }
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<vk::Extent2D> {
        self.swapchains.recreate(size).map(|chain| chain.extent())
    }

    fn renew_acquire_semaphore(&mut self) -> Result<()> {
        unsafe { self.sync.renew_image_acquired(self.ctx.device()) }
    }
}

impl Drop for VkPresenter {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.device_wait_idle().ok();
            self.sync.destroy(device);
            device.destroy_command_pool(self.cmd_pool, None);
        }
        self.swapchains.destroy();
    }
}
