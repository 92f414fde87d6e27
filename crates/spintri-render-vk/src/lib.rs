// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation core: device context, host-visible buffers, the
//! swapchain manager and the single-slot frame loop.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod context;
pub mod error;
pub mod frame;
pub mod memory;
pub mod presenter;
pub mod recipe;
pub mod renderer;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod testing;

pub use ash;
pub use buffer::{BufferDevice, BufferUsage, GpuBuffer};
pub use context::VkContext;
pub use error::{GpuError, Result};
pub use frame::{AcquireOutcome, FrameBackend, FrameOutcome, FrameState, FrameSynchronizer, PresentOutcome, StaleReason};
pub use presenter::VkPresenter;
pub use recipe::RenderRecipe;
pub use renderer::VkRenderer;
pub use swapchain::{Swapchain, SwapchainDevice, SwapchainManager};
