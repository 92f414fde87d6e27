// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

/// Every variant is fatal for the component that returned it. Out-of-date and
/// suboptimal presentation results are not errors; see `frame::AcquireOutcome`
/// and `frame::PresentOutcome`.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("Vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("no physical device has a graphics queue that can present to the surface")]
    NoSuitableDevice,

    #[error("no memory type in mask {type_bits:#b} provides {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("write of {len} bytes exceeds buffer of {capacity} bytes")]
    BufferOverflow { len: usize, capacity: u64 },

    #[error("buffer is not mapped")]
    NotMapped,

    #[error("vkMapMemory succeeded but returned a null pointer")]
    NullMapping,

    #[error("no live swapchain")]
    NoSwapchain,

    #[error("image index {index} out of range for a swapchain of {len} images")]
    ImageIndex { index: u32, len: usize },

    #[error("swapchain recreation failed: {0}")]
    Recreate(#[source] Box<GpuError>),
}

impl GpuError {
    pub fn vulkan(op: &'static str, result: vk::Result) -> Self {
        GpuError::Vulkan { op, result }
    }

    /// Raised while rebuilding a stale presentation chain rather than at setup.
    pub fn is_recreate(&self) -> bool {
        matches!(self, GpuError::Recreate(_))
    }

    pub fn into_recreate(self) -> Self {
        if self.is_recreate() {
            self
        } else {
            GpuError::Recreate(Box::new(self))
        }
    }
}

pub type Result<T> = std::result::Result<T, GpuError>;

/// Tags a raw Vulkan result with the entry point that produced it.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|result| GpuError::vulkan(op, result))
    }
}
