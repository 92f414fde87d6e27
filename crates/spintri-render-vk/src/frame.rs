// SPDX-License-Identifier: CEPL-1.0
//! The per-frame control loop: wait, acquire, record, submit, present, and
//! the side trip through swapchain recreation whenever the chain goes stale.

use ash::vk;
use bitflags::bitflags;
use spintri_render::RenderSize;
use tracing::{debug, trace};

use crate::error::Result;

bitflags! {
    /// Why the presentation chain needs rebuilding. Empty means it does not.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StaleReason: u8 {
        const RESIZED     = 1 << 0;
        const OUT_OF_DATE = 1 << 1;
        const SUBOPTIMAL  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Recreating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; the image was still queued if possible.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    Recreated { extent: vk::Extent2D },
}

/// Device-side steps of a frame, in the order [`FrameSynchronizer`] calls them.
pub trait FrameBackend {
    /// Blocks until the previous frame's fence signals.
    fn wait_for_frame(&mut self) -> Result<()>;
    fn acquire_image(&mut self) -> Result<AcquireOutcome>;
    fn reset_frame_fence(&mut self) -> Result<()>;
    /// Per-frame CPU writes, then command recording targeting `image_index`.
    fn record(&mut self, image_index: u32) -> Result<()>;
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;
    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<vk::Extent2D>;
    /// Replaces the "image acquired" semaphore after a rebuild.
    fn renew_acquire_semaphore(&mut self) -> Result<()>;
}

/// Drives one frame slot through [`FrameBackend`]. At most one frame is
/// ever in flight: every iteration starts by waiting on the previous one.
pub struct FrameSynchronizer<B: FrameBackend> {
    backend: B,
    state: FrameState,
    stale: StaleReason,
    requested: RenderSize,
}

impl<B: FrameBackend> FrameSynchronizer<B> {
    pub fn new(backend: B, size: RenderSize) -> Self {
        Self {
            backend,
            state: FrameState::Idle,
            stale: StaleReason::empty(),
            requested: size,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stale(&self) -> StaleReason {
        self.stale
    }

    pub fn is_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    pub fn requested_size(&self) -> RenderSize {
        self.requested
    }

    /// Records a new window size. Returns whether the chain was marked stale.
    pub fn request_resize(&mut self, size: RenderSize) -> bool {
        if size.is_empty() {
            debug!("ignoring 0x0 resize");
            return false;
        }
        if size == self.requested {
            return false;
        }
        debug!(
            "resize {}x{} -> {}x{}",
            self.requested.width, self.requested.height, size.width, size.height
        );
        self.requested = size;
        self.mark_stale(StaleReason::RESIZED);
        true
    }

    pub fn mark_stale(&mut self, reason: StaleReason) {
        self.stale |= reason;
    }

    fn enter(&mut self, next: FrameState) {
        trace!("frame {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn run_frame(&mut self) -> Result<FrameOutcome> {
        self.enter(FrameState::Idle);
        self.backend.wait_for_frame()?;
        if self.is_stale() {
            return self.recreate();
        }

        self.enter(FrameState::Acquiring);
        let image_index = match self.backend.acquire_image()? {
            AcquireOutcome::OutOfDate => {
                // The fence stays signaled so the next wait does not hang.
                self.mark_stale(StaleReason::OUT_OF_DATE);
                return self.recreate();
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    self.mark_stale(StaleReason::SUBOPTIMAL);
                }
                image_index
            }
        };
        self.backend.reset_frame_fence()?;

        self.enter(FrameState::Recording);
        self.backend.record(image_index)?;

        self.enter(FrameState::Submitted);
        self.backend.submit()?;

        self.enter(FrameState::Presenting);
        if self.backend.present(image_index)? == PresentOutcome::Stale {
            self.mark_stale(StaleReason::OUT_OF_DATE);
        }

        self.enter(FrameState::Idle);
        Ok(FrameOutcome::Presented { image_index })
    }

    fn recreate(&mut self) -> Result<FrameOutcome> {
        self.enter(FrameState::Recreating);
        debug!("recreating swapchain ({:?})", self.stale);
        let extent = self
            .backend
            .recreate_swapchain(self.requested)
            .map_err(|e| e.into_recreate())?;
        self.backend
            .renew_acquire_semaphore()
            .map_err(|e| e.into_recreate())?;
        self.stale = StaleReason::empty();
        self.enter(FrameState::Idle);
        Ok(FrameOutcome::Recreated { extent })
    }
}
