// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing between the window system and the renderer.
//!
//! winit delivers redraws for many reasons: the one the frame loop asks for
//! after presenting, but also resizes, resumes and exposes, coalesced or not.
//! The gate is signaled only when a frame has been handed to the compositor,
//! and each signal admits exactly one frame. Redraws arriving with no signal
//! outstanding are dropped.

use tracing::trace;

#[derive(Debug)]
pub struct FrameGate {
    ready: bool,
}

impl FrameGate {
    /// The first frame is admitted without waiting for the compositor.
    pub fn open() -> Self {
        Self { ready: true }
    }

    pub fn closed() -> Self {
        Self { ready: false }
    }

    /// The previous frame is finished and the next redraw has been requested.
    pub fn signal(&mut self) {
        if !self.ready {
            trace!("frame gate: ready");
        }
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Consumes the readiness signal; true when a frame may be rendered now.
    pub fn take(&mut self) -> bool {
        std::mem::replace(&mut self.ready, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_signal_admits_one_frame() {
        let mut gate = FrameGate::closed();
        assert!(!gate.take());
        gate.signal();
        gate.signal();
        assert!(gate.take());
        assert!(!gate.take());
    }

    #[test]
    fn open_gate_admits_first_frame() {
        let mut gate = FrameGate::open();
        assert!(gate.is_ready());
        assert!(gate.take());
        assert!(!gate.is_ready());
    }

    #[test]
    fn unsignaled_redraws_are_dropped() {
        let mut gate = FrameGate::open();
        assert!(gate.take());
        let admitted = (0..5).filter(|_| gate.take()).count();
        assert_eq!(admitted, 0);
        gate.signal();
        assert_eq!((0..5).filter(|_| gate.take()).count(), 1);
    }
}
