// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Monotonic time since the renderer started; drives the spin angle.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    start: Instant,
}

impl FrameClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }
}

/// Counts rendered frames and yields a rate once per `window`.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window: Duration,
    last: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(Instant::now(), window)
    }

    pub fn starting_at(now: Instant, window: Duration) -> Self {
        Self {
            frames: 0,
            window,
            last: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames counted so far in the current window.
    pub fn pending(&self) -> u32 {
        self.frames
    }

    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.last = now;
    }

    /// Returns the frames counted in the window that just closed, if it has.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.last) < self.window {
            return None;
        }
        let frames = self.frames;
        self.reset(now);
        Some(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reports_once_per_window() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::starting_at(t0, Duration::from_secs(1));
        for _ in 0..42 {
            fps.frame();
        }
        assert_eq!(fps.tick(t0 + Duration::from_millis(500)), None);
        assert_eq!(fps.pending(), 42);
        assert_eq!(fps.tick(t0 + Duration::from_secs(1)), Some(42));
        assert_eq!(fps.pending(), 0);
        assert_eq!(fps.tick(t0 + Duration::from_millis(1500)), None);
    }

    #[test]
    fn reset_discards_frames() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::starting_at(t0, Duration::from_secs(1));
        fps.frame();
        fps.reset(t0);
        assert_eq!(fps.tick(t0 + Duration::from_secs(2)), Some(0));
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = FrameClock::start();
        let a = clock.elapsed();
        let b = clock.elapsed();
        assert!(b >= a);
    }
}
