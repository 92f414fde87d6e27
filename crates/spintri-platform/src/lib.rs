// SPDX-License-Identifier: CEPL-1.0
pub use winit;

pub mod pacing;

pub use pacing::FrameGate;
