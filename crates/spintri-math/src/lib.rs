// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::f32::consts::TAU;

/// Uniform block consumed by the vertex shader (`set = 0, binding = 0`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SpinUniform {
    pub model: [[f32; 4]; 4],
}

impl SpinUniform {
    pub fn identity() -> Self {
        Self::from_mat(Mat4::IDENTITY)
    }

    /// Rotation about the view axis by `radians`.
    pub fn at_angle(radians: f32) -> Self {
        Self::from_mat(Mat4::from_rotation_z(radians))
    }

    pub fn from_mat(m: Mat4) -> Self {
        Self {
            model: m.to_cols_array_2d(),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

/// Angle after `elapsed_secs` at `speed` radians per second, wrapped to `[0, TAU)`.
pub fn spin_angle(elapsed_secs: f32, speed: f32) -> f32 {
    (elapsed_secs * speed).rem_euclid(TAU)
}
