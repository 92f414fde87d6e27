// SPDX-License-Identifier: CEPL-1.0
//! Pipeline objects and shaders for the spinning triangle.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod spin;
pub mod vertex;

pub use spin::SpinRecipe;
pub use vertex::{Vertex, TRIANGLE};
