// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

/// Red top, green bottom right, blue bottom left. Clip space has +y pointing
/// down, so the apex sits at negative y.
pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.6],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.6, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.6, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(Vertex::binding().stride, 20);
        let attrs = Vertex::attributes();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 8);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&TRIANGLE).len(), 60);
    }

    #[test]
    fn triangle_is_not_degenerate() {
        let [a, b, c] = TRIANGLE.map(|v| v.pos);
        let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
        assert!(cross.abs() > 0.1, "{cross}");
        assert!(TRIANGLE.iter().all(|v| v.pos.iter().all(|p| p.abs() <= 1.0)));
    }
}
