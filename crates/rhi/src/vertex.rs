//! Vertex layout shared by every mesh.
//!
//! Meshes carry positions only; color and shading come from the material's
//! fragment shader.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Position-only vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
}

impl Vertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: Vec3::new(x, y, z),
        }
    }

    /// Get the vertex input binding description.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: Self::STRIDE as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Get the vertex attribute descriptions.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 1] {
        [vk::VertexInputAttributeDescription {
            binding: 0,
            location: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }]
    }
}

impl From<Vec3> for Vertex {
    fn from(position: Vec3) -> Self {
        Self { position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(Vertex::STRIDE, 12);
        assert_eq!(Vertex::binding_description().stride, 12);
    }

    #[test]
    fn test_vertex_attribute() {
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_vertex_bytes() {
        let vertices = [Vertex::new(1.0, 2.0, 3.0)];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[4..8], &2.0f32.to_ne_bytes());
    }
}
