use ash::vk;
use glam::Vec2;
use gpu_allocator::MemoryLocation;

use crate::{error::SampleError, graphics};

pub const QUAD_POSITIONS: [Vec2; 4] = [
    Vec2::new(-1.0, -1.0),
    Vec2::new(1.0, -1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(-1.0, 1.0),
];

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    IndexOutOfRange { position: usize, index: u32, vertex_count: usize },
    NotTriangles(usize),
    VertexBufferSize { size: u64, stride: u32 },
}

impl std::error::Error for GeometryError {}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::IndexOutOfRange {
                position,
                index,
                vertex_count,
            } => write!(f, "index {index} at position {position} is out of range for {vertex_count} vertices"),
            GeometryError::NotTriangles(len) => write!(f, "{len} indices do not form whole triangles"),
            GeometryError::VertexBufferSize { size, stride } => {
                write!(f, "vertex buffer of {size} bytes does not hold whole vertices of {stride} bytes")
            }
        }
    }
}

/// Indexed triangle list in 2D.
#[derive(Debug, Clone, Copy)]
pub struct VertexGeometry<'a> {
    pub positions: &'a [Vec2],
    pub indices: &'a [u32],
}

impl VertexGeometry<'static> {
    pub const QUAD: Self = Self {
        positions: &QUAD_POSITIONS,
        indices: &QUAD_INDICES,
    };
}

impl<'a> VertexGeometry<'a> {
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.indices.len() % 3 != 0 {
            return Err(GeometryError::NotTriangles(self.indices.len()));
        }

        let vertex_count = self.positions.len();
        match self.indices.iter().position(|&index| index as usize >= vertex_count) {
            Some(position) => Err(GeometryError::IndexOutOfRange {
                position,
                index: self.indices[position],
                vertex_count,
            }),
            None => Ok(()),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
impl<'a> VertexGeometry<'a> {
    pub fn triangles(&self) -> impl Iterator<Item = [Vec2; 3]> + 'a {
        let positions = self.positions;
        self.indices
            .chunks_exact(3)
            .map(move |tri| [positions[tri[0] as usize], positions[tri[1] as usize], positions[tri[2] as usize]])
    }

    /// Triangles drawn by `index_count` indices starting at `first_index`,
    /// each index offset by `base_vertex`.
    pub fn triangles_in(&self, first_index: u32, index_count: u32, base_vertex: i32) -> Option<Vec<[Vec2; 3]>> {
        let start = first_index as usize;
        let indices = self.indices.get(start..start + index_count as usize)?;

        indices
            .chunks_exact(3)
            .map(|tri| {
                let mut corners = [Vec2::ZERO; 3];
                for (corner, &index) in corners.iter_mut().zip(tri) {
                    let vertex = usize::try_from(index as i64 + base_vertex as i64).ok()?;
                    *corner = *self.positions.get(vertex)?;
                }
                Some(corners)
            })
            .collect()
    }
}

/// Vertex buffer and index buffer holding one [`VertexGeometry`].
#[derive(Debug)]
pub struct GeometryBuffers {
    pub vertex_buffer: graphics::Buffer,
    pub index_buffer: graphics::Buffer,
    pub index_count: u32,
}

impl GeometryBuffers {
    pub fn create(context: &graphics::Context, name: &str, geometry: &VertexGeometry) -> Result<Self, SampleError> {
        geometry.validate()?;

        let vertex_buffer = context.create_buffer_init(
            format!("{name}_vertex_buffer"),
            &graphics::BufferDesc {
                size: std::mem::size_of_val(geometry.positions),
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                memory_location: MemoryLocation::GpuOnly,
            },
            bytemuck::cast_slice(geometry.positions),
        )?;

        let index_buffer = context.create_buffer_init(
            format!("{name}_index_buffer"),
            &graphics::BufferDesc {
                size: std::mem::size_of_val(geometry.indices),
                usage: vk::BufferUsageFlags::INDEX_BUFFER,
                memory_location: MemoryLocation::GpuOnly,
            },
            bytemuck::cast_slice(geometry.indices),
        );

        let index_buffer = match index_buffer {
            Ok(buffer) => buffer,
            Err(err) => {
                context.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: geometry.index_count(),
        })
    }

    pub fn destroy(self, context: &graphics::Context) {
        context.destroy_buffer(self.vertex_buffer);
        context.destroy_buffer(self.index_buffer);
    }
}

/// Vertex input state for tightly packed `vec2` positions at location 0,
/// checked against the buffers it reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexArray {
    pub vertex_count: u32,
    pub index_count: u32,
}

impl VertexArray {
    pub const POSITION_LOCATION: u32 = 0;
    pub const STRIDE: u32 = std::mem::size_of::<Vec2>() as u32;

    pub const BINDINGS: [vk::VertexInputBindingDescription; 1] = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: Self::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }];

    pub const ATTRIBUTES: [vk::VertexInputAttributeDescription; 1] = [vk::VertexInputAttributeDescription {
        location: Self::POSITION_LOCATION,
        binding: 0,
        format: vk::Format::R32G32_SFLOAT,
        offset: 0,
    }];

    pub fn vertex_input() -> graphics::VertexInput<'static> {
        graphics::VertexInput {
            bindings: &Self::BINDINGS,
            attributes: &Self::ATTRIBUTES,
        }
    }

    pub fn for_buffers(buffers: &GeometryBuffers) -> Result<Self, GeometryError> {
        Self::for_sizes(buffers.vertex_buffer.size(), buffers.index_count)
    }

    pub fn for_sizes(vertex_buffer_size: u64, index_count: u32) -> Result<Self, GeometryError> {
        if vertex_buffer_size == 0 || vertex_buffer_size % Self::STRIDE as u64 != 0 {
            return Err(GeometryError::VertexBufferSize {
                size: vertex_buffer_size,
                stride: Self::STRIDE,
            });
        }

        if index_count % 3 != 0 {
            return Err(GeometryError::NotTriangles(index_count as usize));
        }

        Ok(Self {
            vertex_count: (vertex_buffer_size / Self::STRIDE as u64) as u32,
            index_count,
        })
    }

    /// Binds the vertex buffer and then the index buffer.
    pub fn bind<'r, 'a>(
        &self,
        recorder: &'r graphics::CommandRecorder<'a>,
        buffers: &GeometryBuffers,
    ) -> graphics::IndexedBinding<'r, 'a> {
        recorder
            .bind_vertex_buffer(0, &buffers.vertex_buffer, 0)
            .bind_index_buffer(&buffers.index_buffer, 0, vk::IndexType::UINT32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signed area, positive when counter-clockwise.
    fn triangle_area([a, b, c]: [Vec2; 3]) -> f32 {
        (b - a).perp_dot(c - a) * 0.5
    }

    #[test]
    fn quad_covers_the_unit_square() {
        let quad = VertexGeometry::QUAD;
        quad.validate().unwrap();

        let area: f32 = quad.triangles().map(triangle_area).sum();
        assert_eq!(area, 4.0);
        assert!(quad.triangles().all(|tri| triangle_area(tri) > 0.0));
        assert_eq!(quad.index_count(), 6);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let geometry = VertexGeometry {
            positions: &QUAD_POSITIONS,
            indices: &[0, 1, 4],
        };

        assert_eq!(
            geometry.validate(),
            Err(GeometryError::IndexOutOfRange {
                position: 2,
                index: 4,
                vertex_count: 4
            })
        );
    }

    #[test]
    fn partial_triangle_is_rejected() {
        let geometry = VertexGeometry {
            positions: &QUAD_POSITIONS,
            indices: &[0, 1],
        };

        assert_eq!(geometry.validate(), Err(GeometryError::NotTriangles(2)));
    }

    #[test]
    fn index_ranges_select_triangles() {
        let quad = VertexGeometry::QUAD;
        let all: Vec<_> = quad.triangles().collect();

        assert_eq!(quad.triangles_in(0, 6, 0), Some(all.clone()));
        assert_eq!(quad.triangles_in(3, 3, 0), Some(vec![all[1]]));
        assert_eq!(quad.triangles_in(3, 6, 0), None);
        assert_eq!(quad.triangles_in(0, 3, 4), None);
    }

    #[test]
    fn vertex_array_counts_whole_vertices() {
        assert_eq!(
            VertexArray::for_sizes(32, 6),
            Ok(VertexArray {
                vertex_count: 4,
                index_count: 6
            })
        );
        assert_eq!(
            VertexArray::for_sizes(30, 6),
            Err(GeometryError::VertexBufferSize { size: 30, stride: 8 })
        );
        assert_eq!(VertexArray::for_sizes(32, 4), Err(GeometryError::NotTriangles(4)));
    }

    #[test]
    fn vertex_layout_matches_positions() {
        assert_eq!(VertexArray::BINDINGS[0].stride, 8);
        assert_eq!(VertexArray::ATTRIBUTES[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(bytemuck::cast_slice::<Vec2, u8>(&QUAD_POSITIONS).len(), 32);
    }
}
