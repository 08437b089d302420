//! Mesh data and GPU upload

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3};

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, IndexFormat, Vertex,
};
use crate::error::RenderResult;
use crate::scene::Aabb;

/// CPU-side triangle list
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Object-space bounds of the vertices
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| v.position))
    }

    /// Append a quad spanned by `u` and `v` around `center`, facing `normal`.
    fn push_quad(&mut self, center: Vec3, u: Vec3, v: Vec3, normal: Vec3) {
        let base = self.vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            self.vertices.push(Vertex {
                position: center + u * su + v * sv,
                normal,
                uv: Vec2::new((su + 1.0) * 0.5, (1.0 - sv) * 0.5),
                tangent: u.normalize().extend(1.0),
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Axis-aligned cube with edge length `size`, centered at the origin
    pub fn cube(size: f32) -> Self {
        let mut mesh = Mesh::new("cube");
        let h = size * 0.5;
        // (normal, u axis); v = normal x u keeps every face counter-clockwise from outside
        let faces = [
            (Vec3::Z, Vec3::X),
            (Vec3::NEG_Z, Vec3::NEG_X),
            (Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (Vec3::NEG_Y, Vec3::X),
        ];
        for (normal, u) in faces {
            let v = normal.cross(u);
            mesh.push_quad(normal * h, u * h, v * h, normal);
        }
        mesh
    }

    /// Plane in the XZ plane facing +Y
    pub fn plane(width: f32, depth: f32) -> Self {
        let mut mesh = Mesh::new("plane");
        mesh.push_quad(
            Vec3::ZERO,
            Vec3::X * (width * 0.5),
            Vec3::NEG_Z * (depth * 0.5),
            Vec3::Y,
        );
        mesh
    }

    /// UV sphere of the given radius
    pub fn sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = ring as f32 / rings as f32 * PI;
            for segment in 0..=segments {
                let theta = segment as f32 / segments as f32 * TAU;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                mesh.vertices.push(Vertex {
                    position: normal * radius,
                    normal,
                    uv: Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32),
                    tangent: Vec3::new(-theta.sin(), 0.0, theta.cos()).extend(1.0),
                });
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                mesh.indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        mesh
    }
}

/// Mesh uploaded to vertex and index buffers
#[derive(Debug, Clone)]
pub struct GpuMesh {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
    bounds: Aabb,
}

impl GpuMesh {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &Mesh) -> RenderResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", mesh.name)),
                size: (mesh.vertices.len() * std::mem::size_of::<Vertex>()) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Indices", mesh.name)),
                size: (mesh.indices.len() * std::mem::size_of::<u32>()) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&mesh.indices),
        )?;
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            mesh.name,
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            bounds: mesh.bounds(),
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Bind the vertex and index buffers.
    pub fn bind<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_vertex_buffer(0, self.vertex_buffer, 0);
        backend.set_index_buffer(self.index_buffer, 0, IndexFormat::Uint32);
    }
}
