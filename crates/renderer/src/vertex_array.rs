use wgpu::util::DeviceExt;

use crate::IndexDatatype;

/// Interleaved vertex buffer layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexLayout {
    pub fn buffer_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

#[derive(Debug)]
pub struct IndexBuffer {
    buffer: wgpu::Buffer,
    datatype: IndexDatatype,
    count: u32,
}

impl IndexBuffer {
    pub fn datatype(&self) -> IndexDatatype {
        self.datatype
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[derive(Debug)]
pub struct VertexArray {
    vertex_buffer: wgpu::Buffer,
    layout: VertexLayout,
    vertex_count: u32,
    index_buffer: Option<IndexBuffer>,
}

impl VertexArray {
    /// Uploads `vertices` and, when given, `indices` packed at the narrowest width the vertex count
    /// allows.
    pub fn new<V: bytemuck::Pod>(
        device: &wgpu::Device,
        label: &str,
        vertices: &[V],
        layout: VertexLayout,
        indices: Option<&[u32]>,
    ) -> Self {
        assert_eq!(
            std::mem::size_of::<V>() as u64,
            layout.stride,
            "vertex array {label} stride does not match its vertex type"
        );
        let vertex_count = u32::try_from(vertices.len())
            .unwrap_or_else(|_| panic!("vertex array {label} exceeds u32 vertices"));
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}.vertices")),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let index_buffer = indices.map(|indices| {
            if let Some(&out_of_range) = indices.iter().find(|&&index| index >= vertex_count) {
                panic!("vertex array {label} index {out_of_range} out of range for {vertex_count} vertices");
            }
            let datatype = IndexDatatype::for_vertex_count(vertices.len());
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}.indices")),
                contents: &datatype.encode(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            IndexBuffer {
                buffer,
                datatype,
                count: u32::try_from(indices.len())
                    .unwrap_or_else(|_| panic!("vertex array {label} exceeds u32 indices")),
            }
        });
        Self {
            vertex_buffer,
            layout,
            vertex_count,
            index_buffer,
        }
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_buffer(&self) -> Option<&IndexBuffer> {
        self.index_buffer.as_ref()
    }

    pub fn number_of_indices(&self) -> Option<u32> {
        self.index_buffer.as_ref().map(IndexBuffer::count)
    }

    /// Replaces every vertex in place; the count and stride must not change.
    pub fn write_vertices<V: bytemuck::Pod>(&self, queue: &wgpu::Queue, vertices: &[V]) {
        assert_eq!(
            std::mem::size_of::<V>() as u64,
            self.layout.stride,
            "vertex write stride does not match the array layout"
        );
        assert_eq!(
            vertices.len(),
            self.vertex_count as usize,
            "vertex write must replace all {} vertices",
            self.vertex_count
        );
        queue.write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(vertices));
    }

    pub(crate) fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }
}

/// Position and texture coordinate of a screen-filling quad corner.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewportQuadVertex {
    pub position: [f32; 2],
    pub st: [f32; 2],
}

/// Texture coordinates put (0, 0) at the top-left texel.
pub const VIEWPORT_QUAD_VERTICES: [ViewportQuadVertex; 4] = [
    ViewportQuadVertex {
        position: [-1.0, -1.0],
        st: [0.0, 1.0],
    },
    ViewportQuadVertex {
        position: [1.0, -1.0],
        st: [1.0, 1.0],
    },
    ViewportQuadVertex {
        position: [1.0, 1.0],
        st: [1.0, 0.0],
    },
    ViewportQuadVertex {
        position: [-1.0, 1.0],
        st: [0.0, 0.0],
    },
];

pub const VIEWPORT_QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

pub fn viewport_quad_layout() -> VertexLayout {
    VertexLayout {
        stride: std::mem::size_of::<ViewportQuadVertex>() as u64,
        attributes: wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2].to_vec(),
    }
}
