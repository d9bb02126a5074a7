//! Draw-call records.
//!
//! Records are plain data created by producers every frame and dropped when
//! the owning pass is reset. They keep their vertex and index buffers alive
//! through shared references but own no other GPU state.

use std::sync::Arc;

use glam::Mat4;

use crate::backend::{Buffer, CommandList, IndexBufferBinding, IndexFormat, VertexBufferBinding};

/// Range of a mesh drawn by one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmeshInfo {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub vertex_count: u32,
}

impl SubmeshInfo {
    pub fn new(first_index: u32, index_count: u32, base_vertex: i32, vertex_count: u32) -> Self {
        Self {
            first_index,
            index_count,
            base_vertex,
            vertex_count,
        }
    }
}

/// View into a vertex buffer.
#[derive(Debug, Clone)]
pub struct VertexBufferView {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

impl VertexBufferView {
    /// View of the whole buffer.
    pub fn whole(buffer: Arc<Buffer>, stride: u32) -> Self {
        let size = buffer.size();
        Self {
            buffer,
            offset: 0,
            size,
            stride,
        }
    }

    pub fn binding(&self) -> VertexBufferBinding {
        VertexBufferBinding {
            buffer: self.buffer.id(),
            offset: self.offset,
            size: self.size,
            stride: self.stride,
        }
    }
}

/// View into an index buffer.
#[derive(Debug, Clone)]
pub struct IndexBufferView {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
    pub size: u64,
    pub format: IndexFormat,
}

impl IndexBufferView {
    pub fn whole(buffer: Arc<Buffer>, format: IndexFormat) -> Self {
        let size = buffer.size();
        Self {
            buffer,
            offset: 0,
            size,
            format,
        }
    }

    pub fn binding(&self) -> IndexBufferBinding {
        IndexBufferBinding {
            buffer: self.buffer.id(),
            offset: self.offset,
            size: self.size,
            format: self.format,
        }
    }
}

/// Vertex buffer, index buffer and submesh of one draw.
#[derive(Debug, Clone)]
pub struct MeshGeometry {
    pub vertex_buffer: VertexBufferView,
    pub index_buffer: IndexBufferView,
    pub submesh: SubmeshInfo,
}

impl MeshGeometry {
    pub fn new(
        vertex_buffer: VertexBufferView,
        index_buffer: IndexBufferView,
        submesh: SubmeshInfo,
    ) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            submesh,
        }
    }

    /// Bind the buffers and issue one indexed draw of the submesh.
    pub fn draw(&self, cl: &mut CommandList) {
        cl.set_vertex_buffer(0, self.vertex_buffer.binding());
        cl.set_index_buffer(self.index_buffer.binding());
        cl.draw_indexed(
            self.submesh.index_count,
            1,
            self.submesh.first_index,
            self.submesh.base_vertex,
            0,
        );
    }
}

/// Main color-pass draw with a pipeline specific material payload.
#[derive(Debug, Clone)]
pub struct DefaultRenderCommand<M> {
    pub transform: Mat4,
    pub geometry: MeshGeometry,
    pub material: M,
}

/// Depth prepass draw of geometry that never moves.
#[derive(Debug, Clone)]
pub struct StaticDepthOnlyRenderCommand {
    pub transform: Mat4,
    pub geometry: MeshGeometry,
    pub object_id: u32,
}

/// Depth prepass draw of rigidly moving geometry. The previous transform is
/// used for screen-space velocities.
#[derive(Debug, Clone)]
pub struct DynamicDepthOnlyRenderCommand {
    pub transform: Mat4,
    pub prev_frame_transform: Mat4,
    pub geometry: MeshGeometry,
    pub object_id: u32,
}

/// Depth prepass draw of skinned geometry. Velocities come from last
/// frame's skinned vertices.
#[derive(Debug, Clone)]
pub struct AnimatedDepthOnlyRenderCommand {
    pub transform: Mat4,
    pub prev_frame_transform: Mat4,
    pub geometry: MeshGeometry,
    pub prev_frame_vertex_buffer: VertexBufferView,
    pub object_id: u32,
}

/// Object marked for the selection outline.
#[derive(Debug, Clone)]
pub struct OutlineRenderCommand {
    pub transform: Mat4,
    pub geometry: MeshGeometry,
}

/// Shadow caster draw.
#[derive(Debug, Clone)]
pub struct ShadowRenderCommand {
    pub transform: Mat4,
    pub geometry: MeshGeometry,
}
