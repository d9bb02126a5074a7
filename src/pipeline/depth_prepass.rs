//! Depth prepass pipelines.
//!
//! The prepass writes depth and object ids for static, dynamic and animated
//! geometry. Dynamic and animated geometry additionally output screen-space
//! velocities, which is why they carry last frame's transform (and for
//! skinned meshes last frame's vertices).

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::{DrawPipeline, Pipeline, PipelineContext, ROOT_CAMERA, ROOT_TRANSFORM};
use crate::backend::CommandList;
use crate::render_graph::{
    AnimatedDepthOnlyRenderCommand, DynamicDepthOnlyRenderCommand, StaticDepthOnlyRenderCommand,
};

/// Per-draw constants of the depth-only shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DepthOnlyConstants {
    pub mvp: Mat4,
    pub prev_frame_mvp: Mat4,
    pub object_id: u32,
    pub _padding: [u32; 3],
}

impl DepthOnlyConstants {
    fn new(
        ctx: &PipelineContext<'_>,
        transform: Mat4,
        prev_frame_transform: Mat4,
        object_id: u32,
    ) -> Self {
        Self {
            mvp: ctx.camera.view_proj * transform,
            prev_frame_mvp: ctx.camera.view_proj * prev_frame_transform,
            object_id,
            _padding: [0; 3],
        }
    }
}

/// Depth-only pipeline for static geometry.
pub struct StaticDepthOnlyPipeline;

impl Pipeline for StaticDepthOnlyPipeline {
    fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>) {
        cl.set_pipeline(ctx.library.builtin().depth_only_static);
        cl.set_constants(ROOT_CAMERA, ctx.camera);
    }
}

impl DrawPipeline<StaticDepthOnlyRenderCommand> for StaticDepthOnlyPipeline {
    fn render(cl: &mut CommandList, ctx: &PipelineContext<'_>, rc: &StaticDepthOnlyRenderCommand) {
        let constants = DepthOnlyConstants::new(ctx, rc.transform, rc.transform, rc.object_id);
        cl.set_constants(ROOT_TRANSFORM, &constants);
        rc.geometry.draw(cl);
    }
}

/// Depth-only pipeline for rigidly moving geometry.
pub struct DynamicDepthOnlyPipeline;

impl Pipeline for DynamicDepthOnlyPipeline {
    fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>) {
        cl.set_pipeline(ctx.library.builtin().depth_only_dynamic);
        cl.set_constants(ROOT_CAMERA, ctx.camera);
    }
}

impl DrawPipeline<DynamicDepthOnlyRenderCommand> for DynamicDepthOnlyPipeline {
    fn render(cl: &mut CommandList, ctx: &PipelineContext<'_>, rc: &DynamicDepthOnlyRenderCommand) {
        let constants =
            DepthOnlyConstants::new(ctx, rc.transform, rc.prev_frame_transform, rc.object_id);
        cl.set_constants(ROOT_TRANSFORM, &constants);
        rc.geometry.draw(cl);
    }
}

/// Depth-only pipeline for skinned geometry.
pub struct AnimatedDepthOnlyPipeline;

impl Pipeline for AnimatedDepthOnlyPipeline {
    fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>) {
        cl.set_pipeline(ctx.library.builtin().depth_only_animated);
        cl.set_constants(ROOT_CAMERA, ctx.camera);
    }
}

impl DrawPipeline<AnimatedDepthOnlyRenderCommand> for AnimatedDepthOnlyPipeline {
    fn render(
        cl: &mut CommandList,
        ctx: &PipelineContext<'_>,
        rc: &AnimatedDepthOnlyRenderCommand,
    ) {
        let constants =
            DepthOnlyConstants::new(ctx, rc.transform, rc.prev_frame_transform, rc.object_id);
        cl.set_constants(ROOT_TRANSFORM, &constants);
        cl.set_vertex_buffer(1, rc.prev_frame_vertex_buffer.binding());
        rc.geometry.draw(cl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BufferDescriptor, Command, DummyBackend, IndexFormat, QueueType, RenderBackend,
    };
    use crate::pipeline::{CommonMaterialInfo, PipelineLibrary};
    use crate::render_graph::{IndexBufferView, MeshGeometry, SubmeshInfo, VertexBufferView};
    use crate::scene::Camera;

    #[test]
    fn test_static_depth_only_draw() {
        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        let camera = Camera::default().uniform_data(32, 32);
        let common = CommonMaterialInfo::default();
        let ctx = PipelineContext {
            library: &library,
            camera: &camera,
            common: &common,
        };
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                size: 256,
                ..Default::default()
            })
            .unwrap();
        let rc = StaticDepthOnlyRenderCommand {
            transform: Mat4::IDENTITY,
            geometry: MeshGeometry::new(
                VertexBufferView::whole(buffer.clone(), 32),
                IndexBufferView::whole(buffer, IndexFormat::Uint32),
                SubmeshInfo::new(6, 12, 0, 8),
            ),
            object_id: 9,
        };

        let mut cl = CommandList::new(QueueType::Graphics, "prepass");
        StaticDepthOnlyPipeline::setup(&mut cl, &ctx);
        StaticDepthOnlyPipeline::render(&mut cl, &ctx, &rc);

        assert_eq!(
            cl.commands()[0],
            Command::SetPipeline(library.builtin().depth_only_static)
        );
        assert!(cl.commands().contains(&Command::DrawIndexed {
            index_count: 12,
            instance_count: 1,
            first_index: 6,
            base_vertex: 0,
            first_instance: 0,
        }));
    }
}
