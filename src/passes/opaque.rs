//! Opaque geometry: depth prepass plus main color pass.

use glam::Mat4;

use super::PassView;
use crate::pipeline::{
    AnimatedDepthOnlyPipeline, DrawPipeline, DynamicDepthOnlyPipeline, PipelineId,
    StaticDepthOnlyPipeline,
};
use crate::render_graph::{
    AnimatedDepthOnlyRenderCommand, DefaultRenderCommand, DynamicDepthOnlyRenderCommand,
    MeshGeometry, SortedCommandBuffer, StaticDepthOnlyRenderCommand, VertexBufferView,
};
use crate::scene::Camera;

/// Opaque draws of one frame.
///
/// Every `render_*_object` call inserts twice: a depth-only record keyed by
/// view depth (front to back) into the prepass buffer of its motion class,
/// and a material record keyed by pipeline into the color buffer.
#[derive(Debug, Default)]
pub struct OpaqueRenderPass {
    view: PassView,
    static_depth_prepass: SortedCommandBuffer<f32>,
    dynamic_depth_prepass: SortedCommandBuffer<f32>,
    animated_depth_prepass: SortedCommandBuffer<f32>,
    pass: SortedCommandBuffer<u64>,
}

impl OpaqueRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the camera prepass depths are measured from.
    pub fn set_view(&mut self, camera: &Camera) {
        self.view = PassView::from_camera(camera);
    }

    fn push_color<P, M>(&mut self, transform: Mat4, geometry: &MeshGeometry, material: M)
    where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        self.pass.push_back::<P, _>(
            PipelineId::of::<P>().raw(),
            DefaultRenderCommand {
                transform,
                geometry: geometry.clone(),
                material,
            },
        );
    }

    pub fn render_static_object<P, M>(
        &mut self,
        transform: Mat4,
        geometry: &MeshGeometry,
        material: M,
        object_id: u32,
    ) where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        self.render_static_depth_only(transform, geometry, object_id);
        self.push_color::<P, M>(transform, geometry, material);
    }

    pub fn render_dynamic_object<P, M>(
        &mut self,
        transform: Mat4,
        prev_frame_transform: Mat4,
        geometry: &MeshGeometry,
        material: M,
        object_id: u32,
    ) where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        let depth = self.view.depth(&transform);
        self.dynamic_depth_prepass
            .push_back::<DynamicDepthOnlyPipeline, _>(
                depth,
                DynamicDepthOnlyRenderCommand {
                    transform,
                    prev_frame_transform,
                    geometry: geometry.clone(),
                    object_id,
                },
            );
        self.push_color::<P, M>(transform, geometry, material);
    }

    pub fn render_animated_object<P, M>(
        &mut self,
        transform: Mat4,
        prev_frame_transform: Mat4,
        geometry: &MeshGeometry,
        prev_frame_vertex_buffer: VertexBufferView,
        material: M,
        object_id: u32,
    ) where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        let depth = self.view.depth(&transform);
        self.animated_depth_prepass
            .push_back::<AnimatedDepthOnlyPipeline, _>(
                depth,
                AnimatedDepthOnlyRenderCommand {
                    transform,
                    prev_frame_transform,
                    geometry: geometry.clone(),
                    prev_frame_vertex_buffer,
                    object_id,
                },
            );
        self.push_color::<P, M>(transform, geometry, material);
    }

    /// Static geometry that only contributes to depth (occluders, masked
    /// helpers).
    pub fn render_static_depth_only(
        &mut self,
        transform: Mat4,
        geometry: &MeshGeometry,
        object_id: u32,
    ) {
        let depth = self.view.depth(&transform);
        self.static_depth_prepass
            .push_back::<StaticDepthOnlyPipeline, _>(
                depth,
                StaticDepthOnlyRenderCommand {
                    transform,
                    geometry: geometry.clone(),
                    object_id,
                },
            );
    }

    /// Color-only draw with a custom record type, e.g. terrain or grass that
    /// write their own depth.
    pub fn render_object<P, C>(&mut self, command: C) -> &mut C
    where
        P: DrawPipeline<C>,
        C: Send + Sync + 'static,
    {
        self.pass.push_back::<P, C>(PipelineId::of::<P>().raw(), command)
    }

    pub fn reset(&mut self) {
        self.static_depth_prepass.clear();
        self.dynamic_depth_prepass.clear();
        self.animated_depth_prepass.clear();
        self.pass.clear();
    }

    pub fn sort(&mut self) {
        self.static_depth_prepass.sort();
        self.dynamic_depth_prepass.sort();
        self.animated_depth_prepass.sort();
        self.pass.sort();
    }

    pub fn static_depth_prepass(&self) -> &SortedCommandBuffer<f32> {
        &self.static_depth_prepass
    }

    pub fn dynamic_depth_prepass(&self) -> &SortedCommandBuffer<f32> {
        &self.dynamic_depth_prepass
    }

    pub fn animated_depth_prepass(&self) -> &SortedCommandBuffer<f32> {
        &self.animated_depth_prepass
    }

    pub fn pass(&self) -> &SortedCommandBuffer<u64> {
        &self.pass
    }

    pub fn is_empty(&self) -> bool {
        self.pass.is_empty()
            && self.static_depth_prepass.is_empty()
            && self.dynamic_depth_prepass.is_empty()
            && self.animated_depth_prepass.is_empty()
    }
}
