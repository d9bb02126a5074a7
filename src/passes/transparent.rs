//! Alpha blended geometry, drawn back to front.

use glam::Mat4;

use super::PassView;
use crate::pipeline::DrawPipeline;
use crate::render_graph::{DefaultRenderCommand, MeshGeometry, SortedCommandBuffer};
use crate::scene::Camera;

/// Transparent draws of one frame, keyed by negated view depth so that
/// sorting ascending yields back-to-front order.
#[derive(Debug, Default)]
pub struct TransparentRenderPass {
    view: PassView,
    pass: SortedCommandBuffer<f32>,
}

impl TransparentRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_view(&mut self, camera: &Camera) {
        self.view = PassView::from_camera(camera);
    }

    /// Submit a draw; its depth is the view depth of the transform's origin.
    pub fn render_object<P, M>(&mut self, transform: Mat4, geometry: &MeshGeometry, material: M)
    where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        let depth = self.view.depth(&transform);
        self.render_object_at_depth::<P, _>(
            depth,
            DefaultRenderCommand {
                transform,
                geometry: geometry.clone(),
                material,
            },
        );
    }

    /// Submit a custom record at an explicit view depth (particles, volumes).
    pub fn render_object_at_depth<P, C>(&mut self, depth: f32, command: C) -> &mut C
    where
        P: DrawPipeline<C>,
        C: Send + Sync + 'static,
    {
        self.pass.push_back::<P, C>(-depth, command)
    }

    pub fn reset(&mut self) {
        self.pass.clear();
    }

    pub fn sort(&mut self) {
        self.pass.sort();
    }

    pub fn pass(&self) -> &SortedCommandBuffer<f32> {
        &self.pass
    }

    pub fn is_empty(&self) -> bool {
        self.pass.is_empty()
    }
}
