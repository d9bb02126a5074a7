//! Post-tonemapping draws: LDR geometry, overlays and selection outlines.

use glam::Mat4;

use crate::pipeline::{DrawPipeline, PipelineId};
use crate::render_graph::{
    DefaultRenderCommand, MeshGeometry, OutlineRenderCommand, SortedCommandBuffer,
};

/// Draws that happen after tonemapping.
///
/// Outlines are not sorted: they are all drawn with the same stencil-marking
/// pipeline, and a single full-screen pass afterwards turns the marked
/// stencil bit into an outline.
#[derive(Debug, Default)]
pub struct LdrRenderPass {
    ldr_pass: SortedCommandBuffer<u64>,
    overlays: SortedCommandBuffer<u64>,
    outlines: Vec<OutlineRenderCommand>,
}

impl LdrRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth-tested LDR geometry (gizmos, debug meshes).
    pub fn render_object<P, M>(&mut self, transform: Mat4, geometry: &MeshGeometry, material: M)
    where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        self.ldr_pass.push_back::<P, _>(
            PipelineId::of::<P>().raw(),
            DefaultRenderCommand {
                transform,
                geometry: geometry.clone(),
                material,
            },
        );
    }

    /// Geometry drawn on top of everything, without depth test.
    pub fn render_overlay<P, M>(&mut self, transform: Mat4, geometry: &MeshGeometry, material: M)
    where
        P: DrawPipeline<DefaultRenderCommand<M>>,
        M: Send + Sync + 'static,
    {
        self.overlays.push_back::<P, _>(
            PipelineId::of::<P>().raw(),
            DefaultRenderCommand {
                transform,
                geometry: geometry.clone(),
                material,
            },
        );
    }

    /// Mark an object for the selection outline.
    pub fn render_outline(&mut self, transform: Mat4, geometry: &MeshGeometry) {
        self.outlines.push(OutlineRenderCommand {
            transform,
            geometry: geometry.clone(),
        });
    }

    pub fn reset(&mut self) {
        self.ldr_pass.clear();
        self.overlays.clear();
        self.outlines.clear();
    }

    pub fn sort(&mut self) {
        self.ldr_pass.sort();
        self.overlays.sort();
    }

    pub fn ldr_pass(&self) -> &SortedCommandBuffer<u64> {
        &self.ldr_pass
    }

    pub fn overlays(&self) -> &SortedCommandBuffer<u64> {
        &self.overlays
    }

    pub fn outlines(&self) -> &[OutlineRenderCommand] {
        &self.outlines
    }

    pub fn is_empty(&self) -> bool {
        self.ldr_pass.is_empty() && self.overlays.is_empty() && self.outlines.is_empty()
    }
}
