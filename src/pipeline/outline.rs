//! Selection outlines.
//!
//! Outlined objects are first drawn into the stencil buffer only. A single
//! full-screen pass then draws the outline wherever a marked pixel has an
//! unmarked neighbour.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use super::{PipelineContext, TransformConstants, ROOT_CAMERA, ROOT_OBJECT, ROOT_TRANSFORM};
use crate::backend::{CommandList, ResourceId, ResourceState};
use crate::render_graph::OutlineRenderCommand;

/// Stencil bit written by the marker pipeline.
pub const OUTLINE_STENCIL_BIT: u32 = 1 << 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OutlineDrawerConstants {
    pub color: Vec4,
    pub stencil_bit: u32,
    pub width: u32,
    pub _padding: [u32; 2],
}

impl Default for OutlineDrawerConstants {
    fn default() -> Self {
        Self {
            color: Vec4::new(1.0, 0.6, 0.0, 1.0),
            stencil_bit: OUTLINE_STENCIL_BIT,
            width: 2,
            _padding: [0; 2],
        }
    }
}

/// State the depth-stencil is in while the drawer samples it.
pub const OUTLINE_DEPTH_SAMPLE_STATE: ResourceState =
    ResourceState::PIXEL_SHADER_RESOURCE.union(ResourceState::DEPTH_READ);

/// Mark and draw outlines. Returns the number of marked objects.
///
/// `depth_stencil` must be in `DEPTH_WRITE` and is left in it.
pub fn record_outlines(
    cl: &mut CommandList,
    ctx: &PipelineContext<'_>,
    outlines: &[OutlineRenderCommand],
    color_target: ResourceId,
    depth_stencil: ResourceId,
) -> usize {
    if outlines.is_empty() {
        return 0;
    }
    let builtin = ctx.library.builtin();

    cl.begin_event("Outlines");
    cl.set_render_targets(&[color_target], Some(depth_stencil));

    cl.set_pipeline(builtin.outline_marker);
    cl.set_constants(ROOT_CAMERA, ctx.camera);
    for outline in outlines {
        cl.set_constants(
            ROOT_TRANSFORM,
            &TransformConstants::new(ctx.camera, outline.transform),
        );
        outline.geometry.draw(cl);
    }

    // The drawer reads the stencil while it stays attached for testing.
    cl.barriers().transition(
        &depth_stencil,
        ResourceState::DEPTH_WRITE,
        OUTLINE_DEPTH_SAMPLE_STATE,
    );
    cl.set_render_targets(&[color_target], Some(depth_stencil));
    cl.set_pipeline(builtin.outline_drawer);
    cl.bind_resource(0, depth_stencil);
    cl.set_constants(ROOT_OBJECT, &OutlineDrawerConstants::default());
    cl.draw(3, 1);
    cl.barriers().transition(
        &depth_stencil,
        OUTLINE_DEPTH_SAMPLE_STATE,
        ResourceState::DEPTH_WRITE,
    );
    cl.end_event();

    outlines.len()
}
