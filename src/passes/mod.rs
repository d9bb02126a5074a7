//! Render pass containers
//!
//! Producers (scene traversal, particle systems, editor gizmos) submit draws
//! into these containers during the frame. At the end of the frame the
//! [`FrameRenderer`](crate::FrameRenderer) sorts them and records them on
//! parallel command lists.
//!
//! | Pass | Storage | Order |
//! |------|---------|-------|
//! | [`OpaqueRenderPass`] | 3 depth-keyed prepass + 1 pipeline-keyed buffer | depth / pipeline |
//! | [`TransparentRenderPass`] | negated-depth-keyed buffer | back to front |
//! | [`LdrRenderPass`] | pipeline-keyed buffers + outline list | by pipeline |
//! | [`ShadowPasses`] | static/dynamic vectors per light | submission order |
//! | [`ComputePass`] | event callbacks per stage | submission order |

mod compute;
mod ldr;
mod opaque;
mod shadow;
mod transparent;

pub use compute::*;
pub use ldr::*;
pub use opaque::*;
pub use shadow::*;
pub use transparent::*;

use glam::{Mat4, Vec3};

use crate::scene::Camera;

/// Camera origin and view direction used to compute sort depths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PassView {
    position: Vec3,
    forward: Vec3,
}

impl Default for PassView {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
        }
    }
}

impl PassView {
    pub(crate) fn from_camera(camera: &Camera) -> Self {
        Self {
            position: camera.position,
            forward: camera.forward(),
        }
    }

    /// View-space depth of the transform's origin.
    pub(crate) fn depth(&self, transform: &Mat4) -> f32 {
        (transform.w_axis.truncate() - self.position).dot(self.forward)
    }
}
