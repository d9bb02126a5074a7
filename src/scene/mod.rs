//! Scene-side inputs of the frame graph: the camera and the per-frame light
//! records.

mod camera;
mod light;

pub use camera::*;
pub use light::*;
