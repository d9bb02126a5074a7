//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Perspective projection with a `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Same projection for a viewport of `width` x `height` pixels.
    pub fn with_aspect(self, width: u32, height: u32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            ..self
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    pub fn near(&self) -> f32 {
        self.projection.near
    }

    pub fn far(&self) -> f32 {
        self.projection.far
    }

    /// Distance of a world-space point along the viewing direction.
    pub fn view_depth(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.forward())
    }

    /// Build camera uniform data for shaders.
    ///
    /// The projection aspect always follows the `width` x `height` viewport.
    pub fn uniform_data(&self, width: u32, height: u32) -> CameraUniformData {
        let view = self.view_matrix();
        let proj = self.projection.with_aspect(width, height).matrix();
        let view_proj = proj * view;

        CameraUniformData {
            view,
            proj,
            view_proj,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            inv_view_proj: view_proj.inverse(),
            position: self.position.extend(1.0),
            forward: self.forward().extend(0.0),
            near_far: Vec4::new(self.near(), self.far(), width as f32, height as f32),
        }
    }
}

/// Camera uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub position: Vec4, // w unused
    pub forward: Vec4,  // w unused
    /// x = near, y = far, z = screen width, w = screen height
    pub near_far: Vec4,
}

impl CameraUniformData {
    /// Unproject a pixel position at normalized depth `z` (0 = near plane,
    /// 1 = far plane) to world space.
    pub fn unproject(&self, pixel_x: f32, pixel_y: f32, z: f32) -> Vec3 {
        let ndc_x = pixel_x / self.near_far.z * 2.0 - 1.0;
        let ndc_y = 1.0 - pixel_y / self.near_far.w * 2.0;
        let p = self.inv_view_proj * Vec4::new(ndc_x, ndc_y, z, 1.0);
        p.xyz() / p.w
    }

    pub fn view_depth(&self, point: Vec3) -> f32 {
        (point - self.position.xyz()).dot(self.forward.xyz())
    }
}

/// Plane through three points, normal oriented by the winding `a, b, c`.
pub fn plane_from_points(a: Vec3, b: Vec3, c: Vec3) -> Vec4 {
    let n = (b - a).cross(c - a).normalize_or_zero();
    n.extend(-n.dot(a))
}
