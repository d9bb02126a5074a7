//! Light and decal records as uploaded to the GPU.
//!
//! Lights and decals are produced by the scene every frame; the frame graph
//! only uploads them, culls them into screen tiles and assigns shadow map
//! space to the ones that cast shadows.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use static_assertions::const_assert_eq;

/// Maximum number of sun shadow cascades.
pub const MAX_SUN_SHADOW_CASCADES: usize = 4;

/// Point light as seen by shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub radiance: Vec3,
    /// Index into the shadow info buffer, -1 if the light casts no shadow.
    pub shadow_info_index: i32,
}

const_assert_eq!(std::mem::size_of::<PointLight>(), 32);

impl PointLight {
    pub fn new(position: Vec3, radiance: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            radiance,
            shadow_info_index: -1,
        }
    }

    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        (self.position, self.radius)
    }

    /// Hash of everything that invalidates cached static shadows.
    pub fn movement_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hash_pod(&mut hasher, &self.position);
        hash_pod(&mut hasher, &self.radius);
        hasher.finish()
    }
}

/// Spot light as seen by shaders. Cutoffs are cosines of the cone angles.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SpotLight {
    pub position: Vec3,
    pub max_distance: f32,
    pub direction: Vec3,
    pub outer_cutoff: f32,
    pub radiance: Vec3,
    pub inner_cutoff: f32,
    pub shadow_info_index: i32,
    pub _padding: [u32; 3],
}

const_assert_eq!(std::mem::size_of::<SpotLight>(), 64);

impl SpotLight {
    /// `inner_angle` and `outer_angle` are half angles in radians.
    pub fn new(
        position: Vec3,
        direction: Vec3,
        radiance: Vec3,
        inner_angle: f32,
        outer_angle: f32,
        max_distance: f32,
    ) -> Self {
        Self {
            position,
            max_distance,
            direction: direction.normalize(),
            outer_cutoff: outer_angle.cos(),
            radiance,
            inner_cutoff: inner_angle.cos(),
            shadow_info_index: -1,
            _padding: [0; 3],
        }
    }

    /// Smallest sphere around the light cone.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let cos = self.outer_cutoff.clamp(1e-4, 1.0);
        let length = self.max_distance;
        if cos < std::f32::consts::FRAC_1_SQRT_2 {
            // Wide cone: the sphere around the cap disc contains the apex.
            let sin = (1.0 - cos * cos).sqrt();
            (self.position + self.direction * (cos * length), sin * length)
        } else {
            let radius = length / (2.0 * cos);
            (self.position + self.direction * radius, radius)
        }
    }

    /// View-projection of the shadow map covering the light cone.
    pub fn view_projection(&self) -> Mat4 {
        let up = if self.direction.y.abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(self.position, self.direction, up);
        let fov = 2.0 * self.outer_cutoff.clamp(-1.0, 1.0).acos();
        let proj = Mat4::perspective_rh(fov.max(1e-3), 1.0, 0.01, self.max_distance.max(0.02));
        proj * view
    }

    pub fn movement_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        hash_pod(&mut hasher, &self.direction);
        hash_pod(&mut hasher, &self.position);
        hash_pod(&mut hasher, &self.outer_cutoff);
        hash_pod(&mut hasher, &self.max_distance);
        hasher.finish()
    }
}

/// Projected decal box: a center and three half-extent axes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Decal {
    pub position: Vec3,
    pub albedo_tint: u32,
    pub right: Vec3,
    pub roughness_override: f32,
    pub up: Vec3,
    pub metallic_override: f32,
    pub forward: Vec3,
    pub texture_index: u32,
}

const_assert_eq!(std::mem::size_of::<Decal>(), 64);

impl Decal {
    pub fn new(position: Vec3, right: Vec3, up: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            albedo_tint: 0xFFFF_FFFF,
            right,
            roughness_override: -1.0,
            up,
            metallic_override: -1.0,
            forward,
            texture_index: 0,
        }
    }

    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let radius = (self.right.length_squared()
            + self.up.length_squared()
            + self.forward.length_squared())
        .sqrt();
        (self.position, radius)
    }
}

/// Sun light with cascaded shadows.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub num_shadow_cascades: u32,
    pub cascade_view_projections: [Mat4; MAX_SUN_SHADOW_CASCADES],
    /// Side length of one cascade's shadow map region, in texels.
    pub shadow_dimensions: u32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            num_shadow_cascades: 3,
            cascade_view_projections: [Mat4::IDENTITY; MAX_SUN_SHADOW_CASCADES],
            shadow_dimensions: 2048,
        }
    }
}

impl DirectionalLight {
    /// Hash over the view-projections of the active cascades. Call after the
    /// cascade matrices have been computed for the frame.
    pub fn movement_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for vp in self.active_cascades() {
            hash_pod(&mut hasher, vp);
        }
        hasher.finish()
    }

    pub fn active_cascades(&self) -> &[Mat4] {
        let count = (self.num_shadow_cascades as usize).min(MAX_SUN_SHADOW_CASCADES);
        &self.cascade_view_projections[..count]
    }
}

fn hash_pod<T: Pod>(hasher: &mut impl Hasher, value: &T) {
    hasher.write(bytemuck::bytes_of(value));
}
