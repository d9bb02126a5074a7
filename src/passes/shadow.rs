//! Shadow map passes for sun, spot and point lights.
//!
//! Shadow draws are plain vectors rather than sorted buffers: all of them
//! use the same two shadow pipelines. Every pass keeps static and dynamic
//! draws apart so that static geometry can be served from the static cache.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use static_assertions::const_assert_eq;

use crate::render_graph::{MeshGeometry, ShadowRenderCommand};
use crate::scene::{DirectionalLight, PointLight, SpotLight, MAX_SUN_SHADOW_CASCADES};
use crate::shadow_map::{ShadowLightKey, ShadowMapCache, ShadowMapViewport};

pub const MAX_SPOT_SHADOW_PASSES: usize = 16;
pub const MAX_POINT_SHADOW_PASSES: usize = 16;

/// Depth bias applied when sampling spot light shadows.
pub const SPOT_SHADOW_BIAS: f32 = 0.00002;

/// Static and dynamic draws of one shadow-casting region.
#[derive(Debug, Clone, Default)]
pub struct ShadowRenderPassBase {
    static_pass: Vec<ShadowRenderCommand>,
    dynamic_pass: Vec<ShadowRenderCommand>,
}

impl ShadowRenderPassBase {
    /// Geometry that never moves. Only rendered when the region's static
    /// cache is not available.
    pub fn render_static_object(&mut self, transform: Mat4, geometry: &MeshGeometry) {
        self.static_pass.push(ShadowRenderCommand {
            transform,
            geometry: geometry.clone(),
        });
    }

    /// Geometry rendered every frame.
    pub fn render_dynamic_object(&mut self, transform: Mat4, geometry: &MeshGeometry) {
        self.dynamic_pass.push(ShadowRenderCommand {
            transform,
            geometry: geometry.clone(),
        });
    }

    pub fn static_draws(&self) -> &[ShadowRenderCommand] {
        &self.static_pass
    }

    pub fn dynamic_draws(&self) -> &[ShadowRenderCommand] {
        &self.dynamic_pass
    }

    pub fn reset(&mut self) {
        self.static_pass.clear();
        self.dynamic_pass.clear();
    }
}

/// One cascade of the sun's shadow.
#[derive(Debug, Clone, Default)]
pub struct SunCascadeRenderPass {
    pub base: ShadowRenderPassBase,
    pub view_proj: Mat4,
    pub viewport: ShadowMapViewport,
}

/// Cascaded sun shadow.
///
/// Cascade `i` also renders the draws submitted to cascades `0..i`, so an
/// object only needs to be submitted to the nearest cascade it touches.
#[derive(Debug, Clone, Default)]
pub struct SunShadowRenderPass {
    cascades: [SunCascadeRenderPass; MAX_SUN_SHADOW_CASCADES],
    num_cascades: usize,
    pub copy_from_static_cache: bool,
}

impl SunShadowRenderPass {
    pub fn num_cascades(&self) -> usize {
        self.num_cascades
    }

    pub fn cascades(&self) -> &[SunCascadeRenderPass] {
        &self.cascades[..self.num_cascades]
    }

    /// # Panics
    ///
    /// Panics if `index` is not an active cascade.
    pub fn cascade_mut(&mut self, index: usize) -> &mut SunCascadeRenderPass {
        assert!(
            index < self.num_cascades,
            "Sun shadow cascade {} out of range (active cascades: {})",
            index,
            self.num_cascades
        );
        &mut self.cascades[index]
    }

    pub fn render_static_object(
        &mut self,
        cascade: usize,
        transform: Mat4,
        geometry: &MeshGeometry,
    ) {
        self.cascade_mut(cascade)
            .base
            .render_static_object(transform, geometry);
    }

    pub fn render_dynamic_object(
        &mut self,
        cascade: usize,
        transform: Mat4,
        geometry: &MeshGeometry,
    ) {
        self.cascade_mut(cascade)
            .base
            .render_dynamic_object(transform, geometry);
    }

    pub fn reset(&mut self) {
        for cascade in &mut self.cascades {
            cascade.base.reset();
        }
        self.num_cascades = 0;
        self.copy_from_static_cache = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpotShadowRenderPass {
    pub base: ShadowRenderPassBase,
    pub view_proj: Mat4,
    pub viewport: ShadowMapViewport,
    pub copy_from_static_cache: bool,
}

/// Dual-paraboloid point light shadow: two hemispheres, each with its own
/// region.
#[derive(Debug, Clone, Default)]
pub struct PointShadowRenderPass {
    pub base: ShadowRenderPassBase,
    pub light_position: Vec3,
    pub max_distance: f32,
    pub viewport0: ShadowMapViewport,
    pub viewport1: ShadowMapViewport,
    pub copy_from_static_cache0: bool,
    pub copy_from_static_cache1: bool,
}

impl PointShadowRenderPass {
    /// `(viewport, copy from static cache, paraboloid flip)` per hemisphere.
    pub fn hemispheres(&self) -> [(ShadowMapViewport, bool, f32); 2] {
        [
            (self.viewport0, self.copy_from_static_cache0, 1.0),
            (self.viewport1, self.copy_from_static_cache1, -1.0),
        ]
    }
}

/// Shadow lookup data of a spot light, as read by lit shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SpotShadowInfo {
    pub view_proj: Mat4,
    /// Normalized atlas viewport.
    pub viewport: Vec4,
    pub bias: f32,
    pub _padding: [f32; 3],
}

const_assert_eq!(std::mem::size_of::<SpotShadowInfo>(), 96);

/// Shadow lookup data of a point light.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PointShadowInfo {
    pub viewport0: Vec4,
    pub viewport1: Vec4,
}

const_assert_eq!(std::mem::size_of::<PointShadowInfo>(), 32);

/// All shadow passes of one frame.
///
/// Spot and point passes come from fixed pools so that their draw vectors
/// keep their capacity across frames.
#[derive(Debug, Clone)]
pub struct ShadowPasses {
    sun: SunShadowRenderPass,
    sun_active: bool,
    spot: Vec<SpotShadowRenderPass>,
    num_spot: usize,
    point: Vec<PointShadowRenderPass>,
    num_point: usize,
}

impl Default for ShadowPasses {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowPasses {
    pub fn new() -> Self {
        Self {
            sun: SunShadowRenderPass::default(),
            sun_active: false,
            spot: vec![SpotShadowRenderPass::default(); MAX_SPOT_SHADOW_PASSES],
            num_spot: 0,
            point: vec![PointShadowRenderPass::default(); MAX_POINT_SHADOW_PASSES],
            num_point: 0,
        }
    }

    /// Assign atlas regions to the sun's active cascades and open its pass.
    ///
    /// The cache is only used if every cascade hits it.
    ///
    /// # Panics
    ///
    /// Panics if a sun pass was already added this frame.
    pub fn add_sun_light(
        &mut self,
        cache: &mut ShadowMapCache,
        sun: &DirectionalLight,
        invalidate: bool,
    ) -> &mut SunShadowRenderPass {
        assert!(!self.sun_active, "Only one sun shadow pass per frame is supported");
        self.sun_active = true;

        let movement_hash = sun.movement_hash();
        let cascades = sun.active_cascades();

        let pass = &mut self.sun;
        pass.num_cascades = cascades.len();
        let mut cache_available = !invalidate;
        for (i, view_proj) in cascades.iter().enumerate() {
            let assignment = cache.assign_viewport(
                ShadowLightKey::SunCascade(i as u32),
                movement_hash,
                sun.shadow_dimensions,
            );
            pass.cascades[i].view_proj = *view_proj;
            pass.cascades[i].viewport = assignment.viewport;
            cache_available &= assignment.static_cache_available;
        }
        pass.copy_from_static_cache = cache_available;
        pass
    }

    /// Assign an atlas region to a spot light and open its pass.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_SPOT_SHADOW_PASSES`] are added in a frame.
    pub fn add_spot_light(
        &mut self,
        cache: &mut ShadowMapCache,
        light_id: u32,
        light: &SpotLight,
        resolution: u32,
        invalidate: bool,
    ) -> (&mut SpotShadowRenderPass, SpotShadowInfo) {
        assert!(
            self.num_spot < MAX_SPOT_SHADOW_PASSES,
            "Too many spot light shadow passes (max {})",
            MAX_SPOT_SHADOW_PASSES
        );

        let key = ShadowLightKey::Spot(light_id);
        let assignment = cache.assign_viewport(key, light.movement_hash(), resolution);
        let view_proj = light.view_projection();

        let pass = &mut self.spot[self.num_spot];
        self.num_spot += 1;
        pass.view_proj = view_proj;
        pass.viewport = assignment.viewport;
        pass.copy_from_static_cache = assignment.static_cache_available && !invalidate;

        let info = SpotShadowInfo {
            view_proj,
            viewport: assignment.viewport.uv(cache.atlas().size()),
            bias: SPOT_SHADOW_BIAS,
            _padding: [0.0; 3],
        };
        (pass, info)
    }

    /// Assign two atlas regions to a point light and open its pass.
    ///
    /// Static geometry is drawn into both hemispheres, so either both come
    /// from the cache or neither does.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_POINT_SHADOW_PASSES`] are added in a frame.
    pub fn add_point_light(
        &mut self,
        cache: &mut ShadowMapCache,
        light_id: u32,
        light: &PointLight,
        resolution: u32,
        invalidate: bool,
    ) -> (&mut PointShadowRenderPass, PointShadowInfo) {
        assert!(
            self.num_point < MAX_POINT_SHADOW_PASSES,
            "Too many point light shadow passes (max {})",
            MAX_POINT_SHADOW_PASSES
        );

        let movement_hash = light.movement_hash();
        let first = cache.assign_viewport(
            ShadowLightKey::PointHemisphere {
                light: light_id,
                hemisphere: 0,
            },
            movement_hash,
            resolution,
        );
        let second = cache.assign_viewport(
            ShadowLightKey::PointHemisphere {
                light: light_id,
                hemisphere: 1,
            },
            movement_hash,
            resolution,
        );
        let copy = first.static_cache_available && second.static_cache_available && !invalidate;

        let pass = &mut self.point[self.num_point];
        self.num_point += 1;
        pass.light_position = light.position;
        pass.max_distance = light.radius;
        pass.viewport0 = first.viewport;
        pass.viewport1 = second.viewport;
        pass.copy_from_static_cache0 = copy;
        pass.copy_from_static_cache1 = copy;

        let atlas_size = cache.atlas().size();
        let info = PointShadowInfo {
            viewport0: first.viewport.uv(atlas_size),
            viewport1: second.viewport.uv(atlas_size),
        };
        (pass, info)
    }

    pub fn sun(&self) -> Option<&SunShadowRenderPass> {
        self.sun_active.then_some(&self.sun)
    }

    pub fn spot(&self) -> &[SpotShadowRenderPass] {
        &self.spot[..self.num_spot]
    }

    pub fn point(&self) -> &[PointShadowRenderPass] {
        &self.point[..self.num_point]
    }

    pub fn is_empty(&self) -> bool {
        !self.sun_active && self.num_spot == 0 && self.num_point == 0
    }

    pub fn reset(&mut self) {
        self.sun.reset();
        self.sun_active = false;
        for pass in &mut self.spot[..self.num_spot] {
            pass.base.reset();
            pass.copy_from_static_cache = false;
        }
        for pass in &mut self.point[..self.num_point] {
            pass.base.reset();
            pass.copy_from_static_cache0 = false;
            pass.copy_from_static_cache1 = false;
        }
        self.num_spot = 0;
        self.num_point = 0;
    }
}
