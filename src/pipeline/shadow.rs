//! Shadow map recording with static caching.
//!
//! All shadow regions of a frame are rendered into one atlas in this order:
//!
//! 1. Regions whose static cache is valid are copied from the cache
//!    texture into the atlas.
//! 2. All other regions are cleared.
//! 3. Static geometry is rendered into the cleared regions.
//! 4. The freshly rendered regions are copied into the cache texture.
//! 5. Dynamic geometry is rendered into every region.
//!
//! The cache texture lives in `PIXEL_SHADER_RESOURCE`. Its transition to
//! `DEPTH_WRITE` for step 4 is split around step 3.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use static_assertions::const_assert_eq;

use super::{PipelineLibrary, ROOT_OBJECT, ROOT_TRANSFORM};
use crate::backend::{CommandList, PipelineHandle, Rect, ResourceId, ResourceState};
use crate::passes::{ShadowPasses, ShadowRenderPassBase};
use crate::render_graph::ShadowRenderCommand;
use crate::shadow_map::ShadowMapViewport;

/// Per-draw constants of the dual-paraboloid point light shadow shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PointShadowConstants {
    pub model: Mat4,
    pub light_position: Vec3,
    pub max_distance: f32,
    /// `1` for the front hemisphere, `-1` for the back.
    pub flip: f32,
    pub _padding: [f32; 3],
}

const_assert_eq!(std::mem::size_of::<PointShadowConstants>(), 96);

/// The atlas and its static cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTargets {
    pub shadow_map: ResourceId,
    pub static_cache: ResourceId,
}

/// What was recorded by [`record_shadow_passes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowRecordStats {
    pub regions: u32,
    pub regions_from_cache: u32,
    pub static_draws: u32,
    /// Static draws submitted for regions that were served from the cache.
    pub static_draws_skipped: u32,
    pub dynamic_draws: u32,
}

#[derive(Debug, Clone, Copy)]
enum ShadowProjection {
    ViewProjection(Mat4),
    Paraboloid {
        light_position: Vec3,
        max_distance: f32,
        flip: f32,
    },
}

struct ShadowRegion<'a> {
    viewport: ShadowMapViewport,
    copy_from_static_cache: bool,
    projection: ShadowProjection,
    sources: &'a [&'a ShadowRenderPassBase],
}

type DrawList = fn(&ShadowRenderPassBase) -> &[ShadowRenderCommand];

fn draw_count(sources: &[&ShadowRenderPassBase], draws: DrawList) -> u32 {
    sources.iter().map(|s| draws(s).len() as u32).sum()
}

fn render_region(
    cl: &mut CommandList,
    library: &PipelineLibrary,
    bound: &mut Option<PipelineHandle>,
    region: &ShadowRegion<'_>,
    draws: DrawList,
) -> u32 {
    if draw_count(region.sources, draws) == 0 {
        return 0;
    }

    let pipeline = match region.projection {
        ShadowProjection::ViewProjection(_) => library.builtin().shadow,
        ShadowProjection::Paraboloid { .. } => library.builtin().point_shadow,
    };
    if *bound != Some(pipeline) {
        cl.set_pipeline(pipeline);
        *bound = Some(pipeline);
    }
    cl.set_viewport(region.viewport.rect());

    let mut count = 0;
    for source in region.sources {
        for dc in draws(source) {
            match region.projection {
                ShadowProjection::ViewProjection(view_proj) => {
                    cl.set_constants(ROOT_TRANSFORM, &(view_proj * dc.transform));
                }
                ShadowProjection::Paraboloid {
                    light_position,
                    max_distance,
                    flip,
                } => {
                    cl.set_constants(
                        ROOT_TRANSFORM,
                        &PointShadowConstants {
                            model: dc.transform,
                            light_position,
                            max_distance,
                            flip,
                            _padding: [0.0; 3],
                        },
                    );
                }
            }
            dc.geometry.draw(cl);
            count += 1;
        }
    }
    count
}

/// Copy square atlas regions from `src` into `dst` with a full-screen
/// triangle per region. `dst` must be bound as depth target.
pub fn copy_shadow_map_parts(
    cl: &mut CommandList,
    library: &PipelineLibrary,
    src: ResourceId,
    dst: ResourceId,
    viewports: &[ShadowMapViewport],
) {
    if viewports.is_empty() {
        return;
    }
    cl.set_render_targets(&[], Some(dst));
    cl.set_pipeline(library.builtin().shadow_map_copy);
    cl.bind_resource(0, src);
    for vp in viewports {
        cl.set_viewport(vp.rect());
        cl.set_constants(ROOT_OBJECT, &[vp.x, vp.y, vp.size, vp.size]);
        cl.draw(3, 1);
    }
}

/// Record every shadow pass of the frame into `cl`.
pub fn record_shadow_passes(
    cl: &mut CommandList,
    library: &PipelineLibrary,
    targets: ShadowTargets,
    passes: &ShadowPasses,
) -> ShadowRecordStats {
    let mut stats = ShadowRecordStats::default();
    if passes.is_empty() {
        return stats;
    }

    let sun_sources: Vec<&ShadowRenderPassBase> = passes
        .sun()
        .map(|sun| sun.cascades().iter().map(|c| &c.base).collect())
        .unwrap_or_default();
    let spot_sources: Vec<&ShadowRenderPassBase> =
        passes.spot().iter().map(|p| &p.base).collect();
    let point_sources: Vec<&ShadowRenderPassBase> =
        passes.point().iter().map(|p| &p.base).collect();

    let mut regions = Vec::new();
    if let Some(sun) = passes.sun() {
        for (i, cascade) in sun.cascades().iter().enumerate() {
            regions.push(ShadowRegion {
                viewport: cascade.viewport,
                copy_from_static_cache: sun.copy_from_static_cache,
                projection: ShadowProjection::ViewProjection(cascade.view_proj),
                // Cascade i also renders everything submitted to nearer cascades.
                sources: &sun_sources[..=i],
            });
        }
    }
    for (i, pass) in passes.spot().iter().enumerate() {
        regions.push(ShadowRegion {
            viewport: pass.viewport,
            copy_from_static_cache: pass.copy_from_static_cache,
            projection: ShadowProjection::ViewProjection(pass.view_proj),
            sources: &spot_sources[i..=i],
        });
    }
    for (i, pass) in passes.point().iter().enumerate() {
        for (viewport, copy_from_static_cache, flip) in pass.hemispheres() {
            regions.push(ShadowRegion {
                viewport,
                copy_from_static_cache,
                projection: ShadowProjection::Paraboloid {
                    light_position: pass.light_position,
                    max_distance: pass.max_distance,
                    flip,
                },
                sources: &point_sources[i..=i],
            });
        }
    }

    let mut copies_from_cache = Vec::new();
    let mut clear_rects: Vec<Rect> = Vec::new();
    let mut copies_to_cache = Vec::new();
    for region in &regions {
        if region.copy_from_static_cache {
            copies_from_cache.push(region.viewport);
            stats.static_draws_skipped +=
                draw_count(region.sources, ShadowRenderPassBase::static_draws);
        } else {
            clear_rects.push(region.viewport.rect());
            copies_to_cache.push(region.viewport);
        }
    }
    stats.regions = regions.len() as u32;
    stats.regions_from_cache = copies_from_cache.len() as u32;

    cl.begin_event("Shadow map pass");

    if !copies_from_cache.is_empty() {
        cl.begin_event("Copy from static shadow map cache");
        copy_shadow_map_parts(
            cl,
            library,
            targets.static_cache,
            targets.shadow_map,
            &copies_from_cache,
        );
        cl.end_event();
    }

    if !clear_rects.is_empty() {
        cl.clear_depth(targets.shadow_map, 1.0, &clear_rects);
    }

    if !copies_to_cache.is_empty() {
        cl.barriers().transition_begin(
            &targets.static_cache,
            ResourceState::PIXEL_SHADER_RESOURCE,
            ResourceState::DEPTH_WRITE,
        );
    }

    let mut bound = None;
    cl.set_render_targets(&[], Some(targets.shadow_map));
    cl.begin_event("Static geometry");
    for region in regions.iter().filter(|r| !r.copy_from_static_cache) {
        stats.static_draws +=
            render_region(cl, library, &mut bound, region, ShadowRenderPassBase::static_draws);
    }
    cl.end_event();

    if !copies_to_cache.is_empty() {
        cl.begin_event("Copy to static shadow map cache");
        cl.barriers()
            .transition(
                &targets.shadow_map,
                ResourceState::DEPTH_WRITE,
                ResourceState::PIXEL_SHADER_RESOURCE,
            )
            .transition_end(
                &targets.static_cache,
                ResourceState::PIXEL_SHADER_RESOURCE,
                ResourceState::DEPTH_WRITE,
            );

        copy_shadow_map_parts(
            cl,
            library,
            targets.shadow_map,
            targets.static_cache,
            &copies_to_cache,
        );
        bound = None;

        cl.barriers()
            .transition(
                &targets.shadow_map,
                ResourceState::PIXEL_SHADER_RESOURCE,
                ResourceState::DEPTH_WRITE,
            )
            .transition(
                &targets.static_cache,
                ResourceState::DEPTH_WRITE,
                ResourceState::PIXEL_SHADER_RESOURCE,
            );
        cl.end_event();
    }

    cl.set_render_targets(&[], Some(targets.shadow_map));
    cl.begin_event("Dynamic geometry");
    for region in &regions {
        stats.dynamic_draws +=
            render_region(cl, library, &mut bound, region, ShadowRenderPassBase::dynamic_draws);
    }
    cl.end_event();

    cl.end_event();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BarrierSplit, BufferDescriptor, Command, DummyBackend, IndexFormat, QueueType,
        RenderBackend, ResourceBarrier,
    };
    use crate::render_graph::{IndexBufferView, MeshGeometry, SubmeshInfo, VertexBufferView};
    use crate::scene::{DirectionalLight, SpotLight};
    use crate::shadow_map::ShadowMapCache;

    fn mesh(backend: &DummyBackend) -> MeshGeometry {
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                size: 128,
                ..Default::default()
            })
            .unwrap();
        MeshGeometry::new(
            VertexBufferView::whole(buffer.clone(), 12),
            IndexBufferView::whole(buffer, IndexFormat::Uint32),
            SubmeshInfo::new(0, 3, 0, 3),
        )
    }

    fn targets() -> ShadowTargets {
        ShadowTargets {
            shadow_map: ResourceId::next(),
            static_cache: ResourceId::next(),
        }
    }

    #[test]
    fn test_sun_cascades_include_nearer_cascades() {
        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        let geometry = mesh(&backend);
        let mut cache = ShadowMapCache::new(6144, true);
        let mut passes = ShadowPasses::new();

        let sun = DirectionalLight::default();
        let pass = passes.add_sun_light(&mut cache, &sun, false);
        pass.render_static_object(0, Mat4::IDENTITY, &geometry);
        pass.render_dynamic_object(2, Mat4::IDENTITY, &geometry);

        let mut cl = CommandList::new(QueueType::Graphics, "shadow");
        let stats = record_shadow_passes(&mut cl, &library, targets(), &passes);
        // Static draw of cascade 0 is drawn in cascades 0, 1 and 2.
        assert_eq!(stats.static_draws, 3);
        assert_eq!(stats.dynamic_draws, 1);
        assert_eq!(stats.regions, 3);
        assert_eq!(stats.regions_from_cache, 0);
        cl.close();
    }

    #[test]
    fn test_cached_spot_skips_static_geometry() {
        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        let geometry = mesh(&backend);
        let mut cache = ShadowMapCache::new(6144, true);
        let mut passes = ShadowPasses::new();
        let light = SpotLight::new(Vec3::ZERO, Vec3::NEG_Y, Vec3::ONE, 0.2, 0.4, 10.0);
        let targets = targets();

        for frame in 0..2 {
            passes.reset();
            let (pass, _) = passes.add_spot_light(&mut cache, 5, &light, 512, false);
            pass.base.render_static_object(Mat4::IDENTITY, &geometry);
            pass.base.render_dynamic_object(Mat4::IDENTITY, &geometry);

            let mut cl = CommandList::new(QueueType::Graphics, "shadow");
            let stats = record_shadow_passes(&mut cl, &library, targets, &passes);
            cl.close();

            let has_split_begin = cl.recorded_barriers().any(|b| {
                matches!(b, ResourceBarrier::Transition { split: BarrierSplit::BeginOnly, .. })
            });
            if frame == 0 {
                assert_eq!(stats.static_draws, 1);
                assert!(has_split_begin);
                assert!(cl
                    .commands()
                    .iter()
                    .any(|c| matches!(c, Command::ClearDepth { .. })));
            } else {
                assert_eq!(stats.static_draws, 0);
                assert_eq!(stats.static_draws_skipped, 1);
                assert_eq!(stats.regions_from_cache, 1);
                assert!(!has_split_begin);
                assert!(!cl
                    .commands()
                    .iter()
                    .any(|c| matches!(c, Command::ClearDepth { .. })));
            }
            assert_eq!(stats.dynamic_draws, 1);
        }
    }

    #[test]
    fn test_empty_passes_record_nothing() {
        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        let mut cl = CommandList::new(QueueType::Graphics, "shadow");
        let stats = record_shadow_passes(&mut cl, &library, targets(), &ShadowPasses::new());
        assert_eq!(stats, ShadowRecordStats::default());
        assert!(cl.commands().is_empty());
    }
}
