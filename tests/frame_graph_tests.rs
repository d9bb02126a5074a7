//! Integration tests for the frame graph.
//!
//! # Test Categories
//!
//! - **Barrier Tests**: batching, scope flush, split barrier pairing
//! - **Command Buffer Tests**: pipeline grouping and draw ordering
//! - **Culling Tests**: the CPU culler against a brute force reference
//! - **Shadow Cache Tests**: static geometry reuse across frames
//! - **Frame Tests**: submission order and fences

mod common;

use glam::{Mat4, Vec3, Vec4};
use rstest::rstest;

use common::{
    create_render_target, init_logging, register_test_materials, test_camera, translation, Lcg,
    TestContext, TestMaterial,
};
use redlilium_frame_graph::backend::{
    BarrierSplit, Command, CommandList, DummyBackend, QueueType, ResourceBarrier, ResourceState,
    Texture,
};
use redlilium_frame_graph::passes::ComputeStage;
use redlilium_frame_graph::pipeline::{
    cull_tiles, tile_count, CommonMaterialInfo, DrawPipeline, Pipeline, PipelineContext,
    PipelineId, PipelineLibrary,
};
use redlilium_frame_graph::render_graph::{
    DefaultRenderCommand, SortedCommandBuffer, MAX_BATCHED_BARRIERS,
};
use redlilium_frame_graph::scene::{Camera, PointLight, SpotLight};
use redlilium_frame_graph::FrameLights;

fn material_key<const N: usize>() -> u64 {
    PipelineId::of::<TestMaterial<N>>().raw()
}

fn barrier_batches(cl: &CommandList) -> Vec<&[ResourceBarrier]> {
    cl.commands()
        .iter()
        .filter_map(|c| match c {
            Command::ResourceBarriers(b) => Some(b.as_slice()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Barrier Tests
// ============================================================================

/// Barriers queued in one scope reach the list as a single batch.
#[test]
fn test_barriers_flush_once_at_scope_exit() {
    init_logging();
    let backend = DummyBackend::new();
    let a = create_render_target(&backend, "a");
    let b = create_render_target(&backend, "b");

    let mut cl = CommandList::new(QueueType::Graphics, "barriers");
    {
        let mut batch = cl.barriers();
        batch
            .transition(&a, ResourceState::RENDER_TARGET, ResourceState::PIXEL_SHADER_RESOURCE)
            .transition(&b, ResourceState::RENDER_TARGET, ResourceState::PIXEL_SHADER_RESOURCE)
            .uav(&a);
        assert_eq!(batch.pending(), 3);
    }
    cl.close();

    let batches = barrier_batches(&cl);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
}

/// Submitting explicitly and then dropping does not record the batch twice.
#[test]
fn test_barriers_submit_then_drop_records_once() {
    let backend = DummyBackend::new();
    let a = create_render_target(&backend, "a");

    let mut cl = CommandList::new(QueueType::Graphics, "barriers");
    {
        let mut batch = cl.barriers();
        batch.transition(&a, ResourceState::RENDER_TARGET, ResourceState::COPY_SOURCE);
        batch.submit();
        batch.submit();
    }
    assert_eq!(barrier_batches(&cl).len(), 1);
}

/// Equal states and missing resources produce no barrier at all.
#[test]
fn test_barriers_skip_noops() {
    let backend = DummyBackend::new();
    let a = create_render_target(&backend, "a");
    let missing: Option<std::sync::Arc<Texture>> = None;

    let mut cl = CommandList::new(QueueType::Graphics, "barriers");
    cl.barriers()
        .transition(&a, ResourceState::RENDER_TARGET, ResourceState::RENDER_TARGET)
        .transition(&missing, ResourceState::COMMON, ResourceState::COPY_DEST);
    assert!(barrier_batches(&cl).is_empty());
}

#[test]
#[should_panic(expected = "unmatched split barrier")]
fn test_unmatched_split_barrier_panics_on_close() {
    let backend = DummyBackend::new();
    let a = create_render_target(&backend, "a");

    let mut cl = CommandList::new(QueueType::Graphics, "split");
    cl.barriers()
        .transition_begin(&a, ResourceState::COPY_DEST, ResourceState::SHADER_RESOURCE);
    cl.close();
}

#[test]
fn test_matched_split_barrier_closes() {
    let backend = DummyBackend::new();
    let a = create_render_target(&backend, "a");

    let mut cl = CommandList::new(QueueType::Graphics, "split");
    cl.barriers()
        .transition_begin(&a, ResourceState::COPY_DEST, ResourceState::SHADER_RESOURCE);
    cl.draw(3, 1);
    cl.barriers()
        .transition_end(&a, ResourceState::COPY_DEST, ResourceState::SHADER_RESOURCE);
    cl.close();
    assert!(cl.is_closed());
    assert_eq!(cl.pending_split_barriers(), 0);
}

#[test]
#[should_panic(expected = "Barrier batch capacity")]
fn test_barrier_batch_overflow_panics() {
    let backend = DummyBackend::new();
    let targets: Vec<_> = (0..=MAX_BATCHED_BARRIERS)
        .map(|i| create_render_target(&backend, &format!("rt{}", i)))
        .collect();

    let mut cl = CommandList::new(QueueType::Graphics, "overflow");
    let mut batch = cl.barriers();
    for target in &targets {
        batch.uav(target);
    }
}

// ============================================================================
// Command Buffer Tests
// ============================================================================

fn test_library(backend: &DummyBackend) -> PipelineLibrary {
    let mut library = PipelineLibrary::new(backend).expect("pipeline library");
    register_test_materials(backend, &mut library);
    library
}

/// Interleaved draws of three pipelines bind each pipeline once after sorting.
#[rstest]
#[case::hundred(100)]
#[case::thousand(1000)]
fn test_pipeline_grouping(#[case] draws: u32) {
    init_logging();
    let backend = DummyBackend::new();
    let library = test_library(&backend);
    let mesh = common::create_triangle_mesh(&backend);

    let mut buffer = SortedCommandBuffer::<u64>::new();
    for i in 0..draws {
        let command = DefaultRenderCommand {
            transform: Mat4::IDENTITY,
            geometry: mesh.clone(),
            material: i,
        };
        match i % 3 {
            0 => buffer.push_back::<TestMaterial<0>, _>(material_key::<0>(), command),
            1 => buffer.push_back::<TestMaterial<1>, _>(material_key::<1>(), command),
            _ => buffer.push_back::<TestMaterial<2>, _>(material_key::<2>(), command),
        };
    }
    buffer.sort();

    let camera = test_camera().uniform_data(64, 64);
    let common = CommonMaterialInfo::default();
    let ctx = PipelineContext {
        library: &library,
        camera: &camera,
        common: &common,
    };
    let mut cl = CommandList::new(QueueType::Graphics, "grouping");
    let setups = buffer.record(&mut cl, &ctx);

    assert_eq!(setups, 3);
    assert_eq!(cl.pipeline_bind_count(), 3);
    assert_eq!(cl.draw_count(), draws as usize);

    // Within a pipeline, submission order is kept.
    let materials: Vec<u32> = buffer
        .iter()
        .map(|e| e.downcast::<DefaultRenderCommand<u32>>().unwrap().material)
        .collect();
    for pair in materials.windows(2) {
        if pair[0] % 3 == pair[1] % 3 {
            assert!(pair[0] < pair[1]);
        }
    }
}

/// Transparent draws come back to front.
#[test]
fn test_transparent_back_to_front_through_renderer() {
    let mut ctx = TestContext::with_size(64, 64, 1);
    ctx.renderer.begin_frame(&test_camera()).unwrap();
    for i in 0..50u32 {
        // Object i sits i + 1 units in front of the camera.
        let transform = translation(0.0, 0.0, 5.0 - (i as f32 + 1.0));
        ctx.renderer
            .transparent_pass_mut()
            .render_object::<TestMaterial<0>, u32>(transform, &ctx.mesh, i);
    }
    ctx.renderer.transparent_pass_mut().sort();

    let order: Vec<u32> = ctx
        .renderer
        .transparent_pass_mut()
        .pass()
        .iter()
        .map(|e| e.downcast::<DefaultRenderCommand<u32>>().unwrap().material)
        .collect();
    assert_eq!(order, (0..50).rev().collect::<Vec<_>>());

    let stats = ctx.renderer.end_frame(&FrameLights::default()).unwrap();
    assert_eq!(stats.transparent_draws, 50);
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Particle {
    position: Vec4,
    id: u64,
}

struct ParticlePipeline;

impl Pipeline for ParticlePipeline {
    fn setup(_cl: &mut CommandList, _ctx: &PipelineContext<'_>) {}
}

impl DrawPipeline<Particle> for ParticlePipeline {
    fn render(cl: &mut CommandList, _ctx: &PipelineContext<'_>, particle: &Particle) {
        cl.draw(4, particle.id as u32);
    }
}

/// Records of different types share one buffer and come back intact.
#[test]
fn test_mixed_record_types_round_trip() {
    let backend = DummyBackend::new();
    let mesh = common::create_triangle_mesh(&backend);
    let mut buffer = SortedCommandBuffer::<f32>::new();

    buffer.push_back::<ParticlePipeline, _>(
        2.0,
        Particle {
            position: Vec4::new(1.0, 2.0, 3.0, 4.0),
            id: 7,
        },
    );
    buffer.push_back::<TestMaterial<0>, _>(
        1.0,
        DefaultRenderCommand {
            transform: translation(1.0, 0.0, 0.0),
            geometry: mesh,
            material: 11u32,
        },
    );
    buffer.emplace_back::<ParticlePipeline, Particle>(3.0).id = 9;
    buffer.sort();

    let entries: Vec<_> = buffer.iter().collect();
    assert_eq!(entries.len(), 3);
    let first = entries[0].downcast::<DefaultRenderCommand<u32>>().unwrap();
    assert_eq!(first.material, 11);
    assert_eq!(first.transform, translation(1.0, 0.0, 0.0));
    assert_eq!(
        entries[1].downcast::<Particle>(),
        Some(&Particle {
            position: Vec4::new(1.0, 2.0, 3.0, 4.0),
            id: 7
        })
    );
    assert_eq!(entries[2].downcast::<Particle>().unwrap().id, 9);
    assert!(entries[2].downcast::<DefaultRenderCommand<u32>>().is_none());
    assert!(buffer.arena_used() > 0);

    buffer.clear();
    assert!(buffer.is_empty());
    assert_eq!(buffer.arena_used(), 0);
}

// ============================================================================
// Culling Tests
// ============================================================================

/// Every light that touches a sampled point of a tile's view volume is
/// listed for that tile.
#[rstest]
#[case::tile16(64, 48, 16)]
#[case::tile8_partial(100, 70, 8)]
fn test_culling_is_conservative(#[case] width: u32, #[case] height: u32, #[case] tile_size: u32) {
    let camera = test_camera().uniform_data(width, height);
    let mut rng = Lcg::new(0x5eed);

    let points: Vec<PointLight> = (0..24)
        .map(|_| {
            PointLight::new(
                Vec3::new(rng.range(-4.0, 4.0), rng.range(-3.0, 3.0), rng.range(-6.0, 3.0)),
                Vec3::ONE,
                rng.range(0.3, 2.0),
            )
        })
        .collect();

    let grid = cull_tiles(&camera, tile_size, 1024, None, &points, &[], &[]);
    let (tiles_x, tiles_y) = tile_count(width, height, tile_size);
    assert_eq!((grid.tiles_x, grid.tiles_y), (tiles_x, tiles_y));

    let mut hits = 0;
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let opaque = grid.opaque_objects(tx, ty);
            let transparent = grid.transparent_objects(tx, ty);

            let x0 = (tx * tile_size) as f32;
            let y0 = (ty * tile_size) as f32;
            let x1 = ((tx + 1) * tile_size).min(width) as f32;
            let y1 = ((ty + 1) * tile_size).min(height) as f32;

            for (index, light) in points.iter().enumerate() {
                let mut touches = false;
                'samples: for sx in 0..=4 {
                    for sy in 0..=4 {
                        for sz in 0..=8 {
                            let px = x0 + (x1 - x0) * sx as f32 / 4.0;
                            let py = y0 + (y1 - y0) * sy as f32 / 4.0;
                            let p = camera.unproject(px, py, sz as f32 / 8.0);
                            if p.distance(light.position) < light.radius * 0.99 {
                                touches = true;
                                break 'samples;
                            }
                        }
                    }
                }
                if touches {
                    hits += 1;
                    assert!(
                        opaque.point_lights.contains(&(index as u32)),
                        "light {} missing from opaque list of tile ({}, {})",
                        index,
                        tx,
                        ty
                    );
                    assert!(transparent.point_lights.contains(&(index as u32)));
                }
            }
        }
    }
    assert!(hits > 0, "no light touched any tile; the test would prove nothing");
}

/// Opaque ranges honour per-tile depth bounds, transparent ranges start at
/// the near plane.
#[test]
fn test_culling_depth_bounds() {
    let camera = test_camera().uniform_data(32, 32);
    // Straight ahead, 3 units from the camera.
    let near_light = PointLight::new(Vec3::new(0.0, 0.0, 2.0), Vec3::ONE, 0.5);
    let (tiles_x, tiles_y) = tile_count(32, 32, 16);
    // Opaque geometry 8 to 9 units away everywhere.
    let bounds = vec![(8.0, 9.0); (tiles_x * tiles_y) as usize];

    let grid = cull_tiles(&camera, 16, 1024, Some(&bounds), &[near_light], &[], &[]);

    let center_tiles = [(0, 0), (1, 0), (0, 1), (1, 1)];
    assert!(center_tiles
        .iter()
        .all(|&(x, y)| grid.opaque_objects(x, y).point_lights.is_empty()));
    assert!(center_tiles
        .iter()
        .any(|&(x, y)| grid.transparent_objects(x, y).point_lights == [0]));
}

// ============================================================================
// Shadow Cache Tests
// ============================================================================

fn spot_light() -> SpotLight {
    SpotLight::new(
        Vec3::new(0.0, 5.0, 0.0),
        Vec3::NEG_Y,
        Vec3::ONE,
        30f32.to_radians(),
        35f32.to_radians(),
        20.0,
    )
}

fn shadow_frame(ctx: &mut TestContext, light: &mut SpotLight) -> redlilium_frame_graph::FrameStats {
    ctx.renderer.begin_frame(&test_camera()).unwrap();
    let mesh = ctx.mesh.clone();
    let pass = ctx.renderer.add_spot_shadow_pass(1, light, 1024);
    pass.base.render_static_object(Mat4::IDENTITY, &mesh);
    pass.base.render_static_object(translation(1.0, 0.0, 0.0), &mesh);
    pass.base.render_dynamic_object(translation(0.0, 1.0, 0.0), &mesh);
    ctx.renderer
        .end_frame(&FrameLights {
            spot_lights: std::slice::from_ref(light),
            ..Default::default()
        })
        .unwrap()
}

#[test]
fn test_static_shadows_cached_while_light_is_still() {
    let mut ctx = TestContext::with_size(64, 64, 2);
    let mut light = spot_light();

    let first = shadow_frame(&mut ctx, &mut light);
    assert_eq!(first.shadow.regions, 1);
    assert_eq!(first.shadow.regions_from_cache, 0);
    assert_eq!(first.shadow.static_draws, 2);
    assert_eq!(first.shadow.dynamic_draws, 1);
    assert_eq!(light.shadow_info_index, 0);

    let second = shadow_frame(&mut ctx, &mut light);
    assert_eq!(second.shadow.regions_from_cache, 1);
    assert_eq!(second.shadow.static_draws, 0);
    assert_eq!(second.shadow.static_draws_skipped, 2);
    assert_eq!(second.shadow.dynamic_draws, 1);

    // Moving the light re-renders static geometry once.
    light.position += Vec3::X;
    let moved = shadow_frame(&mut ctx, &mut light);
    assert_eq!(moved.shadow.regions_from_cache, 0);
    assert_eq!(moved.shadow.static_draws, 2);
    assert_eq!(shadow_frame(&mut ctx, &mut light).shadow.regions_from_cache, 1);

    // So does an explicit invalidation.
    ctx.renderer.shadow_cache_mut().invalidate();
    assert_eq!(shadow_frame(&mut ctx, &mut light).shadow.regions_from_cache, 0);
    assert_eq!(shadow_frame(&mut ctx, &mut light).shadow.regions_from_cache, 1);
}

#[test]
fn test_static_shadow_caching_disabled() {
    let mut ctx = TestContext::new(redlilium_frame_graph::FrameGraphConfig {
        width: 64,
        height: 64,
        recording_threads: 1,
        static_shadow_caching: false,
        ..Default::default()
    });
    let mut light = spot_light();
    shadow_frame(&mut ctx, &mut light);
    let second = shadow_frame(&mut ctx, &mut light);
    assert_eq!(second.shadow.regions_from_cache, 0);
    assert_eq!(second.shadow.static_draws, 2);
}

#[test]
fn test_sun_cascades_render_nearer_cascades() {
    let mut ctx = TestContext::with_size(64, 64, 1);
    let sun = redlilium_frame_graph::scene::DirectionalLight {
        num_shadow_cascades: 3,
        shadow_dimensions: 1024,
        ..Default::default()
    };

    ctx.renderer.begin_frame(&test_camera()).unwrap();
    let mesh = ctx.mesh.clone();
    let pass = ctx.renderer.add_sun_shadow_pass(&sun);
    assert_eq!(pass.num_cascades(), 3);
    pass.render_static_object(0, Mat4::IDENTITY, &mesh);
    let stats = ctx.renderer.end_frame(&FrameLights::default()).unwrap();

    // The cascade 0 caster is drawn into cascades 0, 1 and 2.
    assert_eq!(stats.shadow.regions, 3);
    assert_eq!(stats.shadow.static_draws, 3);
}

// ============================================================================
// Frame Tests
// ============================================================================

fn populate_frame(ctx: &mut TestContext) {
    let mesh = ctx.mesh.clone();
    let renderer = &mut ctx.renderer;
    for i in 0..30u32 {
        let transform = translation(i as f32 * 0.1, 0.0, -(i as f32));
        match i % 3 {
            0 => renderer
                .opaque_pass_mut()
                .render_static_object::<TestMaterial<0>, u32>(transform, &mesh, i, i),
            1 => renderer.opaque_pass_mut().render_dynamic_object::<TestMaterial<1>, u32>(
                transform,
                transform,
                &mesh,
                i,
                i,
            ),
            _ => renderer
                .opaque_pass_mut()
                .render_static_object::<TestMaterial<2>, u32>(transform, &mesh, i, i),
        }
    }
    for i in 0..5u32 {
        renderer
            .transparent_pass_mut()
            .render_object::<TestMaterial<1>, u32>(translation(0.0, 0.0, -(i as f32)), &mesh, i);
    }
    renderer
        .ldr_pass_mut()
        .render_overlay::<TestMaterial<2>, u32>(Mat4::IDENTITY, &mesh, 0);
    renderer.ldr_pass_mut().render_outline(Mat4::IDENTITY, &mesh);
}

/// The lists and their contents do not depend on how many threads record them.
#[rstest]
#[case::sequential(1)]
#[case::parallel(4)]
fn test_frame_recording(#[case] threads: u32) {
    let mut ctx = TestContext::with_size(128, 96, threads);
    let points = [PointLight::new(Vec3::ZERO, Vec3::ONE, 3.0)];

    ctx.renderer.begin_frame(&test_camera()).unwrap();
    populate_frame(&mut ctx);
    let stats = ctx
        .renderer
        .end_frame(&FrameLights {
            point_lights: &points,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(stats.depth_prepass_draws, 30);
    assert_eq!(stats.opaque_draws, 30);
    assert_eq!(stats.transparent_draws, 5);
    assert_eq!(stats.ldr_draws, 1);
    assert_eq!(stats.outline_draws, 1);
    assert!(stats.light_culling_dispatched);

    let submissions = ctx.backend.take_submissions();
    let graphics = &submissions[1];
    assert_eq!(graphics.lists.len(), 3);
    // 30 prepass draws, the culling pass has none.
    assert_eq!(graphics.lists[0].draw_count(), 30);
    // Each of the three materials is set up once.
    assert_eq!(graphics.lists[1].draw_count(), 30);
    assert_eq!(graphics.lists[1].pipeline_bind_count(), 3);
    assert_eq!(
        graphics.lists[2].event_names().collect::<Vec<_>>(),
        vec![
            "Transparent light pass",
            "Post processing",
            "LDR pass",
            "Outlines",
            "Present"
        ]
    );
    assert!(graphics.lists[2]
        .commands()
        .iter()
        .any(|c| matches!(c, Command::Present(_))));
}

/// Follows the depth-stencil through the graphics lists of a frame and checks
/// every use against the state its barriers put it in.
#[rstest]
#[case::single_thread(1)]
#[case::multi_thread(4)]
fn test_depth_stencil_states_across_frame(#[case] threads: u32) {
    let mut ctx = TestContext::with_size(128, 96, threads);
    let points = [PointLight::new(Vec3::ZERO, Vec3::ONE, 3.0)];
    ctx.renderer.begin_frame(&test_camera()).unwrap();
    populate_frame(&mut ctx);
    let stats = ctx
        .renderer
        .end_frame(&FrameLights {
            point_lights: &points,
            ..Default::default()
        })
        .unwrap();
    assert!(stats.light_culling_dispatched);
    assert_eq!(stats.outline_draws, 1);

    let submissions = ctx.backend.take_submissions();
    let graphics = &submissions[1];
    assert_eq!(graphics.lists.len(), 3);
    let depth = graphics.lists[0]
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::SetRenderTargets { depth, .. } => *depth,
            _ => None,
        })
        .expect("depth prepass binds a depth target");

    let mut state = ResourceState::DEPTH_WRITE;
    let mut pending: Option<ResourceState> = None;
    let mut sampled = 0;
    for list in &graphics.lists {
        for command in list.commands() {
            match command {
                Command::ResourceBarriers(barriers) => {
                    for barrier in barriers {
                        let ResourceBarrier::Transition {
                            resource,
                            before,
                            after,
                            split,
                            ..
                        } = barrier
                        else {
                            continue;
                        };
                        if *resource != depth {
                            continue;
                        }
                        assert_eq!(*before, state, "{}: stale before state", list.name());
                        match split {
                            BarrierSplit::None => state = *after,
                            BarrierSplit::BeginOnly => pending = Some(*after),
                            BarrierSplit::EndOnly => {
                                assert_eq!(pending.take(), Some(*after));
                                state = *after;
                            }
                        }
                    }
                }
                Command::BindResource { resource, .. } if *resource == depth => {
                    assert!(pending.is_none());
                    assert!(
                        state.intersects(ResourceState::SHADER_RESOURCE),
                        "{}: depth sampled in {:?}",
                        list.name(),
                        state
                    );
                    assert!(!state.is_write());
                    sampled += 1;
                }
                Command::SetRenderTargets {
                    depth: Some(target),
                    ..
                } if *target == depth => {
                    assert!(pending.is_none());
                    assert!(
                        state.intersects(ResourceState::DEPTH_WRITE | ResourceState::DEPTH_READ),
                        "{}: depth attached in {:?}",
                        list.name(),
                        state
                    );
                }
                Command::ClearDepth { texture, .. } if *texture == depth => {
                    assert_eq!(state, ResourceState::DEPTH_WRITE);
                }
                Command::CopyResource { src, .. } if *src == depth => {
                    assert!(state.contains(ResourceState::COPY_SOURCE));
                }
                _ => {}
            }
        }
    }
    // Light culling and the outline drawer.
    assert_eq!(sampled, 2);
    assert!(pending.is_none());
    assert_eq!(state, ResourceState::DEPTH_WRITE);
}

/// Empty passes record nothing beyond the fixed post processing chain.
#[test]
fn test_empty_passes_are_skipped() {
    let mut ctx = TestContext::with_size(64, 64, 1);
    ctx.renderer.begin_frame(&test_camera()).unwrap();
    let stats = ctx.renderer.end_frame(&FrameLights::default()).unwrap();

    assert_eq!(stats.transparent_draws, 0);
    assert_eq!(stats.outline_draws, 0);
    let submissions = ctx.backend.take_submissions();
    assert!(submissions[0].lists[0].commands().is_empty());
    assert_eq!(
        submissions[1].lists[2].event_names().collect::<Vec<_>>(),
        vec!["Post processing", "Present"]
    );
}

/// Fences grow monotonically and the graphics queue waits for frame start
/// compute work before the main lists.
#[test]
fn test_submission_order_and_fences() {
    let mut ctx = TestContext::with_size(64, 64, 2);
    let mut last_fence = None;

    for frame in 0..4u64 {
        ctx.renderer.begin_frame(&test_camera()).unwrap();
        ctx.renderer
            .compute_pass_mut()
            .add_event(ComputeStage::FrameStart, |cl, _| cl.dispatch(4, 1, 1));
        ctx.renderer
            .compute_pass_mut()
            .add_event(ComputeStage::BeforeOpaque, |cl, _| cl.dispatch(2, 2, 1));
        let stats = ctx.renderer.end_frame(&FrameLights::default()).unwrap();
        assert_eq!(stats.frame_index, frame);

        let submissions = ctx.backend.take_submissions();
        let queues: Vec<QueueType> = submissions.iter().map(|s| s.queue).collect();
        assert_eq!(
            queues,
            vec![QueueType::Compute, QueueType::Graphics, QueueType::Graphics]
        );
        let compute_fence = stats.compute_fence.unwrap();
        assert_eq!(submissions[0].fence, compute_fence);
        assert!(submissions[1].waits.is_empty());
        assert_eq!(submissions[2].waits, vec![(QueueType::Compute, compute_fence)]);
        assert_eq!(submissions[2].fence, stats.graphics_fence);
        assert!(submissions[1].fence < submissions[2].fence);

        assert_eq!(
            submissions[2].lists[1].event_names().next(),
            Some("Before opaque")
        );

        if let Some(previous) = last_fence {
            assert!(stats.graphics_fence > previous);
        }
        last_fence = Some(stats.graphics_fence);
    }
    assert_eq!(ctx.renderer.frame_index(), 4);
}

#[test]
fn test_resize_reallocates_culling_grid() {
    let mut ctx = TestContext::with_size(64, 64, 1);
    ctx.renderer.set_size(200, 100).unwrap();

    let points = [PointLight::new(Vec3::ZERO, Vec3::ONE, 3.0)];
    ctx.renderer.begin_frame(&Camera::default()).unwrap();
    let stats = ctx
        .renderer
        .end_frame(&FrameLights {
            point_lights: &points,
            ..Default::default()
        })
        .unwrap();
    assert!(stats.light_culling_dispatched);
    assert_eq!(ctx.renderer.size(), (200, 100));
}
