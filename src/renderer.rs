//! Frame orchestration.
//!
//! [`FrameRenderer`] owns the render pass containers, the screen-sized
//! targets and the GPU-side light lists. A frame is driven by
//! [`begin_frame`](FrameRenderer::begin_frame), any number of submissions
//! into the passes, and [`end_frame`](FrameRenderer::end_frame), which
//! sorts, records four graphics command lists in parallel and submits them
//! in a fixed order:
//!
//! ```text
//! compute:  [frame start]                       (only with frame start events)
//! graphics: [shadow] --wait(compute)--> [depth prepass + culling, opaque, post]
//! ```

use std::sync::Arc;
use std::thread;

use glam::Vec4;

use crate::backend::{
    Buffer, BufferDescriptor, BufferUsage, CommandList, FenceValue, QueueType, Rect,
    RenderBackend, ResourceState, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};
use crate::error::RendererError;
use crate::passes::{
    record_compute_events, ComputeEvent, ComputePass, ComputeStage, LdrRenderPass,
    OpaqueRenderPass, PointShadowInfo, PointShadowRenderPass, ShadowPasses, SpotShadowInfo,
    SpotShadowRenderPass, SunShadowRenderPass, TransparentRenderPass, MAX_POINT_SHADOW_PASSES,
    MAX_SPOT_SHADOW_PASSES,
};
use crate::pipeline::{
    bucketize, record_outlines, record_shadow_passes, CommonMaterialInfo, LightCounts,
    PipelineContext, PipelineLibrary, ShadowRecordStats, ShadowTargets, TiledLightCulling,
    ROOT_CAMERA,
};
use crate::scene::{Camera, CameraUniformData, Decal, DirectionalLight, PointLight, SpotLight};
use crate::shadow_map::{ShadowLightKey, ShadowMapCache, ShadowMapViewport};
use crate::FrameGraphConfig;

/// Thread group edge of the tonemap and present dispatches.
const POST_PROCESSING_BLOCK_SIZE: u32 = 16;

/// Lights and decals visible this frame, uploaded by
/// [`FrameRenderer::end_frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameLights<'a> {
    pub point_lights: &'a [PointLight],
    pub spot_lights: &'a [SpotLight],
    pub decals: &'a [Decal],
}

/// What a frame recorded and submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub depth_prepass_draws: usize,
    pub opaque_draws: usize,
    pub transparent_draws: usize,
    pub ldr_draws: usize,
    pub outline_draws: usize,
    pub pipeline_binds: usize,
    pub shadow: ShadowRecordStats,
    pub light_culling_dispatched: bool,
    pub command_lists: usize,
    pub compute_fence: Option<FenceValue>,
    pub graphics_fence: FenceValue,
}

/// Screen-sized render targets.
///
/// States at frame boundaries: depth `DEPTH_WRITE`, velocities, object ids
/// and HDR color `RENDER_TARGET`, LDR color `UNORDERED_ACCESS`, opaque
/// depth copy `SHADER_RESOURCE`, frame result `PRESENT`.
#[derive(Debug)]
struct ScreenTargets {
    width: u32,
    height: u32,
    depth_stencil: Arc<Texture>,
    opaque_depth: Arc<Texture>,
    velocities: Arc<Texture>,
    object_ids: Arc<Texture>,
    hdr_color: Arc<Texture>,
    ldr_color: Arc<Texture>,
    frame_result: Arc<Texture>,
}

impl ScreenTargets {
    fn create(backend: &dyn RenderBackend, width: u32, height: u32) -> Result<Self, RendererError> {
        let texture = |label: &str, format, usage, initial_state| {
            backend.create_texture(&TextureDescriptor {
                label: Some(label.into()),
                width,
                height,
                mip_levels: 1,
                format,
                usage,
                initial_state,
            })
        };

        Ok(Self {
            width,
            height,
            depth_stencil: texture(
                "Depth stencil",
                TextureFormat::Depth24PlusStencil8,
                TextureUsage::DEPTH_STENCIL
                    | TextureUsage::SHADER_RESOURCE
                    | TextureUsage::COPY_SRC,
                ResourceState::DEPTH_WRITE,
            )?,
            opaque_depth: texture(
                "Opaque depth",
                TextureFormat::Depth24PlusStencil8,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
                ResourceState::SHADER_RESOURCE,
            )?,
            velocities: texture(
                "Screen velocities",
                TextureFormat::Rg16Float,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ResourceState::RENDER_TARGET,
            )?,
            object_ids: texture(
                "Object ids",
                TextureFormat::R32Uint,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ResourceState::RENDER_TARGET,
            )?,
            hdr_color: texture(
                "HDR color",
                TextureFormat::Rgba16Float,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ResourceState::RENDER_TARGET,
            )?,
            ldr_color: texture(
                "LDR color",
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_TARGET
                    | TextureUsage::UNORDERED_ACCESS
                    | TextureUsage::SHADER_RESOURCE,
                ResourceState::UNORDERED_ACCESS,
            )?,
            frame_result: texture(
                "Frame result",
                TextureFormat::Rgba8Unorm,
                TextureUsage::UNORDERED_ACCESS,
                ResourceState::PRESENT,
            )?,
        })
    }

    fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Shadow atlas and the static cache it is restored from.
#[derive(Debug)]
struct ShadowTextures {
    shadow_map: Arc<Texture>,
    static_cache: Arc<Texture>,
}

impl ShadowTextures {
    fn create(backend: &dyn RenderBackend, size: u32) -> Result<Self, RendererError> {
        let texture = |label: &str, usage| {
            backend.create_texture(&TextureDescriptor {
                label: Some(label.into()),
                width: size,
                height: size,
                mip_levels: 1,
                format: TextureFormat::Depth32Float,
                usage,
                initial_state: ResourceState::PIXEL_SHADER_RESOURCE,
            })
        };
        Ok(Self {
            shadow_map: texture(
                "Shadow map",
                TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
            )?,
            static_cache: texture(
                "Static shadow map cache",
                TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
            )?,
        })
    }

    fn targets(&self) -> ShadowTargets {
        ShadowTargets {
            shadow_map: self.shadow_map.id(),
            static_cache: self.static_cache.id(),
        }
    }
}

/// Structured buffers read by lit materials.
#[derive(Debug)]
struct LightBuffers {
    point_lights: Arc<Buffer>,
    spot_lights: Arc<Buffer>,
    decals: Arc<Buffer>,
    spot_shadow_infos: Arc<Buffer>,
    point_shadow_infos: Arc<Buffer>,
}

impl LightBuffers {
    fn create(
        backend: &dyn RenderBackend,
        config: &FrameGraphConfig,
    ) -> Result<Self, RendererError> {
        let buffer = |label: &str, count: usize, stride: usize| {
            backend.create_buffer(&BufferDescriptor {
                label: Some(label.into()),
                size: (count * stride) as u64,
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                initial_state: ResourceState::SHADER_RESOURCE,
            })
        };
        Ok(Self {
            point_lights: buffer(
                "Point lights",
                config.max_point_lights as usize,
                std::mem::size_of::<PointLight>(),
            )?,
            spot_lights: buffer(
                "Spot lights",
                config.max_spot_lights as usize,
                std::mem::size_of::<SpotLight>(),
            )?,
            decals: buffer("Decals", config.max_decals as usize, std::mem::size_of::<Decal>())?,
            spot_shadow_infos: buffer(
                "Spot shadow infos",
                MAX_SPOT_SHADOW_PASSES,
                std::mem::size_of::<SpotShadowInfo>(),
            )?,
            point_shadow_infos: buffer(
                "Point shadow infos",
                MAX_POINT_SHADOW_PASSES,
                std::mem::size_of::<PointShadowInfo>(),
            )?,
        })
    }
}

/// Borrowed view of everything the recording threads read.
struct FrameRecording<'a> {
    ctx: PipelineContext<'a>,
    /// Common info for transparent materials, which may also sample the
    /// opaque depth copy.
    transparent_common: &'a CommonMaterialInfo,
    screen: &'a ScreenTargets,
    shadow_targets: ShadowTargets,
    opaque: &'a OpaqueRenderPass,
    transparent: &'a TransparentRenderPass,
    ldr: &'a LdrRenderPass,
    shadows: &'a ShadowPasses,
    culling: &'a TiledLightCulling,
    light_counts: LightCounts,
}

#[derive(Debug, Default)]
struct DepthListStats {
    draws: usize,
    culled: bool,
}

#[derive(Debug, Default)]
struct PostListStats {
    transparent_draws: usize,
    ldr_draws: usize,
    outline_draws: usize,
}

fn record_shadow_list(frame: &FrameRecording<'_>, cl: &mut CommandList) -> ShadowRecordStats {
    if frame.shadows.is_empty() {
        return ShadowRecordStats::default();
    }
    let shadow_map = frame.shadow_targets.shadow_map;
    cl.barriers().transition(
        &shadow_map,
        ResourceState::PIXEL_SHADER_RESOURCE,
        ResourceState::DEPTH_WRITE,
    );
    let stats = record_shadow_passes(cl, frame.ctx.library, frame.shadow_targets, frame.shadows);
    cl.barriers().transition(
        &shadow_map,
        ResourceState::DEPTH_WRITE,
        ResourceState::PIXEL_SHADER_RESOURCE,
    );
    stats
}

fn record_depth_list(
    frame: &FrameRecording<'_>,
    cl: &mut CommandList,
    events: Vec<ComputeEvent>,
) -> DepthListStats {
    let screen = frame.screen;
    let depth = screen.depth_stencil.id();

    record_compute_events(cl, &frame.ctx, "Before depth prepass", events);

    cl.begin_event("Depth prepass");
    cl.set_render_targets(&[screen.velocities.id(), screen.object_ids.id()], Some(depth));
    cl.set_viewport(screen.full_rect());
    cl.clear_depth(depth, 1.0, &[]);
    cl.clear_render_target(screen.velocities.id(), Vec4::ZERO);
    cl.clear_render_target(screen.object_ids.id(), Vec4::ZERO);

    let opaque = frame.opaque;
    let mut draws = 0;
    for prepass in [
        opaque.static_depth_prepass(),
        opaque.dynamic_depth_prepass(),
        opaque.animated_depth_prepass(),
    ] {
        prepass.record(cl, &frame.ctx);
        draws += prepass.len();
    }
    cl.end_event();

    cl.barriers().transition(
        &screen.depth_stencil,
        ResourceState::DEPTH_WRITE,
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
    );
    let culled = frame.culling.record(cl, &frame.ctx, depth, frame.light_counts);
    cl.barriers().transition(
        &screen.depth_stencil,
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
        ResourceState::DEPTH_WRITE,
    );

    DepthListStats { draws, culled }
}

fn record_opaque_list(
    frame: &FrameRecording<'_>,
    cl: &mut CommandList,
    events: Vec<ComputeEvent>,
) -> usize {
    let screen = frame.screen;

    record_compute_events(cl, &frame.ctx, "Before opaque", events);

    cl.begin_event("Opaque light pass");
    cl.set_render_targets(&[screen.hdr_color.id()], Some(screen.depth_stencil.id()));
    cl.set_viewport(screen.full_rect());
    cl.clear_render_target(screen.hdr_color.id(), Vec4::ZERO);
    frame.opaque.pass().record(cl, &frame.ctx);
    cl.end_event();

    // Transparent materials sample the opaque depth while the real depth
    // buffer stays bound for testing.
    cl.barriers()
        .transition(
            &screen.depth_stencil,
            ResourceState::DEPTH_WRITE,
            ResourceState::COPY_SOURCE,
        )
        .transition(
            &screen.opaque_depth,
            ResourceState::SHADER_RESOURCE,
            ResourceState::COPY_DEST,
        );
    cl.copy_resource(screen.depth_stencil.id(), screen.opaque_depth.id());

    frame.opaque.pass().len()
}

fn record_post_list(
    frame: &FrameRecording<'_>,
    cl: &mut CommandList,
    events: Vec<ComputeEvent>,
) -> PostListStats {
    let screen = frame.screen;
    let builtin = frame.ctx.library.builtin();
    let depth = screen.depth_stencil.id();
    let mut stats = PostListStats::default();

    cl.barriers()
        .transition_begin(
            &screen.opaque_depth,
            ResourceState::COPY_DEST,
            ResourceState::SHADER_RESOURCE,
        )
        .transition(
            &screen.depth_stencil,
            ResourceState::COPY_SOURCE,
            ResourceState::DEPTH_WRITE,
        )
        .transition(
            &screen.frame_result,
            ResourceState::PRESENT,
            ResourceState::UNORDERED_ACCESS,
        );

    record_compute_events(cl, &frame.ctx, "Before transparent & post processing", events);

    cl.barriers().transition_end(
        &screen.opaque_depth,
        ResourceState::COPY_DEST,
        ResourceState::SHADER_RESOURCE,
    );

    if !frame.transparent.is_empty() {
        let ctx = PipelineContext {
            common: frame.transparent_common,
            ..frame.ctx
        };
        cl.begin_event("Transparent light pass");
        cl.set_render_targets(&[screen.hdr_color.id()], Some(depth));
        cl.set_viewport(screen.full_rect());
        frame.transparent.pass().record(cl, &ctx);
        stats.transparent_draws = frame.transparent.pass().len();
        cl.end_event();
    }

    let groups_x = bucketize(screen.width, POST_PROCESSING_BLOCK_SIZE);
    let groups_y = bucketize(screen.height, POST_PROCESSING_BLOCK_SIZE);

    cl.begin_event("Post processing");
    cl.barriers().transition(
        &screen.hdr_color,
        ResourceState::RENDER_TARGET,
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
    );
    cl.set_pipeline(builtin.tonemap);
    cl.set_constants(ROOT_CAMERA, frame.ctx.camera);
    cl.bind_resource(0, screen.hdr_color.id());
    cl.bind_resource(1, screen.ldr_color.id());
    cl.dispatch(groups_x, groups_y, 1);
    cl.barriers()
        .transition(
            &screen.hdr_color,
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
            ResourceState::RENDER_TARGET,
        )
        .transition(
            &screen.ldr_color,
            ResourceState::UNORDERED_ACCESS,
            ResourceState::RENDER_TARGET,
        );
    cl.end_event();

    let ldr = frame.ldr;
    if !ldr.ldr_pass().is_empty() || !ldr.overlays().is_empty() {
        cl.begin_event("LDR pass");
        cl.set_render_targets(&[screen.ldr_color.id()], Some(depth));
        cl.set_viewport(screen.full_rect());
        ldr.ldr_pass().record(cl, &frame.ctx);
        ldr.overlays().record(cl, &frame.ctx);
        stats.ldr_draws = ldr.ldr_pass().len() + ldr.overlays().len();
        cl.end_event();
    }
    stats.outline_draws =
        record_outlines(cl, &frame.ctx, ldr.outlines(), screen.ldr_color.id(), depth);

    cl.begin_event("Present");
    cl.barriers().transition(
        &screen.ldr_color,
        ResourceState::RENDER_TARGET,
        ResourceState::NON_PIXEL_SHADER_RESOURCE,
    );
    cl.set_pipeline(builtin.present);
    cl.bind_resource(0, screen.ldr_color.id());
    cl.bind_resource(1, screen.frame_result.id());
    cl.dispatch(groups_x, groups_y, 1);
    cl.barriers()
        .transition(
            &screen.ldr_color,
            ResourceState::NON_PIXEL_SHADER_RESOURCE,
            ResourceState::UNORDERED_ACCESS,
        )
        .transition(
            &screen.frame_result,
            ResourceState::UNORDERED_ACCESS,
            ResourceState::PRESENT,
        );
    cl.present(screen.frame_result.id());
    cl.end_event();

    stats
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
}

/// Drives one frame at a time through the frame graph.
///
/// Frames may overlap with GPU execution: before frame `N` starts, the CPU
/// waits until frame `N - frames_in_flight` has completed on the graphics
/// queue.
pub struct FrameRenderer {
    backend: Arc<dyn RenderBackend>,
    config: FrameGraphConfig,
    library: PipelineLibrary,

    opaque: OpaqueRenderPass,
    transparent: TransparentRenderPass,
    ldr: LdrRenderPass,
    shadows: ShadowPasses,
    compute: ComputePass,

    culling: TiledLightCulling,
    shadow_cache: ShadowMapCache,
    invalidate_shadows: bool,
    spot_shadow_infos: Vec<SpotShadowInfo>,
    point_shadow_infos: Vec<PointShadowInfo>,

    screen: ScreenTargets,
    shadow_textures: ShadowTextures,
    light_buffers: LightBuffers,

    camera: CameraUniformData,
    frame_index: u64,
    frame_fences: Vec<FenceValue>,
    in_frame: bool,
}

impl FrameRenderer {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        config: FrameGraphConfig,
    ) -> Result<Self, RendererError> {
        config.validate()?;

        let device: &dyn RenderBackend = backend.as_ref();
        let library = PipelineLibrary::new(device)?;
        let screen = ScreenTargets::create(device, config.width, config.height)?;
        let shadow_textures = ShadowTextures::create(device, config.shadow_atlas_size)?;
        let light_buffers = LightBuffers::create(device, &config)?;
        let mut culling = TiledLightCulling::new(config.tile_size, config.max_indices_per_tile);
        culling.allocate_if_necessary(device, config.width, config.height)?;

        log::info!(
            "Created frame renderer on {} ({}x{}, shadow atlas {}, {} frame(s) in flight, \
             {} recording thread(s))",
            backend.name(),
            config.width,
            config.height,
            config.shadow_atlas_size,
            config.frames_in_flight,
            config.recording_threads
        );

        Ok(Self {
            shadow_cache: ShadowMapCache::new(
                config.shadow_atlas_size,
                config.static_shadow_caching,
            ),
            frame_fences: vec![FenceValue::NONE; config.frames_in_flight as usize],
            backend,
            library,
            opaque: OpaqueRenderPass::new(),
            transparent: TransparentRenderPass::new(),
            ldr: LdrRenderPass::new(),
            shadows: ShadowPasses::new(),
            compute: ComputePass::new(),
            culling,
            invalidate_shadows: false,
            spot_shadow_infos: Vec::with_capacity(MAX_SPOT_SHADOW_PASSES),
            point_shadow_infos: Vec::with_capacity(MAX_POINT_SHADOW_PASSES),
            screen,
            shadow_textures,
            light_buffers,
            camera: Camera::default().uniform_data(config.width, config.height),
            frame_index: 0,
            in_frame: false,
            config,
        })
    }

    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn library(&self) -> &PipelineLibrary {
        &self.library
    }

    /// Material pipelines are registered here, outside of frames.
    pub fn library_mut(&mut self) -> &mut PipelineLibrary {
        &mut self.library
    }

    /// Index of the next frame to be submitted.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn size(&self) -> (u32, u32) {
        (self.screen.width, self.screen.height)
    }

    /// Resize the screen targets and the culling grid.
    ///
    /// Waits for the graphics queue to go idle before replacing resources.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        assert!(!self.in_frame, "Cannot resize the renderer in the middle of a frame");
        if (width, height) == self.size() {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(RendererError::InvalidConfig(format!(
                "render size must be non-zero, got {}x{}",
                width, height
            )));
        }

        self.backend.flush(QueueType::Graphics);
        let device: &dyn RenderBackend = self.backend.as_ref();
        self.screen = ScreenTargets::create(device, width, height)?;
        self.culling.allocate_if_necessary(device, width, height)?;
        self.config.width = width;
        self.config.height = height;
        log::info!("Resized frame renderer to {}x{}", width, height);
        Ok(())
    }

    /// Start a frame seen through `camera`.
    ///
    /// Blocks until the frame that last used this frame's slot has finished
    /// on the GPU, then clears all passes.
    pub fn begin_frame(&mut self, camera: &Camera) -> Result<(), RendererError> {
        assert!(!self.in_frame, "begin_frame called twice without end_frame");

        let slot = (self.frame_index % self.frame_fences.len() as u64) as usize;
        let fence = self.frame_fences[slot];
        if !self.backend.is_fence_complete(QueueType::Graphics, fence) {
            log::debug!(
                "Frame {}: waiting for graphics fence {}",
                self.frame_index,
                fence.0
            );
            self.backend.wait_for_fence(QueueType::Graphics, fence);
        }

        self.opaque.reset();
        self.transparent.reset();
        self.ldr.reset();
        self.shadows.reset();
        self.compute.reset();
        self.spot_shadow_infos.clear();
        self.point_shadow_infos.clear();

        self.opaque.set_view(camera);
        self.transparent.set_view(camera);
        self.camera = camera.uniform_data(self.screen.width, self.screen.height);
        self.invalidate_shadows = self.shadow_cache.take_invalidation();

        self.in_frame = true;
        Ok(())
    }

    fn assert_in_frame(&self) {
        assert!(self.in_frame, "Draws can only be submitted between begin_frame and end_frame");
    }

    pub fn opaque_pass_mut(&mut self) -> &mut OpaqueRenderPass {
        self.assert_in_frame();
        &mut self.opaque
    }

    pub fn transparent_pass_mut(&mut self) -> &mut TransparentRenderPass {
        self.assert_in_frame();
        &mut self.transparent
    }

    pub fn ldr_pass_mut(&mut self) -> &mut LdrRenderPass {
        self.assert_in_frame();
        &mut self.ldr
    }

    pub fn compute_pass_mut(&mut self) -> &mut ComputePass {
        self.assert_in_frame();
        &mut self.compute
    }

    pub fn shadow_passes(&self) -> &ShadowPasses {
        &self.shadows
    }

    pub fn shadow_cache(&self) -> &ShadowMapCache {
        &self.shadow_cache
    }

    /// Used to toggle caching or to invalidate it from outside a frame.
    pub fn shadow_cache_mut(&mut self) -> &mut ShadowMapCache {
        &mut self.shadow_cache
    }

    /// Open the sun's shadow pass for this frame.
    pub fn add_sun_shadow_pass(&mut self, sun: &DirectionalLight) -> &mut SunShadowRenderPass {
        self.assert_in_frame();
        self.shadows
            .add_sun_light(&mut self.shadow_cache, sun, self.invalidate_shadows)
    }

    /// Open a spot light shadow pass and point the light at its shadow info.
    pub fn add_spot_shadow_pass(
        &mut self,
        light_id: u32,
        light: &mut SpotLight,
        resolution: u32,
    ) -> &mut SpotShadowRenderPass {
        self.assert_in_frame();
        let (pass, info) = self.shadows.add_spot_light(
            &mut self.shadow_cache,
            light_id,
            light,
            resolution,
            self.invalidate_shadows,
        );
        light.shadow_info_index = self.spot_shadow_infos.len() as i32;
        self.spot_shadow_infos.push(info);
        pass
    }

    /// Open a point light shadow pass and point the light at its shadow info.
    pub fn add_point_shadow_pass(
        &mut self,
        light_id: u32,
        light: &mut PointLight,
        resolution: u32,
    ) -> &mut PointShadowRenderPass {
        self.assert_in_frame();
        let (pass, info) = self.shadows.add_point_light(
            &mut self.shadow_cache,
            light_id,
            light,
            resolution,
            self.invalidate_shadows,
        );
        light.shadow_info_index = self.point_shadow_infos.len() as i32;
        self.point_shadow_infos.push(info);
        pass
    }

    /// Return the atlas regions of a light that no longer casts shadows.
    pub fn release_shadow_light(&mut self, key: ShadowLightKey) -> Option<ShadowMapViewport> {
        self.shadow_cache.release(key)
    }

    fn upload_lights(&self, lights: &FrameLights<'_>) -> Result<(), RendererError> {
        assert!(
            lights.point_lights.len() <= self.config.max_point_lights as usize,
            "Too many point lights ({} > {})",
            lights.point_lights.len(),
            self.config.max_point_lights
        );
        assert!(
            lights.spot_lights.len() <= self.config.max_spot_lights as usize,
            "Too many spot lights ({} > {})",
            lights.spot_lights.len(),
            self.config.max_spot_lights
        );
        assert!(
            lights.decals.len() <= self.config.max_decals as usize,
            "Too many decals ({} > {})",
            lights.decals.len(),
            self.config.max_decals
        );

        let buffers = &self.light_buffers;
        let uploads: [(&Buffer, &[u8]); 5] = [
            (&buffers.point_lights, bytemuck::cast_slice(lights.point_lights)),
            (&buffers.spot_lights, bytemuck::cast_slice(lights.spot_lights)),
            (&buffers.decals, bytemuck::cast_slice(lights.decals)),
            (&buffers.spot_shadow_infos, bytemuck::cast_slice(&self.spot_shadow_infos)),
            (&buffers.point_shadow_infos, bytemuck::cast_slice(&self.point_shadow_infos)),
        ];
        for (buffer, data) in uploads {
            if !data.is_empty() {
                self.backend.write_buffer(buffer, 0, data)?;
            }
        }
        Ok(())
    }

    fn common_material_info(&self) -> CommonMaterialInfo {
        let (grid, index_list) = self.culling.output_resources();
        let buffers = &self.light_buffers;
        CommonMaterialInfo {
            tiled_culling_grid: grid,
            tiled_object_index_list: index_list,
            point_lights: Some(buffers.point_lights.id()),
            spot_lights: Some(buffers.spot_lights.id()),
            decals: Some(buffers.decals.id()),
            shadow_map: Some(self.shadow_textures.shadow_map.id()),
            spot_shadow_infos: Some(buffers.spot_shadow_infos.id()),
            point_shadow_infos: Some(buffers.point_shadow_infos.id()),
            opaque_depth: None,
        }
    }

    /// Sort, record and submit the frame.
    pub fn end_frame(&mut self, lights: &FrameLights<'_>) -> Result<FrameStats, RendererError> {
        assert!(self.in_frame, "end_frame called without begin_frame");
        self.in_frame = false;

        self.opaque.sort();
        self.transparent.sort();
        self.ldr.sort();
        self.upload_lights(lights)?;

        let frame_start_events = self.compute.take(ComputeStage::FrameStart);
        let depth_events = self.compute.take(ComputeStage::BeforeDepthPrepass);
        let opaque_events = self.compute.take(ComputeStage::BeforeOpaque);
        let post_events = self.compute.take(ComputeStage::BeforeTransparentAndPostProcessing);

        let common = self.common_material_info();
        let transparent_common = CommonMaterialInfo {
            opaque_depth: Some(self.screen.opaque_depth.id()),
            ..common
        };
        let ctx = PipelineContext {
            library: &self.library,
            camera: &self.camera,
            common: &common,
        };

        let mut stats = FrameStats {
            frame_index: self.frame_index,
            ..Default::default()
        };

        if !frame_start_events.is_empty() {
            let mut cl = self
                .backend
                .create_command_list(QueueType::Compute, "Frame start compute");
            record_compute_events(&mut cl, &ctx, "Frame start", frame_start_events);
            cl.close();
            stats.pipeline_binds += cl.pipeline_bind_count();
            stats.command_lists += 1;
            stats.compute_fence = Some(
                self.backend
                    .execute_command_lists(QueueType::Compute, vec![cl])?,
            );
        }

        let frame = FrameRecording {
            ctx,
            transparent_common: &transparent_common,
            screen: &self.screen,
            shadow_targets: self.shadow_textures.targets(),
            opaque: &self.opaque,
            transparent: &self.transparent,
            ldr: &self.ldr,
            shadows: &self.shadows,
            culling: &self.culling,
            light_counts: LightCounts {
                point_lights: lights.point_lights.len() as u32,
                spot_lights: lights.spot_lights.len() as u32,
                decals: lights.decals.len() as u32,
            },
        };

        let mut shadow_cl = self.backend.create_command_list(QueueType::Graphics, "Shadow maps");
        let mut depth_cl = self
            .backend
            .create_command_list(QueueType::Graphics, "Depth prepass & culling");
        let mut opaque_cl = self.backend.create_command_list(QueueType::Graphics, "Opaque");
        let mut post_cl = self
            .backend
            .create_command_list(QueueType::Graphics, "Transparent & post processing");

        let parallel = self.config.recording_threads > 1;
        let (shadow_stats, depth_stats, opaque_draws, post_stats) = if parallel {
            let frame = &frame;
            let shadow_list = &mut shadow_cl;
            let depth_list = &mut depth_cl;
            let opaque_list = &mut opaque_cl;
            thread::scope(|s| {
                let shadow = s.spawn(move || record_shadow_list(frame, shadow_list));
                let depth = s.spawn(move || record_depth_list(frame, depth_list, depth_events));
                let opaque = s.spawn(move || record_opaque_list(frame, opaque_list, opaque_events));
                let post = record_post_list(frame, &mut post_cl, post_events);
                (join(shadow), join(depth), join(opaque), post)
            })
        } else {
            (
                record_shadow_list(&frame, &mut shadow_cl),
                record_depth_list(&frame, &mut depth_cl, depth_events),
                record_opaque_list(&frame, &mut opaque_cl, opaque_events),
                record_post_list(&frame, &mut post_cl, post_events),
            )
        };

        stats.shadow = shadow_stats;
        stats.depth_prepass_draws = depth_stats.draws;
        stats.light_culling_dispatched = depth_stats.culled;
        stats.opaque_draws = opaque_draws;
        stats.transparent_draws = post_stats.transparent_draws;
        stats.ldr_draws = post_stats.ldr_draws;
        stats.outline_draws = post_stats.outline_draws;

        let mut lists = [shadow_cl, depth_cl, opaque_cl, post_cl];
        for cl in &mut lists {
            cl.close();
            stats.pipeline_binds += cl.pipeline_bind_count();
        }
        stats.command_lists += lists.len();
        let [shadow_cl, depth_cl, opaque_cl, post_cl] = lists;

        self.backend
            .execute_command_lists(QueueType::Graphics, vec![shadow_cl])?;
        if let Some(compute_fence) = stats.compute_fence {
            self.backend
                .queue_wait(QueueType::Graphics, QueueType::Compute, compute_fence);
        }
        stats.graphics_fence = self
            .backend
            .execute_command_lists(QueueType::Graphics, vec![depth_cl, opaque_cl, post_cl])?;

        let slot = (self.frame_index % self.frame_fences.len() as u64) as usize;
        self.frame_fences[slot] = stats.graphics_fence;
        self.frame_index += 1;

        log::debug!(
            "Frame {}: {} command list(s), {} pipeline bind(s), graphics fence {}",
            stats.frame_index,
            stats.command_lists,
            stats.pipeline_binds,
            stats.graphics_fence.0
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for FrameRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("frame_index", &self.frame_index)
            .field("in_frame", &self.in_frame)
            .finish_non_exhaustive()
    }
}
