//! Common utilities for frame graph integration tests.
//!
//! Everything runs against the [`DummyBackend`], which logs submissions
//! instead of executing them.

#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};

use redlilium_frame_graph::backend::{
    BufferDescriptor, BufferUsage, CommandList, DummyBackend, IndexFormat, PipelineDescriptor,
    RenderBackend, ResourceState, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};
use redlilium_frame_graph::pipeline::{
    DrawPipeline, Pipeline, PipelineContext, PipelineLibrary, TransformConstants, ROOT_OBJECT,
    ROOT_TRANSFORM,
};
use redlilium_frame_graph::render_graph::{
    DefaultRenderCommand, IndexBufferView, MeshGeometry, SubmeshInfo, VertexBufferView,
};
use redlilium_frame_graph::scene::Camera;
use redlilium_frame_graph::{FrameGraphConfig, FrameRenderer};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Materials
// ============================================================================

/// Names under which [`TestMaterial`] pipelines are registered.
pub const MATERIAL_NAMES: [&str; 3] = ["test material 0", "test material 1", "test material 2"];

/// A lit material. Each `N` is a distinct pipeline.
pub struct TestMaterial<const N: usize>;

impl<const N: usize> Pipeline for TestMaterial<N> {
    fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>) {
        cl.set_pipeline(ctx.library.material(MATERIAL_NAMES[N]));
        ctx.bind_common(cl);
    }
}

impl<const N: usize> DrawPipeline<DefaultRenderCommand<u32>> for TestMaterial<N> {
    fn render(cl: &mut CommandList, ctx: &PipelineContext<'_>, rc: &DefaultRenderCommand<u32>) {
        cl.set_constants(ROOT_TRANSFORM, &TransformConstants::new(ctx.camera, rc.transform));
        cl.set_constants(ROOT_OBJECT, &rc.material);
        rc.geometry.draw(cl);
    }
}

pub fn register_test_materials(backend: &dyn RenderBackend, library: &mut PipelineLibrary) {
    for name in MATERIAL_NAMES {
        library
            .register_material(backend, &PipelineDescriptor::graphics(name))
            .expect("material registration");
    }
}

// ============================================================================
// Resources
// ============================================================================

pub fn create_triangle_mesh(backend: &dyn RenderBackend) -> MeshGeometry {
    let vertices = backend
        .create_buffer(&BufferDescriptor {
            label: Some("Triangle vertices".into()),
            size: 3 * 12,
            usage: BufferUsage::VERTEX,
            initial_state: ResourceState::VERTEX_AND_CONSTANT_BUFFER,
        })
        .expect("vertex buffer");
    let indices = backend
        .create_buffer(&BufferDescriptor {
            label: Some("Triangle indices".into()),
            size: 3 * 2,
            usage: BufferUsage::INDEX,
            initial_state: ResourceState::INDEX_BUFFER,
        })
        .expect("index buffer");
    MeshGeometry::new(
        VertexBufferView::whole(vertices, 12),
        IndexBufferView::whole(indices, IndexFormat::Uint16),
        SubmeshInfo::new(0, 3, 0, 3),
    )
}

pub fn create_render_target(backend: &dyn RenderBackend, label: &str) -> Arc<Texture> {
    backend
        .create_texture(&TextureDescriptor {
            label: Some(label.into()),
            width: 64,
            height: 64,
            mip_levels: 1,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
            initial_state: ResourceState::RENDER_TARGET,
        })
        .expect("render target")
}

pub fn translation(x: f32, y: f32, z: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, y, z))
}

/// Camera at `+5 z` looking at the origin.
pub fn test_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
}

/// Deterministic pseudo random numbers in `[0, 1)`.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }

    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

// ============================================================================
// Renderer Context
// ============================================================================

/// A renderer on a dummy backend with the test materials registered.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub renderer: FrameRenderer,
    pub mesh: MeshGeometry,
}

impl TestContext {
    pub fn new(config: FrameGraphConfig) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let mut renderer =
            FrameRenderer::new(backend.clone(), config).expect("renderer creation");
        register_test_materials(backend.as_ref(), renderer.library_mut());
        let mesh = create_triangle_mesh(backend.as_ref());
        Self {
            backend,
            renderer,
            mesh,
        }
    }

    pub fn with_size(width: u32, height: u32, recording_threads: u32) -> Self {
        Self::new(FrameGraphConfig {
            width,
            height,
            recording_threads,
            ..Default::default()
        })
    }
}
