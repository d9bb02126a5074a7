//! Pipelines and the pipeline library.
//!
//! A *pipeline* in the frame graph is a pair of functions:
//!
//! - [`Pipeline::setup`] runs once per run of equal pipelines. It binds the
//!   pipeline state object and shared resources.
//! - [`DrawPipeline::render`] runs once per draw record. It sets per-draw
//!   constants and issues the draw.
//!
//! Pipelines are zero-sized marker types. Draw records are stored next to
//! their pipeline's function pointers in a
//! [`SortedCommandBuffer`](crate::render_graph::SortedCommandBuffer), so no
//! virtual dispatch happens per draw.
//!
//! Pipeline state objects live in a [`PipelineLibrary`], created once per
//! renderer and handed to every recording thread through a
//! [`PipelineContext`].
//!
//! # Example
//!
//! ```ignore
//! struct PbrPipeline;
//!
//! impl Pipeline for PbrPipeline {
//!     fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>) {
//!         cl.set_pipeline(ctx.library.material("pbr"));
//!         ctx.bind_common(cl);
//!     }
//! }
//!
//! impl DrawPipeline<DefaultRenderCommand<PbrMaterial>> for PbrPipeline {
//!     fn render(
//!         cl: &mut CommandList,
//!         ctx: &PipelineContext<'_>,
//!         rc: &DefaultRenderCommand<PbrMaterial>,
//!     ) {
//!         let constants = TransformConstants::new(ctx.camera, rc.transform);
//!         cl.set_constants(ROOT_TRANSFORM, &constants);
//!         rc.geometry.draw(cl);
//!     }
//! }
//! ```

pub mod depth_prepass;
pub mod light_culling;
pub mod outline;
pub mod shadow;

pub use depth_prepass::*;
pub use light_culling::*;
pub use outline::*;
pub use shadow::*;

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::{
    BackendError, BackendResult, CommandList, PipelineDescriptor, PipelineHandle, PipelineKind,
    RenderBackend, ResourceId,
};
use crate::scene::CameraUniformData;

/// Root slot of per-draw transform constants.
pub const ROOT_TRANSFORM: u32 = 0;
/// Root slot of the camera constants.
pub const ROOT_CAMERA: u32 = 1;
/// Root slot of per-draw object data (ids, material parameters).
pub const ROOT_OBJECT: u32 = 2;
/// First root slot of the resources shared by all lit materials.
pub const ROOT_COMMON: u32 = 8;

/// Identity of a pipeline type.
///
/// Derived from the pipeline's [`TypeId`], so it is stable within one
/// process run. Used as the sort key of pipeline-sorted command buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub fn of<P: ?Sized + 'static>() -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<P>().hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// State binding half of a pipeline.
pub trait Pipeline: 'static {
    fn setup(cl: &mut CommandList, ctx: &PipelineContext<'_>);
}

/// Per-draw half of a pipeline for draw records of type `C`.
pub trait DrawPipeline<C>: Pipeline {
    fn render(cl: &mut CommandList, ctx: &PipelineContext<'_>, command: &C);
}

/// Resources shared by every lit material: light lists, culling output,
/// shadow map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommonMaterialInfo {
    pub tiled_culling_grid: Option<ResourceId>,
    pub tiled_object_index_list: Option<ResourceId>,
    pub point_lights: Option<ResourceId>,
    pub spot_lights: Option<ResourceId>,
    pub decals: Option<ResourceId>,
    pub shadow_map: Option<ResourceId>,
    pub spot_shadow_infos: Option<ResourceId>,
    pub point_shadow_infos: Option<ResourceId>,
    pub opaque_depth: Option<ResourceId>,
}

impl CommonMaterialInfo {
    fn resources(&self) -> [Option<ResourceId>; 9] {
        [
            self.tiled_culling_grid,
            self.tiled_object_index_list,
            self.point_lights,
            self.spot_lights,
            self.decals,
            self.shadow_map,
            self.spot_shadow_infos,
            self.point_shadow_infos,
            self.opaque_depth,
        ]
    }
}

/// Everything `setup` and `render` functions may read.
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    pub library: &'a PipelineLibrary,
    pub camera: &'a CameraUniformData,
    pub common: &'a CommonMaterialInfo,
}

impl PipelineContext<'_> {
    /// Bind camera constants and the common material resources.
    pub fn bind_common(&self, cl: &mut CommandList) {
        cl.set_constants(ROOT_CAMERA, self.camera);
        for (slot, resource) in self.common.resources().into_iter().enumerate() {
            if let Some(resource) = resource {
                cl.bind_resource(ROOT_COMMON + slot as u32, resource);
            }
        }
    }
}

/// Per-draw transforms as seen by vertex shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TransformConstants {
    pub mvp: Mat4,
    pub model: Mat4,
}

impl TransformConstants {
    pub fn new(camera: &CameraUniformData, model: Mat4) -> Self {
        Self {
            mvp: camera.view_proj * model,
            model,
        }
    }
}

/// Pipeline state objects the frame graph itself needs.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinPipelines {
    pub depth_only_static: PipelineHandle,
    pub depth_only_dynamic: PipelineHandle,
    pub depth_only_animated: PipelineHandle,
    pub shadow: PipelineHandle,
    pub point_shadow: PipelineHandle,
    pub shadow_map_copy: PipelineHandle,
    pub outline_marker: PipelineHandle,
    pub outline_drawer: PipelineHandle,
    pub world_space_frusta: PipelineHandle,
    pub light_culling: PipelineHandle,
    pub tonemap: PipelineHandle,
    pub present: PipelineHandle,
}

impl BuiltinPipelines {
    fn create(backend: &dyn RenderBackend) -> BackendResult<Self> {
        let graphics = |label: &str| backend.create_pipeline(&PipelineDescriptor::graphics(label));
        let compute = |label: &str| backend.create_pipeline(&PipelineDescriptor::compute(label));
        Ok(Self {
            depth_only_static: graphics("Static Depth Only")?,
            depth_only_dynamic: graphics("Dynamic Depth Only")?,
            depth_only_animated: graphics("Animated Depth Only")?,
            shadow: graphics("Shadow")?,
            point_shadow: graphics("Point Light Shadow")?,
            shadow_map_copy: graphics("Shadow Map Copy")?,
            outline_marker: graphics("Outline Marker")?,
            outline_drawer: graphics("Outline Drawer")?,
            world_space_frusta: compute("World Space Tiled Frusta")?,
            light_culling: compute("Tiled Light Culling")?,
            tonemap: compute("Tonemap")?,
            present: compute("Present")?,
        })
    }
}

/// All pipeline state objects of a renderer.
///
/// Created once and shared immutably by all recording threads.
#[derive(Debug)]
pub struct PipelineLibrary {
    builtin: BuiltinPipelines,
    materials: HashMap<String, PipelineHandle>,
}

impl PipelineLibrary {
    pub fn new(backend: &dyn RenderBackend) -> BackendResult<Self> {
        let builtin = BuiltinPipelines::create(backend)?;
        log::debug!("Created built-in pipelines");
        Ok(Self {
            builtin,
            materials: HashMap::new(),
        })
    }

    pub fn builtin(&self) -> &BuiltinPipelines {
        &self.builtin
    }

    /// Create a named material pipeline.
    ///
    /// Registering a name twice replaces the old pipeline. Materials are
    /// drawn, so compute descriptors are rejected.
    pub fn register_material(
        &mut self,
        backend: &dyn RenderBackend,
        descriptor: &PipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if descriptor.kind != PipelineKind::Graphics {
            return Err(BackendError::PipelineCreationFailed(format!(
                "material '{}' must be a graphics pipeline",
                descriptor.label
            )));
        }
        let handle = backend.create_pipeline(descriptor)?;
        self.materials.insert(descriptor.label.clone(), handle);
        Ok(handle)
    }

    /// Look up a material pipeline registered with
    /// [`register_material`](Self::register_material).
    ///
    /// # Panics
    ///
    /// Panics if no pipeline with this name was registered.
    pub fn material(&self, name: &str) -> PipelineHandle {
        match self.materials.get(name) {
            Some(handle) => *handle,
            None => panic!("Pipeline '{}' is not registered", name),
        }
    }

    pub fn try_material(&self, name: &str) -> Option<PipelineHandle> {
        self.materials.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    struct A;
    struct B;

    #[test]
    fn test_pipeline_ids_distinct_and_stable() {
        assert_eq!(PipelineId::of::<A>(), PipelineId::of::<A>());
        assert_ne!(PipelineId::of::<A>(), PipelineId::of::<B>());
    }

    #[test]
    fn test_material_registration() {
        let backend = DummyBackend::new();
        let mut library = PipelineLibrary::new(&backend).unwrap();
        let handle = library
            .register_material(&backend, &PipelineDescriptor::graphics("pbr"))
            .unwrap();
        assert_eq!(library.material("pbr"), handle);
        assert_ne!(library.builtin().depth_only_static, handle);
        assert!(library.try_material("missing").is_none());
    }

    #[test]
    fn test_compute_material_rejected() {
        let backend = DummyBackend::new();
        let mut library = PipelineLibrary::new(&backend).unwrap();
        let err = library
            .register_material(&backend, &PipelineDescriptor::compute("pbr"))
            .unwrap_err();
        assert!(matches!(err, BackendError::PipelineCreationFailed(_)));
        assert!(library.try_material("pbr").is_none());
    }

    #[test]
    #[should_panic(expected = "Pipeline 'missing' is not registered")]
    fn test_missing_material_panics() {
        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        library.material("missing");
    }
}
