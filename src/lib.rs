//! RedLilium Frame Graph - the per-frame core of a deferred renderer
//!
//! Producers submit draws into render pass containers during a frame; the
//! [`FrameRenderer`] sorts them, records them on parallel command lists and
//! submits the lists to a graphics and a compute queue in a fixed order.
//!
//! # Features
//! - Batched resource barriers flushed at scope exit, with split-barrier checks
//! - Sorted command buffers with one pipeline setup per run of equal pipelines
//! - Opaque (depth prepass + color), transparent, LDR, shadow and compute passes
//! - Shadow atlas with a static-geometry cache reused while lights stand still
//! - Tiled light and decal culling, with a CPU reference implementation
//! - A dummy backend that logs every submission, for tests and tools

pub mod backend;
pub mod error;
pub mod passes;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod scene;
pub mod shadow_map;

pub use error::RendererError;
pub use renderer::{FrameLights, FrameRenderer, FrameStats};

use pipeline::{MAX_INDICES_PER_TILE, LIGHT_CULLING_TILE_SIZE, TILE_COUNT_MASK};
use shadow_map::SHADOW_ATLAS_ROOT_SIZE;

/// Configuration for creating a [`FrameRenderer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGraphConfig {
    /// Render width in pixels
    pub width: u32,
    /// Render height in pixels
    pub height: u32,
    /// Edge of a light culling tile, in pixels
    pub tile_size: u32,
    /// Light/decal indices per tile, for each of the opaque and transparent halves
    pub max_indices_per_tile: u32,
    pub max_point_lights: u32,
    pub max_spot_lights: u32,
    pub max_decals: u32,
    /// Width and height of the shadow atlas
    pub shadow_atlas_size: u32,
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: u32,
    /// Command lists are recorded on parallel threads when greater than one
    pub recording_threads: u32,
    /// Reuse rendered static shadow geometry while lights do not move
    pub static_shadow_caching: bool,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            tile_size: LIGHT_CULLING_TILE_SIZE,
            max_indices_per_tile: MAX_INDICES_PER_TILE,
            max_point_lights: TILE_COUNT_MASK,
            max_spot_lights: TILE_COUNT_MASK,
            max_decals: TILE_COUNT_MASK,
            shadow_atlas_size: 6144,
            frames_in_flight: 2,
            recording_threads: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            static_shadow_caching: true,
        }
    }
}

impl FrameGraphConfig {
    /// Check the configuration before any GPU resource is created.
    pub fn validate(&self) -> Result<(), RendererError> {
        let invalid = |msg: String| Err(RendererError::InvalidConfig(msg));

        if self.width == 0 || self.height == 0 {
            return invalid(format!(
                "render size must be non-zero, got {}x{}",
                self.width, self.height
            ));
        }
        if self.tile_size == 0 || self.max_indices_per_tile == 0 {
            return invalid("tile size and indices per tile must be non-zero".into());
        }
        if self.frames_in_flight == 0 {
            return invalid("at least one frame must be in flight".into());
        }
        for (name, capacity) in [
            ("point lights", self.max_point_lights),
            ("spot lights", self.max_spot_lights),
            ("decals", self.max_decals),
        ] {
            if capacity == 0 || capacity > TILE_COUNT_MASK {
                return invalid(format!(
                    "capacity for {} must be in 1..={}, got {}",
                    name, TILE_COUNT_MASK, capacity
                ));
            }
        }
        if self.shadow_atlas_size == 0 || self.shadow_atlas_size % SHADOW_ATLAS_ROOT_SIZE != 0 {
            return invalid(format!(
                "shadow atlas size {} must be a non-zero multiple of {}",
                self.shadow_atlas_size, SHADOW_ATLAS_ROOT_SIZE
            ));
        }
        Ok(())
    }
}
