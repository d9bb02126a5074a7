//! Tiled light and decal culling
//!
//! The screen is divided into square tiles. After the depth prepass, two
//! compute dispatches sort lights and decals into tiles:
//!
//! 1. **World space frusta**: one thread per tile builds the four side
//!    planes of the tile's frustum.
//! 2. **Culling**: one group per tile tests every point light, spot light
//!    and decal against the tile frustum and the tile's depth range, and
//!    appends the survivors to a shared index list through an atomic
//!    counter.
//!
//! Each tile cell of the output grid holds two ranges into the index list:
//! one for opaque geometry (limited by the tile's depth bounds) and one for
//! transparent geometry (limited by the near plane and the tile's far
//! bound). Within a range, point light indices come first, then spot lights,
//! then decals; the counts are packed into 10-bit fields.
//!
//! [`cull_tiles`] is the CPU version of the same algorithm. It is used by
//! tests and by backends without compute support.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4, Vec4Swizzles};
use static_assertions::const_assert_eq;

use super::{PipelineContext, ROOT_CAMERA, ROOT_OBJECT};
use crate::backend::{
    BackendResult, Buffer, BufferDescriptor, BufferUsage, CommandList, RenderBackend,
    ResourceId, ResourceState, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};
use crate::scene::{plane_from_points, CameraUniformData, Decal, PointLight, SpotLight};

/// Default tile edge length in pixels.
pub const LIGHT_CULLING_TILE_SIZE: u32 = 16;
/// Default index budget of one tile, per opaque / transparent range.
pub const MAX_INDICES_PER_TILE: u32 = 1024;
/// Threads per group edge of the frusta dispatch.
pub const WORLD_SPACE_FRUSTA_BLOCK_SIZE: u32 = 16;

/// Width of one packed count field.
pub const TILE_COUNT_BITS: u32 = 10;
/// Largest count a packed field holds.
pub const TILE_COUNT_MASK: u32 = (1 << TILE_COUNT_BITS) - 1;

/// Number of groups of `bucket_size` needed to cover `count` items.
pub fn bucketize(count: u32, bucket_size: u32) -> u32 {
    count.div_ceil(bucket_size)
}

/// Tiles needed to cover a `width` x `height` viewport.
pub fn tile_count(width: u32, height: u32, tile_size: u32) -> (u32, u32) {
    (bucketize(width, tile_size), bucketize(height, tile_size))
}

/// Pack point, spot and decal counts into one grid word.
///
/// # Panics
///
/// Panics if a count does not fit its 10-bit field.
pub fn pack_tile_counts(points: u32, spots: u32, decals: u32) -> u32 {
    assert!(
        points <= TILE_COUNT_MASK && spots <= TILE_COUNT_MASK && decals <= TILE_COUNT_MASK,
        "Tile counts ({}, {}, {}) exceed the {}-bit count fields",
        points,
        spots,
        decals,
        TILE_COUNT_BITS
    );
    points | (spots << TILE_COUNT_BITS) | (decals << (2 * TILE_COUNT_BITS))
}

/// Inverse of [`pack_tile_counts`]: `(points, spots, decals)`.
pub fn unpack_tile_counts(packed: u32) -> (u32, u32, u32) {
    (
        packed & TILE_COUNT_MASK,
        (packed >> TILE_COUNT_BITS) & TILE_COUNT_MASK,
        (packed >> (2 * TILE_COUNT_BITS)) & TILE_COUNT_MASK,
    )
}

/// World-space side planes of one tile, normals pointing inwards.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightCullingViewFrustum {
    /// left, right, top, bottom
    pub planes: [Vec4; 4],
}

const_assert_eq!(std::mem::size_of::<LightCullingViewFrustum>(), 64);

impl LightCullingViewFrustum {
    /// Conservative sphere test against the side planes.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.xyz().dot(center) + p.w >= -radius)
    }
}

/// One texel of the culling grid.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TileCell {
    pub opaque_offset: u32,
    pub opaque_counts: u32,
    pub transparent_offset: u32,
    pub transparent_counts: u32,
}

const_assert_eq!(std::mem::size_of::<TileCell>(), 16);

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct WorldSpaceFrustaConstants {
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub tile_size: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightCullingConstants {
    pub num_tiles_x: u32,
    pub num_point_lights: u32,
    pub num_spot_lights: u32,
    pub num_decals: u32,
}

/// Number of lights and decals uploaded this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCounts {
    pub point_lights: u32,
    pub spot_lights: u32,
    pub decals: u32,
}

impl LightCounts {
    pub fn is_empty(&self) -> bool {
        self.point_lights == 0 && self.spot_lights == 0 && self.decals == 0
    }
}

/// GPU resources and dispatch recording of tiled culling.
#[derive(Debug)]
pub struct TiledLightCulling {
    tile_size: u32,
    max_indices_per_tile: u32,
    tiles_x: u32,
    tiles_y: u32,
    grid: Option<Arc<Texture>>,
    index_counter: Option<Arc<Buffer>>,
    index_list: Option<Arc<Buffer>>,
    frusta: Option<Arc<Buffer>>,
}

impl TiledLightCulling {
    pub fn new(tile_size: u32, max_indices_per_tile: u32) -> Self {
        Self {
            tile_size,
            max_indices_per_tile,
            tiles_x: 0,
            tiles_y: 0,
            grid: None,
            index_counter: None,
            index_list: None,
            frusta: None,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tiles(&self) -> (u32, u32) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn grid(&self) -> Option<&Arc<Texture>> {
        self.grid.as_ref()
    }

    pub fn index_list(&self) -> Option<&Arc<Buffer>> {
        self.index_list.as_ref()
    }

    pub fn index_counter(&self) -> Option<&Arc<Buffer>> {
        self.index_counter.as_ref()
    }

    pub fn frusta(&self) -> Option<&Arc<Buffer>> {
        self.frusta.as_ref()
    }

    /// Size the culling buffers for a `width` x `height` viewport.
    ///
    /// Buffers are only recreated when the number of tiles changes. Returns
    /// whether anything was (re)allocated.
    pub fn allocate_if_necessary(
        &mut self,
        backend: &dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> BackendResult<bool> {
        let (tiles_x, tiles_y) = tile_count(width, height, self.tile_size);
        if self.grid.is_some() && (tiles_x, tiles_y) == (self.tiles_x, self.tiles_y) {
            return Ok(false);
        }

        let num_tiles = tiles_x as u64 * tiles_y as u64;

        self.grid = Some(backend.create_texture(&TextureDescriptor {
            label: Some("Tiled culling grid".into()),
            width: tiles_x,
            height: tiles_y,
            mip_levels: 1,
            format: TextureFormat::Rgba32Uint,
            usage: TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
            initial_state: ResourceState::UNORDERED_ACCESS,
        })?);

        if self.index_counter.is_none() {
            self.index_counter = Some(backend.create_buffer(&BufferDescriptor {
                label: Some("Tiled index counter".into()),
                size: std::mem::size_of::<u32>() as u64,
                usage: BufferUsage::STORAGE | BufferUsage::UNORDERED_ACCESS,
                initial_state: ResourceState::UNORDERED_ACCESS,
            })?);
        }

        self.index_list = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("Tiled index list".into()),
            size: num_tiles
                * self.max_indices_per_tile as u64
                * 2
                * std::mem::size_of::<u32>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::UNORDERED_ACCESS,
            initial_state: ResourceState::UNORDERED_ACCESS,
        })?);

        self.frusta = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("Tiled frusta".into()),
            size: num_tiles * std::mem::size_of::<LightCullingViewFrustum>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::UNORDERED_ACCESS,
            initial_state: ResourceState::UNORDERED_ACCESS,
        })?);

        log::info!(
            "Allocated light culling buffers for {}x{} tiles ({}x{} pixels)",
            tiles_x,
            tiles_y,
            width,
            height
        );
        self.tiles_x = tiles_x;
        self.tiles_y = tiles_y;
        Ok(true)
    }

    /// Grid and index list resource ids, for the common material info.
    pub fn output_resources(&self) -> (Option<ResourceId>, Option<ResourceId>) {
        (
            self.grid.as_ref().map(|t| t.id()),
            self.index_list.as_ref().map(|b| b.id()),
        )
    }

    /// Record both culling dispatches.
    ///
    /// Light and decal buffers are taken from `ctx.common`. With nothing to
    /// cull the grid is cleared instead, so lit shaders see empty tiles.
    /// Returns whether the dispatches were recorded.
    ///
    /// # Panics
    ///
    /// Panics if called before [`allocate_if_necessary`](Self::allocate_if_necessary).
    pub fn record(
        &self,
        cl: &mut CommandList,
        ctx: &PipelineContext<'_>,
        depth_buffer: ResourceId,
        counts: LightCounts,
    ) -> bool {
        let (Some(grid), Some(counter), Some(index_list), Some(frusta)) = (
            &self.grid,
            &self.index_counter,
            &self.index_list,
            &self.frusta,
        ) else {
            panic!("Light culling recorded before its buffers were allocated");
        };

        if counts.is_empty() {
            cl.clear_uav(grid.id(), [0; 4]);
            cl.barriers().uav(grid);
            return false;
        }

        let builtin = ctx.library.builtin();
        cl.begin_event("Cull lights & decals");

        cl.begin_event("Create world space frusta");
        cl.set_pipeline(builtin.world_space_frusta);
        cl.set_constants(ROOT_CAMERA, ctx.camera);
        cl.set_constants(
            ROOT_OBJECT,
            &WorldSpaceFrustaConstants {
                num_tiles_x: self.tiles_x,
                num_tiles_y: self.tiles_y,
                tile_size: self.tile_size,
                _padding: 0,
            },
        );
        cl.bind_resource(0, frusta.id());
        cl.dispatch(
            bucketize(self.tiles_x, WORLD_SPACE_FRUSTA_BLOCK_SIZE),
            bucketize(self.tiles_y, WORLD_SPACE_FRUSTA_BLOCK_SIZE),
            1,
        );
        cl.end_event();

        cl.barriers().uav(frusta);

        cl.begin_event("Sort objects into tiles");
        cl.clear_uav(counter.id(), [0; 4]);
        cl.set_pipeline(builtin.light_culling);
        cl.set_constants(ROOT_CAMERA, ctx.camera);
        cl.set_constants(
            ROOT_OBJECT,
            &LightCullingConstants {
                num_tiles_x: self.tiles_x,
                num_point_lights: counts.point_lights,
                num_spot_lights: counts.spot_lights,
                num_decals: counts.decals,
            },
        );
        let inputs = [
            Some(depth_buffer),
            Some(frusta.id()),
            ctx.common.point_lights,
            ctx.common.spot_lights,
            ctx.common.decals,
            Some(grid.id()),
            Some(counter.id()),
            Some(index_list.id()),
        ];
        for (slot, resource) in inputs.into_iter().enumerate() {
            if let Some(resource) = resource {
                cl.bind_resource(slot as u32, resource);
            }
        }
        cl.dispatch(self.tiles_x, self.tiles_y, 1);
        cl.end_event();

        cl.barriers().uav(grid).uav(index_list);

        cl.end_event();
        true
    }
}

/// Output of [`cull_tiles`]: the grid and the index list as the GPU would
/// write them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CullingGrid {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub cells: Vec<TileCell>,
    pub indices: Vec<u32>,
}

/// Indices referenced by one range of a tile cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileObjects<'a> {
    pub point_lights: &'a [u32],
    pub spot_lights: &'a [u32],
    pub decals: &'a [u32],
}

impl CullingGrid {
    pub fn cell(&self, x: u32, y: u32) -> &TileCell {
        &self.cells[(y * self.tiles_x + x) as usize]
    }

    fn objects(&self, offset: u32, counts: u32) -> TileObjects<'_> {
        let (points, spots, decals) = unpack_tile_counts(counts);
        let start = offset as usize;
        let spots_start = start + points as usize;
        let decals_start = spots_start + spots as usize;
        TileObjects {
            point_lights: &self.indices[start..spots_start],
            spot_lights: &self.indices[spots_start..decals_start],
            decals: &self.indices[decals_start..decals_start + decals as usize],
        }
    }

    pub fn opaque_objects(&self, x: u32, y: u32) -> TileObjects<'_> {
        let cell = self.cell(x, y);
        self.objects(cell.opaque_offset, cell.opaque_counts)
    }

    pub fn transparent_objects(&self, x: u32, y: u32) -> TileObjects<'_> {
        let cell = self.cell(x, y);
        self.objects(cell.transparent_offset, cell.transparent_counts)
    }
}

/// Side planes of tile `(x, y)`.
pub fn tile_frustum(
    camera: &CameraUniformData,
    tile_size: u32,
    x: u32,
    y: u32,
) -> LightCullingViewFrustum {
    let width = camera.near_far.z;
    let height = camera.near_far.w;
    let x0 = (x * tile_size) as f32;
    let y0 = (y * tile_size) as f32;
    let x1 = ((x + 1) * tile_size) as f32;
    let y1 = ((y + 1) * tile_size) as f32;
    let x1 = x1.min(width);
    let y1 = y1.min(height);

    let near = |px: f32, py: f32| camera.unproject(px, py, 0.0);
    let far = |px: f32, py: f32| camera.unproject(px, py, 1.0);
    let inside = camera.unproject((x0 + x1) * 0.5, (y0 + y1) * 0.5, 0.5);

    let oriented = |plane: Vec4| {
        if plane.xyz().dot(inside) + plane.w < 0.0 {
            -plane
        } else {
            plane
        }
    };

    // Each side plane passes through the near corner and both far corners
    // of its edge.
    let side = |ax: f32, ay: f32, bx: f32, by: f32| {
        oriented(plane_from_points(near(ax, ay), far(ax, ay), far(bx, by)))
    };

    LightCullingViewFrustum {
        planes: [
            side(x0, y0, x0, y1),
            side(x1, y0, x1, y1),
            side(x0, y0, x1, y0),
            side(x0, y1, x1, y1),
        ],
    }
}

/// Cull lights and decals into tiles on the CPU.
///
/// `tile_depth_bounds` holds the `(min, max)` view depth of the opaque
/// geometry per tile, row-major. Without it every tile spans the whole
/// view depth range.
///
/// Each range holds at most `max_indices_per_tile` indices. When a tile
/// overflows, point lights win over spot lights, which win over decals.
#[allow(clippy::too_many_arguments)]
pub fn cull_tiles(
    camera: &CameraUniformData,
    tile_size: u32,
    max_indices_per_tile: u32,
    tile_depth_bounds: Option<&[(f32, f32)]>,
    point_lights: &[PointLight],
    spot_lights: &[SpotLight],
    decals: &[Decal],
) -> CullingGrid {
    let (tiles_x, tiles_y) = tile_count(
        camera.near_far.z as u32,
        camera.near_far.w as u32,
        tile_size,
    );
    if let Some(bounds) = tile_depth_bounds {
        assert_eq!(
            bounds.len(),
            (tiles_x * tiles_y) as usize,
            "Expected one depth range per tile"
        );
    }

    let near = camera.near_far.x;
    let far = camera.near_far.y;
    let view_depth = |center: Vec3| camera.view_depth(center);

    let spheres = |kind: usize| -> Vec<(Vec3, f32)> {
        match kind {
            0 => point_lights.iter().map(PointLight::bounding_sphere).collect(),
            1 => spot_lights.iter().map(SpotLight::bounding_sphere).collect(),
            _ => decals.iter().map(Decal::bounding_sphere).collect(),
        }
    };
    let objects = [spheres(0), spheres(1), spheres(2)];

    let mut cells = Vec::with_capacity((tiles_x * tiles_y) as usize);
    let mut indices = Vec::new();

    let append = |frustum: &LightCullingViewFrustum,
                  min_depth: f32,
                  max_depth: f32,
                  indices: &mut Vec<u32>| {
        let offset = indices.len() as u32;
        let mut counts = [0u32; 3];
        let mut remaining = max_indices_per_tile;
        for (kind, list) in objects.iter().enumerate() {
            for (index, &(center, radius)) in list.iter().enumerate() {
                if remaining == 0 || counts[kind] == TILE_COUNT_MASK {
                    break;
                }
                let depth = view_depth(center);
                if depth + radius < min_depth || depth - radius > max_depth {
                    continue;
                }
                if !frustum.intersects_sphere(center, radius) {
                    continue;
                }
                indices.push(index as u32);
                counts[kind] += 1;
                remaining -= 1;
            }
        }
        (offset, pack_tile_counts(counts[0], counts[1], counts[2]))
    };

    for y in 0..tiles_y {
        for x in 0..tiles_x {
            let frustum = tile_frustum(camera, tile_size, x, y);
            let (min_depth, max_depth) = match tile_depth_bounds {
                Some(bounds) => bounds[(y * tiles_x + x) as usize],
                None => (near, far),
            };

            let (opaque_offset, opaque_counts) =
                append(&frustum, min_depth, max_depth, &mut indices);
            let (transparent_offset, transparent_counts) =
                append(&frustum, near, max_depth, &mut indices);
            cells.push(TileCell {
                opaque_offset,
                opaque_counts,
                transparent_offset,
                transparent_counts,
            });
        }
    }

    CullingGrid {
        tiles_x,
        tiles_y,
        cells,
        indices,
    }
}
