//! Static shadow cache bookkeeping.

use std::collections::HashMap;

use super::{ShadowMapAtlas, ShadowMapViewport};

/// Unique identity of one shadow-map region.
///
/// Each region a light renders into has its own key: sun cascades by index,
/// spot lights by id and point lights by id plus hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowLightKey {
    SunCascade(u32),
    Spot(u32),
    PointHemisphere { light: u32, hemisphere: u32 },
}

#[derive(Debug, Clone, Copy)]
struct CachedAllocation {
    viewport: ShadowMapViewport,
    movement_hash: u64,
    /// Size asked for before clamping.
    requested: u32,
}

/// Result of [`ShadowMapCache::assign_viewport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowViewportAssignment {
    pub viewport: ShadowMapViewport,
    /// The static cache holds this region's static geometry from a previous
    /// frame and may be copied instead of re-rendered.
    pub static_cache_available: bool,
}

/// Shadow atlas allocations that persist across frames, keyed by light.
///
/// A light keeps its viewport as long as it requests the same size. When its
/// movement hash matches last frame's, the static geometry rendered into the
/// persistent cache texture at that viewport is still valid.
#[derive(Debug, Clone)]
pub struct ShadowMapCache {
    atlas: ShadowMapAtlas,
    allocations: HashMap<ShadowLightKey, CachedAllocation>,
    enabled: bool,
    invalidate_next_frame: bool,
}

impl ShadowMapCache {
    pub fn new(atlas_size: u32, enabled: bool) -> Self {
        Self {
            atlas: ShadowMapAtlas::new(atlas_size),
            allocations: HashMap::new(),
            enabled,
            invalidate_next_frame: false,
        }
    }

    pub fn atlas(&self) -> &ShadowMapAtlas {
        &self.atlas
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Globally enable or disable reuse of the static cache. Disabled, every
    /// light re-renders static geometry every frame.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Force every light to re-render static geometry in the next frame,
    /// e.g. after static scene geometry changed.
    pub fn invalidate(&mut self) {
        self.invalidate_next_frame = true;
    }

    /// Whether an invalidation is pending for the current frame.
    pub fn is_invalidated(&self) -> bool {
        self.invalidate_next_frame
    }

    /// Consume a pending invalidation. Called once at frame start.
    pub fn take_invalidation(&mut self) -> bool {
        std::mem::take(&mut self.invalidate_next_frame)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    fn normalize_size(&self, size: u32) -> u32 {
        size.clamp(self.atlas.min_size(), self.atlas.root_size())
            .next_power_of_two()
            .min(self.atlas.root_size())
    }

    fn allocate(&mut self, key: ShadowLightKey, size: u32) -> ShadowMapViewport {
        match self.atlas.allocate(size) {
            Some(viewport) => viewport,
            None => panic!(
                "Shadow atlas exhausted while allocating {}x{} for {:?}",
                size, size, key
            ),
        }
    }

    /// Assign an atlas region to `key` for this frame.
    ///
    /// - A new key allocates a region; the cache is not available.
    /// - A known key requesting a different size is reallocated; the cache
    ///   is not available.
    /// - A known key with the same size keeps its region; the cache is
    ///   available if `movement_hash` matches the previous frame's.
    ///
    /// The stored movement hash is updated in every case, and availability
    /// is masked by the global enable flag.
    ///
    /// # Panics
    ///
    /// Panics if the atlas has no room left.
    pub fn assign_viewport(
        &mut self,
        key: ShadowLightKey,
        movement_hash: u64,
        size: u32,
    ) -> ShadowViewportAssignment {
        let requested = size;
        let size = self.normalize_size(requested);
        let previous = self.allocations.get(&key).copied();

        // Once per light and requested size, not every frame.
        if size != requested && previous.map_or(true, |p| p.requested != requested) {
            log::warn!(
                "Shadow map resolution {} of {:?} clamped to {} \
                 (atlas supports powers of two in [{}, {}])",
                requested,
                key,
                size,
                self.atlas.min_size(),
                self.atlas.root_size()
            );
        }

        let (viewport, cache_hit) = match previous {
            None => {
                let viewport = self.allocate(key, size);
                log::trace!("Shadow region {:?} allocated at {:?}", key, viewport);
                (viewport, false)
            }
            Some(cached) if cached.viewport.size != size => {
                self.atlas.free(cached.viewport);
                let viewport = self.allocate(key, size);
                log::trace!("Shadow region {:?} reallocated at {:?}", key, viewport);
                (viewport, false)
            }
            Some(cached) => (cached.viewport, cached.movement_hash == movement_hash),
        };

        self.allocations.insert(
            key,
            CachedAllocation {
                viewport,
                movement_hash,
                requested,
            },
        );

        ShadowViewportAssignment {
            viewport,
            static_cache_available: cache_hit && self.enabled,
        }
    }

    /// Return the region of a light that no longer casts shadows.
    pub fn release(&mut self, key: ShadowLightKey) -> Option<ShadowMapViewport> {
        let cached = self.allocations.remove(&key)?;
        self.atlas.free(cached.viewport);
        Some(cached.viewport)
    }

    /// Current region of `key`, if any.
    pub fn viewport(&self, key: ShadowLightKey) -> Option<ShadowMapViewport> {
        self.allocations.get(&key).map(|a| a.viewport)
    }

    /// All currently allocated regions.
    pub fn viewports(&self) -> impl Iterator<Item = (ShadowLightKey, ShadowMapViewport)> + '_ {
        self.allocations.iter().map(|(k, a)| (*k, a.viewport))
    }
}
