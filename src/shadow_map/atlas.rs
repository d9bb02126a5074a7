//! Quadtree allocator for square regions of the shadow atlas.

use glam::Vec4;

use crate::backend::Rect;

/// Size of the atlas roots. Nothing larger can be allocated.
pub const SHADOW_ATLAS_ROOT_SIZE: u32 = 2048;
/// Smallest region the atlas hands out.
pub const SHADOW_ATLAS_MIN_SIZE: u32 = 128;

/// A square region of the shadow atlas, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShadowMapViewport {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl ShadowMapViewport {
    pub fn new(x: u32, y: u32, size: u32) -> Self {
        Self { x, y, size }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.size, self.size)
    }

    /// Viewport in normalized atlas coordinates, `(x, y, width, height)`.
    pub fn uv(&self, atlas_size: u32) -> Vec4 {
        Vec4::new(
            self.x as f32,
            self.y as f32,
            self.size as f32,
            self.size as f32,
        ) / atlas_size as f32
    }
}

/// Buddy allocator over a square atlas.
///
/// The atlas is tiled into `root_size` roots. A request takes a free region
/// of exactly its size if one exists, otherwise the smallest larger free
/// region is split into quadrants until one of the requested size exists.
/// Releasing a region whose three siblings are free merges all four back
/// into their parent.
#[derive(Debug, Clone)]
pub struct ShadowMapAtlas {
    size: u32,
    root_size: u32,
    min_size: u32,
    /// Free regions per level. Level 0 holds roots, every level halves.
    free: Vec<Vec<ShadowMapViewport>>,
}

impl ShadowMapAtlas {
    /// Atlas of `size`² texels with the default root and minimum sizes.
    pub fn new(size: u32) -> Self {
        Self::with_limits(size, SHADOW_ATLAS_ROOT_SIZE, SHADOW_ATLAS_MIN_SIZE)
    }

    pub fn with_limits(size: u32, root_size: u32, min_size: u32) -> Self {
        assert!(
            root_size.is_power_of_two() && min_size.is_power_of_two() && min_size <= root_size,
            "Shadow atlas root size {} and minimum size {} must be powers of two",
            root_size,
            min_size
        );
        assert!(
            size > 0 && size % root_size == 0,
            "Shadow atlas size {} must be a multiple of the root size {}",
            size,
            root_size
        );

        let levels = (root_size / min_size).trailing_zeros() as usize + 1;
        let mut free = vec![Vec::new(); levels];

        let roots_per_side = size / root_size;
        // Reverse so that `pop` hands out the top-left root first.
        for y in (0..roots_per_side).rev() {
            for x in (0..roots_per_side).rev() {
                free[0].push(ShadowMapViewport::new(x * root_size, y * root_size, root_size));
            }
        }

        Self {
            size,
            root_size,
            min_size,
            free,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn root_size(&self) -> u32 {
        self.root_size
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    fn level(&self, size: u32) -> usize {
        (self.root_size / size).trailing_zeros() as usize
    }

    fn level_size(&self, level: usize) -> u32 {
        self.root_size >> level
    }

    /// Whether `size` is a size this atlas can hand out.
    pub fn is_valid_size(&self, size: u32) -> bool {
        size.is_power_of_two() && size >= self.min_size && size <= self.root_size
    }

    /// Allocate a `size`² region. Returns `None` if the atlas is full.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two between the minimum and root
    /// sizes.
    pub fn allocate(&mut self, size: u32) -> Option<ShadowMapViewport> {
        assert!(
            self.is_valid_size(size),
            "Shadow map viewport size {} must be a power of two in [{}, {}]",
            size,
            self.min_size,
            self.root_size
        );

        let level = self.level(size);
        let source = (0..=level).rev().find(|&l| !self.free[l].is_empty())?;

        for l in source..level {
            let node = self.free[l].pop()?;
            let half = self.level_size(l) / 2;
            let children = &mut self.free[l + 1];
            children.push(ShadowMapViewport::new(node.x + half, node.y + half, half));
            children.push(ShadowMapViewport::new(node.x, node.y + half, half));
            children.push(ShadowMapViewport::new(node.x + half, node.y, half));
            children.push(ShadowMapViewport::new(node.x, node.y, half));
        }

        self.free[level].pop()
    }

    /// Return a region to the atlas, merging free siblings.
    ///
    /// # Panics
    ///
    /// Panics if the region is already free.
    pub fn free(&mut self, viewport: ShadowMapViewport) {
        let level = self.level(viewport.size);
        assert!(
            !self.free[level].contains(&viewport),
            "Shadow map viewport {:?} released twice",
            viewport
        );

        if level == 0 {
            self.free[0].push(viewport);
            return;
        }

        let parent_size = viewport.size * 2;
        let parent = ShadowMapViewport::new(
            viewport.x / parent_size * parent_size,
            viewport.y / parent_size * parent_size,
            parent_size,
        );
        let half = viewport.size;
        let siblings = [
            ShadowMapViewport::new(parent.x, parent.y, half),
            ShadowMapViewport::new(parent.x + half, parent.y, half),
            ShadowMapViewport::new(parent.x, parent.y + half, half),
            ShadowMapViewport::new(parent.x + half, parent.y + half, half),
        ];

        let list = &mut self.free[level];
        let all_free = siblings
            .iter()
            .filter(|s| **s != viewport)
            .all(|s| list.contains(s));

        if all_free {
            list.retain(|s| !siblings.contains(s));
            self.free(parent);
        } else {
            list.push(viewport);
        }
    }

    /// Free texels, in texels².
    pub fn free_area(&self) -> u64 {
        self.free
            .iter()
            .enumerate()
            .map(|(level, list)| {
                let size = self.level_size(level) as u64;
                list.len() as u64 * size * size
            })
            .sum()
    }

    pub fn total_area(&self) -> u64 {
        self.size as u64 * self.size as u64
    }
}
