//! Common types shared between backends

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Usage mode a GPU resource is in.
    ///
    /// Every read or write of a resource requires it to be in a state that
    /// permits the operation. Moving between states is done with a
    /// transition barrier, see [`crate::render_graph::BarrierBatcher`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 8;
        const COPY_DEST = 1 << 9;
        const COPY_SOURCE = 1 << 10;
        const PRESENT = 1 << 11;
        const SHADER_RESOURCE =
            Self::NON_PIXEL_SHADER_RESOURCE.bits() | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

impl ResourceState {
    /// Check if this state allows the GPU to write the resource.
    pub fn is_write(self) -> bool {
        self.intersects(
            Self::RENDER_TARGET | Self::UNORDERED_ACCESS | Self::DEPTH_WRITE | Self::COPY_DEST,
        )
    }

    /// Read states combine freely, a write state must stand alone.
    pub fn is_valid(self) -> bool {
        !self.is_write() || self.bits().count_ones() == 1
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const INDEX = 1 << 2;
        const VERTEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
        const INDIRECT = 1 << 6;
        const UNORDERED_ACCESS = 1 << 7;
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgba32Uint,
    R11G11B10Float,
    R32Float,
    R32Uint,
    R16Float,
    Rg16Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    /// Size of one texel of the top mip level.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R11G11B10Float
            | TextureFormat::R32Float
            | TextureFormat::R32Uint
            | TextureFormat::Rg16Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float | TextureFormat::Rgba32Uint => 16,
        }
    }
}

/// Unique identity of a GPU resource.
///
/// Barriers and recorded commands refer to resources by id only; the
/// resource objects themselves are reference counted and owned by whoever
/// created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    /// Allocate a fresh, process-unique id.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value (for debugging).
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Hardware queue a command list is executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
}

impl QueueType {
    pub(crate) fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
        }
    }
}

/// Value a queue fence reaches once a submission has completed.
///
/// Values are monotonically increasing per queue; zero means "nothing was
/// ever submitted" and is always complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

impl FenceValue {
    pub const NONE: Self = Self(0);
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub initial_state: ResourceState,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::STORAGE,
            initial_state: ResourceState::COMMON,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            initial_state: ResourceState::COMMON,
        }
    }
}

/// A GPU buffer.
///
/// Shared between producers and passes through `Arc<Buffer>`.
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    descriptor: BufferDescriptor,
}

impl Buffer {
    pub(crate) fn new(descriptor: BufferDescriptor) -> Self {
        Self {
            id: ResourceId::next(),
            descriptor,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }
}

/// A GPU texture.
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    descriptor: TextureDescriptor,
}

impl Texture {
    pub(crate) fn new(descriptor: TextureDescriptor) -> Self {
        Self {
            id: ResourceId::next(),
            descriptor,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
}

/// Handle to a pipeline state object (shaders + fixed function state)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Kind of pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Pipeline descriptor
///
/// Shader contents are opaque to the frame graph; pipelines are identified
/// by label only.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: String,
    pub kind: PipelineKind,
}

impl PipelineDescriptor {
    pub fn graphics(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: PipelineKind::Graphics,
        }
    }

    pub fn compute(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: PipelineKind::Compute,
        }
    }
}

/// Integer pixel rectangle used for viewports, clears and region copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Index buffer element format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ids_are_unique() {
        let a = Buffer::new(BufferDescriptor::default());
        let b = Texture::new(TextureDescriptor::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_write_states() {
        assert!(ResourceState::DEPTH_WRITE.is_write());
        assert!(ResourceState::UNORDERED_ACCESS.is_write());
        assert!(!ResourceState::PIXEL_SHADER_RESOURCE.is_write());
        assert!(!ResourceState::COMMON.is_write());
    }

    #[test]
    fn test_state_combinations() {
        assert!(ResourceState::COMMON.is_valid());
        assert!(ResourceState::DEPTH_WRITE.is_valid());
        assert!((ResourceState::DEPTH_READ | ResourceState::PIXEL_SHADER_RESOURCE).is_valid());
        assert!(ResourceState::SHADER_RESOURCE.is_valid());
        assert!(!(ResourceState::DEPTH_WRITE | ResourceState::PIXEL_SHADER_RESOURCE).is_valid());
        assert!(!(ResourceState::RENDER_TARGET | ResourceState::COPY_DEST).is_valid());
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(TextureFormat::Rgba32Uint.bytes_per_pixel(), 16);
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::R32Float.is_depth());
    }
}
