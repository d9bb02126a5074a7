//! Recorded command lists.
//!
//! A [`CommandList`] is built by exactly one recording thread and handed to
//! [`RenderBackend::execute_command_lists`](super::RenderBackend::execute_command_lists)
//! once it is closed. Backends translate the recorded [`Command`] stream into
//! native API calls; the dummy backend keeps it for inspection.
//!
//! # Split barriers
//!
//! A split transition is recorded as a `BeginOnly` barrier followed later by
//! a matching `EndOnly` barrier for the same resource, subresource and state
//! pair. The list tracks outstanding begins and [`CommandList::close`] panics
//! if any of them was never ended.

use std::collections::HashMap;

use glam::Vec4;

use super::types::{
    FenceValue, IndexFormat, PipelineHandle, QueueType, Rect, ResourceId, ResourceState,
};

/// Subresource selector of a transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    All,
    Index(u32),
}

/// Split-barrier phase of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierSplit {
    /// Regular transition.
    None,
    /// Start of a split transition; the GPU may overlap the transition with
    /// following work.
    BeginOnly,
    /// Point by which a previously begun split transition must be complete.
    EndOnly,
}

/// A single resource barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    Transition {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
        subresource: Subresource,
        split: BarrierSplit,
    },
    /// Read/write hazard on an unordered-access resource. `None` covers all
    /// UAV accesses.
    Uav { resource: Option<ResourceId> },
    /// Resources placed in the same memory swap which one is active.
    Aliasing {
        before: Option<ResourceId>,
        after: Option<ResourceId>,
    },
}

/// Vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: ResourceId,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

/// Index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: ResourceId,
    pub offset: u64,
    pub size: u64,
    pub format: IndexFormat,
}

/// One recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginEvent(String),
    EndEvent,
    SetPipeline(PipelineHandle),
    SetViewport(Rect),
    SetRenderTargets {
        colors: Vec<ResourceId>,
        depth: Option<ResourceId>,
    },
    SetConstants {
        slot: u32,
        data: Vec<u8>,
    },
    BindResource {
        slot: u32,
        resource: ResourceId,
    },
    SetVertexBuffer {
        slot: u32,
        binding: VertexBufferBinding,
    },
    SetIndexBuffer(IndexBufferBinding),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    ResourceBarriers(Vec<ResourceBarrier>),
    ClearDepth {
        texture: ResourceId,
        depth: f32,
        /// Empty clears the whole texture.
        rects: Vec<Rect>,
    },
    ClearRenderTarget {
        texture: ResourceId,
        color: Vec4,
    },
    ClearUav {
        resource: ResourceId,
        value: [u32; 4],
    },
    CopyResource {
        src: ResourceId,
        dst: ResourceId,
    },
    /// Shader based copy of equally placed regions between two textures.
    CopyTextureRegions {
        src: ResourceId,
        dst: ResourceId,
        regions: Vec<Rect>,
    },
    Present(ResourceId),
}

type SplitKey = (ResourceId, Subresource, ResourceState, ResourceState);

/// A command list being recorded for one queue.
#[derive(Debug)]
pub struct CommandList {
    name: String,
    queue: QueueType,
    commands: Vec<Command>,
    pending_splits: HashMap<SplitKey, usize>,
    closed: bool,
}

impl CommandList {
    /// Create an empty command list for the given queue.
    pub fn new(queue: QueueType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue,
            commands: Vec::new(),
            pending_splits: HashMap::new(),
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of split transitions begun but not yet ended.
    pub fn pending_split_barriers(&self) -> usize {
        self.pending_splits.values().sum()
    }

    fn push(&mut self, command: Command) {
        assert!(!self.closed, "Command list '{}' is already closed", self.name);
        self.commands.push(command);
    }

    pub fn begin_event(&mut self, name: impl Into<String>) {
        self.push(Command::BeginEvent(name.into()));
    }

    pub fn end_event(&mut self) {
        self.push(Command::EndEvent);
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push(Command::SetPipeline(pipeline));
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.push(Command::SetViewport(viewport));
    }

    pub fn set_render_targets(&mut self, colors: &[ResourceId], depth: Option<ResourceId>) {
        self.push(Command::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    /// Set root constants from any plain-old-data value.
    pub fn set_constants<T: bytemuck::Pod>(&mut self, slot: u32, value: &T) {
        self.push(Command::SetConstants {
            slot,
            data: bytemuck::bytes_of(value).to_vec(),
        });
    }

    pub fn bind_resource(&mut self, slot: u32, resource: ResourceId) {
        self.push(Command::BindResource { slot, resource });
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, binding: VertexBufferBinding) {
        self.push(Command::SetVertexBuffer { slot, binding });
    }

    pub fn set_index_buffer(&mut self, binding: IndexBufferBinding) {
        self.push(Command::SetIndexBuffer(binding));
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    /// Record a batch of barriers as one call.
    ///
    /// Prefer [`CommandList::barriers`], which batches and flushes
    /// automatically.
    ///
    /// # Panics
    ///
    /// Panics if a split transition is begun twice without an end, or ended
    /// without a begin.
    pub fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }

        for barrier in barriers {
            if let ResourceBarrier::Transition {
                resource,
                before,
                after,
                subresource,
                split,
            } = *barrier
            {
                let key = (resource, subresource, before, after);
                match split {
                    BarrierSplit::None => {}
                    BarrierSplit::BeginOnly => {
                        let pending = self.pending_splits.entry(key).or_insert(0);
                        assert!(
                            *pending == 0,
                            "Split barrier on {:?} ({:?} -> {:?}) begun twice without an end",
                            resource,
                            before,
                            after
                        );
                        *pending += 1;
                    }
                    BarrierSplit::EndOnly => {
                        let matched = self.pending_splits.remove(&key).is_some();
                        assert!(
                            matched,
                            "Split barrier end on {:?} ({:?} -> {:?}) without a matching begin",
                            resource,
                            before,
                            after
                        );
                    }
                }
            }
        }

        self.push(Command::ResourceBarriers(barriers.to_vec()));
    }

    pub fn clear_depth(&mut self, texture: ResourceId, depth: f32, rects: &[Rect]) {
        self.push(Command::ClearDepth {
            texture,
            depth,
            rects: rects.to_vec(),
        });
    }

    pub fn clear_render_target(&mut self, texture: ResourceId, color: Vec4) {
        self.push(Command::ClearRenderTarget { texture, color });
    }

    pub fn clear_uav(&mut self, resource: ResourceId, value: [u32; 4]) {
        self.push(Command::ClearUav { resource, value });
    }

    pub fn copy_resource(&mut self, src: ResourceId, dst: ResourceId) {
        self.push(Command::CopyResource { src, dst });
    }

    pub fn copy_texture_regions(&mut self, src: ResourceId, dst: ResourceId, regions: &[Rect]) {
        if regions.is_empty() {
            return;
        }
        self.push(Command::CopyTextureRegions {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    pub fn present(&mut self, texture: ResourceId) {
        self.push(Command::Present(texture));
    }

    /// Finish recording.
    ///
    /// # Panics
    ///
    /// Panics if a split transition begun on this list has not been ended.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        assert!(
            self.pending_splits.is_empty(),
            "Command list '{}' closed with {} unmatched split barrier begin(s): {:?}",
            self.name,
            self.pending_split_barriers(),
            self.pending_splits.keys().collect::<Vec<_>>()
        );
        self.closed = true;
    }

    /// Number of recorded draw calls.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { .. } | Command::Draw { .. }))
            .count()
    }

    /// Number of recorded pipeline binds.
    pub fn pipeline_bind_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::SetPipeline(_)))
            .count()
    }

    /// Every barrier recorded in this list, in order.
    pub fn recorded_barriers(&self) -> impl Iterator<Item = &ResourceBarrier> {
        self.commands.iter().flat_map(|c| match c {
            Command::ResourceBarriers(b) => b.as_slice(),
            _ => &[][..],
        })
    }

    /// Names of the debug events opened in this list, in order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            Command::BeginEvent(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Record of one `execute_command_lists` call.
#[derive(Debug)]
pub struct Submission {
    pub queue: QueueType,
    pub lists: Vec<CommandList>,
    /// Cross-queue waits issued on this queue before the submission.
    pub waits: Vec<(QueueType, FenceValue)>,
    /// Fence value signaled once the submission completes.
    pub fence: FenceValue,
}

impl Submission {
    pub fn list_names(&self) -> Vec<&str> {
        self.lists.iter().map(|l| l.name()).collect()
    }
}
