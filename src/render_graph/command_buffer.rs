//! Sorted, type-erased draw record storage.
//!
//! # Architecture
//!
//! A [`SortedCommandBuffer`] stores heterogeneous draw records without boxing
//! each of them:
//!
//! - Records of one `(pipeline, record type)` pair live contiguously in a
//!   typed slab. A slab is created the first time the pair is seen and is
//!   kept, with its capacity, across frames.
//! - Each slab carries a small header with the pipeline's `setup` function
//!   and a monomorphized `render` trampoline that downcasts the record and
//!   forwards to [`DrawPipeline::render`].
//! - The buffer itself is an index of `(sort key, slab, slot)` entries. Only
//!   this index is sorted.
//!
//! [`clear`](SortedCommandBuffer::clear) drops every record in place and
//! resets all slabs to length zero; memory is reused the next frame.
//!
//! # Sort keys
//!
//! | Key | Pass | Order |
//! |-----|------|-------|
//! | `u64` from [`PipelineId`] | opaque color, LDR | groups equal pipelines |
//! | `f32` view depth | depth prepass | front to back |
//! | `f32` negated view depth | transparent | back to front |

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::backend::CommandList;
use crate::pipeline::{DrawPipeline, PipelineContext, PipelineId};

/// Default byte budget of one buffer's record storage.
pub const DEFAULT_ARENA_CAPACITY: u64 = 4 << 30;

/// Binds a pipeline's state. See [`crate::pipeline::Pipeline::setup`].
pub type SetupFn = fn(&mut CommandList, &PipelineContext<'_>);

/// Type-erased per-draw function.
pub type RenderFn = fn(&mut CommandList, &PipelineContext<'_>, &dyn Any);

/// Value draw records are ordered by.
pub trait SortKey: Copy + Send + Sync + 'static {
    fn compare(&self, other: &Self) -> Ordering;
}

impl SortKey for u64 {
    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl SortKey for f32 {
    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

trait ErasedSlab: Send + Sync {
    fn get(&self, slot: usize) -> &dyn Any;
    fn clear(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Slab<C> {
    items: Vec<C>,
}

impl<C: Send + Sync + 'static> ErasedSlab for Slab<C> {
    fn get(&self, slot: usize) -> &dyn Any {
        &self.items[slot]
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SlabHeader {
    pipeline: PipelineId,
    setup: SetupFn,
    render: RenderFn,
    storage: Box<dyn ErasedSlab>,
}

#[derive(Debug, Clone, Copy)]
struct Entry<K> {
    key: K,
    slab: u32,
    slot: u32,
}

fn render_trampoline<P, C>(cl: &mut CommandList, ctx: &PipelineContext<'_>, data: &dyn Any)
where
    P: DrawPipeline<C>,
    C: 'static,
{
    let Some(command) = data.downcast_ref::<C>() else {
        unreachable!("draw record does not match the type its pipeline was registered with");
    };
    P::render(cl, ctx, command);
}

/// One record visited during iteration.
pub struct DrawEntry<'a, K> {
    pub key: K,
    pub pipeline: PipelineId,
    pub setup: SetupFn,
    render: RenderFn,
    data: &'a dyn Any,
}

impl<'a, K> DrawEntry<'a, K> {
    /// Type-erased record payload.
    pub fn data(&self) -> &'a dyn Any {
        self.data
    }

    pub fn downcast<C: 'static>(&self) -> Option<&'a C> {
        self.data.downcast_ref::<C>()
    }

    pub fn render_fn(&self) -> RenderFn {
        self.render
    }

    /// Forward the record to its pipeline's `render`.
    pub fn render(&self, cl: &mut CommandList, ctx: &PipelineContext<'_>) {
        (self.render)(cl, ctx, self.data);
    }
}

/// Arena-backed queue of draw records, sortable by key.
pub struct SortedCommandBuffer<K: SortKey> {
    entries: Vec<Entry<K>>,
    slabs: Vec<SlabHeader>,
    slab_lookup: HashMap<TypeId, usize>,
    arena_used: u64,
    arena_capacity: u64,
}

impl<K: SortKey> SortedCommandBuffer<K> {
    pub fn new() -> Self {
        Self::with_arena_capacity(DEFAULT_ARENA_CAPACITY)
    }

    pub fn with_arena_capacity(bytes: u64) -> Self {
        Self {
            entries: Vec::new(),
            slabs: Vec::new(),
            slab_lookup: HashMap::new(),
            arena_used: 0,
            arena_capacity: bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of record storage used this frame.
    pub fn arena_used(&self) -> u64 {
        self.arena_used
    }

    fn slab_for<P, C>(&mut self) -> usize
    where
        P: DrawPipeline<C>,
        C: Send + Sync + 'static,
    {
        let type_id = TypeId::of::<(P, C)>();
        if let Some(&index) = self.slab_lookup.get(&type_id) {
            return index;
        }

        let index = self.slabs.len();
        self.slabs.push(SlabHeader {
            pipeline: PipelineId::of::<P>(),
            setup: P::setup,
            render: render_trampoline::<P, C>,
            storage: Box::new(Slab::<C> { items: Vec::new() }),
        });
        self.slab_lookup.insert(type_id, index);
        index
    }

    /// Construct a record in place and return it for further initialization.
    ///
    /// # Panics
    ///
    /// Panics if the arena byte budget is exhausted.
    pub fn emplace_with<P, C>(&mut self, key: K, make: impl FnOnce() -> C) -> &mut C
    where
        P: DrawPipeline<C>,
        C: Send + Sync + 'static,
    {
        let slab_index = self.slab_for::<P, C>();

        self.arena_used += std::mem::size_of::<C>().max(1) as u64;
        assert!(
            self.arena_used <= self.arena_capacity,
            "Command buffer arena exhausted ({} of {} bytes used)",
            self.arena_used,
            self.arena_capacity
        );

        let Some(slab) = self.slabs[slab_index]
            .storage
            .as_any_mut()
            .downcast_mut::<Slab<C>>()
        else {
            unreachable!("slab registered for a different record type");
        };

        let slot = slab.items.len();
        slab.items.push(make());
        self.entries.push(Entry {
            key,
            slab: slab_index as u32,
            slot: slot as u32,
        });
        &mut slab.items[slot]
    }

    /// Construct a default record in place and return it to be filled in.
    pub fn emplace_back<P, C>(&mut self, key: K) -> &mut C
    where
        P: DrawPipeline<C>,
        C: Default + Send + Sync + 'static,
    {
        self.emplace_with::<P, C>(key, C::default)
    }

    /// Move an already built record into the buffer.
    pub fn push_back<P, C>(&mut self, key: K, command: C) -> &mut C
    where
        P: DrawPipeline<C>,
        C: Send + Sync + 'static,
    {
        self.emplace_with::<P, C>(key, move || command)
    }

    /// Order records by key, ascending. Equal keys keep insertion order.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.key.compare(&b.key));
    }

    /// Drop all records and reset the arena. Capacity is kept.
    pub fn clear(&mut self) {
        for slab in &mut self.slabs {
            slab.storage.clear();
        }
        self.entries.clear();
        self.arena_used = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = DrawEntry<'_, K>> + '_ {
        self.entries.iter().map(move |entry| {
            let header = &self.slabs[entry.slab as usize];
            DrawEntry {
                key: entry.key,
                pipeline: header.pipeline,
                setup: header.setup,
                render: header.render,
                data: header.storage.get(entry.slot as usize),
            }
        })
    }

    /// Record every draw in iteration order, calling `setup` only when the
    /// pipeline changes. Returns the number of `setup` calls.
    pub fn record(&self, cl: &mut CommandList, ctx: &PipelineContext<'_>) -> usize {
        let mut current = None;
        let mut setups = 0;
        for entry in self.iter() {
            if current != Some(entry.pipeline) {
                (entry.setup)(cl, ctx);
                current = Some(entry.pipeline);
                setups += 1;
            }
            entry.render(cl, ctx);
        }
        setups
    }
}

impl<K: SortKey> Default for SortedCommandBuffer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SortKey + std::fmt::Debug> std::fmt::Debug for SortedCommandBuffer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedCommandBuffer")
            .field("len", &self.entries.len())
            .field("slabs", &self.slabs.len())
            .field("arena_used", &self.arena_used)
            .finish()
    }
}
