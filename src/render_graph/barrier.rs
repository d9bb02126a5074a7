//! Batched resource barriers.
//!
//! [`BarrierBatcher`] collects transition, UAV and aliasing barriers and
//! records them into its command list as one call. The batch is flushed when
//! [`BarrierBatcher::submit`] is called or when the batcher is dropped, so a
//! batch built in a single statement is always flushed by the end of that
//! statement:
//!
//! ```ignore
//! cl.barriers()
//!     .transition(&depth, ResourceState::DEPTH_WRITE, ResourceState::NON_PIXEL_SHADER_RESOURCE)
//!     .uav(&grid);
//! ```

use std::sync::Arc;

use crate::backend::{
    BarrierSplit, Buffer, CommandList, ResourceBarrier, ResourceId, ResourceState, Subresource,
    Texture,
};

/// Maximum number of barriers a single batch can hold.
pub const MAX_BATCHED_BARRIERS: usize = 16;

/// Anything a barrier can refer to.
///
/// Returning `None` means "no resource"; barriers on it are skipped.
pub trait BarrierResource {
    fn barrier_id(&self) -> Option<ResourceId>;
}

impl BarrierResource for ResourceId {
    fn barrier_id(&self) -> Option<ResourceId> {
        Some(*self)
    }
}

impl BarrierResource for Buffer {
    fn barrier_id(&self) -> Option<ResourceId> {
        Some(self.id())
    }
}

impl BarrierResource for Texture {
    fn barrier_id(&self) -> Option<ResourceId> {
        Some(self.id())
    }
}

impl<T: BarrierResource + ?Sized> BarrierResource for Arc<T> {
    fn barrier_id(&self) -> Option<ResourceId> {
        (**self).barrier_id()
    }
}

impl<T: BarrierResource + ?Sized> BarrierResource for &T {
    fn barrier_id(&self) -> Option<ResourceId> {
        (**self).barrier_id()
    }
}

impl<T: BarrierResource> BarrierResource for Option<T> {
    fn barrier_id(&self) -> Option<ResourceId> {
        self.as_ref().and_then(|r| r.barrier_id())
    }
}

/// Fixed-capacity batch of pending barriers bound to a command list.
pub struct BarrierBatcher<'a> {
    cl: &'a mut CommandList,
    barriers: [Option<ResourceBarrier>; MAX_BATCHED_BARRIERS],
    len: usize,
}

impl<'a> BarrierBatcher<'a> {
    pub fn new(cl: &'a mut CommandList) -> Self {
        Self {
            cl,
            barriers: [None; MAX_BATCHED_BARRIERS],
            len: 0,
        }
    }

    /// Number of barriers queued and not yet flushed.
    pub fn pending(&self) -> usize {
        self.len
    }

    fn push(&mut self, barrier: ResourceBarrier) {
        assert!(
            self.len < MAX_BATCHED_BARRIERS,
            "Barrier batch capacity of {} exceeded",
            MAX_BATCHED_BARRIERS
        );
        self.barriers[self.len] = Some(barrier);
        self.len += 1;
    }

    fn push_transition(
        &mut self,
        resource: &(impl BarrierResource + ?Sized),
        from: ResourceState,
        to: ResourceState,
        subresource: Subresource,
        split: BarrierSplit,
    ) {
        let Some(resource) = resource.barrier_id() else {
            return;
        };
        if from == to {
            return;
        }
        assert!(
            from.is_valid() && to.is_valid(),
            "Invalid transition {:?} -> {:?}: write states cannot be combined",
            from,
            to
        );
        self.push(ResourceBarrier::Transition {
            resource,
            before: from,
            after: to,
            subresource,
            split,
        });
    }

    /// Queue a full transition of all subresources.
    ///
    /// Transitions between equal states and transitions of missing resources
    /// are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the batch already holds [`MAX_BATCHED_BARRIERS`] barriers,
    /// or if either state combines a write state with any other state.
    pub fn transition(
        &mut self,
        resource: &(impl BarrierResource + ?Sized),
        from: ResourceState,
        to: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, from, to, Subresource::All, BarrierSplit::None);
        self
    }

    /// Queue a transition of a single subresource (mip level or array slice).
    pub fn transition_subresource(
        &mut self,
        resource: &(impl BarrierResource + ?Sized),
        from: ResourceState,
        to: ResourceState,
        subresource: u32,
    ) -> &mut Self {
        self.push_transition(
            resource,
            from,
            to,
            Subresource::Index(subresource),
            BarrierSplit::None,
        );
        self
    }

    /// Begin a split transition. Must be matched by
    /// [`transition_end`](Self::transition_end) with the same states on the
    /// same command list before the list is closed.
    pub fn transition_begin(
        &mut self,
        resource: &(impl BarrierResource + ?Sized),
        from: ResourceState,
        to: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, from, to, Subresource::All, BarrierSplit::BeginOnly);
        self
    }

    /// End a split transition started with
    /// [`transition_begin`](Self::transition_begin).
    pub fn transition_end(
        &mut self,
        resource: &(impl BarrierResource + ?Sized),
        from: ResourceState,
        to: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, from, to, Subresource::All, BarrierSplit::EndOnly);
        self
    }

    /// Queue a UAV barrier: all unordered-access writes to the resource
    /// complete before later accesses. No state change.
    pub fn uav(&mut self, resource: &(impl BarrierResource + ?Sized)) -> &mut Self {
        if let Some(resource) = resource.barrier_id() {
            self.push(ResourceBarrier::Uav {
                resource: Some(resource),
            });
        }
        self
    }

    /// Queue an aliasing barrier between two resources that share memory.
    pub fn aliasing(
        &mut self,
        before: &(impl BarrierResource + ?Sized),
        after: &(impl BarrierResource + ?Sized),
    ) -> &mut Self {
        self.push(ResourceBarrier::Aliasing {
            before: before.barrier_id(),
            after: after.barrier_id(),
        });
        self
    }

    /// Record all queued barriers into the command list as one call.
    ///
    /// Does nothing if no barriers are queued.
    pub fn submit(&mut self) {
        if self.len == 0 {
            return;
        }
        let batch: Vec<ResourceBarrier> = self.barriers[..self.len]
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        self.len = 0;
        self.cl.resource_barriers(&batch);
    }
}

impl Drop for BarrierBatcher<'_> {
    fn drop(&mut self) {
        self.submit();
    }
}

impl CommandList {
    /// Start a barrier batch on this list. The batch is flushed when it is
    /// dropped.
    pub fn barriers(&mut self) -> BarrierBatcher<'_> {
        BarrierBatcher::new(self)
    }
}
