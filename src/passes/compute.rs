//! User compute work hooked into fixed points of the frame.

use crate::backend::CommandList;
use crate::pipeline::PipelineContext;

/// Where in the frame a compute event is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeStage {
    /// On the compute queue, before any graphics work. The graphics queue
    /// waits for it (skinning, particle simulation).
    FrameStart,
    /// On the graphics queue, before the depth prepass.
    BeforeDepthPrepass,
    /// On the graphics queue, before the opaque color pass.
    BeforeOpaque,
    /// On the graphics queue, before transparent geometry and post
    /// processing.
    BeforeTransparentAndPostProcessing,
}

impl ComputeStage {
    pub const ALL: [ComputeStage; 4] = [
        ComputeStage::FrameStart,
        ComputeStage::BeforeDepthPrepass,
        ComputeStage::BeforeOpaque,
        ComputeStage::BeforeTransparentAndPostProcessing,
    ];

    fn index(self) -> usize {
        match self {
            ComputeStage::FrameStart => 0,
            ComputeStage::BeforeDepthPrepass => 1,
            ComputeStage::BeforeOpaque => 2,
            ComputeStage::BeforeTransparentAndPostProcessing => 3,
        }
    }
}

/// A recorded callback. Runs once, on the thread recording its stage.
pub type ComputeEvent = Box<dyn FnOnce(&mut CommandList, &PipelineContext<'_>) + Send>;

/// Compute events of one frame, grouped by stage.
#[derive(Default)]
pub struct ComputePass {
    events: [Vec<ComputeEvent>; 4],
}

impl ComputePass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event<F>(&mut self, stage: ComputeStage, event: F)
    where
        F: FnOnce(&mut CommandList, &PipelineContext<'_>) + Send + 'static,
    {
        self.events[stage.index()].push(Box::new(event));
    }

    pub fn len(&self, stage: ComputeStage) -> usize {
        self.events[stage.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.iter().all(Vec::is_empty)
    }

    /// Remove and return the events of `stage` for recording.
    pub fn take(&mut self, stage: ComputeStage) -> Vec<ComputeEvent> {
        std::mem::take(&mut self.events[stage.index()])
    }

    pub fn reset(&mut self) {
        for events in &mut self.events {
            events.clear();
        }
    }
}

impl std::fmt::Debug for ComputePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ComputePass");
        for stage in ComputeStage::ALL {
            s.field(&format!("{:?}", stage), &self.len(stage));
        }
        s.finish()
    }
}

/// Record `events` in order into `cl`, each inside a debug event.
pub fn record_compute_events(
    cl: &mut CommandList,
    ctx: &PipelineContext<'_>,
    label: &str,
    events: Vec<ComputeEvent>,
) {
    if events.is_empty() {
        return;
    }
    cl.begin_event(label);
    for event in events {
        event(cl, ctx);
    }
    cl.end_event();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, QueueType};
    use crate::pipeline::{CommonMaterialInfo, PipelineLibrary};
    use crate::scene::Camera;

    #[test]
    fn test_events_grouped_and_taken_in_order() {
        let mut pass = ComputePass::new();
        pass.add_event(ComputeStage::BeforeOpaque, |cl, _| cl.dispatch(1, 1, 1));
        pass.add_event(ComputeStage::BeforeOpaque, |cl, _| cl.dispatch(2, 1, 1));
        pass.add_event(ComputeStage::FrameStart, |cl, _| cl.dispatch(3, 1, 1));
        assert_eq!(pass.len(ComputeStage::BeforeOpaque), 2);

        let backend = DummyBackend::new();
        let library = PipelineLibrary::new(&backend).unwrap();
        let camera = Camera::default().uniform_data(8, 8);
        let common = CommonMaterialInfo::default();
        let ctx = PipelineContext {
            library: &library,
            camera: &camera,
            common: &common,
        };

        let mut cl = CommandList::new(QueueType::Graphics, "test");
        let events = pass.take(ComputeStage::BeforeOpaque);
        record_compute_events(&mut cl, &ctx, "Before opaque", events);
        assert_eq!(pass.len(ComputeStage::BeforeOpaque), 0);
        assert_eq!(pass.len(ComputeStage::FrameStart), 1);
        assert_eq!(cl.event_names().collect::<Vec<_>>(), vec!["Before opaque"]);

        pass.reset();
        assert!(pass.is_empty());
    }
}
