//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but provides a valid
//! implementation of [`RenderBackend`] for exercising the frame graph without
//! GPU hardware. Every submission completes immediately and is kept in a
//! log that tests can inspect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::command_list::{CommandList, Submission};
use super::traits::{BackendError, BackendResult, RenderBackend};
use super::types::*;

#[derive(Debug, Default)]
struct QueueState {
    last_signaled: u64,
    completed: u64,
    pending_waits: Vec<(QueueType, FenceValue)>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    queues: [Mutex<QueueState>; 2],
    completed: Condvar,
    submissions: Mutex<Vec<Submission>>,
    next_pipeline: AtomicU64,
    uploaded_bytes: AtomicU64,
    texture_bytes: AtomicU64,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            queues: [Mutex::default(), Mutex::default()],
            completed: Condvar::new(),
            submissions: Mutex::new(Vec::new()),
            next_pipeline: AtomicU64::new(1),
            uploaded_bytes: AtomicU64::new(0),
            texture_bytes: AtomicU64::new(0),
        }
    }

    /// Drain the submission log.
    pub fn take_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.submissions.lock())
    }

    /// Number of submissions made so far and not yet taken.
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Total number of bytes written through `write_buffer`.
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Relaxed)
    }

    /// Total size of all textures created, mip chains included.
    pub fn texture_bytes(&self) -> u64 {
        self.texture_bytes.load(Ordering::Relaxed)
    }

    /// Simulate a queue lagging behind: the fence reports `value` as the
    /// last completed one until new work is submitted.
    pub fn set_completed(&self, queue: QueueType, value: FenceValue) {
        let mut state = self.queues[queue.index()].lock();
        assert!(
            value.0 <= state.last_signaled,
            "Cannot complete fence value {} which was never signaled",
            value.0
        );
        state.completed = value.0;
        self.completed.notify_all();
    }
}

fn texture_size(descriptor: &TextureDescriptor) -> u64 {
    let texel = descriptor.format.bytes_per_pixel() as u64;
    (0..descriptor.mip_levels.max(1))
        .map(|mip| {
            let width = (descriptor.width >> mip).max(1) as u64;
            let height = (descriptor.height >> mip).max(1) as u64;
            width * height * texel
        })
        .sum()
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> BackendResult<Arc<Buffer>> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        if descriptor.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                descriptor.label
            )));
        }
        Ok(Arc::new(Buffer::new(descriptor.clone())))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> BackendResult<Arc<Texture>> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                descriptor.label
            )));
        }
        let bytes = texture_size(descriptor);
        self.texture_bytes.fetch_add(bytes, Ordering::Relaxed);
        log::trace!("DummyBackend: {:?} occupies {} bytes", descriptor.label, bytes);
        Ok(Arc::new(Texture::new(descriptor.clone())))
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        log::trace!(
            "DummyBackend: creating {:?} pipeline '{}'",
            descriptor.kind,
            descriptor.label
        );
        Ok(PipelineHandle(
            self.next_pipeline.fetch_add(1, Ordering::Relaxed),
        ))
    }

    fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> BackendResult<()> {
        log::trace!(
            "DummyBackend: write_buffer {:?} offset={} len={}",
            buffer.label(),
            offset,
            data.len()
        );
        if offset + data.len() as u64 > buffer.size() {
            return Err(BackendError::BufferWriteFailed(format!(
                "write of {} bytes at {} exceeds {:?} (size {})",
                data.len(),
                offset,
                buffer.label(),
                buffer.size()
            )));
        }
        self.uploaded_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn execute_command_lists(
        &self,
        queue: QueueType,
        lists: Vec<CommandList>,
    ) -> BackendResult<FenceValue> {
        for list in &lists {
            assert!(
                list.queue() == queue,
                "Command list '{}' recorded for {:?} submitted to {:?}",
                list.name(),
                list.queue(),
                queue
            );
            assert!(
                list.is_closed(),
                "Command list '{}' submitted before being closed",
                list.name()
            );
        }

        let (fence, waits) = {
            let mut state = self.queues[queue.index()].lock();
            state.last_signaled += 1;
            // No real GPU: work completes as soon as it is submitted.
            state.completed = state.last_signaled;
            (
                FenceValue(state.last_signaled),
                std::mem::take(&mut state.pending_waits),
            )
        };
        self.completed.notify_all();

        log::trace!(
            "DummyBackend: executing {} command list(s) on {:?}, fence {}",
            lists.len(),
            queue,
            fence.0
        );

        self.submissions.lock().push(Submission {
            queue,
            lists,
            waits,
            fence,
        });
        Ok(fence)
    }

    fn queue_wait(&self, waiting: QueueType, signaling: QueueType, value: FenceValue) {
        log::trace!(
            "DummyBackend: {:?} waits for {:?} fence {}",
            waiting,
            signaling,
            value.0
        );
        self.queues[waiting.index()]
            .lock()
            .pending_waits
            .push((signaling, value));
    }

    fn is_fence_complete(&self, queue: QueueType, value: FenceValue) -> bool {
        self.queues[queue.index()].lock().completed >= value.0
    }

    fn wait_for_fence(&self, queue: QueueType, value: FenceValue) {
        let mut state = self.queues[queue.index()].lock();
        while state.completed < value.0 {
            self.completed.wait(&mut state);
        }
    }

    fn last_signaled(&self, queue: QueueType) -> FenceValue {
        FenceValue(self.queues[queue.index()].lock().last_signaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(queue: QueueType, name: &str) -> CommandList {
        let mut cl = CommandList::new(queue, name);
        cl.close();
        cl
    }

    #[test]
    fn test_fence_values_increase_per_queue() {
        let backend = DummyBackend::new();
        let a = backend
            .execute_command_lists(QueueType::Graphics, vec![closed(QueueType::Graphics, "a")])
            .unwrap();
        let b = backend
            .execute_command_lists(QueueType::Graphics, vec![closed(QueueType::Graphics, "b")])
            .unwrap();
        let c = backend
            .execute_command_lists(QueueType::Compute, vec![closed(QueueType::Compute, "c")])
            .unwrap();

        assert!(b > a);
        assert_eq!(c, FenceValue(1));
        assert!(backend.is_fence_complete(QueueType::Graphics, b));
        assert_eq!(backend.last_signaled(QueueType::Graphics), b);
        backend.flush(QueueType::Graphics);
    }

    #[test]
    fn test_queue_wait_attaches_to_next_submission() {
        let backend = DummyBackend::new();
        let compute = backend
            .execute_command_lists(QueueType::Compute, vec![closed(QueueType::Compute, "skin")])
            .unwrap();
        backend.queue_wait(QueueType::Graphics, QueueType::Compute, compute);
        backend
            .execute_command_lists(QueueType::Graphics, vec![closed(QueueType::Graphics, "main")])
            .unwrap();

        let submissions = backend.take_submissions();
        assert_eq!(submissions.len(), 2);
        assert!(submissions[0].waits.is_empty());
        assert_eq!(submissions[1].waits, vec![(QueueType::Compute, compute)]);
        assert_eq!(submissions[1].list_names(), vec!["main"]);
    }

    #[test]
    #[should_panic(expected = "submitted before being closed")]
    fn test_unclosed_list_panics() {
        let backend = DummyBackend::new();
        let _ = backend.execute_command_lists(
            QueueType::Graphics,
            vec![CommandList::new(QueueType::Graphics, "open")],
        );
    }

    #[test]
    #[should_panic(expected = "submitted to")]
    fn test_wrong_queue_panics() {
        let backend = DummyBackend::new();
        let _ = backend
            .execute_command_lists(QueueType::Graphics, vec![closed(QueueType::Compute, "c")]);
    }

    #[test]
    fn test_zero_sized_buffer_is_an_error() {
        let backend = DummyBackend::new();
        let err = backend
            .create_buffer(&BufferDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::BufferCreationFailed(_)));
    }

    #[test]
    fn test_write_buffer_bounds() {
        let backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                size: 16,
                ..Default::default()
            })
            .unwrap();
        assert!(backend.write_buffer(&buffer, 0, &[0u8; 16]).is_ok());
        assert!(backend.write_buffer(&buffer, 8, &[0u8; 16]).is_err());
        assert_eq!(backend.uploaded_bytes(), 16);
    }

    #[test]
    fn test_texture_memory_accounting() {
        let backend = DummyBackend::new();
        backend
            .create_texture(&TextureDescriptor {
                width: 4,
                height: 4,
                mip_levels: 3,
                format: TextureFormat::Rgba16Float,
                ..Default::default()
            })
            .unwrap();
        // 4x4 + 2x2 + 1x1 texels of 8 bytes.
        assert_eq!(backend.texture_bytes(), 21 * 8);
        backend
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 1,
                format: TextureFormat::R16Float,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backend.texture_bytes(), 21 * 8 + 4);
    }
}
