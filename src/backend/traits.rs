//! Core backend abstraction traits
//!
//! The frame graph only needs a small slice of an explicit graphics API:
//! resource creation, command list submission to one of two queues, and
//! fence values for CPU-GPU and queue-queue synchronization.

use std::sync::Arc;

use thiserror::Error;

use super::command_list::CommandList;
use super::types::*;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to write buffer: {0}")]
    BufferWriteFailed(String),
    #[error("Failed to submit command lists: {0}")]
    SubmissionFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A GPU device with a graphics and a compute queue.
///
/// Implementations must be shareable between recording threads; command
/// lists themselves are recorded without touching the backend.
pub trait RenderBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &'static str;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> BackendResult<Arc<Buffer>>;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> BackendResult<Arc<Texture>>;

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineHandle>;

    /// Upload data into a buffer at the given byte offset.
    fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Get a fresh command list for the given queue.
    fn create_command_list(&self, queue: QueueType, name: &str) -> CommandList {
        CommandList::new(queue, name)
    }

    /// Submit closed command lists to a queue, in the given order.
    ///
    /// Signals the queue fence once the work completes and returns the value
    /// it will reach. Values are strictly increasing per queue.
    fn execute_command_lists(
        &self,
        queue: QueueType,
        lists: Vec<CommandList>,
    ) -> BackendResult<FenceValue>;

    /// Make all later work on `waiting` wait (on the GPU) until the fence of
    /// `signaling` reaches `value`.
    fn queue_wait(&self, waiting: QueueType, signaling: QueueType, value: FenceValue);

    fn is_fence_complete(&self, queue: QueueType, value: FenceValue) -> bool;

    /// Block the calling thread until the queue fence reaches `value`.
    fn wait_for_fence(&self, queue: QueueType, value: FenceValue);

    /// Last fence value handed out for the queue.
    fn last_signaled(&self, queue: QueueType) -> FenceValue;

    /// Wait until all work submitted to the queue has completed.
    fn flush(&self, queue: QueueType) {
        self.wait_for_fence(queue, self.last_signaled(queue));
    }
}
