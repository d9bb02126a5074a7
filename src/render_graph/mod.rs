//! Frame graph building blocks
//!
//! - [`BarrierBatcher`]: batched, scope-flushed resource barriers
//! - [`SortedCommandBuffer`]: type-erased draw records ordered by a sort key
//! - [`render_command`]: the draw record types producers submit

pub mod barrier;
pub mod command_buffer;
pub mod render_command;

pub use barrier::*;
pub use command_buffer::*;
pub use render_command::*;
