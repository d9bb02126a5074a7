//! Backend abstraction layer
//!
//! Provides the device/queue interface the frame graph records against and a
//! dummy implementation used by tests.

pub mod command_list;
pub mod dummy;
pub mod traits;
pub mod types;

pub use command_list::*;
pub use dummy::DummyBackend;
pub use traits::*;
pub use types::*;
