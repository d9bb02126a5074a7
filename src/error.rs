//! Crate-level error type

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
