//! Engine error types.

use thiserror::Error;

use crate::descriptor::ValidationError;

/// Errors that can occur in the reconciliation engine.
#[derive(Debug, Error)]
pub enum KvsError {
    #[error("duplicate descriptor name: {0}")]
    DuplicateDescriptor(String),

    #[error("descriptor not found: {0}")]
    DescriptorNotFound(String),

    #[error("dependency cycle among keys: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("transaction queue closed")]
    QueueClosed,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type KvsResult<T> = Result<T, KvsError>;
