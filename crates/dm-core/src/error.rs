//! Error types for the drum engine.
//!
//! Grounded on rf_core::RfError and rf-bridge's FFIError: a typed internal
//! error enum with thiserror, propagated with `?` everywhere, converted to
//! a status code only at the FFI boundary (see dm-ffi).

use thiserror::Error;

/// Error kinds per spec.md §7.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("bad state: {0}")]
    BadState(String),

    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("open failed: {0}")]
    OpenFailed(String),

    #[error("voice pool exhausted")]
    PoolExhausted,
}

pub type DmResult<T> = Result<T, DmError>;

/// Status code convention for the FFI boundary (spec.md §6):
/// `0` on success, a distinct negative integer per error kind on failure.
impl DmError {
    pub fn status_code(&self) -> i32 {
        match self {
            DmError::NotInitialized => -1,
            DmError::BadArgument(_) => -2,
            DmError::BadState(_) => -3,
            DmError::MemoryLimitExceeded(_) => -4,
            DmError::DecodeFailed(_) => -5,
            DmError::OpenFailed(_) => -6,
            DmError::PoolExhausted => -7,
        }
    }
}
