//! Crate-wide error taxonomy, mapped 1:1 onto the CLI exit codes.
//!
//! Library code returns `anyhow::Result` internally; the CLI boundary in
//! `main.rs` classifies the final error's cause chain into a `LogtapError`
//! to pick an exit code.

use std::io::ErrorKind;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogtapError {
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("findings threshold exceeded: {0}")]
    FindingsThreshold(String),
}

impl LogtapError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LogtapError::Internal(_) => 1,
            LogtapError::Usage(_) => 2,
            LogtapError::NotFound(_) => 3,
            LogtapError::Permission(_) => 4,
            LogtapError::Network(_) => 5,
            LogtapError::FindingsThreshold(_) => 6,
        }
    }

    /// Walk `err`'s cause chain looking for a typed error that maps onto a
    /// specific exit code; anything unrecognized stays `Internal`.
    pub fn classify(err: anyhow::Error) -> Self {
        let err = match err.downcast::<LogtapError>() {
            Ok(already) => return already,
            Err(err) => err,
        };
        for cause in err.chain() {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                match io_err.kind() {
                    ErrorKind::NotFound => return LogtapError::NotFound(err.to_string()),
                    ErrorKind::PermissionDenied => return LogtapError::Permission(err.to_string()),
                    ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::AddrNotAvailable
                    | ErrorKind::AddrInUse => return LogtapError::Network(err.to_string()),
                    _ => {}
                }
            }
            if cause.downcast_ref::<reqwest::Error>().is_some() {
                return LogtapError::Network(err.to_string());
            }
            if cause.downcast_ref::<regex::Error>().is_some() {
                return LogtapError::Usage(err.to_string());
            }
        }
        LogtapError::Internal(err)
    }
}

/// A single batch exceeded the 1 MiB wire cap. Dropped, never retried.
#[derive(Debug, Error)]
#[error("batch exceeded max wire size ({size} > {limit} bytes)")]
pub struct BufferExceededError {
    pub size: usize,
    pub limit: usize,
}
