//! Error kinds shared across the crate.
//!
//! All public functions return `anyhow::Result`; the variants below are the
//! typed payloads carried inside, so callers can `downcast_ref::<EpoError>()`
//! to tell a bad argument from a bad state from a bad file.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpoError {
    /// Malformed input caught at the call boundary (bad shapes, tmin > tmax,
    /// invalid policies, ...). The store is never mutated before this fires.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Operation not legal in the store's current lifecycle state
    /// (non-preloaded where preload is required, un-correcting an applied
    /// baseline, ...).
    #[error("invalid state: {0}")]
    State(String),

    /// Transform requested on a store that has dropped to zero epochs.
    #[error("epoch store is empty: {0}")]
    Empty(String),

    /// Destination exists and overwrite was not requested. Distinct from a
    /// generic write failure.
    #[error("destination file exists (pass overwrite=true to replace): {0}")]
    Exists(PathBuf),

    /// A split continuation file referenced by a chunk is missing.
    #[error("missing split continuation file: {0}")]
    MissingSplit(PathBuf),
}

impl EpoError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EpoError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        EpoError::State(msg.into())
    }

    pub fn empty(msg: impl Into<String>) -> Self {
        EpoError::Empty(msg.into())
    }
}
