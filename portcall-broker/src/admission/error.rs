//! Errors internal to the admission pipeline, distinct from the wire-level
//! `portcall_core::error::Error` produced by the codec.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("takeover stripe lock poisoned for client `{0}`")]
    StripePoisoned(String),

    #[error("extension task queue unavailable")]
    QueueUnavailable,

    #[error("session persistence collaborator failed: {0}")]
    PersistenceFailed(String),
}
