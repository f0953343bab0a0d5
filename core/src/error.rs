//! Error types for the simulation core.
//!
//! Structural and configuration errors (bad identifiers, duplicate names,
//! missing endpoints, kind mismatches) abort construction or binding.
//! Runtime slave/protocol failures abort the affected operation and
//! propagate; the engine does not retry.

use thiserror::Error;

use crate::models::variable::ParseError;
use crate::slave::SlaveError;

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Malformed identifier input
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Malformed configuration input
    #[error("parse error: {0}")]
    MalformedConfig(String),

    /// Unknown instance, property or connection endpoint
    #[error("not found: {0}")]
    NotFound(String),

    /// Instance or listener name collision
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// Operation not legal in the current engine state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Cross-kind connection transferred without a modifier
    #[error("modifier required for connection {src} -> {sink}")]
    ModifierRequired { src: String, sink: String },

    /// Connection endpoints have incompatible scalar kinds
    #[error("type mismatch: cannot connect {src} ({source_kind}) to {sink} ({sink_kind})")]
    TypeMismatch {
        src: String,
        source_kind: String,
        sink: String,
        sink_kind: String,
    },

    /// Proxy child process failed to start or report a port
    #[error("process launch failure: {0}")]
    ProcessLaunch(String),

    /// Malformed or truncated wire message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Slave rejected or failed an operation
    #[error("slave failure: {0}")]
    Slave(String),

    /// Filesystem or socket failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SlaveError> for SimulationError {
    fn from(e: SlaveError) -> Self {
        match e {
            SlaveError::Protocol(msg) => SimulationError::Protocol(msg),
            SlaveError::ProcessLaunch(msg) => SimulationError::ProcessLaunch(msg),
            SlaveError::Io(e) => SimulationError::Io(e),
            SlaveError::Failure(msg) => SimulationError::Slave(msg),
        }
    }
}
