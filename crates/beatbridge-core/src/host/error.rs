//! Transport host error types

use thiserror::Error;

/// Errors surfaced by a transport host backend
///
/// Connection failures are fatal: no session is possible without a live host
/// connection, so callers surface them by terminating. Everything else is
/// logged and retried on the next reconciliation pass.
#[derive(Error, Debug)]
pub enum HostError {
    /// Host engine refused the client connection
    #[error("Failed to connect to transport host: {0}")]
    ConnectionFailed(String),

    /// Client could not be activated
    #[error("Failed to activate transport client: {0}")]
    ActivationFailed(String),

    /// Transport relocate/start/stop command failed
    #[error("Transport command failed: {0}")]
    TransportCommand(String),

    /// Timebase role could not be acquired or released
    #[error("Timebase role change failed: {0}")]
    Timebase(String),
}

/// Result type for transport host operations
pub type HostResult<T> = Result<T, HostError>;
