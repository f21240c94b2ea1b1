//! Error types for backend sessions and the gateway runtime.

use muxgate_core::config::ConfigError;

/// Failures of a single backend interaction.
///
/// Every variant is contained to one routed call: it becomes a tool-result
/// with `isError: true` upstream and never tears down the gateway.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The requested backend name is not configured.
    #[error("unknown backend '{backend}'. Available backends: {available}")]
    UnknownBackend { backend: String, available: String },

    /// The child process could not be started.
    #[error("backend '{backend}' failed to start: {reason}")]
    SpawnFailed { backend: String, reason: String },

    /// The child started but the MCP initialize handshake failed.
    #[error("backend '{backend}' failed the initialize handshake: {reason}")]
    HandshakeFailed { backend: String, reason: String },

    /// No response arrived within the backend's configured timeout.
    #[error("timeout after {seconds}s waiting for backend '{backend}'")]
    Timeout { backend: String, seconds: u64 },

    /// The session terminated (or the call was cancelled) while the request
    /// was in flight.
    #[error("request to backend '{backend}' aborted")]
    Aborted { backend: String },

    /// The backend answered with a JSON-RPC error object.
    #[error("backend '{backend}' returned error {code}: {message}")]
    Rpc {
        backend: String,
        code: i64,
        message: String,
    },

    /// Writing to or reading from the child's pipes failed.
    #[error("transport failure on backend '{backend}': {reason}")]
    Transport { backend: String, reason: String },
}

/// Top-level gateway failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration could not be loaded or validated (exit code 1).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable I/O on the gateway's own stdio (exit code 2).
    #[error("upstream I/O failure: {0}")]
    UpstreamIo(std::io::Error),
}
