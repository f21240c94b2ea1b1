//! Framing error types for the NDJSON transport.

/// Errors that can occur when reading or parsing an NDJSON-framed JSON-RPC
/// message.
///
/// The gateway maps these to JSON-RPC error responses on the upstream channel
/// and to logged-and-dropped lines on backend channels; a corrupt line from a
/// misbehaving backend must not kill the gateway.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single NDJSON line exceeds the configured maximum size.
    ///
    /// Checked on raw byte length before JSON parsing so crafted input cannot
    /// force allocation of oversized value trees.
    #[error("message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum message size in bytes.
        max_bytes: usize,
    },

    /// The line is not valid JSON, or its structure is invalid for JSON-RPC.
    #[error("malformed JSON: {reason}")]
    MalformedJson {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// The line is not valid UTF-8.
    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    /// The `jsonrpc` field is absent from the JSON object.
    #[error("missing required jsonrpc field")]
    MissingVersion,

    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("unsupported JSON-RPC version: {version}")]
    UnsupportedVersion {
        /// The version string found in the message.
        version: String,
    },

    /// The message is a JSON array. MCP over stdio has no batch form.
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,

    /// An underlying IO error occurred while reading or writing a stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Returns true when the error maps to JSON-RPC -32600 (invalid request)
    /// rather than -32700 (parse error) on the upstream channel.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            FramingError::MissingVersion | FramingError::UnsupportedVersion { .. }
        )
    }
}
