//! muxgate core: transport-agnostic building blocks for the stdio MCP
//! gateway.
//!
//! This library provides the NDJSON frame codec, JSON-RPC 2.0 classification,
//! configuration schema and loader, and the security monitor shared by the
//! gateway binary and its tests. Nothing here owns a child process or a
//! stdio channel; that wiring lives in the `muxgate` crate.

pub mod codec;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod security;

// ─────────────────────────────────────────────────────────────────────────────
// Shared protocol constants
// ─────────────────────────────────────────────────────────────────────────────

/// MCP protocol versions the gateway speaks, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// The newest supported MCP protocol version.
///
/// Used toward backends, and advertised upstream when the client requests a
/// version the gateway does not know.
pub fn latest_protocol_version() -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS[SUPPORTED_PROTOCOL_VERSIONS.len() - 1]
}

/// Negotiate the protocol version for an upstream `initialize`: echo the
/// client's version when supported, otherwise advertise the latest.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    match requested {
        Some(v) => SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .find(|supported| **supported == v)
            .copied()
            .unwrap_or_else(latest_protocol_version),
        None => latest_protocol_version(),
    }
}
