//! muxgate: a stdio MCP gateway.
//!
//! Presents a single MCP server with three meta-tools to the upstream client
//! and multiplexes routed calls across supervised backend MCP servers, each a
//! child process speaking newline-delimited JSON-RPC on its own pipes. A
//! stateful security monitor sits on the routing path and blocks disallowed
//! cross-backend information flows.

pub mod backend;
pub mod cli;
pub mod error;
pub mod gateway;
