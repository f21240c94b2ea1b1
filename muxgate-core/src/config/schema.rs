//! Configuration schema type definitions.
//!
//! The file format is a JSON mapping:
//!
//! ```json
//! {
//!   "backends": {
//!     "github": {
//!       "command": ["npx", "-y", "@modelcontextprotocol/server-github"],
//!       "env": { "GITHUB_TOKEN": "${GITHUB_TOKEN}" },
//!       "description": "GitHub API tools",
//!       "timeout": 60
//!     },
//!     "db": { "command": "mcp-sqlite", "args": ["--db", "app.db"] }
//!   },
//!   "security_policy": {
//!     "backend_security_levels": { "github": "public", "db": "sensitive" },
//!     "prevent_sensitive_to_public": true,
//!     "session_timeout_minutes": 30
//!   }
//! }
//! ```
//!
//! Raw serde types live here; the loader resolves `${VAR}` references and
//! produces the validated [`BackendConfig`] values the rest of the gateway
//! consumes.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default backend request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default description for backends that do not declare one.
pub const DEFAULT_DESCRIPTION: &str = "No description";

// ─────────────────────────────────────────────────────────────────────────────
// Raw file schema
// ─────────────────────────────────────────────────────────────────────────────

/// Root of the raw config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Backend name → backend entry. JSON object keys make names unique by
    /// construction.
    pub backends: BTreeMap<String, RawBackendEntry>,

    /// Optional security policy. When absent, all routed calls are allowed.
    #[serde(default)]
    pub security_policy: Option<SecurityPolicy>,
}

/// One backend entry as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBackendEntry {
    /// Child command: either a single string or an argv array.
    pub command: CommandField,

    /// Extra arguments appended to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay merged over the gateway's own environment.
    /// Values may contain `${VAR}` references.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Human-readable description, surfaced by `discover_backend_tools`.
    #[serde(default)]
    pub description: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// `command` accepts both `"mcp-server"` and `["docker", "run", ...]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandField {
    /// Single program name, no arguments.
    One(String),
    /// Full argv.
    Many(Vec<String>),
}

impl CommandField {
    /// Coerce to an argv vector.
    pub fn into_argv(self) -> Vec<String> {
        match self {
            CommandField::One(s) => vec![s],
            CommandField::Many(v) => v,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated backend configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Validated configuration for one backend MCP server.
///
/// Built by the loader after `${VAR}` resolution; argv is non-empty and the
/// timeout is positive.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Unique backend name (the key in the `backends` map).
    pub name: String,
    /// Child command and arguments.
    pub argv: Vec<String>,
    /// Environment overlay, `${VAR}` references already resolved.
    pub env: HashMap<String, String>,
    /// Human-readable description.
    pub description: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// The fully loaded and validated gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend name → validated config, in name order.
    pub backends: BTreeMap<String, BackendConfig>,
    /// Optional security policy.
    pub security_policy: Option<SecurityPolicy>,
}

impl Config {
    /// Look up a backend by name.
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.get(name)
    }

    /// Backend names in deterministic (sorted) order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// The security level of a backend, when a policy is configured.
    pub fn security_level(&self, name: &str) -> Option<SecurityLevel> {
        self.security_policy
            .as_ref()?
            .backend_security_levels
            .get(name)
            .copied()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security policy
// ─────────────────────────────────────────────────────────────────────────────

/// Security classification of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Reaches out to the world; must never see sensitive session data.
    Public,
    /// Internal systems without hard data-flow restrictions.
    Internal,
    /// Holds credentials or private data; accesses are tracked for flow rules.
    Sensitive,
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Public => write!(f, "public"),
            SecurityLevel::Internal => write!(f, "internal"),
            SecurityLevel::Sensitive => write!(f, "sensitive"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_session_timeout_minutes() -> u64 {
    30
}

/// Security policy flags.
///
/// Every flag defaults to true when the `security_policy` block is present;
/// a config that opts into the policy gets the full monitor unless it
/// explicitly relaxes a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Backend name → security level. Must cover every configured backend.
    pub backend_security_levels: HashMap<String, SecurityLevel>,

    /// Deny calls to public backends after a successful sensitive access.
    #[serde(default = "default_true")]
    pub prevent_sensitive_to_public: bool,

    /// Deny calls whose arguments carry credential-like material.
    #[serde(default = "default_true")]
    pub prevent_sensitive_data_leak: bool,

    /// Deny calls whose arguments match SQL-injection signatures.
    #[serde(default = "default_true")]
    pub sql_injection_protection: bool,

    /// Once the session is tainted, deny everything until restart.
    #[serde(default = "default_true")]
    pub block_after_suspicious_activity: bool,

    /// Emit a log event for accesses that cross backends.
    #[serde(default = "default_true")]
    pub log_all_cross_backend_access: bool,

    /// Session expiry in minutes; 0 disables the check.
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
}

impl SecurityPolicy {
    /// The session timeout as a duration, or `None` when disabled.
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_minutes > 0)
            .then(|| Duration::from_secs(self.session_timeout_minutes * 60))
    }
}
