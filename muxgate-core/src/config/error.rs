//! Configuration error types.
//!
//! All of these are fatal at startup: the gateway refuses to serve with a
//! config it cannot fully validate (exit code 1 from main).

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file does not exist at the given path.
    #[error("configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// I/O error reading the config file.
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON or does not match the schema.
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config file is empty.
    #[error("configuration file is empty")]
    EmptyFile,

    /// No backends defined.
    #[error("no backends defined in configuration")]
    NoBackends,

    /// A backend has an empty command.
    #[error("backend '{backend}' has an empty command")]
    EmptyCommand { backend: String },

    /// A backend has a zero timeout.
    #[error("backend '{backend}' has an invalid timeout: must be positive seconds")]
    InvalidTimeout { backend: String },

    /// A security policy is present but does not classify every backend.
    #[error(
        "the following backends are not classified in security policy: {}. \
         Add them to 'backend_security_levels' with value: public, internal, or sensitive",
        backends.join(", ")
    )]
    UnclassifiedBackends { backends: Vec<String> },

    /// A required `${VAR}` reference could not be resolved.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },
}
