//! Gateway configuration: schema, loader, and validation errors.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{build, load_config, substitute_env_vars};
pub use schema::{
    BackendConfig, CommandField, Config, DEFAULT_DESCRIPTION, DEFAULT_TIMEOUT_SECS,
    RawBackendEntry, RawConfig, SecurityLevel, SecurityPolicy,
};
