//! Configuration loading, `${VAR}` resolution, and validation.
//!
//! Loading is a one-shot, fail-fast pipeline: read file → parse JSON →
//! resolve environment references in argv and env values → validate. Any
//! failure aborts startup; there is no partial configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::error::ConfigError;
use super::schema::{
    BackendConfig, Config, DEFAULT_DESCRIPTION, DEFAULT_TIMEOUT_SECS, RawConfig,
};

/// Load and validate configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyFile);
    }

    let raw: RawConfig = serde_json::from_str(&contents)?;
    build(raw)
}

/// Build a validated [`Config`] from the raw file schema.
///
/// Separated from file I/O so tests can construct configs from literals.
pub fn build(raw: RawConfig) -> Result<Config, ConfigError> {
    if raw.backends.is_empty() {
        return Err(ConfigError::NoBackends);
    }

    let mut backends = BTreeMap::new();
    for (name, entry) in raw.backends {
        let mut argv = entry.command.into_argv();
        argv.extend(entry.args);
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(ConfigError::EmptyCommand { backend: name });
        }

        // Resolve ${VAR} references in argv elements and env values.
        let field = format!("backends.{name}");
        let argv = argv
            .into_iter()
            .map(|part| substitute_env_vars(&part, &field))
            .collect::<Result<Vec<_>, _>>()?;
        let env = entry
            .env
            .into_iter()
            .map(|(k, v)| Ok((k, substitute_env_vars(&v, &field)?)))
            .collect::<Result<_, ConfigError>>()?;

        let timeout_secs = entry.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout { backend: name });
        }

        backends.insert(
            name.clone(),
            BackendConfig {
                name,
                argv,
                env,
                description: entry
                    .description
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
        );
    }

    // When a policy is present, every backend must be classified.
    if let Some(policy) = &raw.security_policy {
        let unclassified: Vec<String> = backends
            .keys()
            .filter(|name| !policy.backend_security_levels.contains_key(*name))
            .cloned()
            .collect();
        if !unclassified.is_empty() {
            return Err(ConfigError::UnclassifiedBackends {
                backends: unclassified,
            });
        }
    }

    Ok(Config {
        backends,
        security_policy: raw.security_policy,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment variable substitution
// ─────────────────────────────────────────────────────────────────────────────

// The pattern is a compile-time literal validated by
// test_env_var_pattern_compiles; expect() cannot fire at runtime.
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a single config string.
///
/// # Syntax
///
/// - `${VAR}` - required; unresolved is a fatal [`ConfigError::MissingEnvVar`]
/// - `${VAR:-default}` - optional with a default (which may be empty)
pub fn substitute_env_vars(value: &str, field: &str) -> Result<String, ConfigError> {
    let mut result = value.to_string();

    let matches: Vec<_> = ENV_VAR_PATTERN
        .captures_iter(value)
        .filter_map(|cap| {
            let full_match = cap.get(0)?.as_str().to_string();
            let var_name = cap.get(1)?.as_str().to_string();
            let default = cap.get(2).map(|m| m.as_str().to_string());
            Some((full_match, var_name, default))
        })
        .collect();

    for (full_match, var_name, default) in matches {
        match std::env::var(&var_name) {
            Ok(val) => result = result.replace(&full_match, &val),
            Err(_) => match default {
                Some(default_value) => result = result.replace(&full_match, &default_value),
                None => {
                    return Err(ConfigError::MissingEnvVar {
                        var: var_name,
                        field: field.to_string(),
                    });
                }
            },
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SecurityLevel;
    use serial_test::serial;
    use std::io::Write;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        build(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_env_var_pattern_compiles() {
        assert!(ENV_VAR_PATTERN.is_match("${HOME}"));
        assert!(ENV_VAR_PATTERN.is_match("${VAR:-fallback}"));
        assert!(!ENV_VAR_PATTERN.is_match("$HOME"));
    }

    #[test]
    fn test_minimal_config() {
        let config = parse(r#"{"backends": {"echo": {"command": "mcp-echo"}}}"#).unwrap();
        let backend = config.backend("echo").unwrap();
        assert_eq!(backend.argv, vec!["mcp-echo"]);
        assert_eq!(backend.description, "No description");
        assert_eq!(backend.timeout, Duration::from_secs(30));
        assert!(config.security_policy.is_none());
    }

    #[test]
    fn test_command_array_with_args() {
        let config = parse(
            r#"{"backends": {"db": {"command": ["docker", "run", "-i"], "args": ["img"], "timeout": 5}}}"#,
        )
        .unwrap();
        let backend = config.backend("db").unwrap();
        assert_eq!(backend.argv, vec!["docker", "run", "-i", "img"]);
        assert_eq!(backend.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_no_backends_fatal() {
        assert!(matches!(
            parse(r#"{"backends": {}}"#),
            Err(ConfigError::NoBackends)
        ));
    }

    #[test]
    fn test_empty_command_fatal() {
        assert!(matches!(
            parse(r#"{"backends": {"x": {"command": []}}}"#),
            Err(ConfigError::EmptyCommand { ref backend }) if backend == "x"
        ));
        assert!(matches!(
            parse(r#"{"backends": {"x": {"command": "  "}}}"#),
            Err(ConfigError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_fatal() {
        assert!(matches!(
            parse(r#"{"backends": {"x": {"command": "c", "timeout": 0}}}"#),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_unclassified_backend_fatal() {
        let err = parse(
            r#"{
                "backends": {"db": {"command": "c"}, "gh": {"command": "c"}},
                "security_policy": {"backend_security_levels": {"db": "sensitive"}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnclassifiedBackends { ref backends } if backends == &["gh".to_string()]
        ));
    }

    #[test]
    fn test_policy_levels_resolved() {
        let config = parse(
            r#"{
                "backends": {"db": {"command": "c"}, "gh": {"command": "c"}},
                "security_policy": {
                    "backend_security_levels": {"db": "sensitive", "gh": "public"},
                    "session_timeout_minutes": 1
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.security_level("db"), Some(SecurityLevel::Sensitive));
        assert_eq!(config.security_level("gh"), Some(SecurityLevel::Public));
        assert_eq!(config.security_level("nope"), None);
    }

    #[test]
    #[serial]
    fn test_env_substitution_in_env_values() {
        unsafe { std::env::set_var("MUXGATE_TEST_TOKEN", "tok-123") };
        let config = parse(
            r#"{"backends": {"gh": {"command": "c", "env": {"TOKEN": "Bearer ${MUXGATE_TEST_TOKEN}"}}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.backend("gh").unwrap().env.get("TOKEN").unwrap(),
            "Bearer tok-123"
        );
        unsafe { std::env::remove_var("MUXGATE_TEST_TOKEN") };
    }

    #[test]
    #[serial]
    fn test_env_substitution_in_argv() {
        unsafe { std::env::set_var("MUXGATE_TEST_DIR", "/data") };
        let config = parse(
            r#"{"backends": {"fs": {"command": ["mcp-fs", "${MUXGATE_TEST_DIR}"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.backend("fs").unwrap().argv[1], "/data");
        unsafe { std::env::remove_var("MUXGATE_TEST_DIR") };
    }

    #[test]
    #[serial]
    fn test_missing_env_var_fatal() {
        unsafe { std::env::remove_var("MUXGATE_TEST_ABSENT") };
        let err = parse(
            r#"{"backends": {"x": {"command": "c", "env": {"K": "${MUXGATE_TEST_ABSENT}"}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar { ref var, .. } if var == "MUXGATE_TEST_ABSENT"
        ));
    }

    #[test]
    #[serial]
    fn test_env_default_syntax() {
        unsafe { std::env::remove_var("MUXGATE_TEST_ABSENT") };
        assert_eq!(
            substitute_env_vars("${MUXGATE_TEST_ABSENT:-fallback}", "t").unwrap(),
            "fallback"
        );
        // Empty default is allowed.
        assert_eq!(
            substitute_env_vars("${MUXGATE_TEST_ABSENT:-}", "t").unwrap(),
            ""
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backends": {{"echo": {{"command": "mcp-echo", "description": "echoes"}}}}}}"#
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backend("echo").unwrap().description, "echoes");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/muxgate.json")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::EmptyFile
        ));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
