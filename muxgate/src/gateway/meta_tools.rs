//! The gateway's own tool surface: `use_tool`, `discover_backend_tools`,
//! and `security_status`.
//!
//! Tool failures are data, not transport faults: every handler returns an MCP
//! tool-result value, and anything that goes wrong inside a routed call comes
//! back as `isError: true` with a text block. The enclosing JSON-RPC
//! `tools/call` still result-succeeds. Only an unknown meta-tool name or a
//! missing tool name escapes as a protocol-level error.

use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};

use muxgate_core::jsonrpc::{JsonRpcError, codes};
use muxgate_core::security::Verdict;

use crate::error::BackendError;
use crate::gateway::GatewayState;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// The `tools/list` result: exactly three descriptors, in this order, for the
/// lifetime of the process.
pub fn meta_tool_descriptors(backend_names: &[String]) -> Value {
    json!({
        "tools": [
            {
                "name": "use_tool",
                "description": "Route a tool call to a specific backend MCP server",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "backend_server": {
                            "type": "string",
                            "description": format!(
                                "The backend server to use. Available servers: {}",
                                backend_names.join(", ")
                            ),
                            "enum": backend_names,
                        },
                        "server_tool": {
                            "type": "string",
                            "description": "The name of the tool to call on the backend server",
                        },
                        "tool_arguments": {
                            "type": "object",
                            "description": "Arguments to pass to the backend server's tool",
                            "additionalProperties": true,
                        },
                    },
                    "required": ["backend_server", "server_tool", "tool_arguments"],
                    "additionalProperties": false,
                },
            },
            {
                "name": "discover_backend_tools",
                "description": "Discover available tools on backend MCP servers",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "backend_name": {
                            "type": "string",
                            "description": "The backend to query (omit to list all backends)",
                            "enum": backend_names,
                        },
                    },
                    "additionalProperties": false,
                },
            },
            {
                "name": "security_status",
                "description": "Get current session security status and access history",
                "inputSchema": {
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false,
                },
            },
        ],
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Dispatch an upstream `tools/call` by meta-tool name.
///
/// Returns `Ok(tool_result)` for the three meta-tools (including their
/// `isError: true` outcomes) and `Err(-32602)` for unknown names.
pub async fn handle_tools_call(
    state: &GatewayState,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    let params = params.unwrap_or_else(|| json!({}));
    let name = params
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| JsonRpcError::new(codes::INVALID_PARAMS, "missing tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "use_tool" => Ok(use_tool(state, arguments).await),
        "discover_backend_tools" => Ok(discover_backend_tools(state, arguments).await),
        "security_status" => Ok(security_status(state)),
        other => Err(JsonRpcError::new(
            codes::INVALID_PARAMS,
            format!("Unknown tool: {other}"),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// use_tool
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UseToolArgs {
    backend_server: String,
    server_tool: String,
    tool_arguments: Value,
}

/// Route one tool call: validate, authorize, resolve the session, forward,
/// and relay the backend's tool-result verbatim.
async fn use_tool(state: &GatewayState, arguments: Value) -> Value {
    let args: UseToolArgs = match serde_json::from_value(arguments) {
        Ok(a) => a,
        Err(e) => return tool_error(format!("Invalid use_tool arguments: {e}")),
    };
    if !args.tool_arguments.is_object() {
        return tool_error("Invalid use_tool arguments: tool_arguments must be an object");
    }

    let backend = args.backend_server.as_str();
    let level = state.config.security_level(backend);

    // The monitor runs before the backend is even resolved; a denied call
    // must not spawn a child.
    if let Verdict::Deny { reason } =
        state
            .monitor
            .authorize(backend, level, &args.server_tool, &args.tool_arguments)
    {
        return tool_error(format!("Security validation failed: {reason}"));
    }

    let session = match state.registry.get(backend).await {
        Ok(session) => session,
        Err(e) => {
            state
                .monitor
                .record_result(backend, level, &args.server_tool, false, Some(e.to_string()));
            return tool_error(e.to_string());
        }
    };

    let call_params = json!({
        "name": args.server_tool,
        "arguments": args.tool_arguments,
    });
    match session.call("tools/call", Some(call_params)).await {
        Ok(result) => {
            state
                .monitor
                .record_result(backend, level, &args.server_tool, true, None);
            // The backend's tool-result is the gateway's tool-result.
            result
        }
        Err(e) => {
            state
                .monitor
                .record_result(backend, level, &args.server_tool, false, Some(e.to_string()));
            tool_error(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// discover_backend_tools
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiscoverArgs {
    #[serde(default)]
    backend_name: Option<String>,
}

/// One backend's cached tool list, or a concurrent fan-out over all of them.
///
/// In the fan-out, individual backend failures land in per-backend `error`
/// fields; the aggregate itself always succeeds.
async fn discover_backend_tools(state: &GatewayState, arguments: Value) -> Value {
    let args: DiscoverArgs = match serde_json::from_value(arguments) {
        Ok(a) => a,
        Err(e) => return tool_error(format!("Invalid discover_backend_tools arguments: {e}")),
    };

    match args.backend_name {
        Some(name) => match state.config.backend(&name) {
            Some(config) => match fetch_tools(state, &name).await {
                Ok(tools) => tool_json(&json!({
                    "backend": name,
                    "description": config.description,
                    "tools": tools,
                })),
                Err(e) => tool_error(e.to_string()),
            },
            None => tool_error(format!(
                "unknown backend '{name}'. Available backends: {}",
                state.registry.names().join(", ")
            )),
        },
        None => {
            let names = state.registry.names();
            let results = join_all(names.iter().map(|name| fetch_tools(state, name))).await;

            let mut aggregate = serde_json::Map::new();
            for (name, result) in names.into_iter().zip(results) {
                let description = state
                    .config
                    .backend(&name)
                    .map(|c| c.description.clone())
                    .unwrap_or_default();
                let entry = match result {
                    Ok(tools) => json!({"description": description, "tools": tools}),
                    Err(e) => json!({"description": description, "error": e.to_string()}),
                };
                aggregate.insert(name, entry);
            }
            tool_json(&Value::Object(aggregate))
        }
    }
}

/// Resolve a session (spawning lazily) and return its cached tool array.
async fn fetch_tools(state: &GatewayState, name: &str) -> Result<Value, BackendError> {
    let session = state.registry.get(name).await?;
    let result = session.list_tools().await?;
    Ok(result.get("tools").cloned().unwrap_or_else(|| json!([])))
}

// ─────────────────────────────────────────────────────────────────────────────
// security_status
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of the security monitor, rendered as a JSON text block.
fn security_status(state: &GatewayState) -> Value {
    let snapshot = state.monitor.snapshot();
    tool_json(&serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({})))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool-result envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// A failing tool-result with a text block.
pub fn tool_error(message: impl std::fmt::Display) -> Value {
    json!({
        "content": [{"type": "text", "text": format!("Error: {message}")}],
        "isError": true,
    })
}

/// A successful tool-result carrying pretty-printed JSON as text.
fn tool_json(value: &Value) -> Value {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRegistry;
    use muxgate_core::config::Config;
    use muxgate_core::security::SecurityMonitor;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn empty_state() -> GatewayState {
        let config = Config {
            backends: BTreeMap::new(),
            security_policy: None,
        };
        // An unknown-backend registry is enough for the handler-level tests;
        // session plumbing is covered by the backend and integration tests.
        GatewayState {
            registry: Arc::new(BackendRegistry::new(&config)),
            monitor: Arc::new(SecurityMonitor::new(None)),
            config: Arc::new(config),
        }
    }

    fn result_text(result: &Value) -> &str {
        result["content"][0]["text"].as_str().unwrap()
    }

    #[test]
    fn test_descriptors_fixed_order() {
        let tools = meta_tool_descriptors(&["db".to_string(), "gh".to_string()]);
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["use_tool", "discover_backend_tools", "security_status"]);

        let schema = &tools["tools"][0]["inputSchema"];
        assert_eq!(
            schema["required"],
            json!(["backend_server", "server_tool", "tool_arguments"])
        );
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(
            schema["properties"]["backend_server"]["enum"],
            json!(["db", "gh"])
        );
    }

    #[tokio::test]
    async fn test_unknown_meta_tool_is_protocol_error() {
        let state = empty_state();
        let err = handle_tools_call(&state, Some(json!({"name": "frobnicate"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert!(err.message.contains("frobnicate"));
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_protocol_error() {
        let state = empty_state();
        let err = handle_tools_call(&state, None).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_use_tool_missing_arguments() {
        let state = empty_state();
        let result = handle_tools_call(
            &state,
            Some(json!({"name": "use_tool", "arguments": {"backend_server": "x"}})),
        )
        .await
        .unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result_text(&result).contains("Invalid use_tool arguments"));
    }

    #[tokio::test]
    async fn test_use_tool_rejects_extra_fields() {
        let state = empty_state();
        let result = handle_tools_call(
            &state,
            Some(json!({"name": "use_tool", "arguments": {
                "backend_server": "x",
                "server_tool": "y",
                "tool_arguments": {},
                "bonus": 1,
            }})),
        )
        .await
        .unwrap();
        assert_eq!(result["isError"], json!(true));
    }

    #[tokio::test]
    async fn test_use_tool_rejects_non_object_tool_arguments() {
        let state = empty_state();
        let result = handle_tools_call(
            &state,
            Some(json!({"name": "use_tool", "arguments": {
                "backend_server": "x",
                "server_tool": "y",
                "tool_arguments": "not an object",
            }})),
        )
        .await
        .unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result_text(&result).contains("tool_arguments must be an object"));
    }

    #[tokio::test]
    async fn test_use_tool_unknown_backend() {
        let state = empty_state();
        let result = handle_tools_call(
            &state,
            Some(json!({"name": "use_tool", "arguments": {
                "backend_server": "nope",
                "server_tool": "ping",
                "tool_arguments": {},
            }})),
        )
        .await
        .unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result_text(&result).contains("unknown backend 'nope'"));
    }

    #[tokio::test]
    async fn test_discover_unknown_backend() {
        let state = empty_state();
        let result = handle_tools_call(
            &state,
            Some(json!({"name": "discover_backend_tools", "arguments": {"backend_name": "nope"}})),
        )
        .await
        .unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result_text(&result).contains("unknown backend 'nope'"));
    }

    #[tokio::test]
    async fn test_security_status_shape() {
        let state = empty_state();
        let result = handle_tools_call(&state, Some(json!({"name": "security_status"})))
            .await
            .unwrap();
        assert_eq!(result["isError"], json!(false));

        let snapshot: Value = serde_json::from_str(result_text(&result)).unwrap();
        assert_eq!(snapshot["total_accesses"], 0);
        assert_eq!(snapshot["tainted"], false);
        assert!(snapshot.get("session_id").is_some());
    }

    #[test]
    fn test_tool_error_envelope() {
        let result = tool_error("boom");
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "Error: boom");
    }
}
