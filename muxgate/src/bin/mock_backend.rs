//! Mock MCP backend for integration tests.
//!
//! A minimal stdio MCP server speaking newline-delimited JSON-RPC. Behavior
//! is tuned through environment variables so one binary covers the happy
//! path, slow backends, and backends that never reply.
//!
//! # Environment Variables
//!
//! - `MOCK_BACKEND_NAME`: server name in `initialize` responses (default: `mock`)
//! - `MOCK_BACKEND_DELAY_MS`: delay before each `tools/call` response (default: 0)
//! - `MOCK_BACKEND_MUTE_CALLS=1`: accept `tools/call` requests but never reply
//! - `MOCK_BACKEND_MUTE_FIRST_CALL=1`: swallow only the first `tools/call`
//!
//! # Usage
//!
//! ```bash
//! printf '%s\n' '{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}' \
//!   | cargo run --bin mock_backend
//! ```

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::sleep;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name =
        std::env::var("MOCK_BACKEND_NAME").unwrap_or_else(|_| "mock".to_string());
    let delay_ms: u64 = std::env::var("MOCK_BACKEND_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let mute_calls = std::env::var("MOCK_BACKEND_MUTE_CALLS").as_deref() == Ok("1");
    let mut mute_remaining: u32 =
        if std::env::var("MOCK_BACKEND_MUTE_FIRST_CALL").as_deref() == Ok("1") {
            1
        } else {
            0
        };

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock_backend: ignoring non-JSON line");
            continue;
        };

        // Notifications get no response.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();

        let response = match method.as_str() {
            "initialize" => {
                let requested = request
                    .pointer("/params/protocolVersion")
                    .cloned()
                    .unwrap_or_else(|| json!("2025-06-18"));
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": requested,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": name, "version": "0.0.0"},
                    },
                })
            }
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [
                        {
                            "name": "ping",
                            "description": "Reply with pong",
                            "inputSchema": {"type": "object", "properties": {}},
                        },
                        {
                            "name": "echo",
                            "description": "Echo the arguments back",
                            "inputSchema": {
                                "type": "object",
                                "properties": {},
                                "additionalProperties": true,
                            },
                        },
                    ],
                },
            }),
            "tools/call" => {
                if mute_calls {
                    continue;
                }
                if mute_remaining > 0 {
                    mute_remaining -= 1;
                    continue;
                }
                if delay_ms > 0 {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                let tool = request
                    .pointer("/params/name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                let arguments = request
                    .pointer("/params/arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let text = match tool {
                    "ping" => "pong".to_string(),
                    "echo" => arguments.to_string(),
                    other => format!("mock result for tool: {other}"),
                };
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": text}],
                        "isError": false,
                    },
                })
            }
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {other}")},
            }),
        };

        let mut frame = serde_json::to_string(&response)?;
        frame.push('\n');
        stdout.write_all(frame.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
