//! Upstream method dispatch.
//!
//! Frames arrive serially from the single upstream reader, but `tools/call`
//! requests each run on their own task and write their response frame when
//! they complete; ordering upstream is by `id` correlation, not arrival.
//! Writes to the upstream channel are serialized through one mutex so two
//! responses never interleave bytes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use muxgate_core::codec::{self, Frame};
use muxgate_core::error::FramingError;
use muxgate_core::jsonrpc::{self, JsonRpcError, JsonRpcId, JsonRpcMessageKind, codes};
use muxgate_core::negotiate_protocol_version;

use crate::gateway::{GatewayState, meta_tools};

pub struct Dispatcher<W> {
    state: Arc<GatewayState>,
    writer: Arc<Mutex<W>>,
    /// In-flight upstream `tools/call` ids → cancellation handles.
    cancels: Arc<DashMap<JsonRpcId, CancellationToken>>,
    tracker: TaskTracker,
}

impl<W: AsyncWrite + Send + Unpin + 'static> Dispatcher<W> {
    pub fn new(state: Arc<GatewayState>, writer: Arc<Mutex<W>>) -> Self {
        Self {
            state,
            writer,
            cancels: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Route one upstream frame.
    pub async fn dispatch(&self, frame: Frame) {
        match frame.kind {
            JsonRpcMessageKind::Request { id, method } => {
                self.handle_request(id, method, frame.value).await;
            }
            JsonRpcMessageKind::Notification { method } => {
                self.handle_notification(method, frame.value);
            }
            JsonRpcMessageKind::Response { id } => {
                tracing::debug!(%id, "unexpected response frame from upstream dropped");
            }
        }
    }

    async fn handle_request(&self, id: JsonRpcId, method: String, value: Value) {
        let params = value.get("params").cloned();
        match method.as_str() {
            "initialize" => {
                let requested = params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(|v| v.as_str());
                let result = json!({
                    "protocolVersion": negotiate_protocol_version(requested),
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": "muxgate",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                tracing::info!(protocol = %result["protocolVersion"], "upstream initialized");
                self.respond(jsonrpc::success_frame(&id, result)).await;
            }
            "tools/list" => {
                let result = meta_tools::meta_tool_descriptors(&self.state.registry.names());
                self.respond(jsonrpc::success_frame(&id, result)).await;
            }
            "ping" => {
                self.respond(jsonrpc::success_frame(&id, json!({}))).await;
            }
            "tools/call" => self.spawn_tool_call(id, params),
            other => {
                self.respond(jsonrpc::error_frame(
                    Some(&id),
                    JsonRpcError::new(
                        codes::METHOD_NOT_FOUND,
                        format!("Method not found: {other}"),
                    ),
                ))
                .await;
            }
        }
    }

    /// Run one `tools/call` on its own task.
    ///
    /// The task writes exactly one response frame for the request id: the
    /// meta-tool outcome, or a cancelled tool-error if
    /// `notifications/cancelled` wins the race. The backend is never told
    /// about the cancellation; a late response is dropped by the session
    /// reader as an unknown id.
    fn spawn_tool_call(&self, id: JsonRpcId, params: Option<Value>) {
        let token = CancellationToken::new();
        self.cancels.insert(id.clone(), token.clone());

        let state = self.state.clone();
        let writer = self.writer.clone();
        let cancels = self.cancels.clone();

        self.tracker.spawn(async move {
            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(%id, "in-flight request cancelled by upstream");
                    jsonrpc::success_frame(&id, meta_tools::tool_error("request cancelled"))
                }
                outcome = meta_tools::handle_tools_call(&state, params) => match outcome {
                    Ok(result) => jsonrpc::success_frame(&id, result),
                    Err(err) => jsonrpc::error_frame(Some(&id), err),
                },
            };
            cancels.remove(&id);
            write_upstream(&writer, &frame).await;
        });
    }

    fn handle_notification(&self, method: String, value: Value) {
        match method.as_str() {
            "notifications/initialized" => {
                tracing::debug!("upstream sent initialized notification");
            }
            "notifications/cancelled" => {
                let request_id = value
                    .get("params")
                    .and_then(|p| p.get("requestId"))
                    .cloned();
                let Some(request_id) = request_id else {
                    tracing::warn!("cancelled notification without requestId ignored");
                    return;
                };
                match serde_json::from_value::<JsonRpcId>(request_id) {
                    Ok(id) => match self.cancels.remove(&id) {
                        Some((_, token)) => token.cancel(),
                        None => {
                            tracing::debug!(%id, "cancelled notification for unknown request")
                        }
                    },
                    Err(_) => tracing::warn!("cancelled notification with invalid requestId"),
                }
            }
            other => tracing::debug!(method = other, "upstream notification logged"),
        }
    }

    /// Answer an upstream framing failure without closing the channel:
    /// -32600 when the frame was JSON but not JSON-RPC 2.0, -32700 otherwise.
    pub async fn report_framing_error(&self, error: &FramingError) {
        let err = if error.is_invalid_request() {
            JsonRpcError::new(codes::INVALID_REQUEST, "Invalid Request")
        } else {
            JsonRpcError::new(codes::PARSE_ERROR, "Parse error")
        };
        self.respond(jsonrpc::error_frame(None, err)).await;
    }

    /// Cancel all in-flight tool calls and wait for their tasks to finish
    /// writing.
    pub async fn shutdown(&self) {
        for entry in self.cancels.iter() {
            entry.value().cancel();
        }
        self.tracker.close();
        if tokio::time::timeout(Duration::from_secs(5), self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("tool-call tasks did not finish within the shutdown grace");
        }
    }

    async fn respond(&self, frame: Value) {
        write_upstream(&self.writer, &frame).await;
    }
}

/// Serialized, flushed write of one frame to the upstream channel.
///
/// A write failure here is logged rather than propagated: the spawned tasks
/// have nowhere to return it, and the main loop will observe the broken
/// channel on its own side.
async fn write_upstream<W: AsyncWrite + Unpin>(writer: &Mutex<W>, frame: &Value) {
    let mut guard = writer.lock().await;
    if let Err(e) = codec::write_frame(&mut *guard, frame).await {
        tracing::error!(error = %e, "failed to write upstream frame");
    }
}
