//! Backend session: one supervised MCP child process and its RPC façade.
//!
//! A session owns the child, its three pipes, and the outstanding-request
//! table. Concurrency model:
//!
//! - one dedicated reader task consumes the child's stdout frame by frame
//! - one drainer task logs the child's stderr until EOF
//! - callers issue requests through [`BackendSession::call`]; writes to the
//!   child's stdin are serialized by a mutex, and each request parks on a
//!   oneshot slot in the pending table until its response, its deadline, or
//!   session teardown completes it
//!
//! Backend-local request ids come from an atomic counter and are never reused
//! while the session lives. They are a private namespace: nothing in this
//! module ever surfaces them upstream.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

use muxgate_core::codec::{self, MAX_FRAME_BYTES};
use muxgate_core::config::BackendConfig;
use muxgate_core::error::FramingError;
use muxgate_core::jsonrpc::{self, JsonRpcError, JsonRpcId, JsonRpcMessageKind, codes};
use muxgate_core::latest_protocol_version;

use crate::backend::lifecycle::{SessionState, ShutdownRequest};
use crate::error::BackendError;

/// Outstanding requests: backend-local id → single-shot response slot.
///
/// Removal is atomic with completion: whoever removes the entry (reader on
/// response, caller on timeout, teardown on abort) owns delivering exactly
/// one outcome to the waiter.
type PendingMap = Arc<DashMap<i64, oneshot::Sender<Result<Value, BackendError>>>>;

/// One live backend child process.
#[derive(Debug)]
pub struct BackendSession {
    config: BackendConfig,
    state_tx: watch::Sender<SessionState>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    next_id: AtomicI64,
    pending: PendingMap,
    tools_cache: Mutex<Option<Value>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    stderr_drain: Mutex<Option<JoinHandle<()>>>,
}

impl BackendSession {
    /// Spawn the child, run the MCP initialize handshake, and return a Ready
    /// session.
    ///
    /// On spawn failure or handshake failure the session ends up Failed with
    /// the child killed and reaped; the registry creates a fresh instance on
    /// the next routed call.
    pub async fn launch(config: BackendConfig) -> Result<Arc<Self>, BackendError> {
        let name = config.name.clone();

        let mut cmd = Command::new(&config.argv[0]);
        cmd.args(&config.argv[1..])
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| BackendError::SpawnFailed {
            backend: name.clone(),
            reason: e.to_string(),
        })?;

        let stdin = take_pipe(child.stdin.take(), &name, "stdin")?;
        let stdout = take_pipe(child.stdout.take(), &name, "stdout")?;
        let stderr = take_pipe(child.stderr.take(), &name, "stderr")?;
        let pid = child.id();
        tracing::info!(backend = %name, ?pid, argv = ?config.argv, "backend process spawned");

        let (state_tx, _) = watch::channel(SessionState::Starting);
        let pending: PendingMap = Arc::new(DashMap::new());
        let stdin = Arc::new(Mutex::new(Some(stdin)));

        let reader = tokio::spawn(reader_loop(
            name.clone(),
            stdout,
            pending.clone(),
            stdin.clone(),
            state_tx.clone(),
        ));
        let stderr_drain = tokio::spawn(stderr_loop(name.clone(), stderr));

        let session = Arc::new(Self {
            config,
            state_tx,
            stdin,
            child: Mutex::new(Some(child)),
            pid,
            next_id: AtomicI64::new(1),
            pending,
            tools_cache: Mutex::new(None),
            reader: Mutex::new(Some(reader)),
            stderr_drain: Mutex::new(Some(stderr_drain)),
        });

        if let Err(e) = session.handshake().await {
            session.advance(SessionState::Failed);
            session.force_kill().await;
            return Err(e);
        }

        session.advance(SessionState::Ready);
        tracing::info!(backend = %session.config.name, "backend session ready");
        Ok(session)
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Backend description from configuration.
    pub fn description(&self) -> &str {
        &self.config.description
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Issue a request to the backend and await its response.
    ///
    /// Allocates a fresh backend-local id, installs the pending entry before
    /// the serialized stdin write, and completes with the response, a timeout
    /// error at the configured deadline, or an aborted error if the session
    /// dies first. The pending entry is removed in all three cases.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        if !self.state().is_live() {
            return Err(BackendError::Aborted {
                backend: self.config.name.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let frame = jsonrpc::request_frame(&JsonRpcId::Number(id), method, params);
        if let Err(e) = self.write(&frame).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a value: teardown raced our wait.
            Ok(Err(_)) => Err(BackendError::Aborted {
                backend: self.config.name.clone(),
            }),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(backend = %self.config.name, method, id, "backend request timed out");
                Err(BackendError::Timeout {
                    backend: self.config.name.clone(),
                    seconds: self.config.timeout.as_secs(),
                })
            }
        }
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
        let frame = jsonrpc::notification_frame(method, params);
        self.write(&frame).await
    }

    /// The backend's `tools/list` result, fetched once and cached until the
    /// session terminates. Failures are not cached.
    pub async fn list_tools(&self) -> Result<Value, BackendError> {
        let mut cache = self.tools_cache.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }
        let result = self.call("tools/list", None).await?;
        *cache = Some(result.clone());
        Ok(result)
    }

    /// Terminate the session: close stdin, escalate through SIGTERM to
    /// SIGKILL across the configured grace periods, reap the child, abort
    /// all outstanding waiters, and drain stderr.
    ///
    /// MCP has no shutdown request; stream closure is the signal.
    pub async fn terminate(&self, req: &ShutdownRequest) {
        self.advance(SessionState::Terminating);
        let name = self.config.name.clone();
        tracing::info!(backend = %name, "terminating backend session");

        // Closing stdin is the polite exit signal.
        self.stdin.lock().await.take();

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            let mut exited =
                match tokio::time::timeout(req.stdin_close_grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::info!(backend = %name, code = status.code(), "backend exited after stdin close");
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::error!(backend = %name, error = %e, "wait failed after stdin close");
                        false
                    }
                    Err(_) => false,
                };

            #[cfg(unix)]
            if !exited {
                if let Some(pid) = self.pid {
                    use nix::sys::signal::{Signal, killpg};
                    use nix::unistd::Pid;
                    tracing::info!(backend = %name, pid, "sending SIGTERM to process group");
                    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        tracing::warn!(backend = %name, pid, error = ?e, "killpg SIGTERM failed");
                    }
                }
                exited = matches!(
                    tokio::time::timeout(req.sigterm_grace, child.wait()).await,
                    Ok(Ok(_))
                );
            }

            if !exited {
                tracing::warn!(backend = %name, "sending SIGKILL");
                if let Err(e) = child.kill().await {
                    tracing::error!(backend = %name, error = %e, "SIGKILL failed");
                }
            }

            // Reap. A second wait on an exited child returns the cached
            // status, so this is safe on every path.
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(backend = %name, code = status.code(), "backend reaped")
                }
                Err(e) => tracing::error!(backend = %name, error = %e, "failed to reap backend"),
            }
        }
        *child_guard = None;
        drop(child_guard);

        abort_all(&name, &self.pending);

        // Stderr must reach EOF before the session counts as Terminated.
        if let Some(handle) = self.stderr_drain.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }

        self.advance(SessionState::Terminated);
        tracing::info!(backend = %name, "backend session terminated");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// MCP initialize handshake: request, then the initialized notification.
    async fn handshake(&self) -> Result<(), BackendError> {
        let params = json!({
            "protocolVersion": latest_protocol_version(),
            "capabilities": {},
            "clientInfo": {
                "name": "muxgate",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .call("initialize", Some(params))
            .await
            .map_err(|e| BackendError::HandshakeFailed {
                backend: self.config.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            backend = %self.config.name,
            server_info = %result.get("serverInfo").cloned().unwrap_or(serde_json::Value::Null),
            "initialize handshake complete"
        );

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| BackendError::HandshakeFailed {
                backend: self.config.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Serialize a frame onto the child's stdin under the write mutex.
    async fn write(&self, frame: &Value) -> Result<(), BackendError> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(BackendError::Aborted {
                backend: self.config.name.clone(),
            });
        };
        codec::write_frame(stdin, frame)
            .await
            .map_err(|e| BackendError::Transport {
                backend: self.config.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Kill and reap the child without grace, used after handshake failure.
    async fn force_kill(&self) {
        self.stdin.lock().await.take();
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        *guard = None;
        drop(guard);
        abort_all(&self.config.name, &self.pending);
    }

    /// Move the state machine forward; backward transitions are ignored.
    fn advance(&self, next: SessionState) {
        self.state_tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn take_pipe<T>(pipe: Option<T>, backend: &str, which: &str) -> Result<T, BackendError> {
    pipe.ok_or_else(|| BackendError::SpawnFailed {
        backend: backend.to_string(),
        reason: format!("failed to capture child {which}"),
    })
}

/// Complete every outstanding waiter with an aborted error.
fn abort_all(backend: &str, pending: &PendingMap) {
    let ids: Vec<i64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(BackendError::Aborted {
                backend: backend.to_string(),
            }));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader loop
// ─────────────────────────────────────────────────────────────────────────────

/// Consume the child's stdout frame by frame until EOF.
///
/// Responses complete their pending entry; notifications are logged and never
/// forwarded upstream; backend-initiated requests are answered with
/// method-not-found. A corrupt line is logged and dropped: a misbehaving
/// backend must not kill the gateway.
async fn reader_loop(
    name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    state_tx: watch::Sender<SessionState>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = match codec::bounded_read_line(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(FramingError::Io(e)) => {
                tracing::warn!(backend = %name, error = %e, "backend stdout read failed");
                break;
            }
            Err(e) => {
                tracing::warn!(backend = %name, error = %e, "oversized backend line dropped");
                continue;
            }
        };

        let Ok(line) = std::str::from_utf8(&buf[..n]) else {
            tracing::warn!(backend = %name, len = n, "invalid UTF-8 from backend dropped");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match codec::parse_frame(line) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(backend = %name, error = %e, "corrupt frame from backend dropped");
                continue;
            }
        };

        match frame.kind {
            JsonRpcMessageKind::Response { id } => {
                // The gateway only issues numeric ids toward backends.
                let JsonRpcId::Number(id) = id else {
                    tracing::debug!(backend = %name, %id, "response with foreign id dropped");
                    continue;
                };
                match pending.remove(&id) {
                    Some((_, tx)) => {
                        let outcome = match frame.value.get("error") {
                            Some(err) => Err(BackendError::Rpc {
                                backend: name.clone(),
                                code: err
                                    .get("code")
                                    .and_then(|c| c.as_i64())
                                    .unwrap_or(codes::INTERNAL_ERROR),
                                message: err
                                    .get("message")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("unknown error")
                                    .to_string(),
                            }),
                            None => Ok(frame.value.get("result").cloned().unwrap_or(Value::Null)),
                        };
                        // A dropped receiver means the caller already timed
                        // out or was cancelled; the response is discarded.
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::debug!(backend = %name, id, "response for unknown id dropped")
                    }
                }
            }
            JsonRpcMessageKind::Notification { method } => {
                tracing::debug!(backend = %name, method, "backend notification (not forwarded)");
            }
            JsonRpcMessageKind::Request { id, method } => {
                tracing::warn!(
                    backend = %name,
                    method,
                    "backend-initiated request is not supported"
                );
                let resp = jsonrpc::error_frame(
                    Some(&id),
                    JsonRpcError::new(
                        codes::METHOD_NOT_FOUND,
                        format!("server-initiated method '{method}' is not supported"),
                    ),
                );
                let mut guard = stdin.lock().await;
                if let Some(writer) = guard.as_mut() {
                    let _ = codec::write_frame(writer, &resp).await;
                }
            }
        }
    }

    tracing::debug!(backend = %name, "backend stdout closed");
    abort_all(&name, &pending);

    // If nobody initiated termination, the child died on its own.
    state_tx.send_if_modified(|state| {
        if state.can_advance_to(SessionState::Failed) {
            *state = SessionState::Failed;
            true
        } else {
            false
        }
    });
}

/// Log the child's stderr until EOF.
async fn stderr_loop(name: String, stderr: ChildStderr) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::warn!(backend = %name, "backend stderr: {line}");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(backend = %name, error = %e, "backend stderr read failed");
                break;
            }
        }
    }
    tracing::debug!(backend = %name, "backend stderr drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// The handshake responder used by these tests: answers the gateway's
    /// `initialize` (always backend-local id 1), swallows the initialized
    /// notification, then runs `tail` for further scripted behavior.
    const INIT_REPLY: &str = concat!(
        "read line; ",
        r#"printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"mock","version":"0"}}}\n'; "#,
        "read note; ",
    );

    fn shell_backend(tail: &str, timeout: Duration) -> BackendConfig {
        BackendConfig {
            name: "mock".to_string(),
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("{INIT_REPLY}{tail}"),
            ],
            env: HashMap::new(),
            description: "test backend".to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_launch_reaches_ready() {
        let session = BackendSession::launch(shell_backend("sleep 5", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.pending_len(), 0);
        session.terminate(&ShutdownRequest {
            stdin_close_grace: Duration::from_millis(100),
            sigterm_grace: Duration::from_millis(100),
        })
        .await;
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_terminal() {
        let config = BackendConfig {
            name: "ghost".to_string(),
            argv: vec!["/nonexistent/muxgate-test-binary".to_string()],
            env: HashMap::new(),
            description: String::new(),
            timeout: Duration::from_secs(1),
        };
        let err = BackendSession::launch(config).await.unwrap_err();
        assert!(matches!(err, BackendError::SpawnFailed { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_handshake_timeout_fails_session() {
        let config = BackendConfig {
            name: "silent".to_string(),
            argv: vec!["sh".to_string(), "-c".to_string(), "sleep 10".to_string()],
            env: HashMap::new(),
            description: String::new(),
            timeout: Duration::from_millis(300),
        };
        let err = BackendSession::launch(config).await.unwrap_err();
        assert!(matches!(err, BackendError::HandshakeFailed { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        // Second request (id 2) gets a canned tool result.
        let tail = concat!(
            "read line; ",
            r#"printf '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}\n'; "#,
            "sleep 5",
        );
        let session = BackendSession::launch(shell_backend(tail, Duration::from_secs(5)))
            .await
            .unwrap();

        let result = session.call("ping", None).await.unwrap();
        assert_eq!(result["content"][0]["text"], "pong");
        assert_eq!(session.pending_len(), 0);

        session.terminate(&ShutdownRequest {
            stdin_close_grace: Duration::from_millis(100),
            sigterm_grace: Duration::from_millis(100),
        })
        .await;
    }

    #[tokio::test]
    async fn test_call_timeout_removes_pending_entry() {
        // The backend accepts the request and never replies.
        let session = BackendSession::launch(shell_backend(
            "read line; sleep 10",
            Duration::from_millis(300),
        ))
        .await
        .unwrap();

        let err = session.call("ping", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { seconds: 0, .. }), "{err}");
        assert_eq!(session.pending_len(), 0);

        session.terminate(&ShutdownRequest {
            stdin_close_grace: Duration::from_millis(100),
            sigterm_grace: Duration::from_millis(100),
        })
        .await;
    }

    #[tokio::test]
    async fn test_terminate_aborts_in_flight_waiters() {
        let session = BackendSession::launch(shell_backend(
            "read line; sleep 10",
            Duration::from_secs(30),
        ))
        .await
        .unwrap();

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.call("ping", None).await })
        };
        // Let the call install its pending entry and write the frame.
        tokio::time::sleep(Duration::from_millis(200)).await;

        session.terminate(&ShutdownRequest {
            stdin_close_grace: Duration::from_millis(100),
            sigterm_grace: Duration::from_millis(100),
        })
        .await;

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, BackendError::Aborted { .. }), "{err}");
        assert_eq!(session.pending_len(), 0);
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_backend_error_response_surfaces_as_rpc_error() {
        let tail = concat!(
            "read line; ",
            r#"printf '{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"no such tool"}}\n'; "#,
            "sleep 5",
        );
        let session = BackendSession::launch(shell_backend(tail, Duration::from_secs(5)))
            .await
            .unwrap();

        let err = session.call("tools/call", None).await.unwrap_err();
        assert!(
            matches!(err, BackendError::Rpc { code: -32601, ref message, .. } if message == "no such tool"),
            "{err}"
        );

        session.terminate(&ShutdownRequest {
            stdin_close_grace: Duration::from_millis(100),
            sigterm_grace: Duration::from_millis(100),
        })
        .await;
    }

    #[tokio::test]
    async fn test_child_death_fails_session_and_aborts_waiters() {
        // Backend exits right after the handshake.
        let session = BackendSession::launch(shell_backend("exit 0", Duration::from_secs(5)))
            .await
            .unwrap();

        // Wait for the reader loop to observe EOF.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.call("ping", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Aborted { .. }), "{err}");
    }
}
