//! The gateway front face: upstream stdio loop, shared state, shutdown.

pub mod dispatcher;
pub mod meta_tools;

pub use dispatcher::Dispatcher;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::Mutex;

use muxgate_core::codec::{self, MAX_FRAME_BYTES};
use muxgate_core::config::Config;
use muxgate_core::error::FramingError;
use muxgate_core::security::SecurityMonitor;

use crate::backend::BackendRegistry;
use crate::error::GatewayError;

/// Shared collaborators, constructed once in `main` and passed by reference.
///
/// There are no process-wide singletons: the registry and the monitor live
/// here, and everything that needs them holds this state.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<BackendRegistry>,
    pub monitor: Arc<SecurityMonitor>,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let monitor = Arc::new(SecurityMonitor::new(config.security_policy.clone()));
        let registry = Arc::new(BackendRegistry::new(&config));
        Self {
            config: Arc::new(config),
            registry,
            monitor,
        }
    }
}

/// Run the gateway over the process's own stdin/stdout.
pub async fn run_stdio(config: Config) -> Result<i32, GatewayError> {
    run(config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the gateway over arbitrary upstream streams.
///
/// Frames are read serially; `tools/call` requests fan out onto their own
/// tasks inside the dispatcher. On upstream EOF all in-flight calls are
/// cancelled, every backend session is terminated, and the function returns
/// exit code 0. Framing errors never end the loop; only hard I/O errors on
/// the upstream channel do.
pub async fn run<R, W>(config: Config, reader: R, writer: W) -> Result<i32, GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let state = Arc::new(GatewayState::new(config));
    let writer = Arc::new(Mutex::new(writer));
    let dispatcher = Dispatcher::new(state.clone(), writer);

    tracing::info!(
        backends = ?state.registry.names(),
        "gateway serving on stdio"
    );

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match codec::bounded_read_line(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
            Ok(0) => break,
            Ok(n) => {
                let Ok(line) = std::str::from_utf8(&buf[..n]) else {
                    dispatcher
                        .report_framing_error(&FramingError::InvalidUtf8)
                        .await;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match codec::parse_frame(line) {
                    Ok(frame) => dispatcher.dispatch(frame).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream framing error");
                        dispatcher.report_framing_error(&e).await;
                    }
                }
            }
            Err(FramingError::Io(e)) => {
                tracing::error!(error = %e, "upstream read failed");
                dispatcher.shutdown().await;
                state.registry.shutdown().await;
                return Err(GatewayError::UpstreamIo(e));
            }
            Err(e) => {
                tracing::warn!(error = %e, "upstream framing error");
                dispatcher.report_framing_error(&e).await;
            }
        }
    }

    tracing::info!("upstream EOF; shutting down");
    dispatcher.shutdown().await;
    state.registry.shutdown().await;
    Ok(0)
}
