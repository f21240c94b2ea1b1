//! Backend registry: name → live session, with at-most-one child per name.
//!
//! All registry operations for one backend name are serialized by a per-name
//! async mutex, so concurrent callers either share the session being started
//! or wait for it; two children for the same backend can never coexist.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;

use muxgate_core::config::{BackendConfig, Config};

use crate::backend::lifecycle::ShutdownRequest;
use crate::backend::session::BackendSession;
use crate::error::BackendError;

pub struct BackendRegistry {
    configs: BTreeMap<String, BackendConfig>,
    sessions: DashMap<String, Arc<BackendSession>>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    shutdown_req: ShutdownRequest,
}

impl BackendRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            configs: config.backends.clone(),
            sessions: DashMap::new(),
            locks: DashMap::new(),
            shutdown_req: ShutdownRequest::default(),
        }
    }

    #[cfg(test)]
    fn with_shutdown(config: &Config, shutdown_req: ShutdownRequest) -> Self {
        Self {
            shutdown_req,
            ..Self::new(config)
        }
    }

    /// Configured backend names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Get a live session for `name`, spawning one lazily when needed.
    ///
    /// A session found Failed or Terminated is replaced with a fresh spawn;
    /// the dead instance is dropped here rather than resurrected. Spawn and
    /// handshake run under the per-name lock, so concurrent callers for the
    /// same backend serialize and every later caller sees the Ready session.
    pub async fn get(&self, name: &str) -> Result<Arc<BackendSession>, BackendError> {
        if !self.configs.contains_key(name) {
            return Err(BackendError::UnknownBackend {
                backend: name.to_string(),
                available: self.names().join(", "),
            });
        }

        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.sessions.get(name) {
            if existing.state().is_live() {
                return Ok(existing.clone());
            }
            tracing::info!(
                backend = name,
                state = %existing.state(),
                "replacing dead backend session"
            );
            drop(existing);
            self.sessions.remove(name);
        }

        // configs membership was checked above.
        let config = self.configs[name].clone();
        let session = BackendSession::launch(config).await?;
        self.sessions.insert(name.to_string(), session.clone());
        Ok(session)
    }

    /// Terminate every live session in parallel, bounded by the total grace
    /// deadline. Called once, on gateway shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<BackendSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if sessions.is_empty() {
            return;
        }

        tracing::info!(count = sessions.len(), "shutting down backend sessions");
        let shutdowns = sessions
            .iter()
            .map(|session| session.terminate(&self.shutdown_req));
        if tokio::time::timeout(self.shutdown_req.total_grace(), join_all(shutdowns))
            .await
            .is_err()
        {
            tracing::warn!("backend shutdown exceeded the grace deadline");
        }
        self.sessions.clear();
    }
}
