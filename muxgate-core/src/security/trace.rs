//! Session trace: the append-only record of routed calls.
//!
//! One trace exists per gateway process, created at startup and never reset;
//! clearing a tainted session means restarting the process.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{SecurityLevel, SecurityPolicy};

/// How many trace entries a [`SecurityStatus`] snapshot carries.
pub const SNAPSHOT_RECENT_ENTRIES: usize = 10;

/// Outcome of a routed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    /// The call was allowed and the backend returned a result.
    Success,
    /// The call was allowed but the backend failed (error, timeout, abort).
    Failure,
    /// The monitor denied the call; no frame reached the backend.
    Denied,
}

/// One entry in the session trace.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Target backend name.
    pub backend: String,
    /// Requested tool on that backend.
    pub tool: String,
    /// The backend's security level, when a policy is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<SecurityLevel>,
    /// What happened.
    pub outcome: AccessOutcome,
    /// Deny reason or failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Append-only access log for one gateway process lifetime.
#[derive(Debug)]
pub struct SessionTrace {
    /// Session identity, minted at process start.
    pub session_id: Uuid,
    /// Wall-clock session start, for snapshots.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time of the most recent routed call.
    pub last_activity: DateTime<Utc>,
    /// Ordered access records.
    pub records: Vec<AccessRecord>,
    /// Monotonic taint flag. Once set it never clears.
    pub tainted: bool,
    /// What set the taint flag.
    pub taint_source: Option<String>,
}

impl SessionTrace {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            started_at: now,
            last_activity: now,
            records: Vec::new(),
            tainted: false,
            taint_source: None,
        }
    }

    /// Append a record and bump last-activity.
    pub fn append(&mut self, record: AccessRecord) {
        self.last_activity = record.timestamp;
        self.records.push(record);
    }

    /// Set the taint flag. The first taint source wins; later ones are kept
    /// only in their own records.
    pub fn taint(&mut self, source: impl Into<String>) {
        if !self.tainted {
            self.tainted = true;
            self.taint_source = Some(source.into());
        }
    }

    /// Whether any completed call to a backend at `level` succeeded.
    pub fn any_success_at_level(&self, level: SecurityLevel) -> bool {
        self.records
            .iter()
            .any(|r| r.outcome == AccessOutcome::Success && r.level == Some(level))
    }

    /// The backend named by the most recent record, if any.
    pub fn last_backend(&self) -> Option<&str> {
        self.records.last().map(|r| r.backend.as_str())
    }
}

impl Default for SessionTrace {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time view of the trace, returned by the `security_status`
/// meta-tool.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStatus {
    /// Session identity.
    pub session_id: Uuid,
    /// Session start (RFC 3339).
    pub started_at: DateTime<Utc>,
    /// Session age in seconds.
    pub duration_seconds: u64,
    /// Taint flag.
    pub tainted: bool,
    /// What set the taint flag, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taint_source: Option<String>,
    /// Access counts per backend.
    pub accesses_per_backend: BTreeMap<String, u64>,
    /// Total routed calls recorded.
    pub total_accesses: u64,
    /// The most recent records, oldest first.
    pub recent: Vec<AccessRecord>,
    /// The effective policy, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<SecurityPolicy>,
}

impl SecurityStatus {
    /// Build a snapshot from a trace. Called under the monitor's lock.
    pub fn capture(trace: &SessionTrace, policy: Option<&SecurityPolicy>) -> Self {
        let mut accesses_per_backend = BTreeMap::new();
        for record in &trace.records {
            *accesses_per_backend
                .entry(record.backend.clone())
                .or_insert(0u64) += 1;
        }

        let recent_start = trace.records.len().saturating_sub(SNAPSHOT_RECENT_ENTRIES);
        Self {
            session_id: trace.session_id,
            started_at: trace.started_at,
            duration_seconds: (Utc::now() - trace.started_at).num_seconds().max(0) as u64,
            tainted: trace.tainted,
            taint_source: trace.taint_source.clone(),
            accesses_per_backend,
            total_accesses: trace.records.len() as u64,
            recent: trace.records[recent_start..].to_vec(),
            policy: policy.cloned(),
        }
    }
}
