//! Lifecycle types for managed backend child processes.

use std::time::Duration;

/// State of a backend session.
///
/// Transitions only move forward: NotStarted → Starting → Ready →
/// Terminating → Terminated, with Failed as a terminal branch from Starting
/// or Ready. The registry replaces Failed/Terminated instances with fresh
/// ones on the next routed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Configured but no child process yet.
    NotStarted,
    /// Child spawned, initialize handshake in flight.
    Starting,
    /// Handshake complete; requests may be issued.
    Ready,
    /// Shutdown in progress; new calls are refused.
    Terminating,
    /// Child reaped, stderr drained, pending table released.
    Terminated,
    /// Spawn or handshake failed. Terminal for this instance.
    Failed,
}

impl SessionState {
    /// Whether the session can accept (or is about to accept) requests.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Ready)
    }

    /// Whether this state permits a forward transition to `next`.
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Starting, Terminating)
                | (Ready, Terminating)
                | (Ready, Failed)
                | (Terminating, Terminated)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::NotStarted => "not_started",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Grace periods for the termination escalation sequence:
/// close stdin → wait → SIGTERM the process group → wait → SIGKILL → reap.
#[derive(Debug, Clone)]
pub struct ShutdownRequest {
    /// Time to wait after closing stdin before sending SIGTERM.
    pub stdin_close_grace: Duration,
    /// Time to wait after SIGTERM before sending SIGKILL.
    pub sigterm_grace: Duration,
}

impl ShutdownRequest {
    /// Upper bound on a full escalation, used to cap parallel registry
    /// shutdown.
    pub fn total_grace(&self) -> Duration {
        self.stdin_close_grace + self.sigterm_grace + Duration::from_secs(3)
    }
}

impl Default for ShutdownRequest {
    fn default() -> Self {
        Self {
            stdin_close_grace: Duration::from_secs(5),
            sigterm_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use SessionState::*;
        assert!(NotStarted.can_advance_to(Starting));
        assert!(Starting.can_advance_to(Ready));
        assert!(Starting.can_advance_to(Failed));
        assert!(Ready.can_advance_to(Terminating));
        assert!(Terminating.can_advance_to(Terminated));
    }

    #[test]
    fn test_no_backward_transitions() {
        use SessionState::*;
        assert!(!Ready.can_advance_to(Starting));
        assert!(!Terminated.can_advance_to(Ready));
        assert!(!Failed.can_advance_to(Starting));
        assert!(!Terminated.can_advance_to(Terminating));
    }

    #[test]
    fn test_liveness() {
        assert!(SessionState::Ready.is_live());
        assert!(SessionState::Starting.is_live());
        assert!(!SessionState::Failed.is_live());
        assert!(!SessionState::Terminating.is_live());
    }

    #[test]
    fn test_shutdown_defaults() {
        let req = ShutdownRequest::default();
        assert_eq!(req.stdin_close_grace, Duration::from_secs(5));
        assert_eq!(req.sigterm_grace, Duration::from_secs(2));
        assert_eq!(req.total_grace(), Duration::from_secs(10));
    }
}
