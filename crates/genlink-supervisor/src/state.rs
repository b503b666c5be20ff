use std::time::Instant;

/// Lifecycle phase of the supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Initial and terminal: no process, no pending restart.
    Stopped,
    /// Spawn in progress; sends are deferred to the outbound queue.
    Starting,
    /// Process alive and serving requests.
    Running,
    /// Process death observed; restart policy not yet applied.
    Crashed,
    /// Backoff timer armed; a respawn is scheduled.
    Restarting,
}

impl Status {
    /// Human-readable name for status displays.
    pub fn name(self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Crashed => "crashed",
            Status::Restarting => "restarting",
        }
    }
}

/// Read-only snapshot of the supervisor's process state.
///
/// Owned and mutated exclusively by the supervisor; collaborators only
/// ever see copies.
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub status: Status,
    /// OS pid of the live worker, if any.
    pub pid: Option<u32>,
    /// Consecutive crashes since the last successful manual start/restart.
    pub restart_count: u32,
    pub last_crash_at: Option<Instant>,
    /// Requests currently awaiting resolution.
    pub pending_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_are_stable() {
        assert_eq!(Status::Stopped.name(), "stopped");
        assert_eq!(Status::Restarting.name(), "restarting");
    }
}
