use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker executable path.
    pub program: PathBuf,
    /// Argument vector passed to the worker.
    pub args: Vec<String>,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Restart delays indexed by restart count; the last entry repeats.
    pub backoff: Vec<Duration>,
    /// Consecutive crashes tolerated before giving up.
    pub max_restarts: u32,
    /// Maximum number of deferred outbound writes.
    pub max_queue_depth: usize,
}

impl SupervisorConfig {
    /// Configuration with default timing policy for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            request_timeout: Duration::from_secs(30),
            backoff: vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
            max_restarts: 5,
            max_queue_depth: 64,
        }
    }

    /// Restart delay for the given restart count, clamped to the table.
    pub fn backoff_delay(&self, restart_count: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = (restart_count as usize).min(self.backoff.len() - 1);
        self.backoff[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_clamps_to_last_entry() {
        let config = SupervisorConfig::new("/usr/bin/worker");
        assert_eq!(config.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(4), Duration::from_secs(120));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(120));
    }

    #[test]
    fn empty_backoff_table_means_no_delay() {
        let mut config = SupervisorConfig::new("/usr/bin/worker");
        config.backoff.clear();
        assert_eq!(config.backoff_delay(3), Duration::ZERO);
    }
}
