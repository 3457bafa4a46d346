//! Engine configuration.

use std::time::Duration;

/// What to do when a data-bearing request produces zero records.
///
/// The engine cannot tell "no departures right now" apart from "parser
/// broken" on its own, so the policy is explicit rather than assumed.
/// Stop-suggestion requests are exempt: an empty completion list is a
/// meaningful answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyResultPolicy {
    /// Treat zero records as a parsing failure (the conservative default:
    /// a broken provider surfaces immediately instead of showing an empty
    /// board).
    #[default]
    Error,

    /// Accept zero records as a valid, empty result.
    Accept,
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrently running jobs.
    pub worker_count: usize,

    /// Records buffered before the collector publishes a partial batch.
    pub publish_threshold: usize,

    /// Maximum time between partial publishes while records trickle in.
    pub publish_interval: Duration,

    /// Default timeout per script download.
    pub download_timeout: Duration,

    /// Capacity of the job-event broadcast channel.
    pub event_capacity: usize,

    /// Policy for data-bearing requests that produce no records.
    pub empty_result_policy: EmptyResultPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 16,
            publish_threshold: 10,
            publish_interval: Duration::from_secs(2),
            download_timeout: Duration::from_secs(30),
            event_capacity: 128,
            empty_result_policy: EmptyResultPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size.
    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n.max(1);
        self
    }

    /// Set the partial-publish record threshold.
    pub fn with_publish_threshold(mut self, threshold: usize) -> Self {
        self.publish_threshold = threshold.max(1);
        self
    }

    /// Set the partial-publish interval.
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Set the default download timeout.
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Set the empty-result policy.
    pub fn with_empty_result_policy(mut self, policy: EmptyResultPolicy) -> Self {
        self.empty_result_policy = policy;
        self
    }
}
