//! Store key-pattern contract.
//!
//! The job queue (an `arq`-style Redis queue) owns these keys; the dashboard
//! only counts them:
//!
//! | metric      | pattern                     |
//! |-------------|-----------------------------|
//! | in-progress | `<ns>:in-progress:*`        |
//! | retrying    | `<ns>:retry:*`              |
//! | queued      | `<ns>:job:*`                |
//! | finished    | `<ns>:result:*`             |
//! | workers     | `<wns>:worker:*:heartbeat`  |

/// Default namespace used by the job queue.
pub const DEFAULT_QUEUE_NAMESPACE: &str = "arq";

/// Metric names used in log fields.
pub const METRIC_IN_PROGRESS: &str = "in_progress";
pub const METRIC_RETRYING: &str = "retrying";
pub const METRIC_QUEUED: &str = "queued";
pub const METRIC_FINISHED: &str = "finished";
pub const METRIC_WORKERS: &str = "workers";

/// Glob patterns for each sampled metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPatterns {
    pub in_progress: String,
    pub retrying: String,
    pub queued: String,
    pub finished: String,
    pub workers: String,
}

impl KeyPatterns {
    /// Build patterns for a job namespace and a (possibly different) worker
    /// heartbeat namespace.
    pub fn new(queue_ns: &str, worker_ns: &str) -> Self {
        Self {
            in_progress: format!("{queue_ns}:in-progress:*"),
            retrying: format!("{queue_ns}:retry:*"),
            queued: format!("{queue_ns}:job:*"),
            finished: format!("{queue_ns}:result:*"),
            workers: format!("{worker_ns}:worker:*:heartbeat"),
        }
    }
}

impl Default for KeyPatterns {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_NAMESPACE, DEFAULT_QUEUE_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns_use_arq_namespace() {
        let p = KeyPatterns::default();
        assert_eq!(p.in_progress, "arq:in-progress:*");
        assert_eq!(p.retrying, "arq:retry:*");
        assert_eq!(p.queued, "arq:job:*");
        assert_eq!(p.finished, "arq:result:*");
        assert_eq!(p.workers, "arq:worker:*:heartbeat");
    }

    #[test]
    fn worker_namespace_is_independent() {
        let p = KeyPatterns::new("jobs", "fleet");
        assert_eq!(p.queued, "jobs:job:*");
        assert_eq!(p.workers, "fleet:worker:*:heartbeat");
    }
}
