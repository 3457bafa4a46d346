//! Job identity, lifecycle events and handles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use crate::domain::{ProviderId, RequestKind, ResultBatch, SourceName};
use crate::script::ScriptError;

/// Identifier of one submitted job, unique within the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Descriptor of one in-flight execution, carried by every event.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: RequestKind,
    pub provider: ProviderId,
    pub source_name: SourceName,
}

/// How a job ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The script completed; `published` records went out in total.
    Done { published: usize },

    /// The script failed. Batches published before the failure stand.
    Failed {
        error: ScriptError,
        published: usize,
        /// Last URL the script attempted, for diagnostics.
        last_url: Option<String>,
    },

    /// The job was cancelled cooperatively. Only already-published data
    /// stands; no `Done` or `Failed` is ever emitted for it.
    Cancelled { published: usize },
}

impl JobOutcome {
    /// Records published over the job's lifetime.
    pub fn published(&self) -> usize {
        match self {
            JobOutcome::Done { published }
            | JobOutcome::Failed { published, .. }
            | JobOutcome::Cancelled { published } => *published,
        }
    }

    /// Whether the job completed successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

/// Lifecycle events delivered to scheduler subscribers.
///
/// Per job: exactly one `Started`, zero or more `ResultBatch`, then exactly
/// one terminal event (`Done`, `Failed` or `Cancelled`). Batches for one
/// source name arrive in the order the script produced them.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        job: Job,
    },
    ResultBatch {
        job: Job,
        batch: ResultBatch,
    },
    Done {
        job: Job,
        published: usize,
    },
    Failed {
        job: Job,
        error: ScriptError,
        published: usize,
        last_url: Option<String>,
    },
    Cancelled {
        job: Job,
        published: usize,
    },
}

impl JobEvent {
    /// The job the event belongs to.
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Started { job }
            | JobEvent::ResultBatch { job, .. }
            | JobEvent::Done { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job, .. } => job,
        }
    }

    /// Whether this is a terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Done { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

/// Handle to one submitted job.
pub struct JobHandle {
    pub(super) id: JobId,
    pub(super) source_name: SourceName,
    pub(super) cancelled: Arc<AtomicBool>,
    pub(super) task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    /// The job's id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The source name the job publishes under.
    pub fn source_name(&self) -> &SourceName {
        &self.source_name
    }

    /// Ask the job to stop.
    ///
    /// Cancellation is cooperative: the sandbox notices the flag at its
    /// next safe point and winds the job down with a `Cancelled` outcome.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Wait for the job's outcome.
    ///
    /// Returns `None` only if the job's task was aborted externally.
    pub async fn wait(self) -> Option<JobOutcome> {
        self.task.await.ok()
    }
}
