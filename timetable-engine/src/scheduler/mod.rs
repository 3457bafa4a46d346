//! Job scheduling.
//!
//! Accepts prepared requests, runs each as a sandboxed script job on a
//! bounded worker pool, and emits lifecycle events (`Started`, incremental
//! `ResultBatch`es, then exactly one of `Done`/`Failed`/`Cancelled`) to
//! subscribers.

mod job;
mod pool;

pub use job::{Job, JobEvent, JobHandle, JobId, JobOutcome};
pub use pool::{Scheduler, SubmitError};
