//! The bounded job pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, broadcast, watch};
use tracing::{debug, info, warn};

use crate::collector::Publisher;
use crate::config::EngineConfig;
use crate::domain::{ProviderData, Request, SourceName};
use crate::network::Downloader;
use crate::script::{JobContext, ScriptError, ScriptSandbox};

use super::job::{Job, JobEvent, JobHandle, JobId, JobOutcome};

/// Error returned when a submission is not accepted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    /// A job for the same source name is still in flight. Resubmit after
    /// its terminal event.
    #[error("a job for source '{0}' is already in flight")]
    DuplicateSource(SourceName),

    /// The scheduler no longer accepts jobs.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Runs jobs on a bounded pool of worker threads.
///
/// Jobs for different providers run fully in parallel, bounded only by the
/// pool size. Two submissions for the *same* source name are never in
/// flight together: the second is rejected until the first delivers its
/// terminal event. One job's failure never disturbs another; script panics
/// are contained by the worker task.
pub struct Scheduler {
    sandbox: Arc<ScriptSandbox>,
    semaphore: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<SourceName, JobId>>>,
    events: broadcast::Sender<JobEvent>,
    active: watch::Sender<usize>,
    next_id: AtomicU64,
    shutting_down: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler running downloads through the given downloader.
    pub fn new(config: EngineConfig, downloader: Arc<dyn Downloader>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (active, _) = watch::channel(0usize);
        let worker_count = config.worker_count;
        Self {
            sandbox: Arc::new(ScriptSandbox::new(config, downloader)),
            semaphore: Arc::new(Semaphore::new(worker_count)),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            events,
            active,
            next_id: AtomicU64::new(1),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to job lifecycle events.
    ///
    /// Subscribers that lag behind the channel capacity miss events; size
    /// the capacity in [`EngineConfig`] for the slowest consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// The sandbox jobs run in, shared with the capability cache.
    pub fn sandbox(&self) -> Arc<ScriptSandbox> {
        Arc::clone(&self.sandbox)
    }

    /// Number of jobs currently submitted and not yet finished.
    pub fn active_jobs(&self) -> usize {
        *self.active.borrow()
    }

    /// Submit a request for execution.
    ///
    /// The job starts as soon as a worker slot is free. Returns a handle
    /// for cancellation and outcome waiting.
    pub fn submit(
        &self,
        provider: ProviderData,
        request: Request,
    ) -> Result<JobHandle, SubmitError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(SubmitError::ShuttingDown);
        }

        let source_name = request.source_name().clone();
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if inflight.contains_key(&source_name) {
                return Err(SubmitError::DuplicateSource(source_name));
            }
            inflight.insert(source_name.clone(), id);
        }

        let job = Job {
            id,
            kind: request.kind(),
            provider: provider.id.clone(),
            source_name: source_name.clone(),
        };
        debug!(%id, source = %source_name, "job accepted");

        let cancelled = Arc::new(AtomicBool::new(false));
        let sandbox = Arc::clone(&self.sandbox);
        let semaphore = Arc::clone(&self.semaphore);
        let inflight = Arc::clone(&self.inflight);
        let events = self.events.clone();
        let active = self.active.clone();
        let cancel_flag = Arc::clone(&cancelled);

        active.send_modify(|n| *n += 1);

        let task = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("scheduler semaphore never closes");

            // Event sends are fire-and-forget: no subscribers, no problem.
            let _ = events.send(JobEvent::Started { job: job.clone() });

            let publisher: Publisher = {
                let events = events.clone();
                let job = job.clone();
                Box::new(move |batch| {
                    let _ = events.send(JobEvent::ResultBatch {
                        job: job.clone(),
                        batch,
                    });
                })
            };

            let ctx = JobContext {
                cancelled: Arc::clone(&cancel_flag),
                runtime: tokio::runtime::Handle::current(),
                publisher,
            };

            let script_path = provider.script_path.clone();
            let run = tokio::task::spawn_blocking(move || sandbox.run(&provider, &request, ctx))
                .await;

            let outcome = match run {
                Ok(run) => match run.result {
                    Ok(published) => JobOutcome::Done { published },
                    Err(error) if error.is_cancelled() => JobOutcome::Cancelled {
                        published: run.published,
                    },
                    Err(error) => JobOutcome::Failed {
                        error,
                        published: run.published,
                        last_url: run.last_url,
                    },
                },
                // A panic inside the script machinery is contained here and
                // reported like any other failure.
                Err(join_error) => JobOutcome::Failed {
                    error: ScriptError::Runtime {
                        path: script_path,
                        line: None,
                        message: format!("worker panicked: {join_error}"),
                    },
                    published: 0,
                    last_url: None,
                },
            };

            // Free the source name before announcing the outcome, so a
            // subscriber reacting to the terminal event can resubmit.
            {
                let mut inflight = inflight.lock().expect("inflight lock poisoned");
                inflight.remove(&job.source_name);
            }

            let event = match &outcome {
                JobOutcome::Done { published } => {
                    debug!(id = %job.id, published, "job done");
                    JobEvent::Done {
                        job: job.clone(),
                        published: *published,
                    }
                }
                JobOutcome::Failed {
                    error,
                    published,
                    last_url,
                } => {
                    warn!(id = %job.id, %error, "job failed");
                    JobEvent::Failed {
                        job: job.clone(),
                        error: error.clone(),
                        published: *published,
                        last_url: last_url.clone(),
                    }
                }
                JobOutcome::Cancelled { published } => {
                    debug!(id = %job.id, published, "job cancelled");
                    JobEvent::Cancelled {
                        job: job.clone(),
                        published: *published,
                    }
                }
            };
            let _ = events.send(event);

            active.send_modify(|n| *n -= 1);
            outcome
        });

        Ok(JobHandle {
            id,
            source_name,
            cancelled,
            task,
        })
    }

    /// Stop accepting submissions and wait for in-flight jobs to finish.
    ///
    /// In-flight jobs are not cancelled; pair with [`JobHandle::cancel`]
    /// for a faster stop.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        info!("scheduler shutting down, draining in-flight jobs");

        let mut active = self.active.subscribe();
        // wait_for returns immediately if the value already satisfies.
        let _ = active.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use crate::domain::{DepartureRequest, ProviderId, RequestCommon, SourceName};
    use crate::network::MockDownloader;

    fn write_script(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    fn provider(dir: &TempDir, id: &str, script: &str) -> ProviderData {
        ProviderData::new(ProviderId::parse(id).unwrap(), dir.path().join(script))
    }

    fn departures(provider_id: &str, source: &str, stop: &str) -> Request {
        Request::Departures(DepartureRequest {
            common: RequestCommon::new(
                ProviderId::parse(provider_id).unwrap(),
                SourceName::new(source),
                NaiveDate::from_ymd_opt(2024, 3, 15)
                    .unwrap()
                    .and_hms_opt(10, 30, 0)
                    .unwrap(),
                10,
            ),
            stop: stop.into(),
            stop_id: None,
            city: None,
        })
    }

    const THREE_DEPARTURES: &str = r#"
fn getTimetable(params) {
    let reply = network.download("http://mock/board");
    for row in reply.body.split(";") {
        result.add(#{ "TransportLine": row, "Target": "X" });
    }
}
"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn job_publishes_batches_then_done() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "p.rhai", THREE_DEPARTURES);
        let mock = MockDownloader::new();
        mock.insert("http://mock/board", "S1;S2;S8");

        let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(mock));
        let mut events = scheduler.subscribe();

        let handle = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures de_db|stop=Main St", "Main St"),
            )
            .unwrap();

        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Done { published: 3 }));

        // Started, then batches summing to 3 records, then Done.
        let mut saw_started = false;
        let mut records = 0;
        loop {
            match events.recv().await.unwrap() {
                JobEvent::Started { .. } => saw_started = true,
                JobEvent::ResultBatch { batch, .. } => records += batch.len(),
                JobEvent::Done { published, .. } => {
                    assert_eq!(published, 3);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(saw_started);
        assert_eq!(records, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_source_is_rejected_while_in_flight() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "p.rhai", THREE_DEPARTURES);
        let mock = MockDownloader::new();
        mock.insert_with_delay("http://mock/board", "S1", Duration::from_millis(200));

        let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(mock));

        let first = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures de_db|stop=Main St", "Main St"),
            )
            .unwrap();

        // Same source name while the first is parked on its download.
        let second = scheduler.submit(
            provider(&dir, "de_db", "p.rhai"),
            departures("de_db", "Departures de_db|stop=Main St", "Main St"),
        );
        assert!(matches!(second, Err(SubmitError::DuplicateSource(_))));

        // A different source name is fine.
        assert!(
            scheduler
                .submit(
                    provider(&dir, "de_db", "p.rhai"),
                    departures("de_db", "Departures de_db|stop=Harbor", "Main St"),
                )
                .is_ok()
        );

        // After the terminal outcome the source name is free again.
        first.wait().await.unwrap();
        assert!(
            scheduler
                .submit(
                    provider(&dir, "de_db", "p.rhai"),
                    departures("de_db", "Departures de_db|stop=Main St", "Main St"),
                )
                .is_ok()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_failing_job_does_not_disturb_others() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "good.rhai", THREE_DEPARTURES);
        write_script(dir.path(), "bad.rhai", "fn getJourneys(params) { }");
        let mock = MockDownloader::new();
        mock.insert("http://mock/board", "S1;S2");

        let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(mock));

        let bad = scheduler
            .submit(
                provider(&dir, "bad_provider", "bad.rhai"),
                departures("bad_provider", "Departures bad", "Main St"),
            )
            .unwrap();
        let good = scheduler
            .submit(
                provider(&dir, "good_provider", "good.rhai"),
                departures("good_provider", "Departures good", "Main St"),
            )
            .unwrap();

        let bad_outcome = bad.wait().await.unwrap();
        match bad_outcome {
            JobOutcome::Failed { error, .. } => {
                assert!(matches!(error, ScriptError::FunctionMissing { .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let good_outcome = good.wait().await.unwrap();
        assert!(matches!(good_outcome, JobOutcome::Done { published: 2 }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_job_emits_cancelled_not_done() {
        let dir = TempDir::new().unwrap();
        write_script(
            dir.path(),
            "p.rhai",
            r#"
fn getTimetable(params) {
    result.add(#{ "Target": "early" });
    let reply = network.download("http://mock/slow");
    result.add(#{ "Target": "late" });
}
"#,
        );
        let mock = MockDownloader::new();
        mock.insert_with_delay("http://mock/slow", "body", Duration::from_millis(200));

        let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(mock));
        let mut events = scheduler.subscribe();

        let handle = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures de_db", "Main St"),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, JobOutcome::Cancelled { published: 1 }));

        // The event stream must contain Cancelled and never Done/Failed.
        let mut saw_cancelled = false;
        loop {
            match events.recv().await.unwrap() {
                JobEvent::Done { .. } | JobEvent::Failed { .. } => {
                    panic!("cancelled job must not emit Done/Failed")
                }
                JobEvent::Cancelled { published, .. } => {
                    assert_eq!(published, 1);
                    saw_cancelled = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_drains_and_rejects() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "p.rhai", THREE_DEPARTURES);
        let mock = MockDownloader::new();
        mock.insert_with_delay("http://mock/board", "S1", Duration::from_millis(100));

        let scheduler = Scheduler::new(EngineConfig::default(), Arc::new(mock));
        let handle = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures de_db", "Main St"),
            )
            .unwrap();

        scheduler.shutdown().await;
        assert_eq!(scheduler.active_jobs(), 0);

        let rejected = scheduler.submit(
            provider(&dir, "de_db", "p.rhai"),
            departures("de_db", "Departures later", "Main St"),
        );
        assert!(matches!(rejected, Err(SubmitError::ShuttingDown)));

        // The drained job finished normally.
        assert!(handle.wait().await.unwrap().is_done());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pool_bound_limits_concurrency() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "p.rhai", THREE_DEPARTURES);
        let mock = MockDownloader::new();
        mock.insert_with_delay("http://mock/board", "S1", Duration::from_millis(100));

        let config = EngineConfig::default().with_worker_count(1);
        let scheduler = Scheduler::new(config, Arc::new(mock));
        let mut events = scheduler.subscribe();

        let first = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures one", "Main St"),
            )
            .unwrap();
        let second = scheduler
            .submit(
                provider(&dir, "de_db", "p.rhai"),
                departures("de_db", "Departures two", "Main St"),
            )
            .unwrap();

        // With one worker the second job may only start after the first
        // delivered its terminal event.
        let mut first_terminal_seen = false;
        let mut started = 0;
        for _ in 0..16 {
            match events.recv().await.unwrap() {
                JobEvent::Started { .. } => {
                    started += 1;
                    if started == 2 {
                        assert!(first_terminal_seen);
                        break;
                    }
                }
                event if event.is_terminal() => first_terminal_seen = true,
                _ => {}
            }
        }
        assert_eq!(started, 2);

        first.wait().await.unwrap();
        second.wait().await.unwrap();
    }
}
