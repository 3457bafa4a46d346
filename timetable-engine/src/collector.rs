//! Result collection and incremental publishing.
//!
//! Scripts push records one at a time; the collector buffers them and
//! republishes partial batches while the job is still running, so a caller
//! watching a long-running job sees a growing timetable instead of waiting
//! for completion. The job flushes unconditionally at the end so no buffered
//! record is lost.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::{GlobalTimetableInfo, RequestKind, ResultBatch, TimetableRecord};

/// Callback receiving each published batch.
///
/// The scheduler wires this to its event channel; tests pass a closure
/// capturing a buffer.
pub type Publisher = Box<dyn Fn(ResultBatch) + Send + Sync>;

struct CollectorInner {
    buffer: Vec<TimetableRecord>,
    published: usize,
    last_publish: Instant,
    info: GlobalTimetableInfo,
}

/// Buffers records produced by a running script and publishes them in
/// batches.
///
/// A publish is triggered by the buffer crossing `threshold` records or by
/// `interval` elapsing since the last publish, whichever comes first. The
/// handle is cheap to clone; all clones share one buffer.
#[derive(Clone)]
pub struct ResultCollector {
    inner: Arc<Mutex<CollectorInner>>,
    publisher: Arc<Publisher>,
    kind: RequestKind,
    threshold: usize,
    interval: Duration,
}

impl ResultCollector {
    /// Create a collector publishing through the given callback.
    pub fn new(
        kind: RequestKind,
        threshold: usize,
        interval: Duration,
        publisher: Publisher,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CollectorInner {
                buffer: Vec::new(),
                published: 0,
                last_publish: Instant::now(),
                info: GlobalTimetableInfo::default(),
            })),
            publisher: Arc::new(publisher),
            kind,
            threshold,
            interval,
        }
    }

    /// Add one record to the buffer, publishing if a trigger fires.
    ///
    /// The record is moved in and never mutated afterwards; a script must
    /// build a fresh record per item.
    pub fn add_record(&self, record: TimetableRecord) {
        let batch = {
            let mut inner = self.inner.lock().expect("collector lock poisoned");
            inner.buffer.push(record);

            let due = inner.buffer.len() >= self.threshold
                || inner.last_publish.elapsed() >= self.interval;
            if due { Self::take_batch(&mut inner, self.kind) } else { None }
        };

        if let Some(batch) = batch {
            self.publish(batch);
        }
    }

    /// Set the window metadata attached to every subsequent batch.
    pub fn set_info(&self, info: GlobalTimetableInfo) {
        let mut inner = self.inner.lock().expect("collector lock poisoned");
        inner.info = info;
    }

    /// Publish whatever is buffered, regardless of triggers.
    ///
    /// Called unconditionally at job end, and before each network
    /// suspension so watchers are not starved during slow downloads.
    pub fn flush(&self) {
        let batch = {
            let mut inner = self.inner.lock().expect("collector lock poisoned");
            Self::take_batch(&mut inner, self.kind)
        };

        if let Some(batch) = batch {
            self.publish(batch);
        }
    }

    /// Drop buffered records without publishing them.
    ///
    /// Already-published batches are unaffected. Scripts call this between
    /// logically distinct parse passes reusing the same sandbox.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("collector lock poisoned");
        inner.buffer.clear();
    }

    /// Number of records published so far.
    pub fn published_count(&self) -> usize {
        let inner = self.inner.lock().expect("collector lock poisoned");
        inner.published
    }

    /// Number of records currently buffered but not yet published.
    pub fn buffered_count(&self) -> usize {
        let inner = self.inner.lock().expect("collector lock poisoned");
        inner.buffer.len()
    }

    fn take_batch(inner: &mut CollectorInner, kind: RequestKind) -> Option<ResultBatch> {
        if inner.buffer.is_empty() {
            return None;
        }
        let records = std::mem::take(&mut inner.buffer);
        inner.published += records.len();
        inner.last_publish = Instant::now();
        Some(ResultBatch {
            kind,
            records,
            info: inner.info.clone(),
        })
    }

    fn publish(&self, batch: ResultBatch) {
        debug!(records = batch.len(), kind = %batch.kind, "publishing batch");
        (self.publisher)(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::InfoKey;

    fn record(target: &str) -> TimetableRecord {
        let mut r = TimetableRecord::new();
        r.set(InfoKey::Target, target);
        r
    }

    fn counting_collector(
        threshold: usize,
        interval: Duration,
    ) -> (ResultCollector, Arc<Mutex<Vec<ResultBatch>>>) {
        let batches: Arc<Mutex<Vec<ResultBatch>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let collector = ResultCollector::new(
            RequestKind::Departures,
            threshold,
            interval,
            Box::new(move |batch| sink.lock().unwrap().push(batch)),
        );
        (collector, batches)
    }

    #[test]
    fn threshold_triggers_publish() {
        let (collector, batches) = counting_collector(3, Duration::from_secs(3600));

        collector.add_record(record("a"));
        collector.add_record(record("b"));
        assert_eq!(batches.lock().unwrap().len(), 0);
        assert_eq!(collector.published_count(), 0);

        collector.add_record(record("c"));
        let published = batches.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 3);
        drop(published);
        assert_eq!(collector.published_count(), 3);
        assert_eq!(collector.buffered_count(), 0);
    }

    #[test]
    fn elapsed_interval_triggers_publish() {
        let (collector, batches) = counting_collector(1000, Duration::from_millis(0));

        // Interval of zero means every add is "overdue".
        collector.add_record(record("a"));
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn flush_publishes_remainder() {
        let (collector, batches) = counting_collector(10, Duration::from_secs(3600));

        collector.add_record(record("a"));
        collector.add_record(record("b"));
        collector.flush();

        let published = batches.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 2);
        drop(published);

        // A second flush with nothing buffered publishes nothing.
        collector.flush();
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn clear_drops_only_unpublished_records() {
        let (collector, batches) = counting_collector(2, Duration::from_secs(3600));

        collector.add_record(record("a"));
        collector.add_record(record("b"));
        assert_eq!(collector.published_count(), 2);

        collector.add_record(record("c"));
        collector.clear();
        collector.flush();

        // The cleared record never surfaces; the earlier batch stands.
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(collector.published_count(), 2);
    }

    #[test]
    fn batches_carry_info() {
        let (collector, batches) = counting_collector(1, Duration::from_secs(3600));
        collector.set_info(GlobalTimetableInfo {
            date_limited: true,
            requested_time: None,
        });
        collector.add_record(record("a"));
        assert!(batches.lock().unwrap()[0].info.date_limited);
    }

    #[test]
    fn records_keep_production_order_across_batches() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        let collector = ResultCollector::new(
            RequestKind::Departures,
            2,
            Duration::from_secs(3600),
            Box::new(move |batch| {
                for r in &batch.records {
                    sink.lock()
                        .unwrap()
                        .push(r.get(InfoKey::Target).unwrap().as_text().unwrap().to_string());
                }
            }),
        );

        for name in ["a", "b", "c", "d", "e"] {
            collector.add_record(record(name));
        }
        collector.flush();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn publisher_called_outside_lock() {
        // A publisher that re-enters the collector must not deadlock.
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_publisher = Arc::clone(&calls);
        let holder: Arc<Mutex<Option<ResultCollector>>> = Arc::new(Mutex::new(None));
        let holder_in_publisher = Arc::clone(&holder);

        let collector = ResultCollector::new(
            RequestKind::Departures,
            1,
            Duration::from_secs(3600),
            Box::new(move |_batch| {
                calls_in_publisher.fetch_add(1, Ordering::SeqCst);
                if let Some(c) = holder_in_publisher.lock().unwrap().as_ref() {
                    let _ = c.published_count();
                }
            }),
        );
        *holder.lock().unwrap() = Some(collector.clone());

        collector.add_record(record("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
