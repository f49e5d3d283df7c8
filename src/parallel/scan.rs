use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use crossbeam::channel::{bounded, never, select, Receiver, SendTimeoutError, Sender};
use tracing::{debug, warn};
use crate::compression::envelope::{self, DecodeStatus};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::record::Record;
use crate::memory::buffer_pool::BufferPool;
use crate::parallel::cancel::CancelToken;
use crate::query::predicate::Predicate;
use crate::schema::matcher::FieldMatcher;
use crate::storage::engine::KvEngine;
use crate::storage::format::Format;

/// Worker pool sizing and deadlines for one engine
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub queue_depth_per_worker: usize,
    pub item_timeout: Duration,
    pub scan_timeout: Duration,
    pub buffer_capacity: usize,
}

impl From<&Config> for ScanOptions {
    fn from(config: &Config) -> Self {
        ScanOptions {
            workers: config.effective_scan_workers(),
            queue_depth_per_worker: config.queue_depth_per_worker.max(1),
            item_timeout: config.item_timeout,
            scan_timeout: config.scan_timeout,
            buffer_capacity: config.worker_buffer_capacity,
        }
    }
}

/// Counters gathered while scanning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    pub matched: usize,
    /// Values that failed to deserialize
    pub skipped: usize,
    /// Frames that decoded best-effort
    pub degraded: usize,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.scanned += other.scanned;
        self.matched += other.matched;
        self.skipped += other.skipped;
        self.degraded += other.degraded;
    }
}

/// Matching records with the keys they are stored under
#[derive(Debug)]
pub struct ScanOutput<R> {
    pub hits: Vec<(String, R)>,
    pub stats: ScanStats,
}

impl<R> ScanOutput<R> {
    pub fn into_records(self) -> Vec<R> {
        self.hits.into_iter().map(|(_, r)| r).collect()
    }
}

struct ScanItem {
    key: String,
    frame: Vec<u8>,
}

struct WorkerBatch<R> {
    hits: Vec<(String, R)>,
    stats: ScanStats,
}

/// Fixed-size worker pool that filters a whole bucket.
///
/// One producer walks the bucket inside a single read transaction and copies
/// each value into a pooled buffer before handing it to the bounded work
/// queue. Workers decode, deserialize and match, keeping hits locally until
/// the stream ends. The caller's thread collects the batches. Any timeout,
/// cancellation or engine error fails the whole scan; partial results are
/// never returned.
pub struct ScanEngine {
    options: ScanOptions,
    pool: Arc<BufferPool>,
}

impl ScanEngine {
    pub fn new(options: ScanOptions) -> Self {
        let pooled = options.workers * options.queue_depth_per_worker * 2;
        ScanEngine {
            options,
            pool: Arc::new(BufferPool::new(pooled.max(8))),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn scan<R: Record>(
        &self,
        engine: &dyn KvEngine,
        bucket: &str,
        format: Format,
        matcher: &FieldMatcher<R>,
        predicate: &Predicate,
    ) -> Result<ScanOutput<R>> {
        self.scan_with_cancel(engine, bucket, format, matcher, predicate, &CancelToken::new())
    }

    pub fn scan_with_cancel<R: Record>(
        &self,
        engine: &dyn KvEngine,
        bucket: &str,
        format: Format,
        matcher: &FieldMatcher<R>,
        predicate: &Predicate,
        cancel: &CancelToken,
    ) -> Result<ScanOutput<R>> {
        let workers = self.options.workers.max(1);
        let started = Instant::now();
        let deadline = started + self.options.scan_timeout;

        let (work_tx, work_rx) = bounded::<ScanItem>(workers * self.options.queue_depth_per_worker.max(1));
        let (batch_tx, batch_rx) = bounded::<WorkerBatch<R>>(workers);
        let (status_tx, status_rx) = bounded::<Result<()>>(1);

        let result = thread::scope(|s| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let batch_tx = batch_tx.clone();
                s.spawn(move || {
                    let batch = self.run_worker(&work_rx, format, matcher, predicate, cancel);
                    let _ = batch_tx.send(batch);
                });
            }
            drop(work_rx);
            drop(batch_tx);

            s.spawn(move || {
                let result = self.produce(engine, bucket, &work_tx, cancel);
                // report before closing the queue so the collector sees the
                // outcome no later than the last worker batch
                let _ = status_tx.send(result);
                drop(work_tx);
            });

            let collected = self.collect(&batch_rx, &status_rx, workers, deadline);
            if collected.is_err() {
                cancel.cancel();
            }
            collected
        });

        match &result {
            Ok(out) => debug!(
                bucket,
                workers,
                scanned = out.stats.scanned,
                matched = out.stats.matched,
                skipped = out.stats.skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scan finished"
            ),
            Err(e) => warn!(bucket, error = %e, "scan aborted"),
        }
        result
    }

    fn produce(&self, engine: &dyn KvEngine, bucket: &str, work_tx: &Sender<ScanItem>, cancel: &CancelToken) -> Result<()> {
        let item_timeout = self.options.item_timeout;
        engine.view(&mut |tx| {
            tx.for_each(bucket, &mut |key, value| {
                if cancel.is_cancelled() {
                    return Err(Error::cancelled(format!("scan of '{}' cancelled", bucket)));
                }

                let mut frame = self.pool.get(value.len());
                frame.extend_from_slice(value);
                let item = ScanItem {
                    key: key.to_string(),
                    frame,
                };

                match work_tx.send_timeout(item, item_timeout) {
                    Ok(()) => Ok(()),
                    Err(SendTimeoutError::Timeout(item)) => {
                        self.pool.put(item.frame);
                        Err(Error::timeout(format!(
                            "scan of '{}': no worker accepted an item within {:?}",
                            bucket, item_timeout
                        )))
                    }
                    Err(SendTimeoutError::Disconnected(item)) => {
                        self.pool.put(item.frame);
                        Err(Error::cancelled(format!("scan of '{}': workers stopped", bucket)))
                    }
                }
            })
        })
    }

    fn run_worker<R: Record>(
        &self,
        work_rx: &Receiver<ScanItem>,
        format: Format,
        matcher: &FieldMatcher<R>,
        predicate: &Predicate,
        cancel: &CancelToken,
    ) -> WorkerBatch<R> {
        let mut hits = Vec::with_capacity(self.options.buffer_capacity);
        let mut stats = ScanStats::default();
        let mut scratch = self.pool.get(0);

        while let Ok(item) = work_rx.recv() {
            if cancel.is_cancelled() {
                self.pool.put(item.frame);
                break;
            }
            stats.scanned += 1;

            let (status, _) = envelope::decode_into(&item.frame, &mut scratch);
            self.pool.put(item.frame);
            if status == DecodeStatus::Degraded {
                stats.degraded += 1;
            }

            match format.decode::<R>(&scratch) {
                Ok(record) => {
                    if matcher.matches(&record, predicate) {
                        stats.matched += 1;
                        hits.push((item.key, record));
                    }
                }
                Err(e) => {
                    stats.skipped += 1;
                    debug!(key = %item.key, error = %e, "skipping undecodable record");
                }
            }
        }

        self.pool.put(scratch);
        WorkerBatch { hits, stats }
    }

    fn collect<R>(
        &self,
        batch_rx: &Receiver<WorkerBatch<R>>,
        status_rx: &Receiver<Result<()>>,
        workers: usize,
        deadline: Instant,
    ) -> Result<ScanOutput<R>> {
        let closed_batches = never::<WorkerBatch<R>>();
        let closed_status = never::<Result<()>>();

        let mut hits = Vec::new();
        let mut stats = ScanStats::default();
        let mut finished = 0;
        let mut producer_done = false;

        while finished < workers || !producer_done {
            let batches = if finished < workers { batch_rx } else { &closed_batches };
            let status = if producer_done { &closed_status } else { status_rx };
            let remaining = deadline.saturating_duration_since(Instant::now());

            select! {
                recv(batches) -> msg => match msg {
                    Ok(batch) => {
                        finished += 1;
                        stats.merge(&batch.stats);
                        hits.extend(batch.hits);
                    }
                    Err(_) => return Err(Error::internal("scan workers exited before finishing")),
                },
                recv(status) -> msg => {
                    producer_done = true;
                    match msg {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Err(Error::internal("scan producer exited without a status")),
                    }
                },
                default(remaining) => {
                    return Err(Error::timeout(format!(
                        "scan did not finish within {:?}",
                        self.options.scan_timeout
                    )));
                }
            }
        }

        Ok(ScanOutput { hits, stats })
    }
}
