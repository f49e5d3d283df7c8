use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::compression::envelope::{self, CodecTag, DecodeStatus, Decoded};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::record::Record;
use crate::core::stats::{
    BucketStats, CompressionReport, DatabaseStats, HealthCheck, HealthCheckResult, HealthStatus,
};
use crate::core::types::Value;
use crate::index::secondary::SecondaryIndex;
use crate::parallel::cancel::CancelToken;
use crate::parallel::scan::{ScanEngine, ScanOptions, ScanOutput, ScanStats};
use crate::query::planner::{Plan, QueryPlanner};
use crate::query::predicate::Predicate;
use crate::schema::matcher::{FieldMatcher, MatcherCache};
use crate::storage::engine::KvEngine;
use crate::storage::memory_engine::MemoryEngine;

pub const DEFAULT_DATABASE: &str = "main";

/// A named store: KV engine, secondary index and scan engine.
///
/// Writes go matcher → index → serialize → compress → engine. Queries go
/// through the planner and end in either index point lookups or a parallel
/// scan. The index lock and engine transactions are never held together.
pub struct Database {
    name: String,
    config: Config,
    engine: Arc<dyn KvEngine>,
    index: Arc<SecondaryIndex>,
    matchers: MatcherCache,
    scanner: ScanEngine,
    scan_totals: Mutex<ScanStats>,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        Database::open_named(DEFAULT_DATABASE, config)
    }

    pub fn open_named(name: &str, config: Config) -> Result<Self> {
        let engine: Arc<dyn KvEngine> = match &config.storage_path {
            Some(path) => Arc::new(MemoryEngine::open(path, config.sync_on_commit)?),
            None => Arc::new(MemoryEngine::in_memory()),
        };
        Database::from_parts(name, engine, Arc::new(SecondaryIndex::new()), config)
    }

    pub fn in_memory() -> Result<Self> {
        Database::open(Config::default())
    }

    /// Assemble a database over an existing engine and index.
    ///
    /// Buckets that already hold data were written without this index, so
    /// they are served by scan until `reindex`.
    pub fn from_parts(
        name: &str,
        engine: Arc<dyn KvEngine>,
        index: Arc<SecondaryIndex>,
        config: Config,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid_input("database name cannot be empty"));
        }

        let populated = engine.read(|tx| {
            let mut populated = Vec::new();
            for bucket in tx.buckets() {
                if tx.len(&bucket)? > 0 {
                    populated.push(bucket);
                }
            }
            Ok(populated)
        })?;
        for bucket in &populated {
            index.mark_incomplete(bucket);
        }

        let scanner = ScanEngine::new(ScanOptions::from(&config));
        info!(
            database = name,
            buckets = populated.len(),
            scan_workers = scanner.options().workers,
            "database opened"
        );

        Ok(Database {
            name: name.to_string(),
            config,
            engine,
            index,
            matchers: MatcherCache::new(),
            scanner,
            scan_totals: Mutex::new(ScanStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    pub fn index(&self) -> &Arc<SecondaryIndex> {
        &self.index
    }

    // ---- writes ----

    /// Save with a fresh UUID when the record has no id yet; returns the id
    pub fn create<R: Record>(&self, record: &mut R) -> Result<String> {
        if record.meta().id.is_empty() {
            record.meta_mut().id = Uuid::new_v4().to_string();
        }
        self.save(record)?;
        Ok(record.meta().id.clone())
    }

    /// Stamp timestamps and store under the record's own bucket and id
    pub fn save<R: Record>(&self, record: &mut R) -> Result<()> {
        self.save_in(R::BUCKET, record)
    }

    pub fn save_in<R: Record>(&self, bucket: &str, record: &mut R) -> Result<()> {
        let key = record.key().to_string();
        if key.is_empty() {
            return Err(Error::invalid_input("record id is required"));
        }
        record.meta_mut().touch(Utc::now());
        self.put_record(bucket, &key, record)
    }

    /// Store `record` under an explicit key, leaving its metadata alone
    pub fn put_record<R: Record>(&self, bucket: &str, key: &str, record: &R) -> Result<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let matcher = self.matchers.get::<R>();
        let undo = self.index.update_index(bucket, key, matcher.indexable_values(record));

        let stored = self
            .encode_record(record)
            .and_then(|frame| self.put_frame(bucket, key, frame));
        if let Err(e) = stored {
            self.index.restore(bucket, key, undo);
            return Err(e);
        }
        Ok(())
    }

    /// Mark deleted and save; the record stays queryable by `deleted_at`
    pub fn soft_delete<R: Record>(&self, record: &mut R) -> Result<()> {
        record.meta_mut().deleted_at = Some(Utc::now());
        self.save(record)
    }

    pub fn delete<R: Record>(&self, record: &R) -> Result<()> {
        self.delete_in(R::BUCKET, record)
    }

    pub fn delete_in<R: Record>(&self, bucket: &str, record: &R) -> Result<()> {
        let matcher = self.matchers.get::<R>();
        self.remove_key(bucket, record.key(), &matcher.indexable_values(record))
    }

    /// Delete by key alone; relies on the index's stored snapshot
    pub fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        self.remove_key(bucket, key, &[])
    }

    fn remove_key(&self, bucket: &str, key: &str, fallback: &[(String, Value)]) -> Result<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let undo = self.index.remove_from_index(bucket, key, fallback);
        if let Err(e) = self.engine.update(&mut |tx| tx.delete(bucket, key)) {
            self.index.restore(bucket, key, undo);
            return Err(e);
        }
        Ok(())
    }

    fn encode_record<R: Record>(&self, record: &R) -> Result<Vec<u8>> {
        let raw = self.config.format.encode(record)?;
        Ok(envelope::encode_with_threshold(&raw, self.config.compression_threshold))
    }

    fn put_frame(&self, bucket: &str, key: &str, frame: Vec<u8>) -> Result<()> {
        let mut frame = Some(frame);
        self.engine.update(&mut |tx| {
            tx.create_bucket(bucket)?;
            let value = frame
                .take()
                .ok_or_else(|| Error::internal("write transaction ran twice"))?;
            tx.put(bucket, key, value)
        })
    }

    // ---- reads ----

    pub fn find<R: Record>(&self, key: &str) -> Result<R> {
        self.find_in(R::BUCKET, key)
    }

    pub fn find_in<R: Record>(&self, bucket: &str, key: &str) -> Result<R> {
        validate_bucket(bucket)?;
        validate_key(key)?;

        let frame = self.engine.read(|tx| match tx.get(bucket, key)? {
            Some([]) => Err(Error::new(
                ErrorKind::Corrupted,
                format!("empty value for '{}' in bucket '{}'", key, bucket),
            )),
            Some(value) => Ok(value.to_vec()),
            None => Err(Error::not_found(bucket, key)),
        })?;

        let decoded = envelope::decode(&frame);
        if decoded.is_degraded() {
            debug!(bucket, key, "frame decoded best-effort");
        }
        let record = self.config.format.decode(&decoded.data)?;

        if self.config.upgrade_on_read {
            self.upgrade_frame(bucket, key, &frame, &decoded);
        }
        Ok(record)
    }

    /// Rewrite a legacy frame with the full codec set when that makes it
    /// smaller. Failures are logged, never returned.
    fn upgrade_frame(&self, bucket: &str, key: &str, frame: &[u8], decoded: &Decoded) {
        let legacy = decoded.status == DecodeStatus::Clean && decoded.tag.is_some_and(CodecTag::is_legacy);
        if !legacy || decoded.data.len() < self.config.compression_threshold {
            return;
        }

        let upgraded = envelope::encode_with_threshold(&decoded.data, self.config.compression_threshold);
        if upgraded.len() >= frame.len() {
            return;
        }

        let new_len = upgraded.len();
        let mut upgraded = Some(upgraded);
        let result = self.engine.update(&mut |tx| {
            // a write that landed after our read wins
            if tx.get(bucket, key)? != Some(frame) {
                return Ok(());
            }
            match upgraded.take() {
                Some(value) => tx.put(bucket, key, value),
                None => Ok(()),
            }
        });

        match result {
            Ok(()) => debug!(bucket, key, from = frame.len(), to = new_len, "legacy frame upgraded"),
            Err(e) => warn!(bucket, key, error = %e, "legacy frame upgrade failed"),
        }
    }

    pub fn find_where<R: Record>(&self, predicate: &Predicate) -> Result<Vec<R>> {
        self.find_where_in(R::BUCKET, predicate)
    }

    pub fn find_where_in<R: Record>(&self, bucket: &str, predicate: &Predicate) -> Result<Vec<R>> {
        self.find_where_cancellable(bucket, predicate, &CancelToken::new())
    }

    /// `find_where_in` whose scan can be stopped from another thread
    pub fn find_where_cancellable<R: Record>(
        &self,
        bucket: &str,
        predicate: &Predicate,
        cancel: &CancelToken,
    ) -> Result<Vec<R>> {
        validate_bucket(bucket)?;
        self.ensure_bucket(bucket)?;

        let matcher = self.matchers.get::<R>();
        let plan = QueryPlanner::new(&self.index).plan(bucket, &matcher, predicate);
        debug!(bucket, plan = %plan, "query planned");

        match plan {
            Plan::Empty => Ok(Vec::new()),
            Plan::IndexLookup { keys } => self.fetch_candidates(bucket, &keys, &matcher, predicate),
            Plan::Scan => self
                .scan(bucket, &matcher, predicate, cancel)
                .map(ScanOutput::into_records),
        }
    }

    pub fn find_all<R: Record>(&self) -> Result<Vec<R>> {
        self.find_all_in(R::BUCKET)
    }

    pub fn find_all_in<R: Record>(&self, bucket: &str) -> Result<Vec<R>> {
        self.find_where_in(bucket, &Predicate::all())
    }

    /// What `find_where_in` would do, without doing it
    pub fn explain<R: Record>(&self, bucket: &str, predicate: &Predicate) -> Result<Plan> {
        validate_bucket(bucket)?;
        let matcher = self.matchers.get::<R>();
        Ok(QueryPlanner::new(&self.index).plan(bucket, &matcher, predicate))
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.engine.read(|tx| Ok(tx.bucket_exists(bucket)))? {
            Ok(())
        } else {
            Err(Error::bucket_not_found(bucket))
        }
    }

    fn scan<R: Record>(
        &self,
        bucket: &str,
        matcher: &FieldMatcher<R>,
        predicate: &Predicate,
        cancel: &CancelToken,
    ) -> Result<ScanOutput<R>> {
        let out = self.scanner.scan_with_cancel(
            self.engine.as_ref(),
            bucket,
            self.config.format,
            matcher,
            predicate,
            cancel,
        )?;
        self.scan_totals.lock().merge(&out.stats);
        Ok(out)
    }

    /// Re-fetch index candidates in one read transaction. Keys that vanished
    /// or no longer decode are skipped.
    fn fetch_candidates<R: Record>(
        &self,
        bucket: &str,
        keys: &[String],
        matcher: &FieldMatcher<R>,
        predicate: &Predicate,
    ) -> Result<Vec<R>> {
        let frames = self.engine.read(|tx| {
            let mut frames = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = tx.get(bucket, key)? {
                    frames.push((key.as_str(), value.to_vec()));
                }
            }
            Ok(frames)
        })?;

        let mut records = Vec::with_capacity(frames.len());
        for (key, frame) in frames {
            let decoded = envelope::decode(&frame);
            match self.config.format.decode::<R>(&decoded.data) {
                Ok(record) if matcher.matches(&record, predicate) => records.push(record),
                Ok(_) => debug!(bucket, key, "index candidate no longer matches"),
                Err(e) => debug!(bucket, key, error = %e, "skipping undecodable candidate"),
            }
        }
        Ok(records)
    }

    pub fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        validate_bucket(bucket)?;
        self.engine.read(|tx| {
            let mut keys = Vec::new();
            tx.for_each(bucket, &mut |key, _| {
                keys.push(key.to_string());
                Ok(())
            })?;
            Ok(keys)
        })
    }

    pub fn count(&self, bucket: &str) -> Result<usize> {
        validate_bucket(bucket)?;
        self.engine.read(|tx| tx.len(bucket))
    }

    // ---- buckets ----

    /// Returns true when the bucket was created by this call
    pub fn create_bucket(&self, bucket: &str) -> Result<bool> {
        validate_bucket(bucket)?;
        let created = self.engine.write(|tx| tx.create_bucket(bucket))?;
        if created {
            self.index.clear_bucket(bucket);
            info!(database = %self.name, bucket, "bucket created");
        }
        Ok(created)
    }

    pub fn delete_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket(bucket)?;
        self.index.drop_bucket(bucket);
        if let Err(e) = self.engine.update(&mut |tx| tx.delete_bucket(bucket)) {
            // the records are still there but no longer indexed
            self.index.mark_incomplete(bucket);
            return Err(e);
        }
        info!(database = %self.name, bucket, "bucket deleted");
        Ok(())
    }

    pub fn list_buckets(&self) -> Result<Vec<String>> {
        self.engine.read(|tx| Ok(tx.buckets()))
    }

    /// Remove every record, keeping the bucket
    pub fn clear(&self, bucket: &str) -> Result<()> {
        validate_bucket(bucket)?;
        self.index.clear_bucket(bucket);
        let cleared = self.engine.update(&mut |tx| {
            tx.delete_bucket(bucket)?;
            tx.create_bucket(bucket)?;
            Ok(())
        });
        if let Err(e) = cleared {
            self.index.mark_incomplete(bucket);
            return Err(e);
        }
        info!(database = %self.name, bucket, "bucket cleared");
        Ok(())
    }

    /// Re-encode every value and keep whichever frame is smaller
    pub fn compress_bucket(&self, bucket: &str) -> Result<CompressionReport> {
        validate_bucket(bucket)?;

        let frames = self.engine.read(|tx| {
            let mut frames = Vec::new();
            tx.for_each(bucket, &mut |key, value| {
                frames.push((key.to_string(), value.to_vec()));
                Ok(())
            })?;
            Ok(frames)
        })?;

        let processed = frames.len();
        let bytes_before: u64 = frames.iter().map(|(_, f)| f.len() as u64).sum();
        let threshold = self.config.compression_threshold;

        let rewrites: Vec<(String, Vec<u8>, Vec<u8>)> = frames
            .into_par_iter()
            .filter_map(|(key, old)| {
                let decoded = envelope::decode(&old);
                if old.is_empty() || decoded.is_degraded() {
                    return None;
                }
                let fresh = envelope::encode_with_threshold(&decoded.data, threshold);
                (fresh.len() < old.len()).then_some((key, old, fresh))
            })
            .collect();

        let mut saved = 0u64;
        let mut rewritten = 0usize;
        self.engine.update(&mut |tx| {
            saved = 0;
            rewritten = 0;
            for (key, old, fresh) in &rewrites {
                // skip values changed since they were read
                if tx.get(bucket, key)? != Some(old.as_slice()) {
                    continue;
                }
                tx.put(bucket, key, fresh.clone())?;
                saved += (old.len() - fresh.len()) as u64;
                rewritten += 1;
            }
            Ok(())
        })?;

        info!(database = %self.name, bucket, processed, rewritten, saved, "bucket compressed");
        Ok(CompressionReport {
            processed,
            rewritten,
            bytes_before,
            bytes_after: bytes_before - saved,
        })
    }

    /// `compress_bucket` over every bucket; one failing bucket does not stop
    /// the others
    pub fn compress_all(&self) -> Result<CompressionReport> {
        let mut total = CompressionReport::default();
        let mut failures = Vec::new();
        for bucket in self.list_buckets()? {
            match self.compress_bucket(&bucket) {
                Ok(report) => {
                    total.processed += report.processed;
                    total.rewritten += report.rewritten;
                    total.bytes_before += report.bytes_before;
                    total.bytes_after += report.bytes_after;
                }
                Err(e) => {
                    warn!(database = %self.name, bucket = %bucket, error = %e, "bucket compression failed");
                    failures.push(format!("'{}': {}", bucket, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::new(
                ErrorKind::Storage,
                format!("compression failed for {} bucket(s): {}", failures.len(), failures.join("; ")),
            ));
        }
        Ok(total)
    }

    pub fn reindex<R: Record>(&self) -> Result<usize> {
        self.reindex_in::<R>(R::BUCKET)
    }

    /// Rebuild a bucket's index from a full scan and mark it complete
    pub fn reindex_in<R: Record>(&self, bucket: &str) -> Result<usize> {
        validate_bucket(bucket)?;
        self.ensure_bucket(bucket)?;

        let matcher = self.matchers.get::<R>();
        let out = self.scan(bucket, &matcher, &Predicate::all(), &CancelToken::new())?;
        let entries: Vec<_> = out
            .hits
            .into_iter()
            .map(|(key, record)| (key, matcher.indexable_values(&record)))
            .collect();

        let indexed = entries.len();
        self.index.rebuild(bucket, entries);
        info!(database = %self.name, bucket, indexed, skipped = out.stats.skipped, "bucket reindexed");
        Ok(indexed)
    }

    // ---- maintenance ----

    pub fn backup(&self, path: impl AsRef<Path>) -> Result<()> {
        self.engine.backup(path.as_ref())
    }

    pub fn disk_usage(&self) -> Result<u64> {
        self.engine.size_bytes()
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let counts = self.engine.read(|tx| {
            tx.buckets()
                .into_iter()
                .map(|name| {
                    let records = tx.len(&name)?;
                    Ok((name, records))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let buckets: Vec<BucketStats> = counts
            .into_iter()
            .map(|(name, records)| {
                let index = self.index.stats(&name);
                BucketStats {
                    indexed_fields: index.as_ref().map(|s| s.fields.clone()).unwrap_or_default(),
                    index_complete: index.map(|s| s.complete).unwrap_or(records == 0),
                    name,
                    records,
                }
            })
            .collect();

        Ok(DatabaseStats {
            name: self.name.clone(),
            total_records: buckets.iter().map(|b| b.records).sum(),
            buckets,
            size_bytes: self.engine.size_bytes()?,
            scan_workers: self.scanner.options().workers,
            pooled_buffers: self.scanner.pool().pooled(),
            scans: (*self.scan_totals.lock()).into(),
        })
    }

    pub fn health(&self) -> HealthCheckResult {
        let mut checks = Vec::new();

        let started = Instant::now();
        let engine_status = match self.engine.view(&mut |_| Ok(())) {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        };
        checks.push(HealthCheck {
            name: "engine".to_string(),
            status: engine_status,
            message: None,
            latency_ms: started.elapsed().as_millis() as u64,
        });

        let started = Instant::now();
        let (index_status, message) = match self.stats() {
            Ok(stats) => {
                let incomplete: Vec<String> = stats
                    .buckets
                    .into_iter()
                    .filter(|b| !b.index_complete)
                    .map(|b| b.name)
                    .collect();
                if incomplete.is_empty() {
                    (HealthStatus::Healthy, None)
                } else {
                    (
                        HealthStatus::Degraded(format!("{} bucket(s) answered by scan until reindex", incomplete.len())),
                        Some(incomplete.join(", ")),
                    )
                }
            }
            Err(e) => (HealthStatus::Unhealthy(e.to_string()), None),
        };
        checks.push(HealthCheck {
            name: "index".to_string(),
            status: index_status,
            message,
            latency_ms: started.elapsed().as_millis() as u64,
        });

        HealthCheckResult::from_checks(checks)
    }

    pub fn close(&self) -> Result<()> {
        self.engine.close()?;
        info!(database = %self.name, "database closed");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("scan_workers", &self.scanner.options().workers)
            .finish_non_exhaustive()
    }
}

fn validate_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::invalid_input("bucket name cannot be empty"));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_input("key cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use serde::{Deserialize, Serialize};
    use crate::core::record::{Field, RecordMeta};
    use crate::storage::engine::{ReadTxn, WriteTxn};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        meta: RecordMeta,
        title: String,
        body: String,
    }

    impl Record for Note {
        const BUCKET: &'static str = "notes";

        fn meta(&self) -> &RecordMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut RecordMeta {
            &mut self.meta
        }

        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("Title", |n: &Note| Value::from(&n.title)).alias("title")]
        }
    }

    fn note(id: &str, title: &str) -> Note {
        Note {
            meta: RecordMeta::new(id),
            title: title.to_string(),
            body: "lorem ipsum dolor sit amet ".repeat(8),
        }
    }

    /// Memory engine whose writes can be made to fail
    struct FlakyEngine {
        inner: MemoryEngine,
        fail_writes: AtomicBool,
    }

    impl KvEngine for FlakyEngine {
        fn view(&self, f: &mut dyn FnMut(&dyn ReadTxn) -> Result<()>) -> Result<()> {
            self.inner.view(f)
        }

        fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<()>) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Storage, "disk full".to_string()));
            }
            self.inner.update(f)
        }

        fn backup(&self, path: &Path) -> Result<()> {
            self.inner.backup(path)
        }

        fn size_bytes(&self) -> Result<u64> {
            self.inner.size_bytes()
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_save_find_roundtrip_sets_timestamps() {
        let db = Database::in_memory().unwrap();
        let mut n = note("n1", "hello");
        db.save(&mut n).unwrap();

        let loaded: Note = db.find("n1").unwrap();
        assert_eq!(loaded.title, "hello");
        assert!(loaded.meta.created_at.is_some());
        assert_eq!(loaded.meta.created_at, loaded.meta.updated_at);
    }

    #[test]
    fn test_missing_key_and_bucket_are_distinct() {
        let db = Database::in_memory().unwrap();
        let err = db.find::<Note>("nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BucketNotFound);

        db.save(&mut note("n1", "a")).unwrap();
        let err = db.find::<Note>("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_assigns_uuid() {
        let db = Database::in_memory().unwrap();
        let mut n = note("", "untitled");
        let id = db.create(&mut n).unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(db.find::<Note>(&id).unwrap().meta.id, id);
    }

    #[test]
    fn test_empty_key_rejected() {
        let db = Database::in_memory().unwrap();
        let err = db.save(&mut note("", "x")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(db.index().stats("notes").is_none());
    }

    #[test]
    fn test_failed_store_write_restores_index() {
        let engine = Arc::new(FlakyEngine {
            inner: MemoryEngine::in_memory(),
            fail_writes: AtomicBool::new(false),
        });
        let db = Database::from_parts("main", engine.clone(), Arc::new(SecondaryIndex::new()), Config::default())
            .unwrap();

        db.save(&mut note("n1", "before")).unwrap();
        engine.fail_writes.store(true, Ordering::SeqCst);

        let err = db.save(&mut note("n1", "after")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(db.index().get_indexed_keys("notes", "title", &Value::from("after")).is_none());
        assert_eq!(
            db.index().get_indexed_keys("notes", "title", &Value::from("before")).unwrap(),
            vec!["n1"]
        );

        db.delete(&note("n1", "before")).unwrap_err();
        assert!(db.index().get_indexed_keys("notes", "title", &Value::from("before")).is_some());
    }

    #[test]
    fn test_failed_clear_and_delete_bucket_fall_back_to_scan() {
        type BucketOp = fn(&Database, &str) -> Result<()>;
        let ops: [(&str, BucketOp); 2] = [("clear", Database::clear), ("delete_bucket", Database::delete_bucket)];

        for (op, run) in ops {
            let engine = Arc::new(FlakyEngine {
                inner: MemoryEngine::in_memory(),
                fail_writes: AtomicBool::new(false),
            });
            let db = Database::from_parts("main", engine.clone(), Arc::new(SecondaryIndex::new()), Config::default())
                .unwrap();
            db.save(&mut note("a", "same")).unwrap();

            engine.fail_writes.store(true, Ordering::SeqCst);
            assert_eq!(run(&db, "notes").unwrap_err().kind, ErrorKind::Storage, "{}", op);
            engine.fail_writes.store(false, Ordering::SeqCst);

            db.save(&mut note("b", "same")).unwrap();
            let predicate = Predicate::eq("title", "same");
            assert_eq!(db.explain::<Note>("notes", &predicate).unwrap(), Plan::Scan, "{}", op);
            let found: Vec<Note> = db.find_where(&predicate).unwrap();
            assert_eq!(found.len(), 2, "{}", op);

            db.reindex::<Note>().unwrap();
            assert!(db.explain::<Note>("notes", &predicate).unwrap().is_index_hit(), "{}", op);
        }
    }

    #[test]
    fn test_legacy_frame_upgraded_on_read() {
        let db = Database::in_memory().unwrap();
        db.create_bucket("notes").unwrap();

        let n = note("n1", "legacy");
        let raw = serde_json::to_vec(&n).unwrap();
        let mut legacy = vec![0u8];
        legacy.extend_from_slice(&raw);
        db.engine()
            .write(|tx| tx.put("notes", "n1", legacy.clone()))
            .unwrap();

        let loaded: Note = db.find("n1").unwrap();
        assert_eq!(loaded, n);

        let stored = db
            .engine()
            .read(|tx| Ok(tx.get("notes", "n1")?.map(|v| v.to_vec())))
            .unwrap()
            .unwrap();
        assert_ne!(stored[0], 0);
        assert!(stored.len() < legacy.len());
        assert_eq!(envelope::decode_lossy(&stored), raw);
    }

    #[test]
    fn test_upgrade_can_be_disabled() {
        let db = Database::open(Config::default().upgrade_on_read(false)).unwrap();
        db.create_bucket("notes").unwrap();
        let raw = serde_json::to_vec(&note("n1", "legacy")).unwrap();
        let mut legacy = vec![0u8];
        legacy.extend_from_slice(&raw);
        db.engine().write(|tx| tx.put("notes", "n1", legacy.clone())).unwrap();

        db.find::<Note>("n1").unwrap();
        let stored = db
            .engine()
            .read(|tx| Ok(tx.get("notes", "n1")?.map(|v| v.to_vec())))
            .unwrap()
            .unwrap();
        assert_eq!(stored, legacy);
    }

    #[test]
    fn test_compress_bucket_shrinks_raw_frames() {
        let db = Database::in_memory().unwrap();
        db.create_bucket("notes").unwrap();
        for i in 0..4 {
            let raw = serde_json::to_vec(&note(&format!("n{}", i), "t")).unwrap();
            let mut frame = vec![0u8];
            frame.extend_from_slice(&raw);
            db.engine().write(|tx| tx.put("notes", &format!("n{}", i), frame.clone())).unwrap();
        }

        let report = db.compress_bucket("notes").unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.rewritten, 4);
        assert!(report.bytes_after < report.bytes_before);

        let again = db.compress_bucket("notes").unwrap();
        assert_eq!(again.rewritten, 0);
    }

    #[test]
    fn test_existing_data_is_scanned_until_reindex() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::in_memory());
        let raw = serde_json::to_vec(&note("n1", "outside")).unwrap();
        engine
            .write(|tx| {
                tx.create_bucket("notes")?;
                tx.put("notes", "n1", envelope::encode(&raw))
            })
            .unwrap();

        let db = Database::from_parts("main", engine, Arc::new(SecondaryIndex::new()), Config::default()).unwrap();
        let query = Predicate::eq("title", "outside");
        assert_eq!(db.explain::<Note>("notes", &query).unwrap(), Plan::Scan);
        assert_eq!(db.find_where::<Note>(&query).unwrap().len(), 1);
        assert!(!db.health().status.is_healthy());

        assert_eq!(db.reindex::<Note>().unwrap(), 1);
        assert!(db.explain::<Note>("notes", &query).unwrap().is_index_hit());
        assert!(db.health().status.is_healthy());
    }

    #[test]
    fn test_clear_and_delete_bucket() {
        let db = Database::in_memory().unwrap();
        db.save(&mut note("n1", "a")).unwrap();
        db.save(&mut note("n2", "b")).unwrap();
        assert_eq!(db.count("notes").unwrap(), 2);

        db.clear("notes").unwrap();
        assert_eq!(db.count("notes").unwrap(), 0);
        assert!(db.find_all::<Note>().unwrap().is_empty());

        db.delete_bucket("notes").unwrap();
        assert!(db.list_buckets().unwrap().is_empty());
        assert_eq!(db.find_all::<Note>().unwrap_err().kind, ErrorKind::BucketNotFound);
    }
}
