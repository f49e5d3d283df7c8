use std::sync::Arc;
use rayon::prelude::*;
use tracing::{info, warn};
use crate::compression::envelope;
use crate::core::database::Database;
use crate::core::error::{Error, Result};

/// Rewrites one `(key, raw bytes)` pair on its way to the target.
/// `Ok(None)` drops the record.
pub type Transform<'a> = dyn Fn(&str, &[u8]) -> Result<Option<(String, Vec<u8>)>> + Sync + 'a;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub source_deleted: bool,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum Outcome {
    Write(String, Vec<u8>),
    Skip,
    Failed(String),
}

/// Copy `bucket` to the same bucket name in `target`
pub fn migrate_bucket(source: &Database, target: &Database, bucket: &str, delete_source: bool) -> Result<MigrationReport> {
    if same_database(source, target) {
        return Err(Error::invalid_input("source and target database cannot be the same"));
    }
    run(source, bucket, target, bucket, None, delete_source)
}

/// Copy `bucket` to `target`, passing every record through `transform`.
///
/// Transform errors are collected in the report; the source bucket is only
/// deleted when there were none.
pub fn migrate_bucket_with_transform<F>(
    source: &Database,
    target: &Database,
    bucket: &str,
    transform: F,
    delete_source: bool,
) -> Result<MigrationReport>
where
    F: Fn(&str, &[u8]) -> Result<Option<(String, Vec<u8>)>> + Sync,
{
    if same_database(source, target) {
        return Err(Error::invalid_input("source and target database cannot be the same"));
    }
    run(source, bucket, target, bucket, Some(&transform as &Transform<'_>), delete_source)
}

/// Copy a bucket under a new name; an empty `target_bucket` keeps the name
pub fn migrate_between(
    source: &Database,
    source_bucket: &str,
    target: &Database,
    target_bucket: &str,
    delete_source: bool,
) -> Result<MigrationReport> {
    let target_bucket = if target_bucket.is_empty() { source_bucket } else { target_bucket };
    if same_database(source, target) && source_bucket == target_bucket {
        return Err(Error::invalid_input("source and target bucket cannot be the same"));
    }
    run(source, source_bucket, target, target_bucket, None, delete_source)
}

/// Databases opened separately never share an engine, whatever their names
fn same_database(source: &Database, target: &Database) -> bool {
    std::ptr::eq(source, target) || Arc::ptr_eq(source.engine(), target.engine())
}

fn run(
    source: &Database,
    source_bucket: &str,
    target: &Database,
    target_bucket: &str,
    transform: Option<&Transform<'_>>,
    delete_source: bool,
) -> Result<MigrationReport> {
    if source_bucket.is_empty() || target_bucket.is_empty() {
        return Err(Error::invalid_input("bucket name cannot be empty"));
    }

    let frames = source.engine().read(|tx| {
        let mut frames = Vec::new();
        tx.for_each(source_bucket, &mut |key, value| {
            frames.push((key.to_string(), value.to_vec()));
            Ok(())
        })?;
        Ok(frames)
    })?;

    let threshold = target.config().compression_threshold;
    let outcomes: Vec<Outcome> = frames
        .into_par_iter()
        .map(|(key, frame)| reencode(key, frame, threshold, transform))
        .collect();

    let mut report = MigrationReport::default();
    let mut writes = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Outcome::Write(key, frame) => writes.push((key, frame)),
            Outcome::Skip => report.skipped += 1,
            Outcome::Failed(msg) => report.errors.push(msg),
        }
    }

    // these writes bypass the target's index
    target.index().mark_incomplete(target_bucket);
    target.engine().update(&mut |tx| {
        tx.create_bucket(target_bucket)?;
        for (key, frame) in &writes {
            tx.put(target_bucket, key, frame.clone())?;
        }
        Ok(())
    })?;
    report.migrated = writes.len();

    if !report.is_clean() {
        warn!(
            from = %source.name(),
            to = %target.name(),
            bucket = source_bucket,
            errors = report.errors.len(),
            "migration completed with errors, source kept"
        );
        return Ok(report);
    }

    if delete_source {
        source.delete_bucket(source_bucket)?;
        report.source_deleted = true;
    }

    info!(
        from = %source.name(),
        to = %target.name(),
        source_bucket,
        target_bucket,
        records = report.migrated,
        "bucket migrated"
    );
    Ok(report)
}

fn reencode(key: String, frame: Vec<u8>, threshold: usize, transform: Option<&Transform<'_>>) -> Outcome {
    let decoded = envelope::decode(&frame);

    let Some(transform) = transform else {
        if decoded.is_degraded() {
            // nothing to re-encode; keep the stored bytes as they are
            return Outcome::Write(key, frame);
        }
        return Outcome::Write(key, envelope::encode_with_threshold(&decoded.data, threshold));
    };

    if decoded.is_degraded() {
        return Outcome::Failed(format!("key '{}': frame could not be decoded", key));
    }
    match transform(&key, &decoded.data) {
        Ok(Some((new_key, data))) if new_key.is_empty() => {
            Outcome::Failed(format!("key '{}': transform produced an empty key ({} bytes)", key, data.len()))
        }
        Ok(Some((new_key, data))) => Outcome::Write(new_key, envelope::encode_with_threshold(&data, threshold)),
        Ok(None) => Outcome::Skip,
        Err(e) => Outcome::Failed(format!("transform key '{}': {}", key, e)),
    }
}
