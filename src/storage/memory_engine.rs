use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::engine::{KvEngine, ReadTxn, WriteTxn};
use crate::storage::file_lock::FileLock;
use crate::storage::snapshot;

type BucketMap = BTreeMap<String, Vec<u8>>;

/// Everything the engine stores
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub buckets: BTreeMap<String, BucketMap>,
}

/// Reference engine: ordered in-memory buckets, optionally persisted as a
/// checksummed snapshot file after every committed write transaction.
pub struct MemoryEngine {
    state: RwLock<EngineState>,
    path: Option<PathBuf>,
    lock: Mutex<Option<FileLock>>,
    sync_on_commit: bool,
    closed: AtomicBool,
}

impl MemoryEngine {
    pub fn in_memory() -> Self {
        MemoryEngine {
            state: RwLock::new(EngineState::default()),
            path: None,
            lock: Mutex::new(None),
            sync_on_commit: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Open (or create) a file-backed engine
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock = FileLock::acquire(path)?;
        let state = snapshot::read_snapshot(path)?.unwrap_or_default();
        debug!(path = %path.display(), buckets = state.buckets.len(), "engine opened");

        Ok(MemoryEngine {
            state: RwLock::new(state),
            path: Some(path.to_path_buf()),
            lock: Mutex::new(Some(lock)),
            sync_on_commit,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persist now, regardless of `sync_on_commit`
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        if let Some(path) = &self.path {
            snapshot::write_snapshot(path, &self.state.read())?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Storage, "engine is closed".to_string()));
        }
        Ok(())
    }
}

impl KvEngine for MemoryEngine {
    fn view(&self, f: &mut dyn FnMut(&dyn ReadTxn) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        let guard = self.state.read();
        let txn = MemoryReadTxn { state: &*guard };
        f(&txn)
    }

    fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        let mut guard = self.state.write();
        let mut txn = MemoryWriteTxn {
            state: &mut *guard,
            undo: Vec::new(),
        };

        if let Err(e) = f(&mut txn) {
            txn.rollback();
            return Err(e);
        }

        if self.sync_on_commit && !txn.undo.is_empty() {
            if let Some(path) = &self.path {
                if let Err(e) = snapshot::write_snapshot(path, &*txn.state) {
                    txn.rollback();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        let guard = self.state.read();
        snapshot::write_snapshot(path, &guard)?;
        info!(path = %path.display(), "backup written");
        Ok(())
    }

    fn size_bytes(&self) -> Result<u64> {
        if let Some(path) = &self.path {
            if path.exists() {
                return Ok(std::fs::metadata(path)?.len());
            }
        }

        let guard = self.state.read();
        let total = guard
            .buckets
            .iter()
            .map(|(name, bucket)| {
                name.len() + bucket.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
            })
            .sum::<usize>();
        Ok(total as u64)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(path) = &self.path {
            if !self.sync_on_commit {
                snapshot::write_snapshot(path, &self.state.read())?;
            }
        }
        self.lock.lock().take();
        Ok(())
    }
}

struct MemoryReadTxn<'a> {
    state: &'a EngineState,
}

fn read_get<'a>(state: &'a EngineState, bucket: &str, key: &str) -> Result<Option<&'a [u8]>> {
    let b = state.buckets.get(bucket).ok_or_else(|| Error::bucket_not_found(bucket))?;
    Ok(b.get(key).map(|v| v.as_slice()))
}

fn read_for_each(
    state: &EngineState,
    bucket: &str,
    f: &mut dyn FnMut(&str, &[u8]) -> Result<()>,
) -> Result<()> {
    let b = state.buckets.get(bucket).ok_or_else(|| Error::bucket_not_found(bucket))?;
    for (k, v) in b {
        f(k, v)?;
    }
    Ok(())
}

fn read_len(state: &EngineState, bucket: &str) -> Result<usize> {
    state
        .buckets
        .get(bucket)
        .map(|b| b.len())
        .ok_or_else(|| Error::bucket_not_found(bucket))
}

impl ReadTxn for MemoryReadTxn<'_> {
    fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.buckets.contains_key(bucket)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<&[u8]>> {
        read_get(self.state, bucket, key)
    }

    fn for_each(&self, bucket: &str, f: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        read_for_each(self.state, bucket, f)
    }

    fn buckets(&self) -> Vec<String> {
        self.state.buckets.keys().cloned().collect()
    }

    fn len(&self, bucket: &str) -> Result<usize> {
        read_len(self.state, bucket)
    }
}

/// Inverse of one applied change, replayed newest-first on abort
enum Undo {
    Restore { bucket: String, key: String, previous: Option<Vec<u8>> },
    DropBucket(String),
    RecreateBucket(String, BucketMap),
}

struct MemoryWriteTxn<'a> {
    state: &'a mut EngineState,
    undo: Vec<Undo>,
}

impl MemoryWriteTxn<'_> {
    fn rollback(&mut self) {
        while let Some(op) = self.undo.pop() {
            match op {
                Undo::Restore { bucket, key, previous } => {
                    if let Some(b) = self.state.buckets.get_mut(&bucket) {
                        match previous {
                            Some(v) => {
                                b.insert(key, v);
                            }
                            None => {
                                b.remove(&key);
                            }
                        }
                    }
                }
                Undo::DropBucket(bucket) => {
                    self.state.buckets.remove(&bucket);
                }
                Undo::RecreateBucket(bucket, contents) => {
                    self.state.buckets.insert(bucket, contents);
                }
            }
        }
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.buckets.contains_key(bucket)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<&[u8]>> {
        read_get(&*self.state, bucket, key)
    }

    fn for_each(&self, bucket: &str, f: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        read_for_each(&*self.state, bucket, f)
    }

    fn buckets(&self) -> Vec<String> {
        self.state.buckets.keys().cloned().collect()
    }

    fn len(&self, bucket: &str) -> Result<usize> {
        read_len(&*self.state, bucket)
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn create_bucket(&mut self, bucket: &str) -> Result<bool> {
        if bucket.is_empty() {
            return Err(Error::invalid_input("bucket name cannot be empty"));
        }
        if self.state.buckets.contains_key(bucket) {
            return Ok(false);
        }
        self.state.buckets.insert(bucket.to_string(), BucketMap::new());
        self.undo.push(Undo::DropBucket(bucket.to_string()));
        Ok(true)
    }

    fn delete_bucket(&mut self, bucket: &str) -> Result<()> {
        let contents = self
            .state
            .buckets
            .remove(bucket)
            .ok_or_else(|| Error::bucket_not_found(bucket))?;
        self.undo.push(Undo::RecreateBucket(bucket.to_string(), contents));
        Ok(())
    }

    fn put(&mut self, bucket: &str, key: &str, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_input("key cannot be empty"));
        }
        let b = self
            .state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::bucket_not_found(bucket))?;
        let previous = b.insert(key.to_string(), value);
        self.undo.push(Undo::Restore {
            bucket: bucket.to_string(),
            key: key.to_string(),
            previous,
        });
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &str) -> Result<()> {
        let b = self
            .state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::bucket_not_found(bucket))?;
        if let Some(previous) = b.remove(key) {
            self.undo.push(Undo::Restore {
                bucket: bucket.to_string(),
                key: key.to_string(),
                previous: Some(previous),
            });
        }
        Ok(())
    }
}
