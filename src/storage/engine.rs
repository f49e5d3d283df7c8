use std::path::Path;
use crate::core::error::{Error, ErrorKind, Result};

/// Read access to buckets inside one serializable transaction.
///
/// Slices returned by `get` and handed to `for_each` borrow transaction
/// memory; copy them before the transaction ends.
pub trait ReadTxn {
    fn bucket_exists(&self, bucket: &str) -> bool;

    /// `Err(BucketNotFound)` for a missing bucket, `Ok(None)` for a missing key
    fn get(&self, bucket: &str, key: &str) -> Result<Option<&[u8]>>;

    /// Visit every pair in key order; an `Err` from `f` stops the walk
    fn for_each(&self, bucket: &str, f: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()>;

    fn buckets(&self) -> Vec<String>;

    fn len(&self, bucket: &str) -> Result<usize>;
}

/// Read-write transaction; all changes apply atomically or not at all
pub trait WriteTxn: ReadTxn {
    /// Returns true when the bucket did not exist yet
    fn create_bucket(&mut self, bucket: &str) -> Result<bool>;

    fn delete_bucket(&mut self, bucket: &str) -> Result<()>;

    fn put(&mut self, bucket: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Deleting an absent key is not an error
    fn delete(&mut self, bucket: &str, key: &str) -> Result<()>;
}

/// Embedded transactional key-value engine the record layer sits on.
///
/// Single writer, many readers. Implementations must serialize `update`
/// calls and let `view` calls run concurrently.
pub trait KvEngine: Send + Sync {
    fn view(&self, f: &mut dyn FnMut(&dyn ReadTxn) -> Result<()>) -> Result<()>;

    fn update(&self, f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<()>) -> Result<()>;

    /// Write a consistent copy of the whole store to `path`
    fn backup(&self, path: &Path) -> Result<()>;

    fn size_bytes(&self) -> Result<u64>;

    fn close(&self) -> Result<()>;
}

impl<'a> dyn KvEngine + 'a {
    /// `view` that hands back a value
    pub fn read<T>(&self, mut f: impl FnMut(&dyn ReadTxn) -> Result<T>) -> Result<T> {
        let mut out = None;
        self.view(&mut |tx| {
            out = Some(f(tx)?);
            Ok(())
        })?;
        out.ok_or_else(|| Error::new(ErrorKind::Internal, "read transaction produced no value".to_string()))
    }

    /// `update` that hands back a value
    pub fn write<T>(&self, mut f: impl FnMut(&mut dyn WriteTxn) -> Result<T>) -> Result<T> {
        let mut out = None;
        self.update(&mut |tx| {
            out = Some(f(tx)?);
            Ok(())
        })?;
        out.ok_or_else(|| Error::new(ErrorKind::Internal, "write transaction produced no value".to_string()))
    }
}
