use crate::error::DatastoreError;
use crate::Result;

/// The sorted key-value store a benchmark adapter writes through.
///
/// Implementations must tolerate concurrent calls from many threads.
pub trait KvStore: Send + Sync {
    /// Overwrites any existing value for `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fails with [`DatastoreError::NotFound`] if `key` is absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Reads the current value of `key`, lets `merge` write the replacement
    /// into `buf` and stores it.
    ///
    /// The default is a plain get followed by a put: two concurrent merges on
    /// the same key can lose one of the updates. Stores that can do better
    /// override it.
    fn read_modify_write(
        &self,
        key: &str,
        buf: &mut Vec<u8>,
        merge: &mut dyn FnMut(&[u8], &mut Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let current = self.get(key)?;
        merge(&current, buf)?;
        self.put(key, buf)
    }

    /// Up to `count` live entries with `key >= start`, in key order.
    fn scan(&self, _start: &str, _count: usize) -> Result<Vec<(String, Vec<u8>)>> {
        Err(DatastoreError::Unsupported("scan"))
    }

    fn close(&self) -> Result<()>;
}

mod index;
mod lsm;
mod memtable;
pub use self::lsm::LsmEngine;
