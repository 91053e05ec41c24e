use crate::config::Properties;
use crate::error::DatastoreError;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Field name to raw value. Sorted, so encoding is deterministic.
pub type Row = BTreeMap<String, Vec<u8>>;

/// Per-call context threaded through every operation by the harness.
///
/// Adapters may ignore it; the LSM adapter runs every call to completion.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Uniform interface for a database driven by the benchmark workers.
///
/// One instance is shared by every worker thread.
pub trait Db: Send + Sync {
    /// Called once per worker before it issues operations.
    fn init_thread(&self, ctx: Context, _thread_id: usize, _thread_count: usize) -> Context {
        ctx
    }

    fn cleanup_thread(&self, _ctx: &Context) {}

    /// Releases the database. Call exactly once, after all workers finish.
    fn close(&self) -> Result<()>;

    /// Reads a row, projected to `fields` when given and non-empty.
    fn read(&self, ctx: &Context, table: &str, key: &str, fields: Option<&[String]>)
        -> Result<Row>;

    /// Reads up to `count` rows of `table` starting at `start_key`.
    fn scan(
        &self,
        _ctx: &Context,
        _table: &str,
        _start_key: &str,
        _count: usize,
        _fields: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        Err(DatastoreError::Unsupported("scan"))
    }

    /// Merges `values` into an existing row.
    fn update(&self, ctx: &Context, table: &str, key: &str, values: &Row) -> Result<()>;

    fn insert(&self, ctx: &Context, table: &str, key: &str, values: &Row) -> Result<()>;

    fn delete(&self, ctx: &Context, table: &str, key: &str) -> Result<()>;
}

/// Builds a [`Db`] from the run's properties.
pub trait DbCreator: Send + Sync {
    fn create(&self, props: &Properties) -> Result<Box<dyn Db>>;
}

pub mod codec;
pub mod key;
mod lsmdb;
mod pool;
mod registry;

pub use self::codec::RowCodec;
pub use self::lsmdb::{register_lsmdb, LsmDb, LsmDbCreator, LSMDB, SYNC_WRITES, WRITE_BUFFER_SIZE};
pub use self::pool::{BufPool, PooledBuf};
pub use self::registry::Registry;
