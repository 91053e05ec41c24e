use super::codec::RowCodec;
use super::key;
use super::pool::BufPool;
use super::registry::Registry;
use super::{Context, Db, DbCreator, Row};
use crate::config::{prop, Properties};
use crate::datastore::{KvStore, LsmEngine};
use crate::error::DatastoreError;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Name the LSM adapter is registered under.
pub const LSMDB: &str = "lsmdb";

/// Memtable size that triggers a flush to a segment file.
pub const WRITE_BUFFER_SIZE: usize = 32_000_000;
/// WAL appends are flushed to the OS but not fsynced.
pub const SYNC_WRITES: bool = false;

/// Benchmark adapter over a sorted key-value store.
///
/// Each row is stored as one entry: the key is [`key::compose`] of table and
/// primary key, the value is the [`RowCodec`] encoding of its fields.
pub struct LsmDb {
    db: Arc<dyn KvStore>,
    r: RowCodec,
    buf_pool: BufPool,
}

impl LsmDb {
    /// Opens the engine under `lsmdb.dir` (or the `golsm.dir` alias), first
    /// wiping it when `dropdata` is set. Properties are validated before
    /// anything is removed.
    pub fn open(props: &Properties) -> Result<Self> {
        let dir = PathBuf::from(
            props
                .get(prop::LSMDB_DIR)
                .or_else(|| props.get(prop::GOLSM_DIR))
                .unwrap_or(prop::LSMDB_DIR_DEFAULT),
        );
        let drop_data = props.get_bool(prop::DROP_DATA, prop::DROP_DATA_DEFAULT)?;
        let r = RowCodec::new(props)?;

        if drop_data {
            match fs::remove_dir_all(&dir) {
                Ok(()) => info!(dir = %dir.display(), "dropped existing data"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DatastoreError::Open {
                        path: dir,
                        source: Box::new(e.into()),
                    })
                }
            }
        }

        let engine = LsmEngine::open(&dir, WRITE_BUFFER_SIZE, SYNC_WRITES)?;
        info!(dir = %dir.display(), drop_data, "opened lsmdb");
        Ok(Self::with_store(Arc::new(engine), r))
    }

    /// Wraps an already opened store.
    pub fn with_store(db: Arc<dyn KvStore>, r: RowCodec) -> Self {
        Self {
            db,
            r,
            buf_pool: BufPool::default(),
        }
    }

    pub fn buf_pool(&self) -> &BufPool {
        &self.buf_pool
    }
}

impl Db for LsmDb {
    fn close(&self) -> Result<()> {
        self.db.close()?;
        info!("closed lsmdb");
        Ok(())
    }

    fn read(
        &self,
        _ctx: &Context,
        table: &str,
        key: &str,
        fields: Option<&[String]>,
    ) -> Result<Row> {
        let value = self.db.get(&key::compose(table, key))?;
        self.r.decode(&value, fields)
    }

    fn scan(
        &self,
        _ctx: &Context,
        table: &str,
        start_key: &str,
        count: usize,
        fields: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        let prefix = key::table_prefix(table);
        self.db
            .scan(&key::compose(table, start_key), count)?
            .into_iter()
            .take_while(|(row_key, _)| row_key.starts_with(&prefix))
            .map(|(_, value)| self.r.decode(&value, fields))
            .collect()
    }

    fn update(&self, _ctx: &Context, table: &str, key: &str, values: &Row) -> Result<()> {
        let row_key = key::compose(table, key);

        let mut buf = self.buf_pool.get();
        self.db.read_modify_write(
            &row_key,
            &mut buf,
            &mut |current: &[u8], out: &mut Vec<u8>| {
                let mut row = self.r.decode(current, None)?;
                row.extend(values.iter().map(|(f, v)| (f.clone(), v.clone())));
                self.r.encode_into(out, &row)
            },
        )
    }

    fn insert(&self, _ctx: &Context, table: &str, key: &str, values: &Row) -> Result<()> {
        let row_key = key::compose(table, key);

        let mut buf = self.buf_pool.get();
        self.r.encode_into(&mut buf, values)?;
        self.db.put(&row_key, &buf)
    }

    fn delete(&self, _ctx: &Context, table: &str, key: &str) -> Result<()> {
        self.db.delete(&key::compose(table, key))
    }
}

pub struct LsmDbCreator;

impl DbCreator for LsmDbCreator {
    fn create(&self, props: &Properties) -> Result<Box<dyn Db>> {
        Ok(Box::new(LsmDb::open(props)?))
    }
}

pub fn register_lsmdb(registry: &mut Registry) {
    registry.register(LSMDB, Box::new(LsmDbCreator));
}
