mod adapter;
mod config;
mod datastore;
mod error;

pub use adapter::{
    codec, key, register_lsmdb, BufPool, Context, Db, DbCreator, LsmDb, LsmDbCreator, PooledBuf,
    Registry, Row, RowCodec, LSMDB, SYNC_WRITES, WRITE_BUFFER_SIZE,
};
pub use config::{prop, Properties};
pub use datastore::{KvStore, LsmEngine};
pub use error::{DatastoreError, Result};
