mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{
    DatastoreConfig, PoolConfig, RecordSql, SlowSqlConfig, TracerConfig, TransactionConfig,
    TransactionTracerConfig,
};
