pub mod cached_writer;
pub mod database;
pub mod hasher;
pub mod identity;
pub mod schema;
pub mod sink;
pub mod statement;
pub mod values;

pub use cached_writer::{
    CachedWriter, FlushLoop, MemCachedWriter, ShutdownMode, StopHandle, StopSignal, WriterSettings,
    WriterTask, stop_signal,
};
pub use database::{ConnConfig, ConnectError, create_connection};
pub use hasher::{HashError, Hasher, XxHasher, fingerprint};
pub use identity::{IdGenerator, IdentityError, UuidGenerator};
pub use schema::{Dialect, SchemaError, provision};
pub use sink::{FailureSink, FileSink, SinkLine};
pub use statement::{BuildStatement, PreparedInsert, SqlBuilder, TableShape};
pub use values::{BatchItem, BuildError, BuiltValues, FailedRecord, ValueBuilder};
