// ABOUTME: Persistence layer for devstate, appending device-state records to partitioned log files.
// ABOUTME: Provides the Avro container codec, append log, reader, partition resolver, locks, and engine.

pub mod append_log;
pub mod codec;
pub mod container;
pub mod engine;
pub mod locks;
pub mod partition;
pub mod reader;
pub mod record;
pub mod schema;

pub use append_log::{AppendLog, LogError};
pub use codec::{Codec, CodecError};
pub use container::FileHeader;
pub use engine::{EngineConfig, EngineError, PersistenceEngine, SetDeviceStateResponse};
pub use locks::PartitionLocks;
pub use partition::{PartitionError, PartitionResolver};
pub use reader::LogReader;
pub use record::{AvroRecord, schema_for};
pub use schema::{Field, FieldType, Schema, Value};
