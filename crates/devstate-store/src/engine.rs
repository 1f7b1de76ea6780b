// ABOUTME: PersistenceEngine: turns a StateUpdate into one record appended to its partition's log file.
// ABOUTME: Serializes writers per partition and converts every failure into a status=false response.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use devstate_core::{DeviceStateRecord, IdError, PartitionKey, RecordError, StateUpdate, validate_id};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::append_log::{AppendLog, LogError};
use crate::codec::Codec;
use crate::locks::PartitionLocks;
use crate::partition::{PartitionError, PartitionResolver};
use crate::reader::LogReader;
use crate::record::schema_for;

/// Errors that can occur while persisting a state update.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid id: {0}")]
    InvalidId(#[from] IdError),

    #[error(transparent)]
    DirectoryCreation(#[from] PartitionError),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("corrupt log: {0}")]
    CorruptLog(String),
}

impl From<LogError> for EngineError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io(e) => EngineError::Io(e),
            LogError::SchemaMismatch(msg) => EngineError::SchemaMismatch(msg),
            LogError::Encoding(e) => EngineError::Encoding(e.to_string()),
            LogError::Corrupt(e) => EngineError::CorruptLog(e.to_string()),
        }
    }
}

impl From<RecordError> for EngineError {
    fn from(err: RecordError) -> Self {
        EngineError::Encoding(err.to_string())
    }
}

/// Static engine configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root: PathBuf,
    /// Codec for newly created log files.
    pub codec: Codec,
}

impl EngineConfig {
    /// Configuration rooted at `root` with the default deflate codec.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            codec: Codec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// Response of the "set device state" operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDeviceStateResponse {
    pub status: bool,
}

/// Persists device-state updates into partitioned, append-only log files.
/// All methods block on filesystem I/O.
pub struct PersistenceEngine {
    resolver: PartitionResolver,
    codec: Codec,
    locks: PartitionLocks,
}

impl PersistenceEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            resolver: PartitionResolver::new(config.root),
            codec: config.codec,
            locks: PartitionLocks::new(),
        }
    }

    /// Return the storage root.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// Codec used for newly created files.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Path of the log file the given ids map to at `at`. Pure; creates nothing.
    pub fn partition_path<Tz: TimeZone>(
        &self,
        namespace_id: &str,
        device_id: &str,
        at: &DateTime<Tz>,
    ) -> PathBuf {
        self.resolver
            .path_for(&PartitionKey::at(namespace_id, device_id, at))
    }

    /// Handle a "set device state" call. Never fails: errors are logged and
    /// reported as `status: false`.
    pub fn set_device_state(&self, update: &StateUpdate) -> SetDeviceStateResponse {
        match self.save_device_state(update) {
            Ok(()) => SetDeviceStateResponse { status: true },
            Err(e) => {
                tracing::error!(
                    namespace_id = %update.namespace_id,
                    device_id = %update.device_id,
                    version = update.version,
                    "failed to persist device state: {}",
                    e
                );
                SetDeviceStateResponse { status: false }
            }
        }
    }

    /// Append `update` to its partition for the current local hour.
    pub fn save_device_state(&self, update: &StateUpdate) -> Result<(), EngineError> {
        self.save_device_state_at(update, &Local::now())
    }

    /// Append `update` to its partition for the hour containing `now`.
    pub fn save_device_state_at<Tz: TimeZone>(
        &self,
        update: &StateUpdate,
        now: &DateTime<Tz>,
    ) -> Result<(), EngineError> {
        validate_id("namespace id", &update.namespace_id)?;
        validate_id("device id", &update.device_id)?;
        let record = DeviceStateRecord::from_update(update)?;

        let path = self
            .resolver
            .resolve(&update.namespace_id, &update.device_id, now)?;

        self.locks.with_lock(&path, || -> Result<(), LogError> {
            let schema = schema_for::<DeviceStateRecord>();
            let mut log = AppendLog::open_for_append(&path, &schema, self.codec)?;
            log.append(&record)?;
            log.close_and_flush()
        })?;

        tracing::debug!(
            namespace_id = %update.namespace_id,
            device_id = %update.device_id,
            version = update.version,
            "persisted device state to {}",
            path.display()
        );
        Ok(())
    }

    /// Read back every record of the partition the ids map to at `at`.
    /// A partition that was never written holds no records.
    pub fn read_partition<Tz: TimeZone>(
        &self,
        namespace_id: &str,
        device_id: &str,
        at: &DateTime<Tz>,
    ) -> Result<Vec<DeviceStateRecord>, EngineError> {
        validate_id("namespace id", namespace_id)?;
        validate_id("device id", device_id)?;

        let path = self.partition_path(namespace_id, device_id, at);
        self.locks.with_lock(&path, || -> Result<Vec<DeviceStateRecord>, EngineError> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            Ok(LogReader::open(&path)?.records()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType, Schema};
    use chrono::Utc;
    use std::fs;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> PersistenceEngine {
        PersistenceEngine::new(EngineConfig::new(dir.path().join("data")))
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    fn first_update() -> StateUpdate {
        StateUpdate::new("0x3", "0x1321", 1).with_reported("I am first one")
    }

    #[test]
    fn first_write_creates_partition_and_file() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.save_device_state_at(&first_update(), &fixed_now()).unwrap();

        let path = dir
            .path()
            .join("data/0x3/0x1321/2024-03-09/14/device_state_0x1321.avro");
        assert!(path.is_file());
        assert_eq!(engine.partition_path("0x3", "0x1321", &fixed_now()), path);

        let records = engine.read_partition("0x3", "0x1321", &fixed_now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reported_state, "I am first one");
        assert_eq!(records[0].desired_state, "");
        assert_eq!(records[0].version, 1);
    }

    #[test]
    fn same_hour_appends_to_the_same_file() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let later = fixed_now() + chrono::Duration::minutes(50);

        engine.save_device_state_at(&first_update(), &fixed_now()).unwrap();
        let second = StateUpdate::new("0x3", "0x1321", 2).with_reported("I am second");
        engine.save_device_state_at(&second, &later).unwrap();

        let records = engine.read_partition("0x3", "0x1321", &fixed_now()).unwrap();
        let texts: Vec<_> = records.iter().map(|r| r.reported_state.as_str()).collect();
        assert_eq!(texts, ["I am first one", "I am second"]);
    }

    #[test]
    fn next_hour_starts_a_new_file() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let next_hour = fixed_now() + chrono::Duration::hours(1);

        engine.save_device_state_at(&first_update(), &fixed_now()).unwrap();
        engine.save_device_state_at(&first_update(), &next_hour).unwrap();

        assert_ne!(
            engine.partition_path("0x3", "0x1321", &fixed_now()),
            engine.partition_path("0x3", "0x1321", &next_hour)
        );
        assert_eq!(engine.read_partition("0x3", "0x1321", &fixed_now()).unwrap().len(), 1);
        assert_eq!(engine.read_partition("0x3", "0x1321", &next_hour).unwrap().len(), 1);
    }

    #[test]
    fn set_device_state_reports_success() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let before = Local::now();
        let response = engine.set_device_state(&first_update());
        let after = Local::now();

        assert!(response.status);
        // The call may straddle an hour boundary; the record lands in exactly one partition.
        let mut records = engine.read_partition("0x3", "0x1321", &before).unwrap();
        if engine.partition_path("0x3", "0x1321", &before)
            != engine.partition_path("0x3", "0x1321", &after)
        {
            records.extend(engine.read_partition("0x3", "0x1321", &after).unwrap());
        }
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reported_state, "I am first one");
    }

    #[test]
    fn save_after_a_torn_write_keeps_every_record_readable() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        engine.save_device_state_at(&first_update(), &fixed_now()).unwrap();
        let path = engine.partition_path("0x3", "0x1321", &fixed_now());
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[0x02, 0x40, 0x01])
            .unwrap();

        let second = StateUpdate::new("0x3", "0x1321", 2).with_reported("I am second one");
        engine.save_device_state_at(&second, &fixed_now()).unwrap();

        let records = engine.read_partition("0x3", "0x1321", &fixed_now()).unwrap();
        let texts: Vec<_> = records.iter().map(|r| r.reported_state.as_str()).collect();
        assert_eq!(texts, ["I am first one", "I am second one"]);
    }

    #[test]
    fn invalid_ids_fail_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let update = StateUpdate::new("..", "dev", 1);

        let err = engine.save_device_state_at(&update, &fixed_now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidId(_)));
        assert!(!engine.set_device_state(&update).status);

        let update = StateUpdate::new("ns", "a/b", 1);
        assert!(matches!(
            engine.save_device_state_at(&update, &fixed_now()),
            Err(EngineError::InvalidId(_))
        ));
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn oversized_version_is_an_encoding_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let update = StateUpdate::new("ns", "dev", u64::MAX);

        let err = engine.save_device_state_at(&update, &fixed_now()).unwrap_err();

        assert!(matches!(err, EngineError::Encoding(_)));
        assert!(!engine.partition_path("ns", "dev", &fixed_now()).exists());
    }

    #[test]
    fn foreign_schema_file_is_a_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let path = engine.partition_path("ns", "dev", &fixed_now());
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let foreign = Schema::record("Legacy", None, vec![Field::new("DeviceId", FieldType::String)]);
        AppendLog::open_for_append(&path, &foreign, Codec::default())
            .unwrap()
            .close_and_flush()
            .unwrap();
        let before = fs::read(&path).unwrap();

        let err = engine
            .save_device_state_at(&StateUpdate::new("ns", "dev", 1), &fixed_now())
            .unwrap_err();

        assert!(matches!(err, EngineError::SchemaMismatch(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn blocked_partition_directory_is_reported() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/ns"), b"").unwrap();

        let err = engine
            .save_device_state_at(&StateUpdate::new("ns", "dev", 1), &fixed_now())
            .unwrap_err();

        assert!(matches!(err, EngineError::DirectoryCreation(_)));
    }

    #[test]
    fn unwritten_partition_reads_empty() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert!(engine.read_partition("ns", "dev", &fixed_now()).unwrap().is_empty());
    }

    #[test]
    fn null_codec_engine_writes_uncompressed_files() {
        let dir = TempDir::new().unwrap();
        let engine =
            PersistenceEngine::new(EngineConfig::new(dir.path().to_path_buf()).with_codec(Codec::Null));

        engine.save_device_state_at(&first_update(), &fixed_now()).unwrap();

        let path = engine.partition_path("0x3", "0x1321", &fixed_now());
        let reader = LogReader::open(&path).unwrap();
        assert_eq!(reader.header().codec, Codec::Null);
        assert_eq!(reader.count().unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_to_one_partition_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine(&dir));
        let now = fixed_now();

        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let update = StateUpdate::new("ns", "dev", i).with_reported(format!("report {}", i));
                    engine.save_device_state_at(&update, &now)
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let records = engine.read_partition("ns", "dev", &now).unwrap();
        assert_eq!(records.len(), 16);
        let mut versions: Vec<_> = records.iter().map(|r| r.version).collect();
        versions.sort_unstable();
        assert_eq!(versions, (0..16).collect::<Vec<i64>>());
        for record in &records {
            assert_eq!(record.reported_state, format!("report {}", record.version));
        }
    }

    #[test]
    fn concurrent_writers_to_many_partitions() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine(&dir));
        let now = fixed_now();

        thread::scope(|s| {
            for device in 0..4 {
                let engine = Arc::clone(&engine);
                s.spawn(move || {
                    for version in 0..10u64 {
                        let update = StateUpdate::new("ns", format!("dev-{}", device), version);
                        engine.save_device_state_at(&update, &now).unwrap();
                    }
                });
            }
        });

        for device in 0..4 {
            let records = engine
                .read_partition("ns", &format!("dev-{}", device), &now)
                .unwrap();
            assert_eq!(records.len(), 10);
        }
    }
}
