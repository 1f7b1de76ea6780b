// ABOUTME: Resolves the on-disk log file for a (namespace, device, hour) partition under the storage root.
// ABOUTME: Creates missing partition directories before handing the path to the append log.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use devstate_core::PartitionKey;
use thiserror::Error;

/// Errors that can occur while resolving a partition.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("failed to create partition directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Maps partition keys to file paths below a storage root.
#[derive(Debug, Clone)]
pub struct PartitionResolver {
    root: PathBuf,
}

impl PartitionResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the log file for `key`. Does not touch the filesystem.
    pub fn path_for(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_dir()).join(key.file_name())
    }

    /// Resolve the log file for the given ids at `now`, creating the
    /// partition directory (and any missing parents) if needed.
    pub fn resolve<Tz: TimeZone>(
        &self,
        namespace_id: &str,
        device_id: &str,
        now: &DateTime<Tz>,
    ) -> Result<PathBuf, PartitionError> {
        let key = PartitionKey::at(namespace_id, device_id, now);
        let dir = self.root.join(key.relative_dir());

        fs::create_dir_all(&dir).map_err(|source| PartitionError::DirectoryCreation {
            path: dir.clone(),
            source,
        })?;

        Ok(dir.join(key.file_name()))
    }
}
