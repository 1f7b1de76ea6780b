// ABOUTME: Defines DeviceStateRecord, the unit appended to a partition's log file.
// ABOUTME: Converts a StateUpdate into its persisted form, decoding state blobs as lossy UTF-8 text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::update::StateUpdate;

/// Errors that can occur when building a record from an update.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("version {0} does not fit in a signed 64-bit long")]
    VersionOutOfRange(u64),
}

/// One persisted device-state entry. Never mutated once appended.
///
/// State blobs are stored as text: bytes are decoded as UTF-8 and any invalid
/// sequence becomes U+FFFD. UTF-8 payloads round-trip exactly; arbitrary
/// binary payloads do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStateRecord {
    pub device_id: String,
    pub version: i64,
    pub namespace_id: String,
    pub reported_state: String,
    pub desired_state: String,
}

impl DeviceStateRecord {
    /// Build the persisted record for an update.
    pub fn from_update(update: &StateUpdate) -> Result<Self, RecordError> {
        let version = i64::try_from(update.version)
            .map_err(|_| RecordError::VersionOutOfRange(update.version))?;

        Ok(Self {
            device_id: update.device_id.clone(),
            version,
            namespace_id: update.namespace_id.clone(),
            reported_state: state_text(&update.reported_state),
            desired_state: state_text(&update.desired_state),
        })
    }
}

fn state_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
