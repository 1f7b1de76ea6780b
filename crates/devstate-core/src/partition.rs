// ABOUTME: Defines PartitionKey, the (namespace, device, date, hour) bucket a record belongs to.
// ABOUTME: Also validates ids before they are used as filesystem path segments.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, TimeZone, Timelike};
use thiserror::Error;

/// File extension of partition log files.
pub const LOG_EXTENSION: &str = "avro";

/// Errors for ids that cannot be used as a single path segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} {id:?} is a relative path component")]
    Relative { field: &'static str, id: String },

    #[error("{field} {id:?} contains a path separator or NUL byte")]
    IllegalCharacter { field: &'static str, id: String },
}

/// Check that `id` is usable verbatim as one directory or file-name segment.
/// `field` names the id in the error message.
pub fn validate_id(field: &'static str, id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty { field });
    }
    if id == "." || id == ".." {
        return Err(IdError::Relative {
            field,
            id: id.to_string(),
        });
    }
    if id.contains(['/', '\\', '\0']) {
        return Err(IdError::IllegalCharacter {
            field,
            id: id.to_string(),
        });
    }
    Ok(())
}

/// The partition a record is written to. Derived from the ids and the
/// processing time, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub namespace_id: String,
    pub device_id: String,
    pub date: NaiveDate,
    pub hour: u32,
}

impl PartitionKey {
    /// Build the key for the given ids at instant `now`, using the calendar
    /// date and hour of `now`'s own time zone.
    pub fn at<Tz: TimeZone>(namespace_id: &str, device_id: &str, now: &DateTime<Tz>) -> Self {
        Self {
            namespace_id: namespace_id.to_string(),
            device_id: device_id.to_string(),
            date: now.date_naive(),
            hour: now.hour(),
        }
    }

    /// Directory of the partition relative to the storage root:
    /// `<namespace>/<device>/<YYYY-MM-DD>/<hour>`.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.namespace_id)
            .join(&self.device_id)
            .join(self.date.format("%Y-%m-%d").to_string())
            .join(self.hour.to_string())
    }

    /// Name of the partition's log file.
    pub fn file_name(&self) -> String {
        format!("device_state_{}.{}", self.device_id, LOG_EXTENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn key_uses_date_and_hour_of_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 45, 0).unwrap();

        let key = PartitionKey::at("0x3", "0x1321", &now);

        assert_eq!(key.date, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(key.hour, 7);
        assert_eq!(key.relative_dir(), PathBuf::from("0x3/0x1321/2024-03-09/7"));
        assert_eq!(key.file_name(), "device_state_0x1321.avro");
    }

    #[test]
    fn key_follows_the_timestamps_zone() {
        let utc = Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap();
        let plus_two = utc.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());

        let key = PartitionKey::at("ns", "dev", &plus_two);

        assert_eq!(key.date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(key.hour, 1);
    }

    #[test]
    fn same_hour_shares_a_key() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 7, 0, 1).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 9, 7, 59, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();

        assert_eq!(PartitionKey::at("ns", "dev", &a), PartitionKey::at("ns", "dev", &b));
        assert_ne!(PartitionKey::at("ns", "dev", &a), PartitionKey::at("ns", "dev", &c));
    }

    #[test]
    fn validate_id_accepts_plain_ids() {
        assert!(validate_id("device id", "0x1321").is_ok());
        assert!(validate_id("device id", "sensor.kitchen-1").is_ok());
    }

    #[test]
    fn validate_id_rejects_traversal() {
        assert_eq!(
            validate_id("namespace id", ""),
            Err(IdError::Empty {
                field: "namespace id"
            })
        );
        assert!(matches!(
            validate_id("device id", ".."),
            Err(IdError::Relative { .. })
        ));
        assert!(matches!(
            validate_id("device id", "../etc"),
            Err(IdError::IllegalCharacter { .. })
        ));
        assert!(matches!(
            validate_id("device id", r"a\b"),
            Err(IdError::IllegalCharacter { .. })
        ));
    }
}
