// ABOUTME: Defines StateUpdate, the decoded "set device state" request handed to the engine.
// ABOUTME: Carries raw reported/desired state bytes exactly as the transport received them.

use serde::{Deserialize, Serialize};

/// A single device-state report. Built per incoming call and discarded once
/// the engine has processed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub device_id: String,
    pub namespace_id: String,
    pub version: u64,
    pub reported_state: Vec<u8>,
    pub desired_state: Vec<u8>,
}

impl StateUpdate {
    /// Create an update with the given ids and version and empty state blobs.
    pub fn new(namespace_id: impl Into<String>, device_id: impl Into<String>, version: u64) -> Self {
        Self {
            device_id: device_id.into(),
            namespace_id: namespace_id.into(),
            version,
            reported_state: Vec::new(),
            desired_state: Vec::new(),
        }
    }

    /// Set the reported state blob.
    pub fn with_reported(mut self, state: impl Into<Vec<u8>>) -> Self {
        self.reported_state = state.into();
        self
    }

    /// Set the desired state blob.
    pub fn with_desired(mut self, state: impl Into<Vec<u8>>) -> Self {
        self.desired_state = state.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_state_blobs() {
        let update = StateUpdate::new("0x3", "0x1321", 7)
            .with_reported("I am first one")
            .with_desired(vec![0x7b, 0x7d]);

        assert_eq!(update.namespace_id, "0x3");
        assert_eq!(update.device_id, "0x1321");
        assert_eq!(update.version, 7);
        assert_eq!(update.reported_state, b"I am first one");
        assert_eq!(update.desired_state, b"{}");
    }
}
