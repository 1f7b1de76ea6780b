// ABOUTME: "Set device state" API handler: decodes the request envelope and hands it to the engine.
// ABOUTME: Always answers with {status}; persistence failures are logged and reported as false.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use devstate_core::StateUpdate;
use devstate_store::SetDeviceStateResponse;
use serde::{Deserialize, Deserializer};

use crate::app_state::SharedState;

/// Request body of the "set device state" operation. State blobs are
/// base64 strings; missing blobs and version default to empty and zero.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDeviceStateRequest {
    pub device_id: String,
    pub namespace_id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default, deserialize_with = "base64_bytes")]
    pub reported_state: Vec<u8>,
    #[serde(default, deserialize_with = "base64_bytes")]
    pub desired_state: Vec<u8>,
}

impl From<SetDeviceStateRequest> for StateUpdate {
    fn from(req: SetDeviceStateRequest) -> Self {
        StateUpdate {
            device_id: req.device_id,
            namespace_id: req.namespace_id,
            version: req.version,
            reported_state: req.reported_state,
            desired_state: req.desired_state,
        }
    }
}

fn base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// POST /api/device-state - Persist one device-state update.
pub async fn set_device_state(
    State(state): State<SharedState>,
    Json(req): Json<SetDeviceStateRequest>,
) -> Json<SetDeviceStateResponse> {
    let update = StateUpdate::from(req);
    let engine = Arc::clone(&state.engine);

    match tokio::task::spawn_blocking(move || engine.set_device_state(&update)).await {
        Ok(response) => Json(response),
        Err(e) => {
            tracing::error!("persistence task failed: {}", e);
            Json(SetDeviceStateResponse { status: false })
        }
    }
}
