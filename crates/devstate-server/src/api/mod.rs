// ABOUTME: API module containing the HTTP handler functions for the devstate API.
// ABOUTME: Currently a single sub-module for persisting device-state updates.

pub mod device_state;
