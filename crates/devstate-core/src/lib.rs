// ABOUTME: Core library for devstate, containing the domain types shared by the store and server.
// ABOUTME: Defines inbound state updates, the persisted record shape, and partition keys.

pub mod partition;
pub mod record;
pub mod update;

pub use partition::{IdError, PartitionKey, validate_id};
pub use record::{DeviceStateRecord, RecordError};
pub use update::StateUpdate;
