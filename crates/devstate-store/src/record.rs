// ABOUTME: Binds record types to their Avro schema and field values.
// ABOUTME: Implements the DeviceState schema for DeviceStateRecord, the only record the engine writes.

use devstate_core::DeviceStateRecord;

use crate::codec::CodecError;
use crate::schema::{Field, FieldType, Schema, Value};

/// A record type that can be written to and read from a log file.
pub trait AvroRecord: Sized {
    /// The structural schema derived from the record's field set.
    fn schema() -> Schema;

    /// Field values in schema order.
    fn to_values(&self) -> Vec<Value>;

    /// Rebuild a record from field values in schema order.
    fn from_values(values: Vec<Value>) -> Result<Self, CodecError>;
}

/// The schema of record type `R`.
pub fn schema_for<R: AvroRecord>() -> Schema {
    R::schema()
}

impl AvroRecord for DeviceStateRecord {
    fn schema() -> Schema {
        Schema::record(
            "DeviceState",
            Some("devstate"),
            vec![
                Field::new("deviceId", FieldType::String),
                Field::new("version", FieldType::Long),
                Field::new("namespaceId", FieldType::String),
                Field::new("reportedState", FieldType::String),
                Field::new("desiredState", FieldType::String),
            ],
        )
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::String(self.device_id.clone()),
            Value::Long(self.version),
            Value::String(self.namespace_id.clone()),
            Value::String(self.reported_state.clone()),
            Value::String(self.desired_state.clone()),
        ]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, CodecError> {
        match <[Value; 5]>::try_from(values) {
            Ok(
                [
                    Value::String(device_id),
                    Value::Long(version),
                    Value::String(namespace_id),
                    Value::String(reported_state),
                    Value::String(desired_state),
                ],
            ) => Ok(Self {
                device_id,
                version,
                namespace_id,
                reported_state,
                desired_state,
            }),
            _ => Err(CodecError::SchemaMismatch(
                "values do not form a DeviceState record".to_string(),
            )),
        }
    }
}
