// ABOUTME: Structural record schemas embedded in log file headers, serialized as Avro JSON schemas.
// ABOUTME: Also defines Value, the dynamically typed field value that datums are encoded from.

use serde::{Deserialize, Serialize};

/// Primitive field types supported in a record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Int,
    Long,
    String,
    Bytes,
}

/// A named, typed field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordTag {
    Record,
}

/// An Avro record schema. Only flat records of primitive fields are supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    tag: RecordTag,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a record schema with the given name and fields.
    pub fn record(name: impl Into<String>, namespace: Option<&str>, fields: Vec<Field>) -> Self {
        Self {
            tag: RecordTag::Record,
            name: name.into(),
            namespace: namespace.map(str::to_string),
            fields,
        }
    }

    /// Parse a schema from its JSON document.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Render the schema as a compact JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Two schemas are compatible when they have the same fields, with the
    /// same names and types, in the same order. Record names are not compared.
    pub fn is_compatible(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }

    /// Describe how `other` differs from `self`, or `None` if compatible.
    pub fn difference(&self, other: &Schema) -> Option<String> {
        if self.fields.len() != other.fields.len() {
            return Some(format!(
                "expected {} fields, found {}",
                self.fields.len(),
                other.fields.len()
            ));
        }
        self.fields
            .iter()
            .zip(&other.fields)
            .find(|(a, b)| a != b)
            .map(|(a, b)| {
                format!(
                    "expected field {} ({:?}), found {} ({:?})",
                    a.name, a.ty, b.name, b.ty
                )
            })
    }
}

/// A single field value of a datum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Boolean(bool),
    Int(i32),
    Long(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The schema type this value encodes as.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Boolean(_) => FieldType::Boolean,
            Value::Int(_) => FieldType::Int,
            Value::Long(_) => FieldType::Long,
            Value::String(_) => FieldType::String,
            Value::Bytes(_) => FieldType::Bytes,
        }
    }
}
