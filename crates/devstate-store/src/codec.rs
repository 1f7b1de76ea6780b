// ABOUTME: Avro binary datum encoding (zig-zag varints, length-prefixed strings) and block compression.
// ABOUTME: Encodes values against a schema and rejects values whose shape does not match it.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use thiserror::Error;

use crate::schema::{FieldType, Schema, Value};

/// Deflate level used when none is configured.
pub const DEFAULT_DEFLATE_LEVEL: u32 = 5;

/// Errors that can occur while encoding or decoding datums and headers.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("invalid schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(err)
        }
    }
}

/// Block compression codec of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Null,
    Deflate { level: u32 },
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Deflate {
            level: DEFAULT_DEFLATE_LEVEL,
        }
    }
}

impl Codec {
    /// The codec identifier written to the `avro.codec` header entry.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Null => "null",
            Codec::Deflate { .. } => "deflate",
        }
    }

    /// Look up a codec by identifier. The level only applies to deflate and
    /// is not recorded in files, so readers pass whatever level they write with.
    pub fn from_name(name: &str, level: u32) -> Result<Self, CodecError> {
        match name {
            "null" => Ok(Codec::Null),
            "deflate" => Ok(Codec::Deflate { level }),
            other => Err(CodecError::UnsupportedCodec(other.to_string())),
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Null => Ok(data.to_vec()),
            Codec::Deflate { level } => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(*level));
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Null => Ok(data.to_vec()),
            Codec::Deflate { .. } => {
                let mut out = Vec::new();
                DeflateDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| CodecError::Malformed(format!("deflate: {}", e)))?;
                Ok(out)
            }
        }
    }
}

/// Append a zig-zag varint encoded long.
pub fn encode_long(n: i64, buf: &mut Vec<u8>) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    while z >= 0x80 {
        buf.push((z as u8) | 0x80);
        z >>= 7;
    }
    buf.push(z as u8);
}

/// Read a zig-zag varint encoded long.
pub fn decode_long<R: Read>(input: &mut R) -> Result<i64, CodecError> {
    let mut z: u64 = 0;
    let mut shift = 0;
    loop {
        if shift >= 64 {
            return Err(CodecError::Malformed("varint longer than 10 bytes".to_string()));
        }
        let mut byte = [0u8; 1];
        input.read_exact(&mut byte)?;
        z |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(((z >> 1) as i64) ^ -((z & 1) as i64))
}

/// Append a length-prefixed byte sequence.
pub fn encode_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    encode_long(bytes.len() as i64, buf);
    buf.extend_from_slice(bytes);
}

/// Read a length-prefixed byte sequence.
pub fn decode_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = decode_len(input)?;
    let mut bytes = Vec::new();
    input.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(bytes)
}

/// Read a length-prefixed UTF-8 string.
pub fn decode_string<R: Read>(input: &mut R) -> Result<String, CodecError> {
    String::from_utf8(decode_bytes(input)?)
        .map_err(|e| CodecError::Malformed(format!("string is not utf-8: {}", e)))
}

/// Read a non-negative long used as a length or count.
pub fn decode_len<R: Read>(input: &mut R) -> Result<usize, CodecError> {
    let n = decode_long(input)?;
    usize::try_from(n).map_err(|_| CodecError::Malformed(format!("negative length {}", n)))
}

/// Encode one datum. `values` must match `schema` field for field.
pub fn encode_datum(schema: &Schema, values: &[Value], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    if values.len() != schema.fields.len() {
        return Err(CodecError::SchemaMismatch(format!(
            "schema {} has {} fields, record has {}",
            schema.name,
            schema.fields.len(),
            values.len()
        )));
    }
    if let Some((field, value)) = schema
        .fields
        .iter()
        .zip(values)
        .find(|(field, value)| field.ty != value.field_type())
    {
        return Err(CodecError::SchemaMismatch(format!(
            "field {} is {:?}, record has {:?}",
            field.name,
            field.ty,
            value.field_type()
        )));
    }

    for value in values {
        match value {
            Value::Boolean(b) => buf.push(u8::from(*b)),
            Value::Int(n) => encode_long(i64::from(*n), buf),
            Value::Long(n) => encode_long(*n, buf),
            Value::String(s) => encode_bytes(s.as_bytes(), buf),
            Value::Bytes(b) => encode_bytes(b, buf),
        }
    }
    Ok(())
}

/// Decode one datum written under `schema`.
pub fn decode_datum<R: Read>(schema: &Schema, input: &mut R) -> Result<Vec<Value>, CodecError> {
    schema
        .fields
        .iter()
        .map(|field| match field.ty {
            FieldType::Boolean => {
                let mut byte = [0u8; 1];
                input.read_exact(&mut byte)?;
                match byte[0] {
                    0 => Ok(Value::Boolean(false)),
                    1 => Ok(Value::Boolean(true)),
                    b => Err(CodecError::Malformed(format!("invalid boolean byte {}", b))),
                }
            }
            FieldType::Int => {
                let n = decode_long(input)?;
                i32::try_from(n)
                    .map(Value::Int)
                    .map_err(|_| CodecError::Malformed(format!("int out of range: {}", n)))
            }
            FieldType::Long => decode_long(input).map(Value::Long),
            FieldType::String => decode_string(input).map(Value::String),
            FieldType::Bytes => decode_bytes(input).map(Value::Bytes),
        })
        .collect()
}
