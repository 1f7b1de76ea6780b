// ABOUTME: Avro object container framing: the self-describing file header and compressed record blocks.
// ABOUTME: The header embeds the schema, codec, and creator tag plus a per-file sync marker.

use std::collections::BTreeMap;
use std::io::Read;

use ulid::Ulid;

use crate::codec::{
    Codec, CodecError, DEFAULT_DEFLATE_LEVEL, decode_bytes, decode_len, decode_long,
    decode_string, encode_bytes, encode_long,
};
use crate::schema::Schema;

/// Magic bytes opening every container file.
pub const MAGIC: [u8; 4] = [b'O', b'b', b'j', 1];

/// Length of the sync marker written after the header and every block.
pub const SYNC_SIZE: usize = 16;

/// Value of the `creator` metadata entry in files this engine creates.
pub const CREATOR: &str = "device-state-engine";

pub const SCHEMA_KEY: &str = "avro.schema";
pub const CODEC_KEY: &str = "avro.codec";
pub const CREATOR_KEY: &str = "creator";

/// The header of a log file. Written once when the file is created and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub schema: Schema,
    pub codec: Codec,
    /// Metadata entries other than the schema and codec.
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub sync: [u8; SYNC_SIZE],
}

impl FileHeader {
    /// Build the header for a new file, with a fresh sync marker and the
    /// engine's creator tag.
    pub fn new(schema: Schema, codec: Codec) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(CREATOR_KEY.to_string(), CREATOR.as_bytes().to_vec());
        Self {
            schema,
            codec,
            metadata,
            sync: Ulid::new().to_bytes(),
        }
    }

    /// The `creator` metadata entry, if present and valid UTF-8.
    pub fn creator(&self) -> Option<&str> {
        self.metadata
            .get(CREATOR_KEY)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Serialize the header: magic, metadata map, sync marker.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let schema_json = self.schema.to_json()?;

        let mut entries: Vec<(&str, &[u8])> = vec![
            (SCHEMA_KEY, schema_json.as_bytes()),
            (CODEC_KEY, self.codec.name().as_bytes()),
        ];
        entries.extend(
            self.metadata
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_slice())),
        );

        let mut buf = Vec::with_capacity(schema_json.len() + 64);
        buf.extend_from_slice(&MAGIC);
        encode_long(entries.len() as i64, &mut buf);
        for (key, value) in entries {
            encode_bytes(key.as_bytes(), &mut buf);
            encode_bytes(value, &mut buf);
        }
        encode_long(0, &mut buf);
        buf.extend_from_slice(&self.sync);
        Ok(buf)
    }

    /// Read a header from the start of a file. The deflate level of the
    /// returned codec is the default, as levels are not recorded.
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CodecError::Malformed(format!(
                "bad magic {:02x?}, not a container file",
                magic
            )));
        }

        let mut metadata = BTreeMap::new();
        loop {
            let mut count = decode_long(input)?;
            if count == 0 {
                break;
            }
            if count < 0 {
                // Negative map block counts are followed by the block's byte size.
                count = count.checked_neg().ok_or_else(|| {
                    CodecError::Malformed("metadata block count overflow".to_string())
                })?;
                decode_len(input)?;
            }
            for _ in 0..count {
                let key = decode_string(input)?;
                let value = decode_bytes(input)?;
                metadata.insert(key, value);
            }
        }

        let mut sync = [0u8; SYNC_SIZE];
        input.read_exact(&mut sync)?;

        let schema_json = metadata
            .remove(SCHEMA_KEY)
            .ok_or_else(|| CodecError::Malformed(format!("header has no {}", SCHEMA_KEY)))?;
        let schema = Schema::from_json(&schema_json)?;

        let codec = match metadata.remove(CODEC_KEY) {
            Some(name) => Codec::from_name(&String::from_utf8_lossy(&name), DEFAULT_DEFLATE_LEVEL)?,
            None => Codec::Null,
        };

        Ok(Self {
            schema,
            codec,
            metadata,
            sync,
        })
    }
}

/// Frame already-encoded datums as one block: record count, byte size,
/// compressed payload, sync marker.
pub fn encode_block(header: &FileHeader, datums: &[u8], count: usize) -> Result<Vec<u8>, CodecError> {
    let payload = header.codec.compress(datums)?;

    let mut buf = Vec::with_capacity(payload.len() + SYNC_SIZE + 20);
    encode_long(count as i64, &mut buf);
    encode_long(payload.len() as i64, &mut buf);
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&header.sync);
    Ok(buf)
}

/// A decoded block: how many datums it holds and their decompressed bytes.
#[derive(Debug)]
pub struct Block {
    pub count: usize,
    pub data: Vec<u8>,
}

/// Read the next block from `input`. Returns `None` once `input` is empty.
pub fn read_block(header: &FileHeader, input: &mut &[u8]) -> Result<Option<Block>, CodecError> {
    if input.is_empty() {
        return Ok(None);
    }

    let count = decode_len(input)?;
    let size = decode_len(input)?;
    let framed = size
        .checked_add(SYNC_SIZE)
        .ok_or_else(|| CodecError::Malformed(format!("block size {} overflows", size)))?;
    if input.len() < framed {
        return Err(CodecError::UnexpectedEof);
    }

    let remaining: &[u8] = *input;
    let (payload, rest) = remaining.split_at(size);
    let (sync, rest) = rest.split_at(SYNC_SIZE);
    if sync != header.sync {
        return Err(CodecError::Malformed("sync marker mismatch".to_string()));
    }
    *input = rest;

    Ok(Some(Block {
        count,
        data: header.codec.decompress(payload)?,
    }))
}
