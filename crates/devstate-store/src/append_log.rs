// ABOUTME: Append-only log file handle: creates a file with its header or reopens one for appending.
// ABOUTME: Repairs torn tails on reopen and rolls back writes that fail before they are durable.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{Codec, CodecError, encode_datum};
use crate::container::{FileHeader, MAGIC, SYNC_SIZE, encode_block, read_block};
use crate::record::AvroRecord;
use crate::schema::{Schema, Value};

/// Errors that can occur during append log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("encoding error: {0}")]
    Encoding(CodecError),

    #[error("corrupt log: {0}")]
    Corrupt(CodecError),
}

impl From<CodecError> for LogError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SchemaMismatch(msg) => LogError::SchemaMismatch(msg),
            CodecError::Io(e) => LogError::Io(e),
            other => LogError::Corrupt(other),
        }
    }
}

/// An open log file positioned for appends. Each appended record becomes one
/// compressed block, written straight to the file.
///
/// Writes through one handle are all-or-nothing: if a write or the final
/// fsync fails, the file is truncated back to the length it had when the
/// handle was opened.
pub struct AppendLog {
    path: PathBuf,
    header: FileHeader,
    file: File,
    /// File length before this handle wrote anything.
    durable_len: u64,
    created: bool,
    appended: usize,
}

impl AppendLog {
    /// Open the log at `path` for appending, creating it if needed.
    ///
    /// A new (or empty) file gets a header embedding `schema` and `codec`.
    /// An existing file keeps its own embedded schema and codec; `schema` is
    /// only checked for compatibility with it, and a mismatch fails without
    /// touching the file. A torn header or a torn trailing block left by an
    /// earlier failed write is cut off before appending.
    pub fn open_for_append(path: &Path, schema: &Schema, codec: Codec) -> Result<Self, LogError> {
        let file = match OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => return Self::create(path, file, schema, codec),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                OpenOptions::new().read(true).append(true).open(path)?
            }
            Err(e) => return Err(e.into()),
        };

        if file.metadata()?.len() == 0 {
            tracing::warn!("log file {} exists but is empty, writing header", path.display());
            return Self::create(path, file, schema, codec);
        }

        let parsed = {
            let mut reader = BufReader::new(&file);
            FileHeader::read_from(&mut reader)
                .and_then(|header| Ok((header, reader.stream_position()?)))
        };
        let (header, body_start) = match parsed {
            Ok(parsed) => parsed,
            Err(CodecError::UnexpectedEof) => {
                if !has_container_prefix(&file)? {
                    return Err(LogError::Corrupt(CodecError::UnexpectedEof));
                }
                tracing::warn!("log file {} has a torn header, rewriting it", path.display());
                file.set_len(0)?;
                return Self::create(path, file, schema, codec);
            }
            Err(e) => return Err(LogError::Corrupt(e)),
        };

        if let Some(diff) = header.schema.difference(schema) {
            return Err(LogError::SchemaMismatch(format!(
                "{} embeds schema {}: {}",
                path.display(),
                header.schema.name,
                diff
            )));
        }

        let durable_len = repair_tail(&file, path, &header, body_start)?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            file,
            durable_len,
            created: false,
            appended: 0,
        })
    }

    fn create(path: &Path, file: File, schema: &Schema, codec: Codec) -> Result<Self, LogError> {
        let header = FileHeader::new(schema.clone(), codec);
        let bytes = header.to_bytes().map_err(LogError::Encoding)?;

        let mut log = Self {
            path: path.to_path_buf(),
            header,
            file,
            durable_len: 0,
            created: true,
            appended: 0,
        };
        if let Err(e) = log.file.write_all(&bytes) {
            log.roll_back();
            return Err(e.into());
        }

        tracing::info!(
            "created log file {} (codec {}, schema {})",
            path.display(),
            codec.name(),
            schema.name
        );
        Ok(log)
    }

    /// Returns the path to the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file's header, which is the schema of truth for appends.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Whether this handle created the file (and wrote its header).
    pub fn created(&self) -> bool {
        self.created
    }

    /// Number of records appended through this handle.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one record as a single block.
    pub fn append<R: AvroRecord>(&mut self, record: &R) -> Result<(), LogError> {
        self.append_values(&record.to_values())
    }

    /// Append one datum given as raw field values. The values are encoded
    /// against the file's schema; on mismatch nothing is written.
    pub fn append_values(&mut self, values: &[Value]) -> Result<(), LogError> {
        let mut datum = Vec::new();
        encode_datum(&self.header.schema, values, &mut datum)?;
        let block = encode_block(&self.header, &datum, 1).map_err(LogError::Encoding)?;

        if let Err(e) = self.file.write_all(&block) {
            self.roll_back();
            return Err(e.into());
        }
        self.appended += 1;

        tracing::debug!(
            "appended {} byte block to {}",
            block.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Fsync appended blocks and release the file.
    pub fn close_and_flush(mut self) -> Result<(), LogError> {
        let synced = self.file.flush().and_then(|()| self.file.sync_all());
        if let Err(e) = synced {
            self.roll_back();
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop everything this handle wrote.
    fn roll_back(&mut self) {
        match self.file.set_len(self.durable_len) {
            Ok(()) => {
                tracing::warn!(
                    "rolled back {} after a failed write, {} record(s) discarded",
                    self.path.display(),
                    self.appended
                );
                self.appended = 0;
            }
            Err(e) => tracing::error!(
                "failed to roll back {} to {} bytes: {}",
                self.path.display(),
                self.durable_len,
                e
            ),
        }
    }
}

/// Whether the file's first bytes are consistent with a container header,
/// i.e. a write of one was cut short rather than the file being foreign.
fn has_container_prefix(mut file: &File) -> Result<bool, LogError> {
    let mut head = Vec::with_capacity(MAGIC.len());
    file.seek(SeekFrom::Start(0))?;
    file.take(MAGIC.len() as u64).read_to_end(&mut head)?;
    Ok(MAGIC.starts_with(&head))
}

/// Make sure the file ends on a block boundary and return its length.
///
/// A file ending in its sync marker (or right after the header) is taken as
/// whole. Otherwise the blocks are scanned and the file is truncated after
/// the last one that decodes.
fn repair_tail(
    mut file: &File,
    path: &Path,
    header: &FileHeader,
    body_start: u64,
) -> Result<u64, LogError> {
    let len = file.metadata()?.len();
    if len == body_start {
        return Ok(len);
    }
    if len >= body_start + SYNC_SIZE as u64 {
        let mut tail = [0u8; SYNC_SIZE];
        file.seek(SeekFrom::End(-(SYNC_SIZE as i64)))?;
        file.read_exact(&mut tail)?;
        if tail == header.sync {
            return Ok(len);
        }
    }

    let mut body = Vec::new();
    file.seek(SeekFrom::Start(body_start))?;
    file.read_to_end(&mut body)?;

    let mut input = body.as_slice();
    let mut intact = 0;
    while let Ok(Some(_)) = read_block(header, &mut input) {
        intact = body.len() - input.len();
    }

    let valid_len = body_start + intact as u64;
    tracing::warn!(
        "log file {} has a torn tail, truncating {} byte(s)",
        path.display(),
        len - valid_len
    );
    file.set_len(valid_len)?;
    Ok(valid_len)
}
