// ABOUTME: Sequential reader for partition log files: parses the header, then decodes every block.
// ABOUTME: Used to verify appended records and by the CLI's dump command.

use std::fs;
use std::path::{Path, PathBuf};

use crate::append_log::LogError;
use crate::codec::{CodecError, decode_datum};
use crate::container::{FileHeader, read_block};
use crate::record::AvroRecord;
use crate::schema::Value;

/// A log file loaded into memory for reading. Partition files hold at most
/// one hour of one device's updates, so reading them whole is fine.
pub struct LogReader {
    path: PathBuf,
    header: FileHeader,
    data: Vec<u8>,
    body_start: usize,
}

impl LogReader {
    /// Read the file at `path` and parse its header.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let data = fs::read(path)?;
        let mut input = data.as_slice();
        let header = FileHeader::read_from(&mut input).map_err(LogError::Corrupt)?;
        let body_start = data.len() - input.len();

        Ok(Self {
            path: path.to_path_buf(),
            header,
            data,
            body_start,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Decode every datum in the file, in append order.
    pub fn values(&self) -> Result<Vec<Vec<Value>>, LogError> {
        let mut input = &self.data[self.body_start..];
        let mut datums = Vec::new();

        while let Some(block) = read_block(&self.header, &mut input).map_err(LogError::Corrupt)? {
            let mut block_data = block.data.as_slice();
            for _ in 0..block.count {
                let datum =
                    decode_datum(&self.header.schema, &mut block_data).map_err(LogError::Corrupt)?;
                datums.push(datum);
            }
            if !block_data.is_empty() {
                return Err(LogError::Corrupt(CodecError::Malformed(format!(
                    "{} trailing bytes after block datums",
                    block_data.len()
                ))));
            }
        }

        Ok(datums)
    }

    /// Decode every record as `R`. Fails with `SchemaMismatch` if the file's
    /// schema is not `R`'s.
    pub fn records<R: AvroRecord>(&self) -> Result<Vec<R>, LogError> {
        if let Some(diff) = R::schema().difference(&self.header.schema) {
            return Err(LogError::SchemaMismatch(format!(
                "{}: {}",
                self.path.display(),
                diff
            )));
        }
        self.values()?
            .into_iter()
            .map(|values| R::from_values(values).map_err(LogError::from))
            .collect()
    }

    /// Number of records in the file.
    pub fn count(&self) -> Result<usize, LogError> {
        Ok(self.values()?.len())
    }
}
