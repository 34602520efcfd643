//! Indexed partial reads.
//!
//! An index turns a named part into the byte ranges that make it up. Two
//! kinds exist: virtual indexes compute fixed-size chunk boundaries from the
//! file size on demand, and format indexes carry persisted record offsets
//! produced by a format-aware builder (see [`LineIndexer`]).

use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A contiguous byte span within a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Total number of bytes covered by `ranges`.
pub fn total_length(ranges: &[ByteRange]) -> u64 {
    ranges.iter().map(|r| r.length).sum()
}

/// Request-scoped overrides applied to a descriptor before resolving parts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub chunk_size: Option<u64>,
}

/// Index descriptor stored in the node document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexDescriptor {
    /// Fixed-size chunks computed lazily from the file size.
    Virtual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_size: Option<u64>,
    },
    /// Persisted, format-aware record table.
    Format {
        format: String,
        records: Vec<ByteRange>,
        /// Named regions, each an ordered list of record numbers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        regions: BTreeMap<String, Vec<usize>>,
    },
}

impl IndexDescriptor {
    pub fn virtual_index() -> Self {
        Self::Virtual { chunk_size: None }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Virtual { .. } => "virtual",
            Self::Format { .. } => "format",
        }
    }

    /// Apply request-scoped options in place. Callers work on a clone so the
    /// persisted descriptor is never affected.
    pub fn apply(&mut self, options: &IndexOptions) -> Result<(), IndexError> {
        if let Some(size) = options.chunk_size {
            if size == 0 {
                return Err(IndexError::InvalidOption(
                    "chunk_size must be greater than zero".to_string(),
                ));
            }
            if let Self::Virtual { chunk_size } = self {
                *chunk_size = Some(size);
            }
        }
        Ok(())
    }

    /// Number of addressable parts for a payload of `file_size` bytes.
    pub fn part_count(&self, file_size: u64) -> u64 {
        match self {
            Self::Virtual { chunk_size } => {
                file_size.div_ceil(chunk_size.unwrap_or(crate::DEFAULT_CHUNK_SIZE).max(1))
            }
            Self::Format { records, .. } => records.len() as u64,
        }
    }

    /// Resolve a named part into its byte ranges, in the order they must be
    /// emitted.
    pub fn resolve(&self, part: &str, file_size: u64) -> Result<Vec<ByteRange>, IndexError> {
        match self {
            Self::Virtual { chunk_size } => {
                let chunk_size = chunk_size.unwrap_or(crate::DEFAULT_CHUNK_SIZE);
                resolve_virtual(part, file_size, chunk_size).map(|r| vec![r])
            }
            Self::Format {
                records, regions, ..
            } => resolve_format(part, records, regions, file_size),
        }
    }
}

fn parse_chunk_number(part: &str, raw: &str) -> Result<u64, IndexError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| IndexError::InvalidPart(part.to_string()))
}

fn resolve_virtual(part: &str, file_size: u64, chunk_size: u64) -> Result<ByteRange, IndexError> {
    if chunk_size == 0 {
        return Err(IndexError::InvalidOption(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    let count = file_size.div_ceil(chunk_size);

    let (first, last) = match part.split_once('-') {
        Some((a, b)) => (parse_chunk_number(part, a)?, parse_chunk_number(part, b)?),
        None => {
            let k = parse_chunk_number(part, part)?;
            (k, k)
        }
    };
    if first > last || last >= count {
        return Err(IndexError::InvalidPart(part.to_string()));
    }

    let offset = first * chunk_size;
    let end = last
        .checked_add(1)
        .and_then(|n| n.checked_mul(chunk_size))
        .map_or(file_size, |e| e.min(file_size));
    Ok(ByteRange::new(offset, end - offset))
}

fn resolve_format(
    part: &str,
    records: &[ByteRange],
    regions: &BTreeMap<String, Vec<usize>>,
    file_size: u64,
) -> Result<Vec<ByteRange>, IndexError> {
    let record = |n: usize| -> Result<ByteRange, IndexError> {
        let range = records
            .get(n)
            .copied()
            .ok_or_else(|| IndexError::InvalidPart(part.to_string()))?;
        if range.end() > file_size {
            return Err(IndexError::InvalidPart(format!(
                "{part}: record {n} extends past end of file"
            )));
        }
        Ok(range)
    };

    if let Ok(n) = part.parse::<usize>() {
        return Ok(vec![record(n)?]);
    }

    let members = regions
        .get(part)
        .ok_or_else(|| IndexError::InvalidPart(part.to_string()))?;
    members.iter().map(|&n| record(n)).collect()
}

/// Incremental builder for a newline-delimited record index.
///
/// Each record spans `lines_per_record` lines; the final record may be
/// shorter and need not end in a newline.
#[derive(Debug)]
pub struct LineIndexer {
    lines_per_record: u64,
    offset: u64,
    record_start: u64,
    lines_in_record: u64,
    records: Vec<ByteRange>,
}

impl LineIndexer {
    pub const FORMAT: &'static str = "line";

    pub fn new(lines_per_record: u64) -> Result<Self, IndexError> {
        if lines_per_record == 0 {
            return Err(IndexError::InvalidOption(
                "lines per record must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            lines_per_record,
            offset: 0,
            record_start: 0,
            lines_in_record: 0,
            records: Vec::new(),
        })
    }

    /// Feed the next slice of the payload.
    pub fn update(&mut self, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            self.lines_in_record += 1;
            if self.lines_in_record == self.lines_per_record {
                let end = self.offset + i as u64 + 1;
                self.records
                    .push(ByteRange::new(self.record_start, end - self.record_start));
                self.record_start = end;
                self.lines_in_record = 0;
            }
        }
        self.offset += data.len() as u64;
    }

    /// Close the trailing record and produce the descriptor.
    pub fn finish(mut self) -> IndexDescriptor {
        if self.offset > self.record_start {
            self.records.push(ByteRange::new(
                self.record_start,
                self.offset - self.record_start,
            ));
        }
        IndexDescriptor::Format {
            format: Self::FORMAT.to_string(),
            records: self.records,
            regions: BTreeMap::new(),
        }
    }
}
