//! Layout of problem tables inside the shared-memory segment
//!
//! ```text
//! 0        64                                   size - result_capacity   size
//! | header | reference tables ... | directory | ...        | result table |
//! ```
//!
//! Tables and the directory are JSON. The header (little-endian) tells a
//! solution process where the directory and the result region live, so it
//! can find everything from the segment name alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::layout::{HEADER_SIZE, MAGIC, VERSION};
use crate::models::{ProblemNumber, ResultTable, Table};
use crate::shm::{SharedMemorySegment, ShmError};

/// Errors while storing or reading tables in the segment
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error("Table serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reference arena full: {requested} bytes requested, {available} available")]
    ArenaFull { requested: usize, available: usize },

    #[error("Result table of {len} bytes exceeds the {capacity} byte result region")]
    ResultTooLarge { len: usize, capacity: usize },

    #[error("No table {name} for problem {problem}")]
    MissingTable { problem: ProblemNumber, name: String },

    #[error("No result table has been allocated")]
    NoResult,

    #[error("Corrupt segment: {0}")]
    Corrupt(String),

    #[error("Invalid layout: {0}")]
    Layout(String),
}

/// Location of a JSON document inside the segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

/// Problem number → table name → extent
pub type Directory = BTreeMap<ProblemNumber, BTreeMap<String, Extent>>;

/// Fixed header at offset 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub directory: Extent,
    pub result_offset: u64,
    pub result_capacity: u64,
    /// Length of the JSON result table, 0 when none is allocated
    pub result_len: u64,
}

impl SegmentHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(MAGIC);
        bytes[4..8].copy_from_slice(&VERSION.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.directory.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.directory.len.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.result_offset.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.result_capacity.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.result_len.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TableError> {
        if bytes.len() < HEADER_SIZE {
            return Err(TableError::Corrupt("header truncated".to_string()));
        }
        if &bytes[0..4] != MAGIC {
            return Err(TableError::Corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(field(bytes, 4));
        if version != VERSION {
            return Err(TableError::Corrupt(format!("unsupported layout version {}", version)));
        }

        Ok(Self {
            directory: Extent {
                offset: u64::from_le_bytes(field(bytes, 8)),
                len: u64::from_le_bytes(field(bytes, 16)),
            },
            result_offset: u64::from_le_bytes(field(bytes, 24)),
            result_capacity: u64::from_le_bytes(field(bytes, 32)),
            result_len: u64::from_le_bytes(field(bytes, 40)),
        })
    }
}

fn field<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

/// Owner of the segment and of the table layout inside it
#[derive(Debug)]
pub struct TableManager {
    segment: SharedMemorySegment,
    directory: Directory,
    header: SegmentHeader,
    arena_end: usize,
}

impl TableManager {
    /// Lay out `segment`, reserving `result_capacity` bytes at its tail
    pub fn new(segment: SharedMemorySegment, result_capacity: usize) -> Result<Self, TableError> {
        let size = segment.size();
        if result_capacity == 0 || HEADER_SIZE + result_capacity > size {
            return Err(TableError::Layout(format!(
                "result capacity {} does not fit a segment of {} bytes",
                result_capacity, size
            )));
        }

        let mut manager = Self {
            segment,
            directory: Directory::new(),
            header: SegmentHeader {
                result_offset: (size - result_capacity) as u64,
                result_capacity: result_capacity as u64,
                ..SegmentHeader::default()
            },
            arena_end: HEADER_SIZE,
        };
        manager.write_header()?;
        Ok(manager)
    }

    pub fn segment(&self) -> &SharedMemorySegment {
        &self.segment
    }

    /// Copy a reference table into the arena
    pub fn store_reference(
        &mut self,
        problem: ProblemNumber,
        name: &str,
        table: &Table,
    ) -> Result<(), TableError> {
        let bytes = serde_json::to_vec(table)?;
        let extent = self.append(&bytes)?;
        self.directory
            .entry(problem)
            .or_default()
            .insert(name.to_string(), extent);
        Ok(())
    }

    /// Read a reference table back from the segment
    pub fn reference(&self, problem: ProblemNumber, name: &str) -> Result<Table, TableError> {
        let extent = self
            .directory
            .get(&problem)
            .and_then(|tables| tables.get(name))
            .ok_or_else(|| TableError::MissingTable {
                problem,
                name: name.to_string(),
            })?;
        self.read_json(*extent)
    }

    pub fn reference_names(&self, problem: ProblemNumber) -> Vec<String> {
        self.directory
            .get(&problem)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn problem_count(&self) -> usize {
        self.directory.len()
    }

    /// Write the directory and point the header at it
    pub fn publish_directory(&mut self) -> Result<(), TableError> {
        let bytes = serde_json::to_vec(&self.directory)?;
        self.header.directory = self.append(&bytes)?;
        self.write_header()
    }

    /// Replace the result table with an empty one for `problem`
    pub fn reset_result(
        &mut self,
        problem: ProblemNumber,
        columns: Vec<String>,
    ) -> Result<(), TableError> {
        self.write_result(&ResultTable {
            problem_number: problem,
            table: Table::new(columns),
        })
    }

    pub fn write_result(&mut self, result: &ResultTable) -> Result<(), TableError> {
        let bytes = serde_json::to_vec(result)?;
        let capacity = self.header.result_capacity as usize;
        if bytes.len() > capacity {
            return Err(TableError::ResultTooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        self.segment
            .write_at(self.header.result_offset as usize, &bytes)?;
        self.header.result_len = bytes.len() as u64;
        self.write_header()
    }

    /// Read the current result table
    pub fn result_table(&self) -> Result<ResultTable, TableError> {
        if self.header.result_len == 0 {
            return Err(TableError::NoResult);
        }
        self.read_json(Extent {
            offset: self.header.result_offset,
            len: self.header.result_len,
        })
    }

    /// Forget every table; the arena is reused from the start
    pub fn clear(&mut self) -> Result<(), TableError> {
        self.directory.clear();
        self.arena_end = HEADER_SIZE;
        self.header.directory = Extent::default();
        self.header.result_len = 0;
        self.write_header()
    }

    /// Release the underlying segment
    pub fn release(&mut self) -> Result<(), ShmError> {
        self.segment.release()
    }

    fn append(&mut self, bytes: &[u8]) -> Result<Extent, TableError> {
        let limit = self.header.result_offset as usize;
        let available = limit.saturating_sub(self.arena_end);
        if bytes.len() > available {
            return Err(TableError::ArenaFull {
                requested: bytes.len(),
                available,
            });
        }

        let offset = self.arena_end;
        self.segment.write_at(offset, bytes)?;
        self.arena_end += bytes.len();
        Ok(Extent {
            offset: offset as u64,
            len: bytes.len() as u64,
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, extent: Extent) -> Result<T, TableError> {
        let bytes = self
            .segment
            .read_at(extent.offset as usize, extent.len as usize)?;
        Ok(serde_json::from_slice(bytes)?)
    }

    fn write_header(&mut self) -> Result<(), TableError> {
        let bytes = self.header.encode();
        self.segment.write_at(0, &bytes)?;
        Ok(())
    }
}
