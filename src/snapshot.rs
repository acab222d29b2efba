//! A serializable copy of the ledger, for looking at outside the process.

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    alloc::ledger::{AllocationRecord, Ledger},
    serialize::serde_addr,
};

/// One live allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(with = "serde_addr")]
    pub address: usize,
    #[serde(flatten)]
    pub record: AllocationRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: u64,
    pub current_allocations: u64,
    pub overall_allocations: u64,
    pub total_bytes: u64,
    /// In address order
    pub records: Vec<SnapshotEntry>,
}

#[derive(Debug)]
pub enum SnapshotWriteError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for SnapshotWriteError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for SnapshotWriteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl fmt::Display for SnapshotWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "could not write snapshot: {err}"),
            Self::Json(err) => write!(f, "could not serialize snapshot: {err}"),
        }
    }
}

impl std::error::Error for SnapshotWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}

impl LedgerSnapshot {
    pub fn new(ledger: &Ledger, overall_allocations: u64, taken_at: u64) -> Self {
        Self {
            taken_at,
            current_allocations: ledger.len() as u64,
            overall_allocations,
            total_bytes: ledger.total_bytes(),
            records: ledger
                .iter()
                .map(|(&address, &record)| SnapshotEntry { address, record })
                .collect(),
        }
    }

    pub fn to_writer<W>(&self, writer: W) -> Result<(), SnapshotWriteError>
    where
        W: Write,
    {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn write_to_file<P>(&self, path: P) -> Result<(), SnapshotWriteError>
    where
        P: AsRef<Path>,
    {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
