//! Process-wide `malloc()`/`free()`/`calloc()`/`realloc()` interposition with a
//! live ledger of outstanding allocations and periodic size/age histograms on
//! stderr.
//!
//! Build with `--features interpose` and preload the resulting `cdylib` to
//! instrument a program. Without the feature, the same machinery is available
//! as a library through [`Interposer`] and [`Instrumentor`].

pub mod alloc;
pub mod config;
pub mod externc;
pub mod instrumentor;
pub mod lazy_lock;
pub mod serialize;
pub mod snapshot;
pub mod stats;
pub mod sync;
pub mod util;

pub use alloc::{
    ledger::AllocationRecord,
    provider::{AllocProvider, BindError, NextProvider},
    shim::Interposer,
};
pub use config::ReportConfig;
pub use instrumentor::{Instrumentor, INSTRUMENTOR};
pub use snapshot::{LedgerSnapshot, SnapshotWriteError};
pub use stats::histogram::HistogramSnapshot;
