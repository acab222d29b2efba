//! Aggregating the ledger into histograms and printing them, at most once per
//! period.

pub mod gate;
pub mod histogram;
pub mod report;
