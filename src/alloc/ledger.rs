//! The ledger: which addresses are live right now, how big they are, and when
//! they were made.

use std::collections::{btree_map, BTreeMap};

use serde::{Deserialize, Serialize};

/// Metadata for one live allocation. Never mutated: a reallocation replaces the
/// whole record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Requested size in bytes (`count * size` for `calloc()`)
    pub size: u64,
    /// Wall-clock seconds since the epoch at which the allocation was recorded
    pub created_at: u64,
    /// Value of the overall allocation counter that produced this record.
    /// Strictly increasing in recording order, unlike addresses.
    pub sequence: u64,
}

impl AllocationRecord {
    pub const fn new(size: u64, created_at: u64, sequence: u64) -> Self {
        Self {
            size,
            created_at,
            sequence,
        }
    }

    /// Whole seconds between creation and `now` (zero if the clock went
    /// backwards)
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Address -> record, for every allocation we have seen and not yet seen
/// released. Addresses are identity keys and are never dereferenced.
///
/// Iteration is in address order. Address order says nothing about when
/// something was allocated; use [`Ledger::chronological()`] for that.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    records: BTreeMap<usize, AllocationRecord>,
}

impl Ledger {
    pub const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Track a new allocation. A stale entry at the same address (which means we
    /// missed a release) is overwritten and returned.
    pub fn record_allocation(
        &mut self,
        address: usize,
        record: AllocationRecord,
    ) -> Option<AllocationRecord> {
        self.records.insert(address, record)
    }

    /// Stop tracking `address`. Unknown addresses (allocated before we were
    /// attached, or not allocated at all) are ignored.
    pub fn record_deallocation(&mut self, address: usize) -> Option<AllocationRecord> {
        self.records.remove(&address)
    }

    /// `old` was reallocated to `new`. A zero `new` is a failed reallocation
    /// and leaves `old` tracked. `old == new` just replaces the record, and a
    /// zero `old` (`realloc(NULL, n)`) only inserts.
    pub fn record_reallocation(&mut self, old: usize, new: usize, record: AllocationRecord) {
        if new == 0 {
            return;
        }
        if old != new {
            self.records.remove(&old);
        }
        self.records.insert(new, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, address: usize) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    /// Sum of all live sizes
    pub fn total_bytes(&self) -> u64 {
        self.records
            .values()
            .fold(0u64, |total, record| total.saturating_add(record.size))
    }

    /// Live records in address order
    pub fn iter(&self) -> btree_map::Iter<'_, usize, AllocationRecord> {
        self.records.iter()
    }

    /// Live records in the order they were recorded
    pub fn chronological(&self) -> Vec<(usize, AllocationRecord)> {
        let mut records: Vec<_> = self.iter().map(|(&addr, &record)| (addr, record)).collect();
        records.sort_unstable_by_key(|(_, record)| record.sequence);
        records
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = (&'a usize, &'a AllocationRecord);
    type IntoIter = btree_map::Iter<'a, usize, AllocationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(size: u64, sequence: u64) -> AllocationRecord {
        AllocationRecord::new(size, 100, sequence)
    }

    #[test]
    fn allocation_then_deallocation() {
        let mut ledger = Ledger::new();
        assert!(ledger.record_allocation(0x1000, rec(8, 1)).is_none());
        assert!(ledger.record_allocation(0x2000, rec(16, 2)).is_none());
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.total_bytes(), 24);

        assert_eq!(ledger.record_deallocation(0x1000), Some(rec(8, 1)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(0x2000), Some(&rec(16, 2)));
    }

    #[test]
    fn unknown_deallocation_is_a_no_op() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x1000, rec(8, 1));
        assert!(ledger.record_deallocation(0xdead).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn stale_entry_is_overwritten() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x1000, rec(8, 1));
        assert_eq!(ledger.record_allocation(0x1000, rec(32, 2)), Some(rec(8, 1)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(0x1000).unwrap().size, 32);
    }

    #[test]
    fn reallocation_moves_the_entry() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x1000, rec(8, 1));
        ledger.record_reallocation(0x1000, 0x3000, rec(100, 2));
        assert!(ledger.get(0x1000).is_none());
        assert_eq!(ledger.get(0x3000), Some(&rec(100, 2)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn in_place_reallocation_updates_size() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x1000, rec(8, 1));
        ledger.record_reallocation(0x1000, 0x1000, rec(12, 2));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(0x1000).unwrap().size, 12);
    }

    #[test]
    fn failed_reallocation_keeps_the_original() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x1000, rec(8, 1));
        ledger.record_reallocation(0x1000, 0, rec(1 << 40, 2));
        assert_eq!(ledger.get(0x1000), Some(&rec(8, 1)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn reallocation_from_null_only_inserts() {
        let mut ledger = Ledger::new();
        ledger.record_reallocation(0, 0x1000, rec(4, 1));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn chronological_follows_sequence_not_address() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x3000, rec(1, 1));
        ledger.record_allocation(0x1000, rec(2, 2));
        ledger.record_allocation(0x2000, rec(3, 3));

        let by_address: Vec<usize> = ledger.iter().map(|(&a, _)| a).collect();
        assert_eq!(by_address, [0x1000, 0x2000, 0x3000]);

        let by_time: Vec<usize> = ledger.chronological().iter().map(|&(a, _)| a).collect();
        assert_eq!(by_time, [0x3000, 0x1000, 0x2000]);
    }

    #[test]
    fn age_saturates() {
        let record = AllocationRecord::new(1, 50, 1);
        assert_eq!(record.age(60), 10);
        assert_eq!(record.age(40), 0);
    }
}
