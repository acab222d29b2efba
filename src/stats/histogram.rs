use crate::alloc::ledger::Ledger;

/// Number of size bins: `0-4`, `4-8`, ..., `2048-4096`, `4096+`
pub const SIZE_BINS: usize = 12;

/// Number of age bins: `<1s`, `<10s`, `<100s`, `<1000s`, `>1000s`
pub const AGE_BINS: usize = 5;

/// Exponential bin boundaries: bin `i` holds values up to
/// `first_bound * factor^i`, and the last bin holds everything above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinScale {
    pub first_bound: u64,
    pub factor: u64,
}

/// Sizes, in bytes, doubling from 4
pub const SIZE_SCALE: BinScale = BinScale {
    first_bound: 4,
    factor: 2,
};

/// Ages, in seconds, in decades from 1
pub const AGE_SCALE: BinScale = BinScale {
    first_bound: 1,
    factor: 10,
};

impl BinScale {
    /// Upper bound (inclusive) of bin `index`
    pub const fn upper_bound(&self, index: usize) -> u64 {
        let mut bound = self.first_bound;
        let mut i = 0;
        while i < index {
            bound = bound.saturating_mul(self.factor);
            i += 1;
        }
        bound
    }

    /// The first of `bins` bins whose upper bound is `>= value`, or the last
    /// bin if there is none.
    pub fn bin_of(&self, value: u64, bins: usize) -> usize {
        let mut bound = self.first_bound;
        let mut index = 0;
        while index + 1 < bins && value > bound {
            bound = bound.saturating_mul(self.factor);
            index += 1;
        }
        index
    }
}

/// Aggregate view of the ledger at one instant. Derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistogramSnapshot {
    /// Seconds since the epoch the snapshot was taken at
    pub taken_at: u64,
    pub current_allocations: u64,
    pub overall_allocations: u64,
    pub total_bytes: u64,
    pub by_size: [u64; SIZE_BINS],
    pub by_age: [u64; AGE_BINS],
}

impl HistogramSnapshot {
    /// Bucket every live record. `overall_allocations` is passed in because
    /// the ledger does not know about released allocations.
    pub fn from_ledger(ledger: &Ledger, overall_allocations: u64, now: u64) -> Self {
        let mut by_size = [0; SIZE_BINS];
        let mut by_age = [0; AGE_BINS];
        let mut total_bytes = 0u64;
        for (_, record) in ledger {
            total_bytes = total_bytes.saturating_add(record.size);
            by_size[SIZE_SCALE.bin_of(record.size, SIZE_BINS)] += 1;
            by_age[AGE_SCALE.bin_of(record.age(now), AGE_BINS)] += 1;
        }
        Self {
            taken_at: now,
            current_allocations: ledger.len() as u64,
            overall_allocations,
            total_bytes,
            by_size,
            by_age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ledger::AllocationRecord;

    #[test]
    fn size_bins_follow_powers_of_two() {
        let bin = |size| SIZE_SCALE.bin_of(size, SIZE_BINS);
        assert_eq!(bin(0), 0);
        assert_eq!(bin(4), 0);
        assert_eq!(bin(5), 1);
        assert_eq!(bin(8), 1);
        assert_eq!(bin(9), 2);
        assert_eq!(bin(4096), 10);
        assert_eq!(bin(4097), 11);
        assert_eq!(bin(u64::MAX), 11);
    }

    #[test]
    fn age_bins_follow_decades() {
        let bin = |age| AGE_SCALE.bin_of(age, AGE_BINS);
        assert_eq!(bin(0), 0);
        assert_eq!(bin(1), 0);
        assert_eq!(bin(2), 1);
        assert_eq!(bin(10), 1);
        assert_eq!(bin(11), 2);
        assert_eq!(bin(1000), 3);
        assert_eq!(bin(1001), 4);
        assert_eq!(bin(u64::MAX), 4);
    }

    #[test]
    fn upper_bounds() {
        assert_eq!(SIZE_SCALE.upper_bound(0), 4);
        assert_eq!(SIZE_SCALE.upper_bound(10), 4096);
        assert_eq!(AGE_SCALE.upper_bound(3), 1000);
    }

    #[test]
    fn snapshot_counts_every_record_once() {
        let mut ledger = Ledger::new();
        ledger.record_allocation(0x10, AllocationRecord::new(3, 100, 1));
        ledger.record_allocation(0x20, AllocationRecord::new(100, 95, 2));
        ledger.record_allocation(0x30, AllocationRecord::new(10_000, 50, 3));

        let snapshot = HistogramSnapshot::from_ledger(&ledger, 7, 100);
        assert_eq!(snapshot.current_allocations, 3);
        assert_eq!(snapshot.overall_allocations, 7);
        assert_eq!(snapshot.total_bytes, 10_103);
        assert_eq!(snapshot.by_size.iter().sum::<u64>(), 3);
        assert_eq!(snapshot.by_age.iter().sum::<u64>(), 3);
        assert_eq!(snapshot.by_size[0], 1);
        assert_eq!(snapshot.by_size[5], 1);
        assert_eq!(snapshot.by_size[11], 1);
        assert_eq!(snapshot.by_age, [1, 1, 1, 0, 0]);
    }
}
