use std::fmt;

/// Round up `n` to the nearest multiple of `to`
pub const fn round_up(n: usize, to: usize) -> usize {
    to * n.div_ceil(to)
}

const BYTE_UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// A byte count scaled to the largest unit that keeps it below 1024 (capped at
/// PiB). Displays as e.g. `1.5 KiB`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HumanBytes {
    pub value: f64,
    pub unit: &'static str,
}

impl HumanBytes {
    pub fn new(bytes: u64) -> Self {
        let mut value = bytes as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        Self {
            value,
            unit: BYTE_UNITS[unit],
        }
    }
}

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} {}", self.value, self.unit)
    }
}
