//! The periodic text report. Rendering never allocates: it writes into any
//! `fmt::Write`, and the engine hands it a fixed stack buffer.

use std::fmt::{self, Write};

use super::histogram::{HistogramSnapshot, AGE_BINS, AGE_SCALE, SIZE_BINS, SIZE_SCALE};
use crate::util::{
    num::HumanBytes,
    print::{Grouped, StackBuf},
};

/// Width of a full bar chart, in `#`
pub const BAR_LENGTH: u64 = 20;

/// Enough for the whole report with a long timestamp. A report that somehow
/// does not fit is cut short rather than grown.
pub const REPORT_CAP: usize = 2048;

/// Number of `#` for a bin holding `count` out of `current` allocations, i.e.
/// `count / (current / BAR_LENGTH)` rounded down. Empty when nothing is live.
pub fn bar_len(count: u64, current: u64) -> usize {
    if current == 0 {
        return 0;
    }
    let len = u128::from(count) * u128::from(BAR_LENGTH) / u128::from(current);
    len.min(u128::from(BAR_LENGTH)) as usize
}

/// Displays as that many `#`
struct Bar(usize);

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.0 {
            f.write_char('#')?;
        }
        Ok(())
    }
}

/// Allocations represented by a single `#`
fn unit(snapshot: &HistogramSnapshot) -> f64 {
    snapshot.current_allocations as f64 / BAR_LENGTH as f64
}

pub fn render<W>(out: &mut W, snapshot: &HistogramSnapshot, timestamp: &str) -> fmt::Result
where
    W: Write,
{
    let current = snapshot.current_allocations;

    write!(out, "\n>>>>>>>>>>>>>{timestamp}>>>>>>>>>>>>>\n")?;
    writeln!(out, "Overall stats:")?;
    writeln!(out, "{} Current allocations", Grouped(current))?;
    writeln!(
        out,
        "{} Overall allocations since start",
        Grouped(snapshot.overall_allocations)
    )?;
    writeln!(
        out,
        "{} Current total allocated size",
        HumanBytes::new(snapshot.total_bytes)
    )?;

    writeln!(
        out,
        "\nCurrent allocations by size: ( # = {:.1} current allocations)",
        unit(snapshot)
    )?;
    for (i, &count) in snapshot.by_size.iter().enumerate() {
        let upper = SIZE_SCALE.upper_bound(i);
        let lower = if i == 0 { 0 } else { upper / 2 };
        if i == SIZE_BINS - 1 {
            write!(out, "{lower} + bytes: ")?;
        } else {
            write!(out, "{lower} - {upper} bytes: ")?;
        }
        writeln!(out, "{} ", Bar(bar_len(count, current)))?;
    }

    writeln!(
        out,
        "\nCurrent allocations by age: ( # = {:.1} current allocations)",
        unit(snapshot)
    )?;
    for (i, &count) in snapshot.by_age.iter().enumerate() {
        let upper = AGE_SCALE.upper_bound(i);
        if i == AGE_BINS - 1 {
            write!(out, "> {} sec: ", upper / AGE_SCALE.factor)?;
        } else {
            write!(out, "< {upper} sec: ")?;
        }
        writeln!(out, "{} ", Bar(bar_len(count, current)))?;
    }
    Ok(())
}

/// [`render()`] into a stack buffer, dropping whatever does not fit
pub fn render_to_buf(snapshot: &HistogramSnapshot, timestamp: &str) -> StackBuf<REPORT_CAP> {
    let mut buf = StackBuf::new();
    _ = render(&mut buf, snapshot, timestamp);
    buf
}
