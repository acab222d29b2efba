//! Report settings, read once from the environment.
//!
//! `getenv()` is used directly instead of `std::env::var()` because the latter
//! builds an `OsString`, and this is read from inside the allocator.

use std::ffi::CStr;

use once_cell::sync::OnceCell;

/// Seconds between two reports unless `HEAPSTAT_PERIOD` says otherwise
pub const DEFAULT_PERIOD_SECS: u64 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportConfig {
    /// `HEAPSTAT_PERIOD`: minimum number of seconds between two reports
    pub period_secs: u64,
    /// `HEAPSTAT_QUIET` unset: whether periodic reports are emitted at all
    pub reports_enabled: bool,
    /// `HEAPSTAT_VERBOSE` set: print bind and bootstrap diagnostics
    pub verbose: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_PERIOD_SECS,
            reports_enabled: true,
            verbose: false,
        }
    }
}

static CONFIG: OnceCell<ReportConfig> = OnceCell::new();

impl ReportConfig {
    /// The process-wide configuration, read from the environment on first use
    pub fn get() -> &'static ReportConfig {
        CONFIG.get_or_init(ReportConfig::from_env)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| {
            // SAFETY: `name` is NUL-terminated, and the returned pointer (if
            // any) points into the environment block, which we only read
            let value = unsafe { libc::getenv(name.as_ptr()) };
            if value.is_null() {
                None
            } else {
                // SAFETY: non-null `getenv()` results are NUL-terminated
                Some(unsafe { CStr::from_ptr(value) }.to_bytes())
            }
        })
    }

    /// Build a configuration from an arbitrary variable lookup. Unparseable
    /// values fall back to the defaults.
    pub fn from_lookup<'a, L>(lookup: L) -> Self
    where
        L: Fn(&CStr) -> Option<&'a [u8]>,
    {
        let mut config = Self::default();
        if let Some(period) = lookup(c"HEAPSTAT_PERIOD").and_then(parse_secs) {
            config.period_secs = period;
        }
        config.reports_enabled = lookup(c"HEAPSTAT_QUIET").is_none();
        config.verbose = lookup(c"HEAPSTAT_VERBOSE").is_some();
        config
    }
}

/// Parse a strictly positive decimal number of seconds
fn parse_secs(raw: &[u8]) -> Option<u64> {
    let raw = std::str::from_utf8(raw).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(secs),
    }
}
