//! Printing that never touches the allocator. Everything here formats into a
//! fixed-size stack buffer and hands the bytes straight to `write(2)`, so it
//! is safe to call from inside `malloc()`.

use std::{
    fmt,
    io::{Cursor, Write},
};

use libc::{c_void, STDERR_FILENO};

/// Capacity of a single `put!()` line. Anything longer is truncated.
pub const LINE_CAP: usize = 256;

/// A fixed-capacity text buffer backed by an array. Writes that do not fit are
/// dropped rather than grown.
pub struct StackBuf<const N: usize> {
    cursor: Cursor<[u8; N]>,
    truncated: bool,
}

impl<const N: usize> StackBuf<N> {
    pub fn new() -> Self {
        Self {
            cursor: Cursor::new([0; N]),
            truncated: false,
        }
    }

    /// The bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.cursor.get_ref()[..self.cursor.position() as usize]
    }

    /// `true` if some write did not fit
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> Default for StackBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for StackBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // `Cursor<[u8; N]>` writes what fits and then reports `WriteZero`, which
        // leaves us with the truncated prefix
        self.cursor.write_all(s.as_bytes()).map_err(|_| {
            self.truncated = true;
            fmt::Error
        })
    }
}

/// Write all of `bytes` to stderr, retrying on `EINTR`. Errors are dropped: a
/// closed stderr must never break an allocation.
pub fn write_stderr(bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        // SAFETY: `rest` is a valid, initialized slice for `rest.len()` bytes
        let n = unsafe { libc::write(STDERR_FILENO, rest.as_ptr() as *const c_void, rest.len()) };
        if n < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        if n == 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}

/// Displays an integer with `,` between groups of three digits, e.g.
/// `1,234,567`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grouped(pub u64);

impl fmt::Display for Grouped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // u64::MAX has 20 digits
        let mut digits = [0u8; 20];
        let mut n = self.0;
        let mut len = 0;
        loop {
            digits[len] = b'0' + (n % 10) as u8;
            len += 1;
            n /= 10;
            if n == 0 {
                break;
            }
        }
        for i in (0..len).rev() {
            write!(f, "{}", digits[i] as char)?;
            if i != 0 && i % 3 == 0 {
                write!(f, ",")?;
            }
        }
        Ok(())
    }
}

/// Print each argument's `Display` to stderr, back to back, without
/// allocating. Call it like `put!("bound ", n, " symbols")`.
#[macro_export]
macro_rules! put {
    ($($arg:expr),* $(,)?) => {{
        let mut buf = $crate::util::print::StackBuf::<{ $crate::util::print::LINE_CAP }>::new();
        $(
            _ = ::core::fmt::Write::write_fmt(&mut buf, format_args!("{}", $arg));
        )*
        $crate::util::print::write_stderr(buf.as_bytes());
    }};
}

/// [`put!()`] with a trailing newline
#[macro_export]
macro_rules! putln {
    ($($arg:expr),* $(,)?) => {
        $crate::put!($($arg,)* "\n")
    };
}

/// [`putln!()`], but only when `HEAPSTAT_VERBOSE` is set
#[macro_export]
macro_rules! verboseln {
    ($($arg:expr),* $(,)?) => {
        if $crate::config::ReportConfig::get().verbose {
            $crate::putln!("heapstat: ", $($arg,)*)
        }
    };
}
