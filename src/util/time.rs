//! Wall-clock helpers usable from inside the allocator.

use std::{
    mem::MaybeUninit,
    time::{SystemTime, UNIX_EPOCH},
};

use libc::c_char;

/// Whole seconds since the epoch, or zero if the clock is before it
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Format `secs` as local time with `strftime("%c")` into `buf`. Returns an
/// empty string if the time cannot be represented.
pub fn format_local(secs: u64, buf: &mut [u8]) -> &str {
    let Ok(time) = libc::time_t::try_from(secs) else {
        return "";
    };
    let mut tm = MaybeUninit::<libc::tm>::uninit();
    // SAFETY: both pointers are valid for the duration of the call, and
    // `localtime_r()` is the reentrant variant that writes only to `tm`
    if unsafe { libc::localtime_r(&time, tm.as_mut_ptr()) }.is_null() {
        return "";
    }
    // SAFETY: `buf` is writable for `buf.len()` bytes, the format is
    // NUL-terminated, and `tm` was initialized above
    let len = unsafe {
        libc::strftime(
            buf.as_mut_ptr() as *mut c_char,
            buf.len(),
            c"%c".as_ptr(),
            tm.as_ptr(),
        )
    };
    std::str::from_utf8(&buf[..len]).unwrap_or("")
}
