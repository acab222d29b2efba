/// mark some stuff as #[cold]
#[cold]
pub fn cold<R, F: FnOnce() -> R>(f: F) -> R {
    f()
}

/// Print `msg` to stderr and abort. Used for the handful of conditions the
/// engine cannot survive (an unresolvable allocator symbol, an exhausted
/// bootstrap arena).
#[cold]
#[inline(never)]
pub fn fatal(msg: &str) -> ! {
    crate::putln!("heapstat: fatal: ", msg);
    std::process::abort()
}
