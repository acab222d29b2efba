//! The bootstrap arena: a static, zeroed, bump-allocated buffer that serves the
//! allocations `dlsym()` makes while we are still resolving the real
//! allocator. Nothing in it is ever freed or reused, so every block is still
//! zeroed when handed out, which is what `calloc()` callers expect.

use std::{
    cell::UnsafeCell,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use libc::c_void;

use crate::util::{hint::fatal, num::round_up};

/// Hard capacity of the arena. Running out before binding has finished is
/// fatal.
pub const ARENA_CAPACITY: usize = 8192;

/// Alignment of every block the arena hands out (`max_align_t` on x86-64)
pub const ARENA_ALIGN: usize = 16;

#[repr(C, align(16))]
struct ArenaBytes(UnsafeCell<[u8; ARENA_CAPACITY]>);

pub struct BootstrapArena {
    bytes: ArenaBytes,
    /// Offset of the first free byte
    sp: AtomicUsize,
}

// SAFETY: every block is handed out exactly once (the bump is a CAS), so no two
// callers ever get overlapping memory
unsafe impl Sync for BootstrapArena {}

/// The arena the interposed entry points fall back to
pub static BOOTSTRAP_ARENA: BootstrapArena = BootstrapArena::new();

impl BootstrapArena {
    pub const fn new() -> Self {
        Self {
            bytes: ArenaBytes(UnsafeCell::new([0; ARENA_CAPACITY])),
            sp: AtomicUsize::new(0),
        }
    }

    fn base(&self) -> *mut u8 {
        self.bytes.0.get() as *mut u8
    }

    /// Carve out `size` bytes (at least one), or `None` if they do not fit in
    /// what is left.
    pub fn try_alloc(&self, size: usize) -> Option<NonNull<c_void>> {
        let size = size.max(1);
        let mut sp = self.sp.load(Ordering::Relaxed);
        loop {
            let start = round_up(sp, ARENA_ALIGN);
            let end = start.checked_add(size)?;
            if end > ARENA_CAPACITY {
                return None;
            }
            match self
                .sp
                .compare_exchange_weak(sp, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    // SAFETY: `start < end <= ARENA_CAPACITY`, so this stays in
                    // bounds of `bytes`
                    let block = unsafe { self.base().add(start) };
                    return NonNull::new(block as *mut c_void);
                }
                Err(current) => sp = current,
            }
        }
    }

    /// [`BootstrapArena::try_alloc()`], aborting the process when the arena is
    /// exhausted. Handing back a block that is too small would corrupt memory.
    pub fn alloc(&self, size: usize) -> *mut c_void {
        match self.try_alloc(size) {
            Some(block) => block.as_ptr(),
            None => fatal("bootstrap arena exhausted while resolving the real allocator"),
        }
    }

    /// Is `ptr` a block handed out by this arena?
    pub fn contains(&self, ptr: *const c_void) -> bool {
        let start = self.base() as usize;
        (start..start + ARENA_CAPACITY).contains(&(ptr as usize))
    }

    /// Number of bytes handed out so far (including alignment padding)
    pub fn used(&self) -> usize {
        self.sp.load(Ordering::Acquire)
    }

    /// Copy the contents of the arena block at `ptr` into `dst`, which holds
    /// `dst_size` bytes. The arena does not record block sizes, so this copies
    /// up to the end of the used region, capped at `dst_size`.
    ///
    /// # Safety
    ///
    /// - `ptr` must be a block returned by this arena
    /// - `dst` must be valid for writes of `dst_size` bytes. It may be a later
    ///   block of this same arena.
    pub unsafe fn copy_out(&self, ptr: *const c_void, dst: *mut c_void, dst_size: usize) {
        debug_assert!(self.contains(ptr));
        let offset = ptr as usize - self.base() as usize;
        let available = self.used().saturating_sub(offset);
        let count = available.min(dst_size);
        // SAFETY: source is in bounds of the used region, requirements on `dst`
        // are passed to the caller. `copy` because both may be in the arena.
        unsafe { ptr::copy(ptr as *const u8, dst as *mut u8, count) };
    }
}

impl Default for BootstrapArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_disjoint_and_zeroed() {
        let arena = BootstrapArena::new();
        let a = arena.try_alloc(3).unwrap().as_ptr() as usize;
        let b = arena.try_alloc(40).unwrap().as_ptr() as usize;
        assert_eq!(a % ARENA_ALIGN, 0);
        assert_eq!(b % ARENA_ALIGN, 0);
        assert!(b >= a + 3);
        let bytes = unsafe { std::slice::from_raw_parts(b as *const u8, 40) };
        assert!(bytes.iter().all(|&byte| byte == 0));
        assert!(arena.contains(a as *const c_void));
        assert!(arena.contains(b as *const c_void));
        let outside = 0u8;
        assert!(!arena.contains(&outside as *const u8 as *const c_void));
    }

    #[test]
    fn exhaustion_is_reported() {
        let arena = BootstrapArena::new();
        assert!(arena.try_alloc(ARENA_CAPACITY + 1).is_none());
        assert!(arena.try_alloc(ARENA_CAPACITY - 16).is_some());
        assert!(arena.try_alloc(17).is_none());
        assert!(arena.try_alloc(16).is_some());
        assert!(arena.try_alloc(1).is_none());
        assert_eq!(arena.used(), ARENA_CAPACITY);
    }

    #[test]
    fn copy_out_stops_at_used_region() {
        let arena = BootstrapArena::new();
        let block = arena.try_alloc(4).unwrap().as_ptr();
        unsafe { ptr::copy_nonoverlapping(b"abcd".as_ptr(), block as *mut u8, 4) };
        let mut dst = [0xffu8; 32];
        unsafe { arena.copy_out(block, dst.as_mut_ptr() as *mut c_void, dst.len()) };
        assert_eq!(&dst[..4], b"abcd");
        assert!(dst[4..].iter().all(|&byte| byte == 0xff));
    }

    #[test]
    fn copy_out_into_a_later_block() {
        let arena = BootstrapArena::new();
        let old = arena.try_alloc(8).unwrap().as_ptr();
        unsafe { ptr::copy_nonoverlapping(b"12345678".as_ptr(), old as *mut u8, 8) };
        let new = arena.try_alloc(64).unwrap().as_ptr();
        unsafe { arena.copy_out(old, new, 64) };
        let bytes = unsafe { std::slice::from_raw_parts(new as *const u8, 8) };
        assert_eq!(bytes, b"12345678");
    }
}
