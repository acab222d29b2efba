//! The C surface. With the `interpose` feature these are exported unmangled,
//! so preloading the `cdylib` routes the whole process's `malloc()` family
//! through here. Without it they are ordinary Rust functions over the same
//! global state.

use std::{
    ffi::{c_char, c_int, CStr, OsStr},
    os::unix::ffi::OsStrExt,
    path::Path,
    ptr,
};

use libc::{c_void, size_t};

use crate::{
    alloc::{
        bootstrap::BOOTSTRAP_ARENA,
        provider::{bind, Binding, NextProvider},
        shim::Interposer,
    },
    instrumentor::INSTRUMENTOR,
    putln, verboseln,
};

fn interposer(provider: &'static NextProvider) -> Interposer<'static, &'static NextProvider> {
    Interposer::new(provider, &INSTRUMENTOR)
}

fn bootstrap_alloc(size: usize) -> *mut c_void {
    let block = BOOTSTRAP_ARENA.alloc(size);
    verboseln!("served ", size, " bytes from the bootstrap arena");
    block
}

/// Move an arena block into a real allocation (or a newer arena block while
/// still binding). Size zero releases the block, as glibc's `realloc()` does.
unsafe fn move_out_of_arena(old: *mut c_void, size: size_t) -> *mut c_void {
    if size == 0 {
        return ptr::null_mut();
    }
    let new = malloc(size);
    if !new.is_null() {
        BOOTSTRAP_ARENA.copy_out(old, new, size);
    }
    new
}

unsafe fn route_malloc(binding: Binding, size: size_t) -> *mut c_void {
    match binding {
        Binding::Bound(provider) => interposer(provider).allocate(size),
        Binding::Bootstrapping => bootstrap_alloc(size),
    }
}

unsafe fn route_free(binding: Binding, ptr: *mut c_void) {
    match binding {
        Binding::Bound(provider) => interposer(provider).deallocate(ptr),
        // nothing but arena blocks exist before the first bind
        Binding::Bootstrapping => {}
    }
}

unsafe fn route_calloc(binding: Binding, count: size_t, size: size_t) -> *mut c_void {
    match binding {
        Binding::Bound(provider) => interposer(provider).zero_allocate(count, size),
        // arena blocks are never reused, so already zeroed
        Binding::Bootstrapping => match count.checked_mul(size) {
            Some(total) => bootstrap_alloc(total),
            None => ptr::null_mut(),
        },
    }
}

unsafe fn route_realloc(binding: Binding, ptr: *mut c_void, size: size_t) -> *mut c_void {
    match binding {
        Binding::Bound(provider) => interposer(provider).reallocate(ptr, size),
        Binding::Bootstrapping if ptr.is_null() => bootstrap_alloc(size),
        // a real block cannot exist yet, so this is not ours to move
        Binding::Bootstrapping => ptr::null_mut(),
    }
}

/// # Safety
/// Same contract as C `malloc()`
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    route_malloc(bind(), size)
}

/// # Safety
/// Same contract as C `free()`
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if BOOTSTRAP_ARENA.contains(ptr) {
        return;
    }
    route_free(bind(), ptr)
}

/// # Safety
/// Same contract as C `calloc()`
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    route_calloc(bind(), count, size)
}

/// # Safety
/// Same contract as C `realloc()`
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    if BOOTSTRAP_ARENA.contains(ptr) {
        return move_out_of_arena(ptr, size);
    }
    route_realloc(bind(), ptr, size)
}

/// Stop periodic reports (tracking continues)
#[cfg_attr(feature = "interpose", no_mangle)]
pub extern "C" fn heapstat_freeze() {
    INSTRUMENTOR.freeze();
}

#[cfg_attr(feature = "interpose", no_mangle)]
pub extern "C" fn heapstat_unfreeze() {
    INSTRUMENTOR.unfreeze();
}

#[cfg_attr(feature = "interpose", no_mangle)]
pub extern "C" fn heapstat_current_allocations() -> u64 {
    INSTRUMENTOR.current_allocations()
}

#[cfg_attr(feature = "interpose", no_mangle)]
pub extern "C" fn heapstat_overall_allocations() -> u64 {
    INSTRUMENTOR.overall_allocations()
}

/// Write the ledger as JSON to the file at `path`. Returns `0` on success and
/// `-1` (after printing why) on failure.
///
/// # Safety
/// `path` must be null or a NUL-terminated string
#[cfg_attr(feature = "interpose", no_mangle)]
pub unsafe extern "C" fn heapstat_dump_json(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    let path = Path::new(OsStr::from_bytes(CStr::from_ptr(path).to_bytes()));
    match INSTRUMENTOR.dump_json(path) {
        Ok(()) => 0,
        Err(err) => {
            putln!("heapstat: ", err);
            -1
        }
    }
}
