#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use heapstat::{AllocProvider, Instrumentor, NextProvider, ReportConfig};
use libc::c_void;

/// An instrumentor of our own (so tests do not share a ledger) that never
/// prints
pub fn quiet_instrumentor() -> Instrumentor {
    Instrumentor::new().with_config(ReportConfig {
        reports_enabled: false,
        ..ReportConfig::default()
    })
}

pub fn next_provider() -> NextProvider {
    NextProvider::resolve().expect("libc provides the real allocator")
}

/// The real allocator, counting calls per primitive
pub struct CountingProvider {
    inner: NextProvider,
    pub mallocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub callocs: AtomicUsize,
    pub reallocs: AtomicUsize,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            inner: next_provider(),
            mallocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            callocs: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> [usize; 4] {
        [
            self.mallocs.load(Ordering::Relaxed),
            self.frees.load(Ordering::Relaxed),
            self.callocs.load(Ordering::Relaxed),
            self.reallocs.load(Ordering::Relaxed),
        ]
    }
}

unsafe impl AllocProvider for CountingProvider {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.inner.malloc(size)
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.inner.free(ptr)
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        self.callocs.fetch_add(1, Ordering::Relaxed);
        self.inner.calloc(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
        self.inner.realloc(ptr, size)
    }
}
