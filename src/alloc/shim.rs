//! The four allocation entry points, expressed over any [`AllocProvider`] and
//! any [`Instrumentor`]. The exported C symbols are thin wrappers around an
//! `Interposer<&NextProvider>` feeding the global instrumentor.
//!
//! Whatever happens here, the caller gets exactly what the provider returned.

use libc::c_void;

use super::provider::AllocProvider;
use crate::instrumentor::Instrumentor;

pub struct Interposer<'a, P> {
    provider: P,
    instrumentor: &'a Instrumentor,
}

impl<'a, P> Interposer<'a, P>
where
    P: AllocProvider,
{
    pub const fn new(provider: P, instrumentor: &'a Instrumentor) -> Self {
        Self {
            provider,
            instrumentor,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// `malloc()`
    ///
    /// # Safety
    /// Same contract as C `malloc()`
    pub unsafe fn allocate(&self, size: usize) -> *mut c_void {
        let ptr = self.provider.malloc(size);
        if !ptr.is_null() {
            self.instrumentor.on_allocate(ptr as usize, size as u64);
        }
        ptr
    }

    /// `calloc()`. The tracked size is `count * size`.
    ///
    /// # Safety
    /// Same contract as C `calloc()`
    pub unsafe fn zero_allocate(&self, count: usize, size: usize) -> *mut c_void {
        let ptr = self.provider.calloc(count, size);
        if !ptr.is_null() {
            // the provider only succeeds if the product fits in `usize`
            let total = (count as u64).saturating_mul(size as u64);
            self.instrumentor.on_allocate(ptr as usize, total);
        }
        ptr
    }

    /// `free()`. The ledger entry goes first, so no other thread can be handed
    /// this address while we still track it.
    ///
    /// # Safety
    /// Same contract as C `free()`
    pub unsafe fn deallocate(&self, ptr: *mut c_void) {
        if !ptr.is_null() {
            self.instrumentor.on_deallocate(ptr as usize);
        }
        self.provider.free(ptr);
    }

    /// `realloc()`
    ///
    /// # Safety
    /// Same contract as C `realloc()`
    pub unsafe fn reallocate(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        self.instrumentor
            .track_reallocation(ptr, size as u64, || self.provider.realloc(ptr, size))
    }
}
