//! The underlying allocator we forward to.
//!
//! The engine only ever talks to an [`AllocProvider`]. In a preloaded process
//! that is [`NextProvider`]: the four functions that come *after* us in symbol
//! lookup order (normally libc's), resolved once with `dlsym(RTLD_NEXT, ..)`.

use std::{ffi::CStr, fmt, mem};

use libc::{c_void, size_t};

use crate::{
    lazy_lock::LazyLock,
    putln,
    util::hint::{cold, fatal},
    verboseln,
};

pub type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type CallocFn = unsafe extern "C" fn(size_t, size_t) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;

/// The four C allocation primitives.
///
/// # Safety
///
/// Implementations must have the semantics of C `malloc()`, `free()`,
/// `calloc()` and `realloc()`: returned blocks are valid, disjoint from every
/// other live block, and stay valid until passed to `free()` or `realloc()`.
/// They must never call back into the engine that wraps them.
pub unsafe trait AllocProvider: Sync {
    /// # Safety
    /// Same contract as C `malloc()`
    unsafe fn malloc(&self, size: usize) -> *mut c_void;

    /// # Safety
    /// Same contract as C `free()`
    unsafe fn free(&self, ptr: *mut c_void);

    /// # Safety
    /// Same contract as C `calloc()`
    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void;

    /// # Safety
    /// Same contract as C `realloc()`
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;
}

// SAFETY: forwards to `P`, which upholds the contract
unsafe impl<P> AllocProvider for &P
where
    P: AllocProvider + ?Sized,
{
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        (**self).malloc(size)
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        (**self).free(ptr)
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        (**self).calloc(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        (**self).realloc(ptr, size)
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindError {
    /// `dlsym()` found no definition after ours
    MissingSymbol(&'static CStr),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSymbol(name) => {
                write!(f, "could not resolve the real `{}`", name.to_string_lossy())
            }
        }
    }
}

impl std::error::Error for BindError {}

/// The real allocator, as found by `dlsym(RTLD_NEXT, ..)`
#[derive(Clone, Copy, Debug)]
pub struct NextProvider {
    malloc: MallocFn,
    free: FreeFn,
    calloc: CallocFn,
    realloc: ReallocFn,
}

fn lookup_next(name: &'static CStr) -> Result<*mut c_void, BindError> {
    // SAFETY: `name` is NUL-terminated; `RTLD_NEXT` is a valid pseudo-handle
    let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if sym.is_null() {
        cold(|| Err(BindError::MissingSymbol(name)))
    } else {
        Ok(sym)
    }
}

impl NextProvider {
    /// Resolve all four primitives. On glibc, `dlsym()` may itself call
    /// `calloc()`/`malloc()` while this runs; those calls land in the bootstrap
    /// arena.
    pub fn resolve() -> Result<Self, BindError> {
        // SAFETY: each symbol is the C function of the same name, whose
        // signature is exactly the one we transmute to
        unsafe {
            Ok(Self {
                malloc: mem::transmute::<*mut c_void, MallocFn>(lookup_next(c"malloc")?),
                free: mem::transmute::<*mut c_void, FreeFn>(lookup_next(c"free")?),
                calloc: mem::transmute::<*mut c_void, CallocFn>(lookup_next(c"calloc")?),
                realloc: mem::transmute::<*mut c_void, ReallocFn>(lookup_next(c"realloc")?),
            })
        }
    }

    /// [`NextProvider::resolve()`], but running without a real allocator is
    /// not an option, so failure aborts.
    fn resolve_or_abort() -> Self {
        match Self::resolve() {
            Ok(provider) => {
                verboseln!("bound the real allocator");
                provider
            }
            Err(err) => {
                putln!("heapstat: ", err);
                fatal("cannot run without the real allocator")
            }
        }
    }

    /// Address of the resolved `malloc()`, mostly useful to check that every
    /// thread sees the same binding
    pub fn malloc_addr(&self) -> usize {
        self.malloc as usize
    }
}

// SAFETY: these are the platform's own allocation functions
unsafe impl AllocProvider for NextProvider {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        (self.malloc)(size)
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        (self.free)(ptr)
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        (self.calloc)(count, size)
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        (self.realloc)(ptr, size)
    }
}

/// The process-wide binding. Uninit until the first intercepted call, bound
/// forever after.
pub static PROVIDER: LazyLock<NextProvider, fn() -> NextProvider> =
    LazyLock::new(NextProvider::resolve_or_abort);

/// What an entry point should do about the real allocator right now
#[derive(Clone, Copy, Debug)]
pub enum Binding {
    Bound(&'static NextProvider),
    /// This thread is inside `dlsym()` resolving the provider, so the request
    /// has to come from the bootstrap arena
    Bootstrapping,
}

/// Bind if needed. After the first success this is one acquire load. Threads
/// arriving while another thread is binding wait for it to finish.
#[inline]
pub fn bind() -> Binding {
    if let Some(provider) = LazyLock::get(&PROVIDER) {
        return Binding::Bound(provider);
    }
    if LazyLock::is_initializing_here(&PROVIDER) {
        return Binding::Bootstrapping;
    }
    Binding::Bound(PROVIDER.initialize())
}
