use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ops::Deref,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use crate::util::hint::cold;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LazyLockState {
    /// Signifies this lock is uninitialized
    Uninit,
    /// Signifies this lock is mid initialization. The initializing thread can
    /// see this from inside the initializer, which is the whole point.
    Initializing,
    /// Signifies this lock is initialized
    Init,
}

impl LazyLockState {
    const fn from_u8(state: u8) -> Self {
        match state {
            0 => Self::Uninit,
            1 => Self::Initializing,
            _ => Self::Init,
        }
    }
}

/// A unique, non-zero token for the calling thread. It is the address of a
/// thread-local, so it costs no allocation and no syscall.
pub(crate) fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN.with(|token| token as *const u8 as usize)
}

/// A LazyLock that let's you poll its initialization state (including mid-init)
/// and ask whether *this* thread is the one running the initializer.
///
/// Every thread that calls [`LazyLock::initialize()`] while another is running
/// the initializer blocks until it is done, and then observes the same value.
/// The initializer runs exactly once.
pub struct LazyLock<T, F> {
    cell: UnsafeCell<MaybeUninit<T>>,
    lock: Mutex<()>,
    state: AtomicU8,
    /// [`thread_token()`] of the initializing thread, `0` otherwise
    initializer: AtomicUsize,
    init: F,
}

// SAFETY: the cell is written once, by one thread, under `lock`, and only read
// after `state` is observed as `Init` with acquire ordering
unsafe impl<T, F> Sync for LazyLock<T, F>
where
    T: Send + Sync,
    F: Sync,
{
}

impl<T, F> LazyLock<T, F>
where
    F: Fn() -> T,
{
    pub const fn new(init: F) -> Self {
        Self {
            cell: UnsafeCell::new(MaybeUninit::uninit()),
            lock: Mutex::new(()),
            state: AtomicU8::new(LazyLockState::Uninit as u8),
            initializer: AtomicUsize::new(0),
            init,
        }
    }

    pub fn state(lock: &Self) -> LazyLockState {
        LazyLockState::from_u8(lock.state.load(Ordering::Acquire))
    }

    /// `true` if the calling thread is currently inside this lock's
    /// initializer. Calling [`LazyLock::initialize()`] in that situation would
    /// deadlock, so callers check this first.
    pub fn is_initializing_here(lock: &Self) -> bool {
        LazyLock::state(lock) == LazyLockState::Initializing
            && lock.initializer.load(Ordering::Acquire) == thread_token()
    }

    /// The value, if initialization has finished
    pub fn get(lock: &Self) -> Option<&T> {
        if LazyLock::state(lock) == LazyLockState::Init {
            // SAFETY: `Init` is only stored after the cell has been written
            Some(unsafe { lock.assume_init() })
        } else {
            None
        }
    }

    /// # Safety
    ///
    /// The state must be [`LazyLockState::Init`]
    pub unsafe fn assume_init(&self) -> &T {
        // This borrow is not needless
        #[allow(clippy::needless_borrow)]
        (&*self.cell.get()).assume_init_ref()
    }

    pub fn initialize(&self) -> &T {
        if LazyLock::state(self) != LazyLockState::Init {
            cold(|| {
                // The initializer never unwinds through here in practice, but if
                // it did the cell is still uninit and retrying is correct
                let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
                // Somebody else may have finished while we were waiting
                if LazyLock::state(self) == LazyLockState::Init {
                    return;
                }
                self.initializer.store(thread_token(), Ordering::Release);
                self.state
                    .store(LazyLockState::Initializing as u8, Ordering::Release);
                let value = (self.init)();
                // SAFETY: we hold `lock` and the state is not `Init`, so nobody
                // else reads or writes the cell
                unsafe { *self.cell.get() = MaybeUninit::new(value) };
                self.state.store(LazyLockState::Init as u8, Ordering::Release);
                self.initializer.store(0, Ordering::Release);
            })
        }
        // SAFETY: either we observed `Init`, or we just stored it (or saw it
        // under the lock)
        unsafe { self.assume_init() }
    }
}

impl<T, F> Deref for LazyLock<T, F>
where
    F: Fn() -> T,
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.initialize()
    }
}
