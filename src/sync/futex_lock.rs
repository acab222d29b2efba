//! A mutex built directly on a futex word. Unlike `std::sync::Mutex` this has
//! no poisoning and, more importantly for us, a guaranteed allocation-free
//! lock/unlock path, since it runs inside every intercepted `malloc()`.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::Ordering,
};

use linux_futex::{Futex, Private};

/// This futex represents a lock and is unlocked
const FUTEX_UNLOCKED: u32 = 0;

/// This futex represents a lock and is locked, with nobody waiting
const FUTEX_LOCKED: u32 = 1;

/// This futex represents a lock that is locked, and somebody may be sleeping on
/// it (so the unlocker has to wake someone)
const FUTEX_CONTENDED: u32 = 2;

pub struct FutexLock<T> {
    futex: Futex<Private>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only handed out through `FutexGuard`, and at most
// one guard exists at a time
unsafe impl<T> Sync for FutexLock<T> where T: Send {}
unsafe impl<T> Send for FutexLock<T> where T: Send {}

impl<T> FutexLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            futex: Futex::new(FUTEX_UNLOCKED),
            data: UnsafeCell::new(data),
        }
    }

    /// Block until we have exclusive access. Locking again from the same
    /// thread while the guard is alive deadlocks; the reentrancy guard is what
    /// keeps the allocator path from doing that.
    pub fn lock(&self) -> FutexGuard<'_, T> {
        if self
            .futex
            .value
            .compare_exchange(
                FUTEX_UNLOCKED,
                FUTEX_LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            self.lock_contended();
        }
        FutexGuard { lock: self }
    }

    #[cold]
    fn lock_contended(&self) {
        // Whoever we swapped out, we now leave `FUTEX_CONTENDED` behind, so the
        // eventual unlock always wakes somebody
        while self.futex.value.swap(FUTEX_CONTENDED, Ordering::Acquire) != FUTEX_UNLOCKED {
            // Spurious wakeups and `EAGAIN` both just mean "look again"
            _ = self.futex.wait(FUTEX_CONTENDED);
        }
    }

    fn unlock(&self) {
        if self.futex.value.swap(FUTEX_UNLOCKED, Ordering::Release) == FUTEX_CONTENDED {
            self.futex.wake(1);
        }
    }
}

/// RAII guard, releases the lock on drop
pub struct FutexGuard<'a, T> {
    lock: &'a FutexLock<T>,
}

impl<T> Deref for FutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock, and `&mut self` makes this borrow unique
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for FutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
