//! Per-thread suppression of allocation tracking.
//!
//! While a [`SuppressionScope`] is alive on a thread, everything that thread
//! allocates or frees (ledger nodes, report formatting, `localtime_r()`
//! internals...) is forwarded to the real allocator and not recorded. It also
//! stops that traffic from trying to take the ledger lock the thread already
//! holds.

use std::{cell::Cell, marker::PhantomData};

thread_local! {
    // `const` init with a `Copy` type: no lazy registration, no destructor, and
    // so no allocation when first touched from inside `malloc()`
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Proof that the current thread is inside engine code. Not `Send`: the flag
/// it clears on drop belongs to the thread that created it. Scopes do not
/// nest, so a plain flag is enough.
pub struct SuppressionScope {
    _not_send: PhantomData<*const ()>,
}

impl SuppressionScope {
    /// Enter engine code. Returns `None` if this thread is already inside
    /// (i.e. this call is the engine's own allocation traffic).
    pub fn enter() -> Option<Self> {
        ACTIVE.with(|active| {
            if active.replace(true) {
                None
            } else {
                Some(Self {
                    _not_send: PhantomData,
                })
            }
        })
    }

    /// `true` if the current thread is inside a scope
    pub fn is_active() -> bool {
        ACTIVE.with(Cell::get)
    }
}

impl Drop for SuppressionScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(false));
    }
}
