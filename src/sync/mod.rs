pub mod futex_lock;
