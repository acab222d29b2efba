//! Everything between an intercepted call and the real allocator.

pub mod bootstrap;
pub mod guard;
pub mod ledger;
pub mod provider;
pub mod shim;
