//! Data Saver Core
//!
//! This crate provides the metered network policy cache used by the data
//! saver settings, the policy authority abstraction it is hydrated from, and
//! the listener plumbing that fans policy changes out to observers.

pub mod authority;
pub mod backend;
pub mod error;
pub mod policy;

#[cfg(test)]
mod testing;

pub use authority::{CallbackId, PolicyAuthority, PolicyCallback};
pub use backend::{AuthorityEvent, DataSaverBackend, DataSaverListener, ListenerHandle};
pub use error::{AuthorityError, CoreError};
pub use policy::{ParsePolicyError, Policy, Uid, UidPolicy};
