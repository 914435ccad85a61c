//! Data Saver Policy Authorities
//!
//! This crate provides concrete [`datasaver_core::PolicyAuthority`]
//! implementations: an in-memory one and one persisted to a JSON file.

pub mod file;
pub mod memory;
pub mod store;

pub use file::{FileAuthority, spawn_watcher};
pub use memory::{MemoryAuthority, PolicySnapshot};
pub use store::PolicyStore;
