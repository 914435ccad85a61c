//! Metered network policy cache
//!
//! [`DataSaverBackend`] mirrors the authority's allow/reject lists, keeps the
//! mirror current from authority events and fans changes out to
//! [`DataSaverListener`]s.

mod data_saver;
mod dispatch;
mod listener;
mod policy_cache;

pub use data_saver::{
    BLACKLIST_ACTIONS_METRIC, DataSaverBackend, EVENTS_HANDLED_METRIC, WHITELIST_ACTIONS_METRIC,
};
pub use dispatch::AuthorityEvent;
pub use listener::{DataSaverListener, ListenerHandle};
