//! Policy authority trait
//!
//! The authority owns the real per-uid network policy state. The cache in
//! [`crate::backend`] only mirrors it.

use std::fmt;
use std::sync::Arc;

use crate::error::AuthorityError;
use crate::policy::{Uid, UidPolicy};

/// Identifies a callback registered with an authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub const fn new(id: u64) -> Self {
        CallbackId(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Change notifications emitted by an authority.
///
/// Calls may arrive on any thread.
pub trait PolicyCallback: Send + Sync {
    /// The full policy mask of `uid` changed to `policy`
    fn on_uid_policies_changed(&self, uid: Uid, policy: UidPolicy);

    /// The global restrict-background (data saver) toggle changed
    fn on_restrict_background_changed(&self, enabled: bool);
}

/// Policy authority trait
///
/// Implementations hold the authoritative policy state. Every call is
/// synchronous and expected to be cheap.
pub trait PolicyAuthority: Send + Sync {
    /// Whether data saver (restrict background) is on
    fn restrict_background(&self) -> Result<bool, AuthorityError>;

    /// Turn data saver on or off
    fn set_restrict_background(&self, enabled: bool) -> Result<(), AuthorityError>;

    /// All uids whose policy contains every bit of `policy`
    fn uids_with_policy(&self, policy: UidPolicy) -> Result<Vec<Uid>, AuthorityError>;

    /// Full policy mask of a single uid
    fn uid_policy(&self, uid: Uid) -> Result<UidPolicy, AuthorityError>;

    /// Set the bits of `policy` on `uid`
    fn add_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError>;

    /// Clear the bits of `policy` on `uid`
    fn remove_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError>;

    /// Subscribe to change notifications
    fn register_listener(
        &self,
        callback: Arc<dyn PolicyCallback>,
    ) -> Result<CallbackId, AuthorityError>;

    /// Cancel a subscription made with [`PolicyAuthority::register_listener`]
    fn unregister_listener(&self, id: CallbackId) -> Result<(), AuthorityError>;
}
