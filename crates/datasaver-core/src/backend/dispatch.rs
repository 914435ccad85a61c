//! Redispatch of authority callbacks onto the owning thread

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::authority::PolicyCallback;
use crate::policy::{Uid, UidPolicy};

/// A change reported by the authority, queued for the owning thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityEvent {
    RestrictBackgroundChanged(bool),
    UidPoliciesChanged { uid: Uid, policy: UidPolicy },
}

/// Callback handed to the authority.
///
/// It never touches the cache; it only queues the event so the owner can
/// apply it from its own thread.
pub(crate) struct EventForwarder {
    tx: UnboundedSender<AuthorityEvent>,
}

impl EventForwarder {
    fn forward(&self, event: AuthorityEvent) {
        if self.tx.send(event).is_err() {
            debug!("Dropping {:?}, policy cache is gone", event);
        }
    }
}

impl PolicyCallback for EventForwarder {
    fn on_uid_policies_changed(&self, uid: Uid, policy: UidPolicy) {
        self.forward(AuthorityEvent::UidPoliciesChanged { uid, policy });
    }

    fn on_restrict_background_changed(&self, enabled: bool) {
        self.forward(AuthorityEvent::RestrictBackgroundChanged(enabled));
    }
}

pub(crate) fn event_channel() -> (EventForwarder, UnboundedReceiver<AuthorityEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventForwarder { tx }, rx)
}
