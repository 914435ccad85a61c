//! Listener registration and authority subscription

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::dispatch::EventForwarder;
use crate::authority::{CallbackId, PolicyAuthority};
use crate::error::CoreError;
use crate::policy::Uid;

/// Observer of data saver state, typically a settings screen.
///
/// Callbacks run on the thread that owns the [`super::DataSaverBackend`].
pub trait DataSaverListener {
    fn on_data_saver_changed(&self, enabled: bool);

    fn on_whitelist_status_changed(&self, uid: Uid, whitelisted: bool);

    fn on_blacklist_status_changed(&self, uid: Uid, blacklisted: bool);
}

/// Registered listeners plus the authority subscription they keep alive.
///
/// The authority is subscribed while at least one listener is registered.
pub(crate) struct ListenerRegistry {
    authority: Arc<dyn PolicyAuthority>,
    forwarder: Arc<EventForwarder>,
    entries: Vec<(u64, Rc<dyn DataSaverListener>)>,
    next_id: u64,
    subscription: Option<CallbackId>,
}

impl ListenerRegistry {
    pub(crate) fn new(authority: Arc<dyn PolicyAuthority>, forwarder: EventForwarder) -> Self {
        Self {
            authority,
            forwarder: Arc::new(forwarder),
            entries: Vec::new(),
            next_id: 0,
            subscription: None,
        }
    }

    pub(crate) fn add(&mut self, listener: Rc<dyn DataSaverListener>) -> Result<u64, CoreError> {
        if self.entries.is_empty() && self.subscription.is_none() {
            let id = self.authority.register_listener(self.forwarder.clone())?;
            info!("Subscribed to policy authority ({})", id);
            self.subscription = Some(id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        debug!("Added data saver listener {} ({} registered)", id, self.entries.len());
        Ok(id)
    }

    /// Unregister `id`, handing the listener back to the caller.
    ///
    /// The returned listener must be dropped after the registry borrow is
    /// released, since it may own handles of its own.
    pub(crate) fn remove(
        &mut self,
        id: u64,
    ) -> (Option<Rc<dyn DataSaverListener>>, Result<(), CoreError>) {
        let Some(index) = self.entries.iter().position(|(entry_id, _)| *entry_id == id) else {
            return (None, Ok(()));
        };
        let (_, listener) = self.entries.remove(index);
        debug!("Removed data saver listener {} ({} registered)", id, self.entries.len());

        let result = if self.entries.is_empty() {
            self.unsubscribe()
        } else {
            Ok(())
        };
        (Some(listener), result)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Clone out the listeners so callbacks run without the registry borrowed
    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn DataSaverListener>> {
        self.entries.iter().map(|(_, l)| l.clone()).collect()
    }

    fn unsubscribe(&mut self) -> Result<(), CoreError> {
        if let Some(id) = self.subscription.take() {
            self.authority.unregister_listener(id)?;
            info!("Unsubscribed from policy authority ({})", id);
        }
        Ok(())
    }
}

impl Drop for ListenerRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.unsubscribe() {
            warn!("Failed to unsubscribe from policy authority: {}", e);
        }
        // Handles owned by these listeners can no longer upgrade the registry
        drop(std::mem::take(&mut self.entries));
    }
}

/// Keeps a listener registered until dropped or explicitly removed.
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    registry: Option<Weak<RefCell<ListenerRegistry>>>,
}

impl ListenerHandle {
    pub(crate) fn new(id: u64, registry: Weak<RefCell<ListenerRegistry>>) -> Self {
        Self {
            id,
            registry: Some(registry),
        }
    }

    /// Unregister now, reporting any authority error
    pub fn remove(mut self) -> Result<(), CoreError> {
        self.detach()
    }

    fn detach(&mut self) -> Result<(), CoreError> {
        let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) else {
            return Ok(());
        };
        let (removed, result) = registry.borrow_mut().remove(self.id);
        drop(removed);
        result
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!("Failed to remove data saver listener {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("attached", &self.registry.is_some())
            .finish()
    }
}
