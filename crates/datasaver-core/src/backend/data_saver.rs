//! Data saver backend implementation

use std::cell::RefCell;
use std::future::poll_fn;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use super::dispatch::{AuthorityEvent, event_channel};
use super::listener::{DataSaverListener, ListenerHandle, ListenerRegistry};
use super::policy_cache::{PolicyCache, PolicyList};
use crate::authority::PolicyAuthority;
use crate::error::CoreError;
use crate::policy::{Uid, UidPolicy};

/// Counter incremented each time an app is whitelisted, labelled by package
pub const WHITELIST_ACTIONS_METRIC: &str = "datasaver_whitelist_actions_total";
/// Counter incremented each time an app is blacklisted, labelled by package
pub const BLACKLIST_ACTIONS_METRIC: &str = "datasaver_blacklist_actions_total";
/// Counter of authority events applied to the cache
pub const EVENTS_HANDLED_METRIC: &str = "datasaver_events_handled_total";

/// Cache of background data policies backed by a [`PolicyAuthority`].
///
/// The backend lives on a single owning thread. Authority callbacks may
/// arrive on any thread; they are queued and only applied when the owner
/// calls [`DataSaverBackend::dispatch_pending`] or
/// [`DataSaverBackend::handle_event`].
pub struct DataSaverBackend {
    authority: Arc<dyn PolicyAuthority>,
    cache: RefCell<PolicyCache>,
    listeners: Rc<RefCell<ListenerRegistry>>,
    events: RefCell<UnboundedReceiver<AuthorityEvent>>,
}

impl DataSaverBackend {
    /// Create a backend. Nothing is read from the authority until needed.
    pub fn new(authority: Arc<dyn PolicyAuthority>) -> Self {
        let (forwarder, events) = event_channel();
        let listeners = ListenerRegistry::new(authority.clone(), forwarder);

        Self {
            authority,
            cache: RefCell::new(PolicyCache::default()),
            listeners: Rc::new(RefCell::new(listeners)),
            events: RefCell::new(events),
        }
    }

    /// Current data saver state, always read from the authority
    pub fn is_data_saver_enabled(&self) -> Result<bool, CoreError> {
        Ok(self.authority.restrict_background()?)
    }

    pub fn set_data_saver_enabled(&self, enabled: bool) -> Result<(), CoreError> {
        info!("Setting data saver {}", if enabled { "on" } else { "off" });
        self.authority.set_restrict_background(enabled)?;
        Ok(())
    }

    pub fn is_whitelisted(&self, uid: Uid) -> Result<bool, CoreError> {
        self.ensure_loaded(PolicyList::Whitelist)?;
        Ok(self.cache.borrow().contains(uid, PolicyList::Whitelist))
    }

    pub fn is_blacklisted(&self, uid: Uid) -> Result<bool, CoreError> {
        self.ensure_loaded(PolicyList::Blacklist)?;
        Ok(self.cache.borrow().contains(uid, PolicyList::Blacklist))
    }

    /// Allow or stop allowing `uid` to use metered data in the background.
    ///
    /// The cached blacklist entry of `uid` is left as is; callers clear it
    /// with [`DataSaverBackend::set_is_blacklisted`] when needed.
    pub fn set_is_whitelisted(
        &self,
        uid: Uid,
        package_name: &str,
        whitelisted: bool,
    ) -> Result<(), CoreError> {
        self.set_listed(uid, package_name, PolicyList::Whitelist, whitelisted)
    }

    /// Reject or stop rejecting metered background data for `uid`.
    ///
    /// The cached whitelist entry of `uid` is left as is.
    pub fn set_is_blacklisted(
        &self,
        uid: Uid,
        package_name: &str,
        blacklisted: bool,
    ) -> Result<(), CoreError> {
        self.set_listed(uid, package_name, PolicyList::Blacklist, blacklisted)
    }

    pub fn whitelisted_count(&self) -> Result<usize, CoreError> {
        self.ensure_loaded(PolicyList::Whitelist)?;
        Ok(self.cache.borrow().count(PolicyList::Whitelist))
    }

    pub fn blacklisted_count(&self) -> Result<usize, CoreError> {
        self.ensure_loaded(PolicyList::Blacklist)?;
        Ok(self.cache.borrow().count(PolicyList::Blacklist))
    }

    /// Whitelisted uids in ascending order
    pub fn whitelisted_uids(&self) -> Result<Vec<Uid>, CoreError> {
        self.ensure_loaded(PolicyList::Whitelist)?;
        Ok(self.cache.borrow().uids(PolicyList::Whitelist))
    }

    /// Blacklisted uids in ascending order
    pub fn blacklisted_uids(&self) -> Result<Vec<Uid>, CoreError> {
        self.ensure_loaded(PolicyList::Blacklist)?;
        Ok(self.cache.borrow().uids(PolicyList::Blacklist))
    }

    /// Re-read the whitelist from the authority, dropping stale entries
    pub fn refresh_whitelist(&self) -> Result<(), CoreError> {
        self.load(PolicyList::Whitelist)
    }

    /// Re-read the blacklist from the authority, dropping stale entries
    pub fn refresh_blacklist(&self) -> Result<(), CoreError> {
        self.load(PolicyList::Blacklist)
    }

    /// Register a listener.
    ///
    /// The first listener subscribes the backend to authority events. The
    /// new listener immediately receives the current data saver state.
    pub fn add_listener(
        &self,
        listener: Rc<dyn DataSaverListener>,
    ) -> Result<ListenerHandle, CoreError> {
        let id = self.listeners.borrow_mut().add(listener.clone())?;
        let handle = ListenerHandle::new(id, Rc::downgrade(&self.listeners));

        let enabled = self.is_data_saver_enabled()?;
        listener.on_data_saver_changed(enabled);
        Ok(handle)
    }

    /// Unregister a listener; the last one unsubscribes from the authority
    pub fn remove_listener(&self, handle: ListenerHandle) -> Result<(), CoreError> {
        handle.remove()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Whether the backend currently receives authority events
    pub fn is_subscribed(&self) -> bool {
        self.listeners.borrow().is_subscribed()
    }

    /// Apply every queued authority event. Returns how many were handled.
    pub fn dispatch_pending(&self) -> Result<usize, CoreError> {
        let mut handled = 0;
        loop {
            let next = self.events.borrow_mut().try_recv();
            let Ok(event) = next else {
                break;
            };
            self.handle_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Wait for the next queued authority event without applying it
    pub async fn next_event(&self) -> Option<AuthorityEvent> {
        poll_fn(|cx| self.events.borrow_mut().poll_recv(cx)).await
    }

    /// Apply one authority event and notify listeners of real transitions
    pub fn handle_event(&self, event: AuthorityEvent) -> Result<(), CoreError> {
        debug!("Handling authority event {:?}", event);
        metrics::counter!(EVENTS_HANDLED_METRIC).increment(1);

        match event {
            AuthorityEvent::RestrictBackgroundChanged(enabled) => {
                let listeners = self.listeners.borrow().snapshot();
                for listener in listeners {
                    listener.on_data_saver_changed(enabled);
                }
            }
            AuthorityEvent::UidPoliciesChanged { uid, policy } => {
                self.handle_uid_policies_changed(uid, policy)?;
            }
        }
        Ok(())
    }

    fn handle_uid_policies_changed(&self, uid: Uid, policy: UidPolicy) -> Result<(), CoreError> {
        self.ensure_loaded(PolicyList::Whitelist)?;
        self.ensure_loaded(PolicyList::Blacklist)?;

        let new_policy = policy.tracked();
        let old_policy = self.cache.borrow_mut().replace(uid, new_policy);

        let was_whitelisted = old_policy.contains(UidPolicy::ALLOW_METERED_BACKGROUND);
        let is_whitelisted = new_policy.contains(UidPolicy::ALLOW_METERED_BACKGROUND);
        let was_blacklisted = old_policy.contains(UidPolicy::REJECT_METERED_BACKGROUND);
        let is_blacklisted = new_policy.contains(UidPolicy::REJECT_METERED_BACKGROUND);

        if was_whitelisted == is_whitelisted && was_blacklisted == is_blacklisted {
            return Ok(());
        }

        let listeners = self.listeners.borrow().snapshot();
        if was_whitelisted != is_whitelisted {
            for listener in &listeners {
                listener.on_whitelist_status_changed(uid, is_whitelisted);
            }
        }
        if was_blacklisted != is_blacklisted {
            for listener in &listeners {
                listener.on_blacklist_status_changed(uid, is_blacklisted);
            }
        }
        Ok(())
    }

    fn set_listed(
        &self,
        uid: Uid,
        package_name: &str,
        list: PolicyList,
        listed: bool,
    ) -> Result<(), CoreError> {
        if listed {
            self.authority.add_uid_policy(uid, list.policy())?;
        } else {
            self.authority.remove_uid_policy(uid, list.policy())?;
        }
        self.cache.borrow_mut().set(uid, list, listed);

        if listed {
            info!("Added {} (uid {}) to the {}", package_name, uid, list);
            let metric = match list {
                PolicyList::Whitelist => WHITELIST_ACTIONS_METRIC,
                PolicyList::Blacklist => BLACKLIST_ACTIONS_METRIC,
            };
            metrics::counter!(metric, "package" => package_name.to_string()).increment(1);
        } else {
            info!("Removed {} (uid {}) from the {}", package_name, uid, list);
        }
        Ok(())
    }

    fn ensure_loaded(&self, list: PolicyList) -> Result<(), CoreError> {
        if self.cache.borrow().is_loaded(list) {
            return Ok(());
        }
        self.load(list)
    }

    fn load(&self, list: PolicyList) -> Result<(), CoreError> {
        let uids = self.authority.uids_with_policy(list.policy())?;
        debug!("Loaded {} uids into the {}", uids.len(), list);
        self.cache.borrow_mut().load(list, uids);
        Ok(())
    }
}
