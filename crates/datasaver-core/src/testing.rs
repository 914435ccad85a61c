//! Test doubles for the policy authority and listeners

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::authority::{CallbackId, PolicyAuthority, PolicyCallback};
use crate::backend::DataSaverListener;
use crate::error::AuthorityError;
use crate::policy::{Uid, UidPolicy};

#[derive(Default)]
struct FakeState {
    restrict_background: bool,
    policies: HashMap<Uid, UidPolicy>,
    callbacks: HashMap<CallbackId, Arc<dyn PolicyCallback>>,
    next_callback: u64,
    queries: HashMap<u32, usize>,
    register_calls: usize,
    fail_next_query: bool,
}

/// In-process authority that counts queries and emits callbacks synchronously
#[derive(Default)]
pub(crate) struct FakeAuthority {
    state: Mutex<FakeState>,
}

impl FakeAuthority {
    /// Set a uid's policy without emitting any event
    pub(crate) fn seed(&self, uid: Uid, policy: UidPolicy) {
        let mut state = self.state.lock();
        if policy.is_none() {
            state.policies.remove(&uid);
        } else {
            state.policies.insert(uid, policy);
        }
    }

    pub(crate) fn policy_of(&self, uid: Uid) -> UidPolicy {
        self.state.lock().policies.get(&uid).copied().unwrap_or_default()
    }

    pub(crate) fn query_count(&self, policy: UidPolicy) -> usize {
        self.state.lock().queries.get(&policy.bits()).copied().unwrap_or(0)
    }

    pub(crate) fn registered_callbacks(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    pub(crate) fn register_calls(&self) -> usize {
        self.state.lock().register_calls
    }

    /// Make the next read fail with an IO error
    pub(crate) fn fail_next(&self) {
        self.state.lock().fail_next_query = true;
    }

    /// Deliver a policy change to subscribers without touching the state
    pub(crate) fn emit_uid_policy(&self, uid: Uid, policy: UidPolicy) {
        for callback in self.callbacks() {
            callback.on_uid_policies_changed(uid, policy);
        }
    }

    fn callbacks(&self) -> Vec<Arc<dyn PolicyCallback>> {
        self.state.lock().callbacks.values().cloned().collect()
    }

    fn check_query(&self) -> Result<(), AuthorityError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_query) {
            return Err(AuthorityError::Io(std::io::Error::other("injected failure")));
        }
        Ok(())
    }

    fn update(&self, uid: Uid, f: impl FnOnce(UidPolicy) -> UidPolicy) {
        let changed = {
            let mut state = self.state.lock();
            let old = state.policies.get(&uid).copied().unwrap_or_default();
            let new = f(old);
            if new.is_none() {
                state.policies.remove(&uid);
            } else {
                state.policies.insert(uid, new);
            }
            (old != new).then_some(new)
        };
        if let Some(policy) = changed {
            self.emit_uid_policy(uid, policy);
        }
    }
}

impl PolicyAuthority for FakeAuthority {
    fn restrict_background(&self) -> Result<bool, AuthorityError> {
        self.check_query()?;
        Ok(self.state.lock().restrict_background)
    }

    fn set_restrict_background(&self, enabled: bool) -> Result<(), AuthorityError> {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.restrict_background != enabled;
            state.restrict_background = enabled;
            changed
        };
        if changed {
            for callback in self.callbacks() {
                callback.on_restrict_background_changed(enabled);
            }
        }
        Ok(())
    }

    fn uids_with_policy(&self, policy: UidPolicy) -> Result<Vec<Uid>, AuthorityError> {
        self.check_query()?;
        let mut state = self.state.lock();
        *state.queries.entry(policy.bits()).or_default() += 1;
        Ok(state
            .policies
            .iter()
            .filter(|(_, p)| p.contains(policy))
            .map(|(uid, _)| *uid)
            .collect())
    }

    fn uid_policy(&self, uid: Uid) -> Result<UidPolicy, AuthorityError> {
        self.check_query()?;
        Ok(self.policy_of(uid))
    }

    fn add_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError> {
        self.update(uid, |old| old.without(policy.exclusive_with()).with(policy));
        Ok(())
    }

    fn remove_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError> {
        self.update(uid, |old| old.without(policy));
        Ok(())
    }

    fn register_listener(
        &self,
        callback: Arc<dyn PolicyCallback>,
    ) -> Result<CallbackId, AuthorityError> {
        let mut state = self.state.lock();
        state.register_calls += 1;
        state.next_callback += 1;
        let id = CallbackId::new(state.next_callback);
        state.callbacks.insert(id, callback);
        Ok(id)
    }

    fn unregister_listener(&self, id: CallbackId) -> Result<(), AuthorityError> {
        self.state
            .lock()
            .callbacks
            .remove(&id)
            .map(|_| ())
            .ok_or(AuthorityError::UnknownCallback(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    DataSaver(bool),
    Whitelist(Uid, bool),
    Blacklist(Uid, bool),
}

/// Listener that records every callback in order
#[derive(Default)]
pub(crate) struct RecordingListener {
    seen: RefCell<Vec<Notification>>,
}

impl RecordingListener {
    pub(crate) fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.seen.borrow_mut())
    }
}

impl DataSaverListener for RecordingListener {
    fn on_data_saver_changed(&self, enabled: bool) {
        self.seen.borrow_mut().push(Notification::DataSaver(enabled));
    }

    fn on_whitelist_status_changed(&self, uid: Uid, whitelisted: bool) {
        self.seen.borrow_mut().push(Notification::Whitelist(uid, whitelisted));
    }

    fn on_blacklist_status_changed(&self, uid: Uid, blacklisted: bool) {
        self.seen.borrow_mut().push(Notification::Blacklist(uid, blacklisted));
    }
}
