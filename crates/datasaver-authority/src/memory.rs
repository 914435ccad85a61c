//! In-memory policy authority

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use datasaver_core::{AuthorityError, CallbackId, PolicyAuthority, PolicyCallback, Uid, UidPolicy};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Complete authority state at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub restrict_background: bool,
    pub uid_policies: BTreeMap<Uid, UidPolicy>,
}

/// State differences that have been committed but not yet announced
#[must_use = "pending changes must be delivered to subscribers"]
pub(crate) struct PendingChanges {
    restrict_background: Option<bool>,
    uid_policies: Vec<(Uid, UidPolicy)>,
}

/// Policy authority held entirely in memory.
///
/// Allow and reject are mutually exclusive: adding one clears the other.
/// Subscribers are notified on the calling thread, after the state lock is
/// released, and only when a stored value actually changes.
pub struct MemoryAuthority {
    state: RwLock<PolicySnapshot>,
    callbacks: RwLock<HashMap<CallbackId, Arc<dyn PolicyCallback>>>,
    next_callback: AtomicU64,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::with_snapshot(PolicySnapshot::default())
    }

    pub fn with_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            callbacks: RwLock::new(HashMap::new()),
            next_callback: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        self.state.read().clone()
    }

    /// Replace the whole state, notifying subscribers of every difference.
    /// Returns the number of notifications sent.
    pub fn restore(&self, snapshot: PolicySnapshot) -> usize {
        let pending = self.swap(snapshot);
        self.deliver(pending)
    }

    /// Replace the whole state without notifying anyone yet
    pub(crate) fn swap(&self, snapshot: PolicySnapshot) -> PendingChanges {
        let mut state = self.state.write();
        let restrict_background = (state.restrict_background != snapshot.restrict_background)
            .then_some(snapshot.restrict_background);

        let uids: BTreeSet<Uid> = state
            .uid_policies
            .keys()
            .chain(snapshot.uid_policies.keys())
            .copied()
            .collect();
        let uid_policies = uids
            .into_iter()
            .filter_map(|uid| {
                let old = state.uid_policies.get(&uid).copied().unwrap_or_default();
                let new = snapshot.uid_policies.get(&uid).copied().unwrap_or_default();
                (old != new).then_some((uid, new))
            })
            .collect();

        *state = snapshot;
        state.uid_policies.retain(|_, policy| !policy.is_none());
        PendingChanges {
            restrict_background,
            uid_policies,
        }
    }

    /// Notify subscribers of changes produced by [`MemoryAuthority::swap`].
    /// Must be called with no lock held.
    pub(crate) fn deliver(&self, pending: PendingChanges) -> usize {
        let mut sent = 0;
        if let Some(enabled) = pending.restrict_background {
            self.notify_restrict_background(enabled);
            sent += 1;
        }
        for (uid, policy) in pending.uid_policies {
            self.notify_uid_policy(uid, policy);
            sent += 1;
        }
        sent
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Apply `f` to the policy of `uid`. Returns the new policy if it changed.
    fn update(&self, uid: Uid, f: impl FnOnce(UidPolicy) -> UidPolicy) -> Option<UidPolicy> {
        let changed = {
            let mut state = self.state.write();
            let old = state.uid_policies.get(&uid).copied().unwrap_or_default();
            let new = f(old);
            if new.is_none() {
                state.uid_policies.remove(&uid);
            } else {
                state.uid_policies.insert(uid, new);
            }
            (old != new).then_some(new)
        };

        if let Some(policy) = changed {
            debug!("Policy of uid {} is now {}", uid, policy);
            self.notify_uid_policy(uid, policy);
        }
        changed
    }

    fn subscribers(&self) -> Vec<Arc<dyn PolicyCallback>> {
        self.callbacks.read().values().cloned().collect()
    }

    fn notify_uid_policy(&self, uid: Uid, policy: UidPolicy) {
        for callback in self.subscribers() {
            callback.on_uid_policies_changed(uid, policy);
        }
    }

    fn notify_restrict_background(&self, enabled: bool) {
        for callback in self.subscribers() {
            callback.on_restrict_background_changed(enabled);
        }
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyAuthority for MemoryAuthority {
    fn restrict_background(&self) -> Result<bool, AuthorityError> {
        Ok(self.state.read().restrict_background)
    }

    fn set_restrict_background(&self, enabled: bool) -> Result<(), AuthorityError> {
        let changed = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.restrict_background, enabled) != enabled
        };
        if changed {
            debug!("Restrict background is now {}", enabled);
            self.notify_restrict_background(enabled);
        }
        Ok(())
    }

    fn uids_with_policy(&self, policy: UidPolicy) -> Result<Vec<Uid>, AuthorityError> {
        Ok(self
            .state
            .read()
            .uid_policies
            .iter()
            .filter(|(_, p)| p.contains(policy))
            .map(|(uid, _)| *uid)
            .collect())
    }

    fn uid_policy(&self, uid: Uid) -> Result<UidPolicy, AuthorityError> {
        Ok(self
            .state
            .read()
            .uid_policies
            .get(&uid)
            .copied()
            .unwrap_or_default())
    }

    fn add_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError> {
        if policy.contains(UidPolicy::TRACKED) {
            warn!("Rejecting allow and reject together for uid {}", uid);
            return Err(AuthorityError::ConflictingPolicy(uid));
        }
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
        let id = CallbackId::new(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(id, callback);
        debug!("Registered policy callback {}", id);
        Ok(id)
    }

    fn unregister_listener(&self, id: CallbackId) -> Result<(), AuthorityError> {
        match self.callbacks.write().remove(&id) {
            Some(_) => {
                debug!("Unregistered policy callback {}", id);
                Ok(())
            }
            None => Err(AuthorityError::UnknownCallback(id)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use datasaver_core::{DataSaverBackend, DataSaverListener};
    use parking_lot::Mutex;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Seen {
        Uid(Uid, UidPolicy),
        Restrict(bool),
    }

    #[derive(Default)]
    pub(crate) struct RecordingCallback {
        pub(crate) seen: Mutex<Vec<Seen>>,
    }

    impl RecordingCallback {
        pub(crate) fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut *self.seen.lock())
        }
    }

    impl PolicyCallback for RecordingCallback {
        fn on_uid_policies_changed(&self, uid: Uid, policy: UidPolicy) {
            self.seen.lock().push(Seen::Uid(uid, policy));
        }

        fn on_restrict_background_changed(&self, enabled: bool) {
            self.seen.lock().push(Seen::Restrict(enabled));
        }
    }

    #[derive(Default)]
    struct ListLog {
        entries: RefCell<Vec<String>>,
    }

    impl DataSaverListener for ListLog {
        fn on_data_saver_changed(&self, enabled: bool) {
            self.entries.borrow_mut().push(format!("data_saver={}", enabled));
        }

        fn on_whitelist_status_changed(&self, uid: Uid, whitelisted: bool) {
            self.entries.borrow_mut().push(format!("whitelist {}={}", uid, whitelisted));
        }

        fn on_blacklist_status_changed(&self, uid: Uid, blacklisted: bool) {
            self.entries.borrow_mut().push(format!("blacklist {}={}", uid, blacklisted));
        }
    }

    fn subscribed() -> (MemoryAuthority, Arc<RecordingCallback>) {
        let authority = MemoryAuthority::new();
        let callback = Arc::new(RecordingCallback::default());
        authority.register_listener(callback.clone()).unwrap();
        (authority, callback)
    }

    #[test]
    fn test_allow_and_reject_are_exclusive() {
        let (authority, callback) = subscribed();
        let uid = Uid(10);

        authority.add_uid_policy(uid, UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.add_uid_policy(uid, UidPolicy::REJECT_METERED_BACKGROUND).unwrap();

        assert_eq!(authority.uid_policy(uid).unwrap(), UidPolicy::REJECT_METERED_BACKGROUND);
        assert!(authority
            .uids_with_policy(UidPolicy::ALLOW_METERED_BACKGROUND)
            .unwrap()
            .is_empty());
        assert_eq!(
            callback.take(),
            vec![
                Seen::Uid(uid, UidPolicy::ALLOW_METERED_BACKGROUND),
                Seen::Uid(uid, UidPolicy::REJECT_METERED_BACKGROUND),
            ]
        );
    }

    #[test]
    fn test_foreign_bits_survive() {
        let (authority, _callback) = subscribed();
        let uid = Uid(11);
        let foreign = UidPolicy::from_bits(0x100);

        authority.add_uid_policy(uid, foreign).unwrap();
        authority.add_uid_policy(uid, UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.remove_uid_policy(uid, UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();

        assert_eq!(authority.uid_policy(uid).unwrap(), foreign);
    }

    #[test]
    fn test_conflicting_policy_rejected() {
        let (authority, callback) = subscribed();
        let result = authority.add_uid_policy(Uid(1), UidPolicy::TRACKED);

        assert!(matches!(result, Err(AuthorityError::ConflictingPolicy(Uid(1)))));
        assert!(callback.take().is_empty());
    }

    #[test]
    fn test_redundant_writes_are_silent() {
        let (authority, callback) = subscribed();

        authority.set_restrict_background(false).unwrap();
        authority.remove_uid_policy(Uid(3), UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.add_uid_policy(Uid(3), UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.add_uid_policy(Uid(3), UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.set_restrict_background(true).unwrap();
        authority.set_restrict_background(true).unwrap();

        assert_eq!(
            callback.take(),
            vec![
                Seen::Uid(Uid(3), UidPolicy::ALLOW_METERED_BACKGROUND),
                Seen::Restrict(true),
            ]
        );
    }

    #[test]
    fn test_unregister_stops_callbacks() {
        let authority = MemoryAuthority::new();
        let callback = Arc::new(RecordingCallback::default());
        let id = authority.register_listener(callback.clone()).unwrap();

        authority.unregister_listener(id).unwrap();
        authority.set_restrict_background(true).unwrap();

        assert!(callback.take().is_empty());
        assert_eq!(authority.callback_count(), 0);
        assert!(matches!(
            authority.unregister_listener(id),
            Err(AuthorityError::UnknownCallback(_))
        ));
    }

    #[test]
    fn test_restore_notifies_differences() {
        let (authority, callback) = subscribed();
        authority.add_uid_policy(Uid(1), UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        authority.add_uid_policy(Uid(2), UidPolicy::REJECT_METERED_BACKGROUND).unwrap();
        callback.take();

        let mut next = authority.snapshot();
        next.restrict_background = true;
        next.uid_policies.remove(&Uid(1));
        next.uid_policies.insert(Uid(4), UidPolicy::REJECT_METERED_BACKGROUND);

        assert_eq!(authority.restore(next.clone()), 3);
        assert_eq!(authority.snapshot(), next);
        assert_eq!(
            callback.take(),
            vec![
                Seen::Restrict(true),
                Seen::Uid(Uid(1), UidPolicy::NONE),
                Seen::Uid(Uid(4), UidPolicy::REJECT_METERED_BACKGROUND),
            ]
        );

        assert_eq!(authority.restore(next), 0);
    }

    #[test]
    fn test_backend_over_memory_authority() {
        let authority = Arc::new(MemoryAuthority::new());
        let backend = DataSaverBackend::new(authority.clone());
        let log = Rc::new(ListLog::default());
        let handle = backend.add_listener(log.clone()).unwrap();
        assert_eq!(backend.whitelisted_count().unwrap(), 0);
        assert_eq!(backend.blacklisted_count().unwrap(), 0);

        let remote = authority.clone();
        std::thread::spawn(move || {
            remote.set_restrict_background(true).unwrap();
            remote.add_uid_policy(Uid(1000), UidPolicy::ALLOW_METERED_BACKGROUND).unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(backend.dispatch_pending().unwrap(), 2);
        assert_eq!(
            *log.entries.borrow(),
            vec!["data_saver=false", "data_saver=true", "whitelist 1000=true"]
        );
        assert!(backend.is_whitelisted(Uid(1000)).unwrap());

        backend.remove_listener(handle).unwrap();
        assert_eq!(authority.callback_count(), 0);
    }
}
