//! In-memory mirror of the authority's allow/reject lists

use std::collections::HashMap;
use std::fmt;

use crate::policy::{Uid, UidPolicy};

/// One of the two independently hydrated views of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PolicyList {
    /// Uids allowed to use metered data in the background
    Whitelist,
    /// Uids rejected from metered data in the background
    Blacklist,
}

impl PolicyList {
    pub(crate) fn policy(&self) -> UidPolicy {
        match self {
            PolicyList::Whitelist => UidPolicy::ALLOW_METERED_BACKGROUND,
            PolicyList::Blacklist => UidPolicy::REJECT_METERED_BACKGROUND,
        }
    }
}

impl fmt::Display for PolicyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyList::Whitelist => f.write_str("whitelist"),
            PolicyList::Blacklist => f.write_str("blacklist"),
        }
    }
}

/// Uid to tracked-policy map. A missing entry means `NONE`.
#[derive(Debug, Default)]
pub(crate) struct PolicyCache {
    policies: HashMap<Uid, UidPolicy>,
    whitelist_loaded: bool,
    blacklist_loaded: bool,
}

impl PolicyCache {
    pub(crate) fn is_loaded(&self, list: PolicyList) -> bool {
        match list {
            PolicyList::Whitelist => self.whitelist_loaded,
            PolicyList::Blacklist => self.blacklist_loaded,
        }
    }

    /// Replace one list with the authority's view.
    ///
    /// The list's bit is cleared everywhere first so uids dropped by the
    /// authority do not linger.
    pub(crate) fn load(&mut self, list: PolicyList, uids: impl IntoIterator<Item = Uid>) {
        let bit = list.policy();
        self.policies.retain(|_, policy| {
            *policy = policy.without(bit);
            !policy.is_none()
        });
        for uid in uids {
            self.set(uid, list, true);
        }
        match list {
            PolicyList::Whitelist => self.whitelist_loaded = true,
            PolicyList::Blacklist => self.blacklist_loaded = true,
        }
    }

    pub(crate) fn get(&self, uid: Uid) -> UidPolicy {
        self.policies.get(&uid).copied().unwrap_or_default()
    }

    pub(crate) fn contains(&self, uid: Uid, list: PolicyList) -> bool {
        self.get(uid).contains(list.policy())
    }

    /// Set or clear one list's bit for `uid`, leaving the other list alone
    pub(crate) fn set(&mut self, uid: Uid, list: PolicyList, on: bool) {
        let current = self.get(uid);
        let updated = if on {
            current.with(list.policy())
        } else {
            current.without(list.policy())
        };
        self.store(uid, updated);
    }

    /// Overwrite the tracked policy of `uid`, returning the previous one
    pub(crate) fn replace(&mut self, uid: Uid, policy: UidPolicy) -> UidPolicy {
        let old = self.get(uid);
        self.store(uid, policy.tracked());
        old
    }

    pub(crate) fn count(&self, list: PolicyList) -> usize {
        let bit = list.policy();
        self.policies.values().filter(|p| p.contains(bit)).count()
    }

    pub(crate) fn uids(&self, list: PolicyList) -> Vec<Uid> {
        let bit = list.policy();
        let mut uids: Vec<Uid> = self
            .policies
            .iter()
            .filter(|(_, p)| p.contains(bit))
            .map(|(uid, _)| *uid)
            .collect();
        uids.sort();
        uids
    }

    fn store(&mut self, uid: Uid, policy: UidPolicy) {
        if policy.is_none() {
            self.policies.remove(&uid);
        } else {
            self.policies.insert(uid, policy);
        }
    }
}
