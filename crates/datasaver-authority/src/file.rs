//! File-backed policy authority

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use datasaver_core::{AuthorityError, CallbackId, PolicyAuthority, PolicyCallback, Uid, UidPolicy};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::memory::MemoryAuthority;
use crate::store::PolicyStore;

/// Policy authority persisted to a JSON [`PolicyStore`].
///
/// Every mutation is written through to disk. Changes made to the file by
/// another process are picked up by [`FileAuthority::reload`], which
/// notifies subscribers of each difference.
pub struct FileAuthority {
    path: PathBuf,
    inner: MemoryAuthority,
    write_lock: Mutex<()>,
}

impl FileAuthority {
    /// Open the store at `path`, creating nothing until the first write
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuthorityError> {
        let path = path.as_ref().to_path_buf();
        let store = PolicyStore::load(&path)?;
        let snapshot = store.into_snapshot();

        info!(
            "Opened policy store at {:?} (data saver: {}, {} uids with policy)",
            path,
            snapshot.restrict_background,
            snapshot.uid_policies.len()
        );

        Ok(Self {
            path,
            inner: MemoryAuthority::with_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the store from disk. Returns the number of changes seen.
    pub fn reload(&self) -> Result<usize, AuthorityError> {
        let pending = {
            let _guard = self.write_lock.lock();
            let snapshot = PolicyStore::load(&self.path)?.into_snapshot();
            self.inner.swap(snapshot)
        };
        let changes = self.inner.deliver(pending);
        if changes > 0 {
            info!("Reloaded policy store from {:?}: {} changes", self.path, changes);
        }
        Ok(changes)
    }

    /// Apply `mutate` to a staged copy, persist it, then commit.
    ///
    /// Nothing changes in memory and nobody is notified unless the save
    /// succeeds. Subscribers run after the write lock is released, so they
    /// may write back to this authority.
    fn write_through(
        &self,
        mutate: impl FnOnce(&MemoryAuthority) -> Result<(), AuthorityError>,
    ) -> Result<(), AuthorityError> {
        let pending = {
            let _guard = self.write_lock.lock();
            let before = self.inner.snapshot();
            let staged = MemoryAuthority::with_snapshot(before.clone());
            mutate(&staged)?;
            let after = staged.snapshot();
            if before == after {
                return Ok(());
            }
            PolicyStore::from_snapshot(after.clone()).save(&self.path)?;
            self.inner.swap(after)
        };
        self.inner.deliver(pending);
        Ok(())
    }
}

impl PolicyAuthority for FileAuthority {
    fn restrict_background(&self) -> Result<bool, AuthorityError> {
        self.inner.restrict_background()
    }

    fn set_restrict_background(&self, enabled: bool) -> Result<(), AuthorityError> {
        self.write_through(|inner| inner.set_restrict_background(enabled))
    }

    fn uids_with_policy(&self, policy: UidPolicy) -> Result<Vec<Uid>, AuthorityError> {
        self.inner.uids_with_policy(policy)
    }

    fn uid_policy(&self, uid: Uid) -> Result<UidPolicy, AuthorityError> {
        self.inner.uid_policy(uid)
    }

    fn add_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError> {
        self.write_through(|inner| inner.add_uid_policy(uid, policy))
    }

    fn remove_uid_policy(&self, uid: Uid, policy: UidPolicy) -> Result<(), AuthorityError> {
        self.write_through(|inner| inner.remove_uid_policy(uid, policy))
    }

    fn register_listener(
        &self,
        callback: Arc<dyn PolicyCallback>,
    ) -> Result<CallbackId, AuthorityError> {
        self.inner.register_listener(callback)
    }

    fn unregister_listener(&self, id: CallbackId) -> Result<(), AuthorityError> {
        self.inner.unregister_listener(id)
    }
}

/// Spawn a background task that reloads the store periodically
pub fn spawn_watcher(
    authority: Arc<FileAuthority>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    use tokio::time::{MissedTickBehavior, interval};

    info!(
        "Watching policy store {:?} (interval: {} ms)",
        authority.path(),
        period.as_millis()
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let authority = authority.clone();
            match tokio::task::spawn_blocking(move || authority.reload()).await {
                Ok(Ok(changes)) => {
                    if changes > 0 {
                        debug!("Policy store watcher saw {} changes", changes);
                    }
                }
                Ok(Err(e)) => warn!("Failed to reload policy store: {}", e),
                Err(e) => warn!("Policy store reload task failed: {}", e),
            }
        }
    })
}
