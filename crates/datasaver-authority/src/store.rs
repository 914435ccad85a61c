//! On-disk policy store format

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use datasaver_core::{AuthorityError, Uid, UidPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::memory::PolicySnapshot;

/// JSON document persisted by [`crate::FileAuthority`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyStore {
    #[serde(default)]
    pub restrict_background: bool,
    #[serde(default)]
    pub uid_policies: BTreeMap<Uid, UidPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PolicyStore {
    /// Read a store. A missing file is an empty store.
    ///
    /// A uid that is both allowed and rejected makes the store corrupt.
    pub fn load(path: &Path) -> Result<Self, AuthorityError> {
        if !path.exists() {
            debug!("Policy store not found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content).map_err(|e| AuthorityError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if let Some(uid) = store.conflicting_uid() {
            return Err(AuthorityError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("uid {} is both allowed and rejected", uid),
            });
        }
        Ok(store)
    }

    fn conflicting_uid(&self) -> Option<Uid> {
        self.uid_policies
            .iter()
            .find(|(_, policy)| policy.contains(UidPolicy::TRACKED))
            .map(|(uid, _)| *uid)
    }

    /// Save the store atomically.
    ///
    /// Written to a temp file in the same directory, then renamed over the
    /// target, so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<(), AuthorityError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AuthorityError::Serialization(e.to_string()))?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)?;
        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        // Owner read/write only (0600)
        #[cfg(unix)]
        {
            let mut perms = temp_file.as_file().metadata()?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(temp_file.path(), perms)?;
        }

        temp_file.persist(path).map_err(|e| AuthorityError::Io(e.error))?;
        info!("Saved policy store to {:?}", path);
        Ok(())
    }

    pub fn into_snapshot(self) -> PolicySnapshot {
        PolicySnapshot {
            restrict_background: self.restrict_background,
            uid_policies: self
                .uid_policies
                .into_iter()
                .filter(|(_, policy)| !policy.is_none())
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            restrict_background: snapshot.restrict_background,
            uid_policies: snapshot.uid_policies,
            updated_at: Some(Utc::now()),
        }
    }
}
