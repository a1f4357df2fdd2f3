use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lmsync_store::SyncErrorRecord;
use lmsync_types::EventId;

use crate::error::{SyncError, SyncResult};

/// Overall health of the agent's synchronization, as shown to operators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Ok,
    Error,
    /// Never synced, or events are still waiting to go out.
    #[default]
    Pending,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Operator-visible summary of the local machine's sync state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSyncResults {
    pub status: SyncStatus,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Local events the online web has not confirmed yet.
    pub pending_outgoing: usize,
    pub errors: Vec<SyncErrorRecord>,
}

impl LocalSyncResults {
    /// Derive the status from the raw facts.
    ///
    /// A failed last attempt or any replay error is `Error`; a machine that
    /// never synced or still has outgoing events is `Pending`.
    pub fn evaluate(
        last_successful_sync_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
        pending_outgoing: usize,
        errors: Vec<SyncErrorRecord>,
    ) -> Self {
        let status = if last_error.is_some() || !errors.is_empty() {
            SyncStatus::Error
        } else if last_successful_sync_at.is_none() || pending_outgoing > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Ok
        };
        Self {
            status,
            last_successful_sync_at,
            last_error,
            pending_outgoing,
            errors,
        }
    }

    /// Read a snapshot written by [`Self::save`]; `None` if there is none yet.
    pub fn load(path: &Path) -> SyncResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyncError::StatusFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Write the snapshot atomically so other processes can show it.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| SyncError::StatusFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// What one sync cycle moved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub pushed: usize,
    /// Pushed events the online web could not replay.
    pub push_failed: Vec<EventId>,
    /// Local events confirmed in phase 1 and phase 2.
    pub acked: usize,
    pub pulled: usize,
    pub pull_failed: Vec<EventId>,
    pub pruned: usize,
}
