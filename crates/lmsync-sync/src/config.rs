use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lmsync_crypto::SigningKey;
use lmsync_pack::Compression;
use lmsync_store::SyncMode;
use lmsync_types::{AgentId, FacilityId, MachineContext};

use crate::error::{SyncError, SyncResult};

/// Settings of a facility-local agent, read from TOML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub facility_id: Option<FacilityId>,
    pub agent_id: Option<AgentId>,
    pub data_dir: PathBuf,
    pub server_url: String,
    pub sync_interval_secs: u64,
    /// Byte budget of one exported event file.
    pub file_capacity_bytes: u64,
    pub compression: Compression,
    pub sync_mode: SyncMode,
    pub lease_ttl_secs: u64,
    /// Hex secret written at activation.
    pub signing_key_hex: Option<String>,
    /// Operator secret presented when the agent registers for the first
    /// time. Not needed when the operator registered the key offline.
    pub enrollment_secret: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            facility_id: None,
            agent_id: None,
            data_dir: PathBuf::from("lmsync-data"),
            server_url: "http://127.0.0.1:8080".into(),
            sync_interval_secs: 300,
            file_capacity_bytes: 1024 * 1024,
            compression: Compression::None,
            sync_mode: SyncMode::EveryWrite,
            lease_ttl_secs: 600,
            signing_key_hex: None,
            enrollment_secret: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> SyncResult<Self> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> SyncResult<String> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("events.journal")
    }

    /// Snapshot of the last sync results, shared with other processes.
    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("sync-status.json")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }

    /// The agent's machine context. Both ids must be configured.
    pub fn context(&self) -> SyncResult<MachineContext> {
        let facility = self
            .facility_id
            .ok_or_else(|| SyncError::Config("facility_id is not set".into()))?;
        let agent = self
            .agent_id
            .ok_or_else(|| SyncError::Config("agent_id is not set".into()))?;
        Ok(MachineContext::agent(facility, agent))
    }

    pub fn signing_key(&self) -> SyncResult<Option<SigningKey>> {
        self.signing_key_hex
            .as_deref()
            .map(SigningKey::from_hex)
            .transpose()
            .map_err(|e| SyncError::Config(format!("signing_key_hex: {e}")))
    }
}
