use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lmsync_pack::Compression;
use lmsync_store::SyncMode;
use lmsync_types::FacilityId;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// The online web's own facility id, used as sender of events it emits.
    pub facility_id: Option<FacilityId>,
    /// Machine tokens older than this are refused.
    pub token_max_age_secs: u64,
    pub sync_mode: SyncMode,
    /// Byte budget of one `GET /events/export` resource.
    pub export_capacity_bytes: u64,
    pub export_compression: Compression,
    pub prune_interval_secs: u64,
    pub compact_interval_secs: u64,
    /// Lets `POST /agents` register new agents and `GET /status` answer.
    /// Unset, agents are registered offline with `lmsync register` only.
    pub operator_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("lmsync-server-data"),
            facility_id: None,
            token_max_age_secs: 15 * 60,
            sync_mode: SyncMode::EveryWrite,
            export_capacity_bytes: 4 * 1024 * 1024,
            export_compression: Compression::Zstd,
            prune_interval_secs: 600,
            compact_interval_secs: 6 * 3600,
            operator_secret: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("events.journal")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("agents.json")
    }

    pub fn token_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_max_age_secs as i64)
    }
}
