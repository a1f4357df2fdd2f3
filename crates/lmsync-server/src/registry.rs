use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use lmsync_crypto::VerifyingKey;
use lmsync_types::{AgentId, FacilityId};

use crate::error::{ServerError, ServerResult};

/// An activated agent as known to the online web.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent_id: AgentId,
    pub facility_id: FacilityId,
    /// Hex-encoded Ed25519 verifying key.
    pub public_key: String,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn verifying_key(&self) -> ServerResult<VerifyingKey> {
        VerifyingKey::from_hex(&self.public_key)
            .map_err(|e| ServerError::Internal(format!("stored key of {}: {e}", self.agent_id)))
    }
}

/// Registered agents, optionally persisted as a JSON file.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, RegisteredAgent>>,
    path: Option<PathBuf>,
}

impl AgentRegistry {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry file at `path`, or start empty if it is missing.
    pub fn open(path: &Path) -> ServerResult<Self> {
        let agents = if path.exists() {
            let bytes = std::fs::read(path)?;
            let list: Vec<RegisteredAgent> = serde_json::from_slice(&bytes)
                .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
            list.into_iter().map(|a| (a.agent_id, a)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            agents: RwLock::new(agents),
            path: Some(path.to_path_buf()),
        })
    }

    /// Register or re-register an agent. Re-activation replaces the key.
    pub fn register(
        &self,
        agent_id: AgentId,
        facility_id: FacilityId,
        public_key: &str,
    ) -> ServerResult<RegisteredAgent> {
        VerifyingKey::from_hex(public_key)
            .map_err(|e| ServerError::InvalidRequest(format!("public key: {e}")))?;
        let agent = RegisteredAgent {
            agent_id,
            facility_id,
            public_key: public_key.to_string(),
            registered_at: Utc::now(),
        };
        let mut agents = self.agents.write().expect("lock poisoned");
        let previous = agents.insert(agent_id, agent.clone());
        if let Some(path) = &self.path {
            let mut list: Vec<&RegisteredAgent> = agents.values().collect();
            list.sort_by_key(|a| a.agent_id);
            let bytes = serde_json::to_vec_pretty(&list)
                .map_err(|e| ServerError::Internal(e.to_string()))?;
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, path)?;
        }
        info!(
            %agent_id,
            %facility_id,
            reactivated = previous.is_some(),
            "agent registered"
        );
        Ok(agent)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<RegisteredAgent> {
        self.agents
            .read()
            .expect("lock poisoned")
            .get(agent_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
