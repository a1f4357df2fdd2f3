use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{AgentId, FacilityId};

/// Which side of the peering protocol a node plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// The central server every agent peers with.
    OnlineWeb,
    /// A facility-local machine that may run disconnected.
    Agent,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnlineWeb => write!(f, "online_web"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online_web" | "online-web" => Ok(Self::OnlineWeb),
            "agent" => Ok(Self::Agent),
            other => Err(TypeError::InvalidRole(other.to_string())),
        }
    }
}

/// Identity of the node a component runs on.
///
/// Passed explicitly to the publisher, store and controllers instead of being
/// looked up from process-global state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineContext {
    /// Facility this node acts for. Used as `sender_id` of emitted events.
    pub facility_id: FacilityId,
    /// Set on agents once they have an identity.
    pub agent_id: Option<AgentId>,
    pub role: NodeRole,
}

impl MachineContext {
    /// Context for the online web server.
    pub fn online_web(facility_id: FacilityId) -> Self {
        Self {
            facility_id,
            agent_id: None,
            role: NodeRole::OnlineWeb,
        }
    }

    /// Context for a local agent machine.
    pub fn agent(facility_id: FacilityId, agent_id: AgentId) -> Self {
        Self {
            facility_id,
            agent_id: Some(agent_id),
            role: NodeRole::Agent,
        }
    }

    pub fn is_online_web(&self) -> bool {
        self.role == NodeRole::OnlineWeb
    }

    /// The agent id, or an error on contexts that have none.
    pub fn require_agent(&self) -> Result<AgentId, TypeError> {
        self.agent_id.ok_or(TypeError::MissingAgent)
    }
}
