/// HTTP endpoint paths served by the online web.
pub mod endpoints {
    /// `POST`: register an agent's public key.
    pub const AGENTS: &str = "/agents";
    /// `POST`: push events from an agent.
    pub const EVENTS: &str = "/events";
    /// `GET`: events addressed to the calling facility.
    pub const PEERING_EVENTS: &str = "/peeringEvents";
    /// `GET` acks owed, `PUT` phase-2 confirmation, `POST` receiver confirmation.
    pub const ACKS: &str = "/acks";
    pub const EVENTS_EXPORT: &str = "/events/export";
    pub const EVENTS_IMPORT: &str = "/events/import";
    pub const HEALTH: &str = "/health";
    /// `GET`: sync results of the online web, for operators.
    pub const STATUS: &str = "/status";
}

/// Header carrying the signed machine token on every authenticated call.
pub const MACHINE_TOKEN_HEADER: &str = "x-machine-token";

/// Header carrying the operator secret: first registration of an agent and
/// the server status route.
pub const OPERATOR_SECRET_HEADER: &str = "x-operator-secret";

/// Number of events in a binary event resource body.
pub const EVENT_COUNT_HEADER: &str = "x-event-count";

/// Compression of a binary event resource body: `none` or `zstd`.
pub const EVENT_COMPRESSION_HEADER: &str = "x-event-compression";

/// Health check response.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: super::message::PROTOCOL_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_defaults() {
        let h = HealthResponse::default();
        assert_eq!(h.status, "ok");
        assert_eq!(h.protocol_version, 1);
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(endpoints::PEERING_EVENTS, "/peeringEvents");
        assert_eq!(endpoints::ACKS, "/acks");
        assert_eq!(endpoints::EVENTS_IMPORT, "/events/import");
        assert_eq!(endpoints::STATUS, "/status");
    }
}
