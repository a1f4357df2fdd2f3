use async_trait::async_trait;

use lmsync_protocol::{
    AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    ImportResponse, RegistrationProof, RegistrationResponse,
};

use crate::error::SyncResult;

/// The agent's view of the online web.
///
/// Every call except `register` carries an encoded machine token. A
/// registration carries a [`RegistrationProof`] instead.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// `POST /agents`
    async fn register(
        &self,
        registration: &AgentRegistration,
        proof: &RegistrationProof,
    ) -> SyncResult<RegistrationResponse>;
    /// `POST /events`
    async fn push_events(&self, token: &str, batch: EventBatch) -> SyncResult<ImportResponse>;
    /// `GET /acks`
    async fn fetch_acks(&self, token: &str) -> SyncResult<AcksResponse>;
    /// `PUT /acks`
    async fn confirm_acks_shipped(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse>;
    /// `GET /peeringEvents`
    async fn fetch_peering_events(&self, token: &str) -> SyncResult<EventBatch>;
    /// `POST /acks`
    async fn confirm_received(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse>;
}
