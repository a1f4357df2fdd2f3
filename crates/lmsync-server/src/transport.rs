use std::sync::Arc;

use async_trait::async_trait;

use lmsync_protocol::{
    AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    ImportResponse, RegistrationProof, RegistrationResponse,
};
use lmsync_sync::{PeerTransport, SyncError, SyncResult};

use crate::controller::OnlineWebController;
use crate::error::ServerError;

/// A [`PeerTransport`] that calls the controller directly, without HTTP.
///
/// Runs the same authentication as the HTTP API: every call presents the
/// machine token.
#[derive(Clone, Debug)]
pub struct InProcessTransport {
    controller: Arc<OnlineWebController>,
}

impl InProcessTransport {
    pub fn new(controller: Arc<OnlineWebController>) -> Self {
        Self { controller }
    }
}

fn transport_error(e: ServerError) -> SyncError {
    SyncError::Transport(format!("{} ({})", e, e.status()))
}

#[async_trait]
impl PeerTransport for InProcessTransport {
    async fn register(
        &self,
        registration: &AgentRegistration,
        proof: &RegistrationProof,
    ) -> SyncResult<RegistrationResponse> {
        self.controller
            .register_agent(registration, proof)
            .map_err(transport_error)
    }

    async fn push_events(&self, token: &str, batch: EventBatch) -> SyncResult<ImportResponse> {
        let caller = self.controller.authenticate(token).map_err(transport_error)?;
        self.controller
            .push_events(&caller, batch)
            .map_err(transport_error)
    }

    async fn fetch_acks(&self, token: &str) -> SyncResult<AcksResponse> {
        let caller = self.controller.authenticate(token).map_err(transport_error)?;
        self.controller.acks(&caller).map_err(transport_error)
    }

    async fn confirm_acks_shipped(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse> {
        let caller = self.controller.authenticate(token).map_err(transport_error)?;
        self.controller
            .confirm_acks_shipped(&caller, request)
            .map_err(transport_error)
    }

    async fn fetch_peering_events(&self, token: &str) -> SyncResult<EventBatch> {
        let caller = self.controller.authenticate(token).map_err(transport_error)?;
        self.controller
            .peering_events(&caller)
            .map_err(transport_error)
    }

    async fn confirm_received(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse> {
        let caller = self.controller.authenticate(token).map_err(transport_error)?;
        self.controller
            .confirm_received(&caller, request)
            .map_err(transport_error)
    }
}
