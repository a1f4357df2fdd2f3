use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use lmsync_pack::{Compression, EventResource};
use lmsync_protocol::{
    endpoints, AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    ImportResponse, ProtocolError, RegistrationProof, RegistrationResponse,
    EVENT_COMPRESSION_HEADER, EVENT_COUNT_HEADER, MACHINE_TOKEN_HEADER, OPERATOR_SECRET_HEADER,
};

use crate::error::{SyncError, SyncResult};
use crate::status::LocalSyncResults;
use crate::transport::PeerTransport;

/// [`PeerTransport`] over the online web's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

fn network(e: reqwest::Error) -> SyncError {
    SyncError::Transport(e.to_string())
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // error bodies are `{"error": "..."}`
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());
        Err(ProtocolError::Remote {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> SyncResult<T> {
        let response = Self::check(request.send().await.map_err(network)?).await?;
        response.json().await.map_err(network)
    }

    /// `GET /events/export`: this facility's pending events as one resource.
    pub async fn download_export(&self, token: &str) -> SyncResult<EventResource> {
        let request = self
            .client
            .get(self.url(endpoints::EVENTS_EXPORT))
            .header(MACHINE_TOKEN_HEADER, token);
        let response = Self::check(request.send().await.map_err(network)?).await?;
        let header = |name: &str| -> SyncResult<String> {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| SyncError::Transport(format!("missing {name} header")))
        };
        let count = header(EVENT_COUNT_HEADER)?
            .parse::<usize>()
            .map_err(|e| SyncError::Transport(format!("bad {EVENT_COUNT_HEADER}: {e}")))?;
        let compression = header(EVENT_COMPRESSION_HEADER)?
            .parse::<Compression>()
            .map_err(SyncError::Transport)?;
        let bytes = response.bytes().await.map_err(network)?;
        debug!(events = count, bytes = bytes.len(), "export downloaded");
        Ok(EventResource {
            compression,
            count,
            bytes: bytes.to_vec(),
        })
    }

    /// `POST /events/import`
    pub async fn upload_resource(
        &self,
        token: &str,
        resource: &EventResource,
    ) -> SyncResult<ImportResponse> {
        let request = self
            .client
            .post(self.url(endpoints::EVENTS_IMPORT))
            .header(MACHINE_TOKEN_HEADER, token)
            .header(EVENT_COMPRESSION_HEADER, resource.compression.as_str())
            .body(resource.bytes.clone());
        Self::send(request).await
    }

    /// `GET /status`: the online web's own sync results.
    pub async fn server_status(&self, operator_secret: &str) -> SyncResult<LocalSyncResults> {
        let request = self
            .client
            .get(self.url(endpoints::STATUS))
            .header(OPERATOR_SECRET_HEADER, operator_secret);
        Self::send(request).await
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn register(
        &self,
        registration: &AgentRegistration,
        proof: &RegistrationProof,
    ) -> SyncResult<RegistrationResponse> {
        let mut request = self.client.post(self.url(endpoints::AGENTS)).json(registration);
        if let Some(secret) = &proof.operator_secret {
            request = request.header(OPERATOR_SECRET_HEADER, secret);
        }
        if let Some(token) = &proof.token {
            request = request.header(MACHINE_TOKEN_HEADER, token);
        }
        Self::send(request).await
    }

    async fn push_events(&self, token: &str, batch: EventBatch) -> SyncResult<ImportResponse> {
        let request = self
            .client
            .post(self.url(endpoints::EVENTS))
            .header(MACHINE_TOKEN_HEADER, token)
            .json(&batch);
        Self::send(request).await
    }

    async fn fetch_acks(&self, token: &str) -> SyncResult<AcksResponse> {
        let request = self
            .client
            .get(self.url(endpoints::ACKS))
            .header(MACHINE_TOKEN_HEADER, token);
        Self::send(request).await
    }

    async fn confirm_acks_shipped(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse> {
        let request = self
            .client
            .put(self.url(endpoints::ACKS))
            .header(MACHINE_TOKEN_HEADER, token)
            .json(request);
        Self::send(request).await
    }

    async fn fetch_peering_events(&self, token: &str) -> SyncResult<EventBatch> {
        let request = self
            .client
            .get(self.url(endpoints::PEERING_EVENTS))
            .header(MACHINE_TOKEN_HEADER, token);
        Self::send(request).await
    }

    async fn confirm_received(
        &self,
        token: &str,
        request: &EventIdsRequest,
    ) -> SyncResult<ConfirmResponse> {
        let request = self
            .client
            .post(self.url(endpoints::ACKS))
            .header(MACHINE_TOKEN_HEADER, token)
            .json(request);
        Self::send(request).await
    }
}
