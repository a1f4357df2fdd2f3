use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use lmsync_pack::Compression;
use lmsync_protocol::{
    AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    HealthResponse, ImportResponse, RegistrationProof, RegistrationResponse,
    EVENT_COMPRESSION_HEADER, EVENT_COUNT_HEADER, MACHINE_TOKEN_HEADER, OPERATOR_SECRET_HEADER,
};
use lmsync_sync::LocalSyncResults;

use crate::auth::{token_from_headers, MachineIdentity};
use crate::controller::OnlineWebController;
use crate::error::{ServerError, ServerResult};

pub type AppState = Arc<OnlineWebController>;

fn caller(controller: &OnlineWebController, headers: &HeaderMap) -> ServerResult<MachineIdentity> {
    controller.authenticate(token_from_headers(headers)?)
}

fn optional_header(headers: &HeaderMap, name: &str) -> ServerResult<Option<String>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| ServerError::InvalidRequest(format!("{name} header is not ASCII")))
        })
        .transpose()
}

/// Run a controller call on the blocking pool; the store does file I/O and
/// fsyncs under its locks.
async fn blocking<T, F>(controller: &AppState, f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&OnlineWebController) -> ServerResult<T> + Send + 'static,
{
    let controller = controller.clone();
    tokio::task::spawn_blocking(move || f(&controller))
        .await
        .map_err(|e| ServerError::Internal(format!("request task failed: {e}")))?
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

pub async fn info_handler(State(controller): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "lmsync-server",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": lmsync_protocol::PROTOCOL_VERSION,
        "facility_id": controller.context().facility_id,
        "agents": controller.agents().len(),
    }))
}

/// `POST /agents`. New agents present the operator secret; a known agent
/// changing its key presents a machine token signed with the old key.
pub async fn register_agent_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
    Json(registration): Json<AgentRegistration>,
) -> ServerResult<Json<RegistrationResponse>> {
    let proof = RegistrationProof {
        operator_secret: optional_header(&headers, OPERATOR_SECRET_HEADER)?,
        token: optional_header(&headers, MACHINE_TOKEN_HEADER)?,
    };
    let response = blocking(&controller, move |c| c.register_agent(&registration, &proof)).await?;
    Ok(Json(response))
}

/// `GET /status`: operator view of the online web's sync results.
pub async fn status_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<LocalSyncResults>> {
    let secret = optional_header(&headers, OPERATOR_SECRET_HEADER)?;
    let status = blocking(&controller, move |c| {
        c.check_operator(secret.as_deref())?;
        c.status()
    })
    .await?;
    Ok(Json(status))
}

pub async fn push_events_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<EventBatch>,
) -> ServerResult<Json<ImportResponse>> {
    let response = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.push_events(&caller, batch)
    })
    .await?;
    Ok(Json(response))
}

pub async fn peering_events_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<EventBatch>> {
    let batch = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.peering_events(&caller)
    })
    .await?;
    Ok(Json(batch))
}

pub async fn acks_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<AcksResponse>> {
    let acks = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.acks(&caller)
    })
    .await?;
    Ok(Json(acks))
}

/// `PUT /acks`: the sender stored our phase-1 acknowledgements.
pub async fn confirm_acks_shipped_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EventIdsRequest>,
) -> ServerResult<Json<ConfirmResponse>> {
    let response = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.confirm_acks_shipped(&caller, &request)
    })
    .await?;
    Ok(Json(response))
}

/// `POST /acks`: the receiver holds these peering events.
pub async fn confirm_received_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EventIdsRequest>,
) -> ServerResult<Json<ConfirmResponse>> {
    let response = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.confirm_received(&caller, &request)
    })
    .await?;
    Ok(Json(response))
}

/// `GET /events/export`: the caller's pending events as one binary resource.
pub async fn export_events_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let resource = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.export_events(&caller)
    })
    .await?;
    let mut response = resource.bytes.into_response();
    let h = response.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    h.insert(EVENT_COUNT_HEADER, HeaderValue::from(resource.count));
    h.insert(
        EVENT_COMPRESSION_HEADER,
        HeaderValue::from_static(resource.compression.as_str()),
    );
    Ok(response)
}

/// `POST /events/import`: a binary resource written by the caller.
///
/// Compression comes from the `x-event-compression` header; absent means
/// uncompressed.
pub async fn import_events_handler(
    State(controller): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<ImportResponse>> {
    let compression = match optional_header(&headers, EVENT_COMPRESSION_HEADER)? {
        None => Compression::None,
        Some(value) => value
            .parse::<Compression>()
            .map_err(ServerError::InvalidRequest)?,
    };
    let response = blocking(&controller, move |c| {
        let caller = caller(c, &headers)?;
        c.import_events(&caller, &body, compression)
    })
    .await?;
    Ok(Json(response))
}
