use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use lmsync_protocol::endpoints;

use crate::controller::OnlineWebController;
use crate::handler;

/// Build the axum router with every peering endpoint.
pub fn build_router(controller: Arc<OnlineWebController>) -> Router {
    Router::new()
        .route(endpoints::HEALTH, get(handler::health_handler))
        .route("/info", get(handler::info_handler))
        .route(endpoints::STATUS, get(handler::status_handler))
        .route(endpoints::AGENTS, post(handler::register_agent_handler))
        .route(endpoints::EVENTS, post(handler::push_events_handler))
        .route(
            endpoints::PEERING_EVENTS,
            get(handler::peering_events_handler),
        )
        .route(
            endpoints::ACKS,
            get(handler::acks_handler)
                .put(handler::confirm_acks_shipped_handler)
                .post(handler::confirm_received_handler),
        )
        .route(
            endpoints::EVENTS_EXPORT,
            get(handler::export_events_handler),
        )
        .route(
            endpoints::EVENTS_IMPORT,
            post(handler::import_events_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}
