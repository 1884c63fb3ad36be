//! HTTP router

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::identity::identity_middleware;
use super::AppState;

pub const URI_MANAGEMENT: &str = "/api/management/v1/reporting";
pub const URI_INTERNAL: &str = "/api/internal/v1/reporting";

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let management = Router::new()
        .route("/devices/search", post(handlers::search))
        .route(
            "/devices/search/attributes",
            get(handlers::searchable_attributes),
        )
        .route("/devices/attributes", get(handlers::mapped_attributes))
        .route("/devices/aggregate", post(handlers::aggregate))
        .route_layer(middleware::from_fn(identity_middleware));

    let internal = Router::new()
        .route("/alive", get(handlers::alive))
        .route("/health", get(handlers::health))
        .route(
            "/inventory/tenants/:tenant_id/search",
            post(handlers::internal_search),
        )
        .route(
            "/tenants/:tenant_id/devices/:device_id/reindex",
            post(handlers::reindex),
        );

    Router::new()
        .nest(URI_MANAGEMENT, management)
        .nest(URI_INTERNAL, internal)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
