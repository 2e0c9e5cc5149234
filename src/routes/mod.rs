//! HTTP route handlers.
//!
//! The JSON API lives under `/api`. Job endpoints (start, progress, result,
//! cancel) and status are never cached; the channel listing may be cached
//! briefly by the client. `/health` sits at the root for probes.
//!
//! Request tracing is enabled via middleware that assigns each request an id,
//! so every log line of a request can be correlated.

pub mod guilds;
pub mod health;
pub mod jobs;
pub mod rankings;
pub mod status;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{HeaderValue, CACHE_CONTROL};
use http::Method;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{HttpServerConfig, CACHE_CONTROL_LISTING, CACHE_CONTROL_NO_STORE};
use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Browser origins allowed to call the API. An empty list allows any origin.
fn cors_layer(config: &HttpServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Creates the Axum router with all routes and cache headers.
pub fn create_router(state: AppState) -> Router {
    // Job lifecycle and connectivity - always fresh
    let live_routes = Router::new()
        .route("/status", get(status::status))
        .route("/rankings/{guild_id}", get(rankings::start))
        .route("/progress/{job_id}", get(jobs::progress))
        .route("/result/{job_id}", get(jobs::result))
        .route("/cancel/{job_id}", post(jobs::cancel))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        ));

    // Channel listing - changes rarely
    let listing_routes = Router::new()
        .route("/guilds/{guild_id}/channels", get(guilds::channels))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_LISTING),
        ));

    // Health check - no caching, always fresh for liveness probes
    let health_routes = Router::new().route("/health", get(health::health));

    let cors = cors_layer(&state.config.http);

    Router::new()
        .nest("/api", live_routes.merge(listing_routes))
        .merge(health_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
