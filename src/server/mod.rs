pub mod handlers;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use crate::error::PlaylinkError;
use crate::metrics;
use axum::{
    Router,
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use state::AppState;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const VERSION_HEADER: &str = "x-playlink-version";

/// Build the router with production wiring for `config`.
pub async fn build_router(config: Config) -> Result<Router, PlaylinkError> {
    Ok(router(AppState::new(config).await?))
}

/// Build the router over existing state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::prometheus_metrics))
        .route(
            "/categories/parse",
            post(handlers::categories::parse_category),
        )
        .route("/videos", get(handlers::videos::list_videos))
        .route("/videos/parse", post(handlers::videos::parse_video))
        .route(
            "/videos/refresh-expiring",
            post(handlers::videos::refresh_expiring),
        )
        .route("/videos/{id}", get(handlers::videos::get_video))
        .route("/videos/{id}/playable", get(handlers::videos::get_playable))
        .route("/videos/{id}/refresh", post(handlers::videos::refresh_video))
        .layer(middleware::from_fn(track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Stamp the version header and count the response per route.
async fn track_requests(req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let mut response = next.run(req).await;
    metrics::record_request(&endpoint, response.status().as_u16());
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Serve `state` until `shutdown` fires.
pub async fn start(
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
