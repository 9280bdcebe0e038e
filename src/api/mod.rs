pub mod auth;
pub mod error;

use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/login", get(auth::login))
        .route("/login/callback", get(auth::callback))
        .route("/whoami", get(auth::whoami));

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .layer(cors_layer(&state.config.server.client_urls))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the configured client origins. The browser has to
/// send the session cookie cross-origin, so wildcards are not an option.
fn cors_layer(client_urls: &[String]) -> CorsLayer {
    let mut origins = Vec::with_capacity(client_urls.len());
    for url in client_urls {
        match HeaderValue::from_str(url.trim_end_matches('/')) {
            Ok(origin) => origins.push(origin),
            Err(_) => tracing::warn!(%url, "ignoring invalid client_urls entry"),
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health_check() -> &'static str {
    "OK"
}
