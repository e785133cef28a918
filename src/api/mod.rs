//! HTTP query gateway.
//!
//! | Route                 | Handler                      |
//! |-----------------------|------------------------------|
//! | `GET /health`         | [`handlers::health`]         |
//! | `GET /feed`           | [`handlers::get_all`]        |
//! | `GET /feed/{category}`| [`handlers::get_category`]   |
//! | `POST /feed/custom`   | [`handlers::post_custom`]    |

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::http::header::{ACCEPT, CONTENT_TYPE, IF_NONE_MATCH};
use axum::http::{HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::CacheManager;

pub use error::{ApiError, ErrorCode};

/// Shared state handed to every handler.
pub struct AppState {
    pub cache: CacheManager,
    pub max_custom_endpoints: usize,
}

impl AppState {
    pub fn new(cache: CacheManager, max_custom_endpoints: usize) -> Self {
        Self {
            cache,
            max_custom_endpoints,
        }
    }
}

/// Builds the application router.
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/feed", get(handlers::get_all))
        .route("/feed/custom", post(handlers::post_custom))
        .route("/feed/{category}", get(handlers::get_category))
        .layer(create_cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read-only API: any origin unless origins are configured explicitly.
fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, IF_NONE_MATCH]);

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if parsed.is_empty() {
        if !origins.is_empty() {
            tracing::warn!(origins = ?origins, "No valid CORS origins configured, allowing any origin");
        }
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}
