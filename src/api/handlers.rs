//! Query gateway handlers. They never fetch or summarize themselves; reads
//! go through the cache, custom lists through the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ErrorCode};
use super::AppState;
use crate::cache::CacheEntry;
use crate::feed::{Article, FeedEndpoint, ALL_KEY};
use crate::util::validate_url;

/// Body of `POST /feed/custom`.
#[derive(Debug, Deserialize)]
pub struct CustomFeedRequest {
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Response shape shared by every feed route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse<'a> {
    pub articles: &'a [Article],
    pub computed_at: DateTime<Utc>,
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// GET /feed - the "all" aggregate.
pub async fn get_all(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, ApiError> {
    read_category(&state, ALL_KEY, &headers).await
}

/// GET /feed/{category}
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    read_category(&state, &category, &headers).await
}

async fn read_category(state: &AppState, category: &str, headers: &HeaderMap) -> Result<Response, ApiError> {
    let Some(entry) = state.cache.get(category).await? else {
        return Ok(Json(FeedResponse {
            articles: &[],
            computed_at: Utc::now(),
        })
        .into_response());
    };

    let etag = format!("\"{}\"", entry.fingerprint);
    if if_none_match(headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, etag_header(&etag)).into_response());
    }

    Ok((etag_header(&etag), Json(response_for(&entry))).into_response())
}

/// POST /feed/custom - ad hoc endpoints, validated and never cached.
pub async fn post_custom(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CustomFeedRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    if request.endpoints.is_empty() {
        return Err(ApiError::bad_request("At least one endpoint is required"));
    }
    if request.endpoints.len() > state.max_custom_endpoints {
        return Err(ApiError::bad_request(format!(
            "At most {} endpoints are allowed",
            state.max_custom_endpoints
        )));
    }

    let mut endpoints = Vec::with_capacity(request.endpoints.len());
    let mut problems: HashMap<String, Vec<String>> = HashMap::new();
    for (i, raw) in request.endpoints.iter().enumerate() {
        match validate_url(raw) {
            Ok(url) => endpoints.push(FeedEndpoint::uncategorized(url.as_str())),
            Err(e) => {
                problems.insert(format!("endpoints[{i}]"), vec![e.to_string()]);
            }
        }
    }
    if !problems.is_empty() {
        tracing::debug!(rejected = problems.len(), "Rejected custom feed endpoints");
        return Err(ApiError::with_details(
            ErrorCode::BadRequest,
            "One or more endpoints are invalid",
            problems,
        ));
    }

    let articles = state.cache.pipeline().run(&endpoints).await?;
    let entry = CacheEntry::new("custom", articles, Utc::now());
    Ok(Json(response_for(&entry)).into_response())
}

fn response_for(entry: &CacheEntry) -> FeedResponse<'_> {
    FeedResponse {
        articles: &entry.articles,
        computed_at: entry.computed_at,
    }
}

fn etag_header(etag: &str) -> [(header::HeaderName, HeaderValue); 1] {
    let value = HeaderValue::from_str(etag).unwrap_or_else(|_| HeaderValue::from_static("\"\""));
    [(header::ETAG, value)]
}

/// True if any tag in `If-None-Match` matches `etag` (weak comparison).
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}
