//! HTTP surface: routing, handlers, and response shaping.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, Response, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Deserialize;
use tracing::{error, info};

use crate::assets::{StaticError, StaticFiles};
use crate::browser::BrowserSession;
use crate::listing::{self, ListingError, ListingRequest, SortOrder};
use crate::proxy::MediaProxy;
use crate::session::SessionController;

/// Shared state behind every handler.
pub struct AppState<S> {
    pub controller: Arc<SessionController<S>>,
    pub proxy: MediaProxy,
    pub statics: StaticFiles,
}

/// Build the application router over any [`BrowserSession`] implementation.
pub fn build_router<S: BrowserSession + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/api/videos", get(videos::<S>))
        .route("/api/status", get(status::<S>))
        .route("/proxy/media", get(media::<S>))
        .fallback(static_files::<S>)
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// Every response carries a permissive CORS header; the front-end may be
/// served from a different origin during development.
async fn allow_any_origin(request: Request, next: Next) -> axum::response::Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    sort: Option<String>,
    offset: Option<u32>,
    limit: Option<u32>,
}

async fn videos<S: BrowserSession>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<VideoQuery>,
) -> Response<Body> {
    // Readiness is checked up front so an unready session answers fast,
    // without touching the browser at all.
    if !state.controller.is_ready() {
        return plain_response(StatusCode::SERVICE_UNAVAILABLE, "Browser session not ready");
    }

    let request = ListingRequest {
        sort: query
            .sort
            .as_deref()
            .map(SortOrder::from_param)
            .unwrap_or_default(),
        offset: query.offset.unwrap_or(0),
        // page size must be positive; zero falls back to the default
        limit: query.limit.filter(|limit| *limit > 0).unwrap_or(30),
    };

    info!(
        sort = request.sort.as_param(),
        offset = request.offset,
        limit = request.limit,
        "listing request"
    );

    match listing::fetch_listing(&state.controller, request).await {
        Ok(body) => {
            let mut response = plain_response(StatusCode::OK, &body);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        Err(ListingError::NotReady) => {
            plain_response(StatusCode::SERVICE_UNAVAILABLE, "Browser session not ready")
        }
        Err(ListingError::Session(err)) => {
            error!(
                error = %err,
                sort = request.sort.as_param(),
                offset = request.offset,
                "listing fetch failed"
            );
            plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Server Error: {err}"),
            )
        }
    }
}

async fn status<S: BrowserSession>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    Json(state.controller.status().await)
}

#[derive(Debug, Deserialize)]
struct MediaQuery {
    url: Option<String>,
}

async fn media<S: BrowserSession>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<MediaQuery>,
    request: Request,
) -> Response<Body> {
    let Some(target) = query.url.filter(|url| !url.trim().is_empty()) else {
        return plain_response(StatusCode::BAD_REQUEST, "missing url parameter");
    };

    let range = request
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    match state.proxy.stream(&target, range).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, url = %target, "media proxy failed");
            plain_response(err.status_code(), &err.to_string())
        }
    }
}

async fn static_files<S: BrowserSession>(
    State(state): State<Arc<AppState<S>>>,
    uri: Uri,
) -> Response<Body> {
    match state.statics.serve(uri.path()).await {
        Ok(response) => response,
        Err(StaticError::Traversal) => plain_response(StatusCode::FORBIDDEN, "Forbidden"),
        Err(StaticError::NotFound) => plain_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn plain_response(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
