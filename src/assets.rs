//! Static file serving for the bundled front-end.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::{Response, header};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StaticError {
    #[error("path escapes document root")]
    Traversal,
    #[error("not found")]
    NotFound,
}

/// Serves files from the configured document root.
#[derive(Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StaticFiles { root: root.into() }
    }

    /// Resolve and read the file for a request path. `/` maps to
    /// `index.html`; any path component that is not a plain name (`..`,
    /// absolute prefixes) is refused outright.
    pub async fn serve(&self, request_path: &str) -> Result<Response<Body>, StaticError> {
        let relative = match request_path.trim_start_matches('/') {
            "" => "index.html",
            other => other,
        };

        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StaticError::Traversal);
        }

        let full_path = self.root.join(candidate);
        let contents = tokio::fs::read(&full_path)
            .await
            .map_err(|_| StaticError::NotFound)?;

        let mime = content_type(&full_path);
        let cache = if mime.starts_with("text/html") {
            "no-cache"
        } else {
            "public, max-age=86400"
        };

        Response::builder()
            .header(header::CONTENT_TYPE, mime)
            .header(header::CACHE_CONTROL, cache)
            .body(Body::from(contents))
            .map_err(|_| StaticError::NotFound)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        Some("webmanifest") => "application/manifest+json",
        _ => "application/octet-stream",
    }
}
