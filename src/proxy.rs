//! Streaming relay for media hosted on the upstream CDN.
//!
//! The CDN rejects requests whose Referer does not match the social site it
//! serves, so browsers cannot load the media URLs directly from our pages.
//! This proxy fetches them server-side with spoofed Referer/Origin headers
//! and streams the body through without buffering. Redirects are followed
//! manually so every hop stays subject to the same timeout discipline.

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::browser::USER_AGENT;
use crate::config::PROXY_TIMEOUT;

/// Host suffixes the proxy will fetch from. Anything else is refused before
/// a connection is attempted.
pub const ALLOWED_HOSTS: &[&str] = &["twimg.com", "twitter.com"];

/// Upper bound on redirect hops per request.
pub const MAX_REDIRECT_HOPS: usize = 5;

const SPOOFED_REFERER: &str = "https://twitter.com/";
const SPOOFED_ORIGIN: &str = "https://twitter.com";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing url parameter")]
    MissingTarget,
    #[error("invalid media url: {0}")]
    InvalidTarget(String),
    #[error("host not allowed: {0}")]
    Disallowed(String),
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream request timed out")]
    Timeout,
}

impl ProxyError {
    /// HTTP status reported to the client for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget
            | ProxyError::InvalidTarget(_)
            | ProxyError::Disallowed(_) => StatusCode::BAD_REQUEST,
            ProxyError::TooManyRedirects | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Stateless media relay; cheap to clone per request.
#[derive(Clone)]
pub struct MediaProxy {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
}

impl MediaProxy {
    /// Build the relay with the production CDN allow-list.
    pub fn new() -> Result<Self, ProxyError> {
        Self::with_allowed_hosts(ALLOWED_HOSTS.iter().map(|host| host.to_string()).collect())
    }

    /// Build the relay with a custom allow-list. The upstream client has
    /// redirects disabled because the relay follows them itself.
    pub fn with_allowed_hosts(allowed_hosts: Vec<String>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(PROXY_TIMEOUT)
            .read_timeout(PROXY_TIMEOUT)
            .build()
            .map_err(|err| ProxyError::Upstream(err.to_string()))?;
        Ok(MediaProxy {
            client,
            allowed_hosts,
        })
    }

    /// Fetch `target` and stream the upstream response through. The body is
    /// forwarded chunk by chunk; dropping the returned response aborts the
    /// upstream transfer.
    pub async fn stream(
        &self,
        target: &str,
        range: Option<&str>,
    ) -> Result<Response<Body>, ProxyError> {
        let url = validate_target(target, &self.allowed_hosts)?;
        self.fetch(url, range).await
    }

    async fn fetch(
        &self,
        mut url: Url,
        range: Option<&str>,
    ) -> Result<Response<Body>, ProxyError> {
        for _hop in 0..=MAX_REDIRECT_HOPS {
            let mut request = self
                .client
                .get(url.clone())
                .header(header::USER_AGENT, USER_AGENT)
                .header(header::REFERER, SPOOFED_REFERER)
                .header(header::ORIGIN, SPOOFED_ORIGIN);
            if let Some(range) = range {
                request = request.header(header::RANGE, range);
            }

            let response = request.send().await.map_err(classify)?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        ProxyError::Upstream("redirect without location header".to_string())
                    })?;
                let next = url
                    .join(location)
                    .map_err(|err| ProxyError::Upstream(err.to_string()))?;
                debug!(from = %url, to = %next, "following upstream redirect");
                url = next;
                continue;
            }

            return build_response(response);
        }

        warn!(%url, "redirect chain exceeded {MAX_REDIRECT_HOPS} hops");
        Err(ProxyError::TooManyRedirects)
    }
}

fn classify(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Upstream(err.to_string())
    }
}

fn build_response(upstream: reqwest::Response) -> Result<Response<Body>, ProxyError> {
    let status = upstream.status();
    let mut builder = Response::builder().status(status.as_u16());

    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    if !upstream.headers().contains_key(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, "application/octet-stream");
    }
    builder = builder.header(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|err| ProxyError::Upstream(err.to_string()))
}

/// Parse the requested media URL and check it against the allow-list.
pub fn validate_target(target: &str, allowed_hosts: &[String]) -> Result<Url, ProxyError> {
    if target.trim().is_empty() {
        return Err(ProxyError::MissingTarget);
    }
    let url = Url::parse(target).map_err(|_| ProxyError::InvalidTarget(target.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidTarget(target.to_string()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::InvalidTarget(target.to_string()))?;
    if !host_allowed(host, allowed_hosts) {
        return Err(ProxyError::Disallowed(host.to_string()));
    }
    Ok(url)
}

/// Exact match or subdomain of an allowed host.
fn host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts
        .iter()
        .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
}
