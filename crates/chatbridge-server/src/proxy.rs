//! Transparent HTTP proxy for the gateway's REST surface.
//!
//! Requests under `/api/` are replayed against the upstream gateway with
//! method, path, query, headers, and body intact. Hop-by-hop headers are
//! stripped in both directions; everything else passes through untouched.

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, Response, StatusCode};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{PROXY_ERRORS_TOTAL, PROXY_REQUESTS_TOTAL};

/// Proxying failure. The handler maps every variant to `502 Bad Gateway`.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Reading the inbound request body failed.
    #[error("read request body: {0}")]
    Body(#[from] axum::Error),
    /// The upstream request failed.
    #[error("upstream request: {0}")]
    Upstream(#[from] reqwest::Error),
    /// Rebuilding the response failed.
    #[error("build response: {0}")]
    Response(#[from] axum::http::Error),
}

/// Headers that describe the connection rather than the message; never
/// forwarded (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn copy_end_to_end(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src {
        if !is_hop_by_hop(name.as_str()) {
            let _ = dst.append(name.clone(), value.clone());
        }
    }
}

/// Replay `req` against the gateway at `base_url` and return its response.
pub async fn forward(
    client: &reqwest::Client,
    base_url: &str,
    req: Request,
) -> Result<Response<Body>, ProxyError> {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_owned(), |pq| pq.as_str().to_owned());
    let url = format!("{base_url}{path_and_query}");
    counter!(PROXY_REQUESTS_TOTAL, "method" => method.to_string()).increment(1);
    debug!(%method, %url, "proxying request");

    let mut headers = HeaderMap::new();
    copy_end_to_end(req.headers(), &mut headers);
    let body = to_bytes(req.into_body(), usize::MAX).await?;

    let upstream = client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut builder = Response::builder().status(status);
    if let Some(dst) = builder.headers_mut() {
        copy_end_to_end(upstream.headers(), dst);
    }
    let bytes = upstream.bytes().await?;
    Ok(builder.body(Body::from(bytes))?)
}

/// Like [`forward`] but absorbs failures into a `502 Bad Gateway` response.
pub async fn forward_or_bad_gateway(
    client: &reqwest::Client,
    base_url: &str,
    req: Request,
) -> Response<Body> {
    match forward(client, base_url, req).await {
        Ok(resp) => resp,
        Err(e) => {
            counter!(PROXY_ERRORS_TOTAL).increment(1);
            warn!(error = %e, "proxy request failed");
            let mut resp = Response::new(Body::from("upstream gateway unavailable"));
            *resp.status_mut() = StatusCode::BAD_GATEWAY;
            resp
        }
    }
}
