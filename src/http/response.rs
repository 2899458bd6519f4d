//! Response handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Rebuild the client response from a buffered upstream response
//!
//! # Design Decisions
//! - The upstream body is buffered so the node's turn ends when the exchange ends
//! - Headers named in `Connection` are hop-by-hop too

use axum::body::{Body, Bytes};
use axum::http::{header, response::Parts, HeaderMap, HeaderName, Response};

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove headers that only apply to a single transport-level connection.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Client response for a fully buffered upstream response.
pub fn from_upstream(mut parts: Parts, body: Bytes) -> Response<Body> {
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::from(body))
}
