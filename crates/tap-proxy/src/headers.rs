// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hop-by-hop header filtering.

use axum::http::HeaderMap;

/// Headers never forwarded to the upstream.
///
/// `Connection` is hop-by-hop, `Host` is set by the client for the new
/// target, `Accept-Encoding` is stripped so the HTTP client negotiates
/// compression it can transparently decode, and `Agent-Name` is internal
/// routing metadata.
const REQUEST_SKIP: [&str; 4] = ["connection", "host", "accept-encoding", "agent-name"];

/// Headers never forwarded back to the client.
///
/// The first three are hop-by-hop or invalidated by transparent
/// decompression; `Content-Length` is recomputed by the downstream
/// framer.
const RESPONSE_SKIP: [&str; 4] = [
    "connection",
    "transfer-encoding",
    "content-encoding",
    "content-length",
];

fn filter(headers: &HeaderMap, skip: &[&str]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !skip.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Client headers that survive on the upstream request.
#[must_use]
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, &REQUEST_SKIP)
}

/// Upstream headers that survive on the client response.
#[must_use]
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    filter(headers, &RESPONSE_SKIP)
}
