// SPDX-License-Identifier: MIT OR Apache-2.0

//! The forwarding handler and the streaming capture task.

use crate::headers::{filter_request_headers, filter_response_headers};
use crate::route::{RouteDecision, resolve_route};
use crate::{MAX_BODY_BYTES, ProxyState, UPSTREAM_TIMEOUT};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tap_core::{ChatRequest, ChatResponse, Message, Role};
use tap_providers::{Provider, StreamStats};
use tap_stream::{NdjsonTeeReader, SseTeeReader, TeeError};
use tap_worker::Job;
use tokio::io::DuplexStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

/// Buffer between the tee and the client body. Small on purpose: the
/// client should see bytes at the cadence upstream produced them.
const DUPLEX_BUF: usize = 8 * 1024;

fn error_response(status: StatusCode, message: String) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

/// Forward one request, capturing the turn when it is a parseable chat.
pub(crate) async fn forward(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let started_at = Utc::now();
    let (parts, body) = req.into_parts();

    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            );
        }
    };

    let decision = resolve_route(&state.config, &parts.headers, parts.uri.path());
    let provider = state.providers.get(&decision.provider).cloned();

    let chat_request = match &provider {
        Some(provider) if parts.method == Method::POST && !body_bytes.is_empty() => {
            provider.parse_request(&body_bytes).ok()
        }
        _ => None,
    };

    // Streaming decision: an explicit flag wins; an unparseable body
    // falls back to a raw JSON probe; otherwise the provider default.
    // The value still matters for unparseable bodies even though they
    // are never captured: it decides whether the upstream call gets a
    // total-time ceiling, which would truncate a long passed-through
    // stream.
    let default_streaming = provider.as_ref().is_some_and(|p| p.default_streaming());
    let streaming = match &chat_request {
        Some(chat) => chat.stream.unwrap_or(default_streaming),
        None if parts.method == Method::POST && !body_bytes.is_empty() => {
            raw_stream_probe(&body_bytes).unwrap_or(default_streaming)
        }
        None => false,
    };

    let mut url = format!(
        "{}{}",
        decision.upstream.trim_end_matches('/'),
        decision.path
    );
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let mut upstream_request = state
        .client
        .request(parts.method.clone(), &url)
        .headers(filter_request_headers(&parts.headers));
    if !body_bytes.is_empty() {
        upstream_request = upstream_request.body(body_bytes.clone());
    }
    if !streaming {
        upstream_request = upstream_request.timeout(UPSTREAM_TIMEOUT);
    }

    debug!(
        method = %parts.method,
        url = %url,
        provider = %decision.provider,
        agent = decision.agent_name.as_deref().unwrap_or(""),
        chat = chat_request.is_some(),
        streaming,
        "forwarding"
    );

    let upstream_response = match upstream_request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %url, error = %err, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, format!("upstream: {err}"));
        }
    };

    let status = upstream_response.status();
    let response_headers = filter_response_headers(upstream_response.headers());

    match chat_request {
        Some(chat) if streaming && status.is_success() => stream_and_capture(
            state,
            decision,
            chat,
            upstream_response,
            status,
            response_headers,
            started_at,
        ),
        Some(chat) if !streaming => {
            buffer_and_capture(
                state,
                decision,
                chat,
                upstream_response,
                status,
                response_headers,
                started_at,
            )
            .await
        }
        // Non-chat traffic (and failed chat calls): transparent pipe.
        _ => {
            let body = Body::from_stream(upstream_response.bytes_stream());
            (status, response_headers, body).into_response()
        }
    }
}

/// Non-streaming chat: read the whole body, forward it, enqueue on 200.
async fn buffer_and_capture(
    state: Arc<ProxyState>,
    decision: RouteDecision,
    chat: ChatRequest,
    upstream_response: reqwest::Response,
    status: StatusCode,
    response_headers: HeaderMap,
    started_at: DateTime<Utc>,
) -> Response {
    let body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "upstream body read failed");
            return error_response(StatusCode::BAD_GATEWAY, format!("upstream body: {err}"));
        }
    };

    if status == StatusCode::OK {
        let provider = state.providers.get(&decision.provider);
        match provider.map(|p| p.parse_response(&body)) {
            Some(Ok(response)) => submit_turn(
                &state,
                &decision,
                chat,
                response,
                started_at,
                false,
                status.as_u16(),
            ),
            Some(Err(err)) => {
                warn!(provider = %decision.provider, error = %err, "response parse failed, turn not captured");
            }
            None => {}
        }
    }

    (status, response_headers, Body::from(body)).into_response()
}

/// Streaming chat: tee bytes to the client while accumulating telemetry,
/// then reconstruct and enqueue the turn in a detached task.
fn stream_and_capture(
    state: Arc<ProxyState>,
    decision: RouteDecision,
    chat: ChatRequest,
    upstream_response: reqwest::Response,
    status: StatusCode,
    response_headers: HeaderMap,
    started_at: DateTime<Utc>,
) -> Response {
    let sse = response_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));

    let (writer, reader) = tokio::io::duplex(DUPLEX_BUF);
    let body = Body::from_stream(ReaderStream::new(reader));

    // Detached: the handler returns as soon as the pipe is wired, and the
    // capture must outlive it to drain the upstream into the client.
    tokio::spawn(capture_stream(
        state,
        decision,
        chat,
        upstream_response,
        writer,
        sse,
        started_at,
        status.as_u16(),
    ));

    (status, response_headers, body).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn capture_stream(
    state: Arc<ProxyState>,
    decision: RouteDecision,
    chat: ChatRequest,
    upstream_response: reqwest::Response,
    writer: DuplexStream,
    sse: bool,
    started_at: DateTime<Utc>,
    http_status: u16,
) {
    let Some(provider) = state.providers.get(&decision.provider).cloned() else {
        return;
    };
    let source = StreamReader::new(Box::pin(
        upstream_response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other)),
    ));

    let mut stats = StreamStats::default();
    let mut last_payload: Option<String> = None;

    let outcome: Result<(), TeeError> = if sse {
        let mut tee = SseTeeReader::new(source, writer);
        loop {
            match tee.next_event().await {
                Ok(Some(event)) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    provider.update_stream(&event.data, &mut stats);
                    if event.data.trim() != "[DONE]" {
                        last_payload = Some(event.data);
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        }
    } else {
        let mut tee = NdjsonTeeReader::new(source, writer);
        loop {
            match tee.next_line().await {
                Ok(Some(line)) => {
                    provider.update_stream(&line, &mut stats);
                    last_payload = Some(line);
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        }
    };

    match outcome {
        Ok(()) => {}
        Err(TeeError::Sink(err)) => {
            // Client went away; abort and discard the partial turn.
            debug!(error = %err, "client disconnected mid-stream, turn discarded");
            return;
        }
        Err(TeeError::Source(err)) => {
            warn!(error = %err, "upstream stream failed, turn discarded");
            return;
        }
    }

    let Some(response) =
        reconstruct_response(provider.as_ref(), &chat, last_payload.as_deref(), stats)
    else {
        warn!(provider = %decision.provider, "stream ended without a reconstructable response, turn discarded");
        return;
    };

    submit_turn(&state, &decision, chat, response, started_at, true, http_status);
}

/// Rebuild the final response of a streamed turn.
///
/// The last event payload is the authoritative record when it parses;
/// accumulated stream stats fill in whatever it lacks. When nothing
/// parses but assistant text accumulated, a minimal done-response is
/// synthesized.
fn reconstruct_response(
    provider: &dyn Provider,
    chat: &ChatRequest,
    last_payload: Option<&str>,
    stats: StreamStats,
) -> Option<ChatResponse> {
    let parsed = last_payload.and_then(|payload| provider.parse_response(payload.as_bytes()).ok());
    let mut response = match parsed {
        Some(response) => response,
        None => {
            if stats.text.is_empty() {
                return None;
            }
            ChatResponse::synthesized(&chat.model, stats.text.clone())
        }
    };
    if response.message.plain_text().is_empty() && !stats.text.is_empty() {
        response.message = Message::text(Role::Assistant, stats.text.clone());
    }
    if !stats.usage.is_zero() {
        response.usage = Some(stats.usage);
    }
    if response.stop_reason.is_none() {
        response.stop_reason = stats.stop_reason;
    }
    response.done = true;
    Some(response)
}

fn submit_turn(
    state: &ProxyState,
    decision: &RouteDecision,
    request: ChatRequest,
    response: ChatResponse,
    started_at: DateTime<Utc>,
    streaming: bool,
    http_status: u16,
) {
    let job = Job {
        provider: decision.provider.clone(),
        agent_name: decision.agent_name.clone(),
        project: state.config.project.clone(),
        request,
        response,
        started_at,
        completed_at: Utc::now(),
        streaming,
        http_status,
    };
    state.pool.enqueue(job);
}

/// Last-resort probe for an explicit `stream` flag in an otherwise
/// unmodeled body.
fn raw_stream_probe(body: &Bytes) -> Option<bool> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("stream")?
        .as_bool()
}
