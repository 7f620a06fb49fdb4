// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Byte-preserving tee readers for streamed LLM responses.
//!
//! The proxy must forward streaming bytes to the client exactly as they
//! arrive — real LLM streams depend on byte-level flushing for perceived
//! latency, so a buffer-then-parse tee is incorrect. The readers here
//! write each raw line to the downstream sink the moment it is read from
//! upstream, flush it, and only then parse it into events for the
//! capture side.
//!
//! Every byte read from upstream — comments, keep-alive blanks, the LF
//! the line scanner strips — reaches the sink in order.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Errors from a tee reader.
#[derive(Debug, Error)]
pub enum TeeError {
    /// Reading from the upstream source failed.
    #[error("source read: {0}")]
    Source(std::io::Error),
    /// Writing to the downstream sink failed (client gone).
    #[error("sink write: {0}")]
    Sink(std::io::Error),
}

/// One parsed server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when present.
    pub event: Option<String>,
    /// `data:` lines concatenated with `\n`.
    pub data: String,
    /// The `id:` field, when present.
    pub id: Option<String>,
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data_lines.is_empty() && self.id.is_none()
    }

    fn take(&mut self) -> SseEvent {
        SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
            id: self.id.take(),
        }
    }
}

/// SSE tee: forwards raw bytes downstream while yielding parsed events.
///
/// Field parsing follows the WHATWG rules: one leading space after the
/// colon is stripped, `data` lines accumulate, `event` and `id` set the
/// event's type and id, `retry` and unknown fields are ignored, and
/// comment lines (leading `:`) are forwarded but never contribute to an
/// event. A blank line with no accumulated fields is a keep-alive. An
/// event still pending at EOF (no trailing blank line) is yielded.
pub struct SseTeeReader<R, W> {
    source: R,
    sink: W,
    pending: PendingEvent,
    line: Vec<u8>,
    eof: bool,
}

impl<R, W> SseTeeReader<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an upstream source and a downstream sink.
    pub fn new(source: R, sink: W) -> Self {
        Self {
            source,
            sink,
            pending: PendingEvent::default(),
            line: Vec::new(),
            eof: false,
        }
    }

    /// Pull the next event, forwarding bytes as a side effect.
    ///
    /// Returns `Ok(None)` once the source is exhausted and any pending
    /// event has been yielded.
    ///
    /// # Errors
    ///
    /// [`TeeError::Source`] on upstream read failure, [`TeeError::Sink`]
    /// on downstream write failure; either aborts the stream.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, TeeError> {
        if self.eof {
            return Ok(None);
        }
        loop {
            self.line.clear();
            let n = self
                .source
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(TeeError::Source)?;
            if n == 0 {
                self.eof = true;
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.pending.take()));
            }

            // Forward before parsing: the sink sees exactly what upstream sent.
            self.sink
                .write_all(&self.line)
                .await
                .map_err(TeeError::Sink)?;
            self.sink.flush().await.map_err(TeeError::Sink)?;

            let line = strip_line_ending(&self.line);
            if line.is_empty() {
                if self.pending.is_empty() {
                    // Keep-alive separator.
                    continue;
                }
                return Ok(Some(self.pending.take()));
            }
            let Ok(text) = std::str::from_utf8(line) else {
                // Non-UTF-8 lines are forwarded but cannot form an event.
                continue;
            };
            if text.starts_with(':') {
                continue;
            }
            let (field, value) = match text.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (text, ""),
            };
            match field {
                "data" => self.pending.data_lines.push(value.to_string()),
                "event" => self.pending.event = Some(value.to_string()),
                "id" => self.pending.id = Some(value.to_string()),
                _ => {}
            }
        }
    }
}

/// NDJSON tee: forwards raw lines downstream, yielding each non-blank
/// line as an event payload.
pub struct NdjsonTeeReader<R, W> {
    source: R,
    sink: W,
    line: Vec<u8>,
}

impl<R, W> NdjsonTeeReader<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an upstream source and a downstream sink.
    pub fn new(source: R, sink: W) -> Self {
        Self {
            source,
            sink,
            line: Vec::new(),
        }
    }

    /// Pull the next non-blank line, forwarding bytes as a side effect.
    ///
    /// # Errors
    ///
    /// [`TeeError::Source`] on upstream read failure, [`TeeError::Sink`]
    /// on downstream write failure.
    pub async fn next_line(&mut self) -> Result<Option<String>, TeeError> {
        loop {
            self.line.clear();
            let n = self
                .source
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(TeeError::Source)?;
            if n == 0 {
                return Ok(None);
            }

            self.sink
                .write_all(&self.line)
                .await
                .map_err(TeeError::Sink)?;
            self.sink.flush().await.map_err(TeeError::Sink)?;

            let line = strip_line_ending(&self.line);
            if line.is_empty() {
                continue;
            }
            match std::str::from_utf8(line) {
                Ok(text) => return Ok(Some(text.to_string())),
                Err(_) => continue,
            }
        }
    }
}

/// Strip a trailing LF (and a CR before it) for parsing purposes only.
fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
