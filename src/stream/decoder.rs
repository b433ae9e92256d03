//! Byte stream → event stream.
//!
//! [`decode_stream`] is generic over the body so the whole event state
//! machine runs the same against a `reqwest` response and against an
//! in-memory stream in tests.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

use super::classify::{classify_chunk, ChunkKind};
use super::events::StreamEvent;
use super::noise::{NoisePolicy, NoiseSignal};
use super::thread::ThreadSlot;
use super::EventStream;

// ═══════════════════════════════════════════════════════════
// Incremental UTF-8
// ═══════════════════════════════════════════════════════════

/// Incremental UTF-8 decoder.
///
/// Transport reads are not aligned to character boundaries. Incomplete
/// trailing sequences are carried into the next read; invalid bytes
/// become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as forms complete characters.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left when the body ends.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════
// Event state machine
// ═══════════════════════════════════════════════════════════

/// Everything the decoder needs besides the body itself.
#[derive(Clone)]
pub struct DecodeContext {
    /// Thread of this stream alone: the one the request was sent on, or
    /// else the first id the backend reports.
    pub thread: ThreadSlot,
    /// Client session slot, filled too while it is empty.
    pub session: Option<ThreadSlot>,
    pub policy: Arc<dyn NoisePolicy>,
    /// HTTP status of the response being decoded, if any.
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    /// Body ended and a trailing chunk was yielded; `Done` is owed.
    Closing,
    Finished,
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    utf8: Utf8ChunkDecoder,
    ctx: DecodeContext,
    phase: Phase,
}

impl<S> DecodeState<S> {
    /// Classify one decoded chunk; `Some` when it must be forwarded.
    fn accept(&self, text: &str) -> Option<StreamEvent> {
        if text.is_empty() {
            return None;
        }

        match classify_chunk(text, self.ctx.policy.as_ref()) {
            ChunkKind::Content => Some(StreamEvent::content(text)),
            ChunkKind::Metadata { thread_id } => {
                match thread_id {
                    Some(id) => {
                        if self.ctx.thread.record_if_absent(&id) {
                            tracing::info!(thread_id = %id, "Captured backend thread id");
                        } else {
                            tracing::debug!(thread_id = %id, "Stream thread already known");
                        }
                        if let Some(session) = &self.ctx.session {
                            session.record_if_absent(&id);
                        }
                    }
                    None => tracing::debug!(len = text.len(), "Consumed metadata chunk"),
                }
                None
            }
            ChunkKind::ErrorPage => {
                tracing::debug!(len = text.len(), "Dropped server error chunk");
                None
            }
        }
    }
}

/// Map a transport failure to its terminal event, or `None` when the
/// noise policy swallows it (the stream then ends with no terminal
/// event at all).
pub fn failure_event(
    policy: &dyn NoisePolicy,
    description: &str,
    status: Option<u16>,
) -> Option<StreamEvent> {
    if policy.is_ignorable(NoiseSignal::Failure {
        description,
        status,
    }) {
        tracing::warn!(
            status,
            error = description,
            "Suppressing server-error failure; stream ends without terminal event"
        );
        return None;
    }
    tracing::error!(status, error = description, "Query stream failed");
    Some(StreamEvent::error(description))
}

/// Turn a chunked body into an [`EventStream`].
///
/// One `Content` event per non-empty physical read that classifies as
/// content; `Done` when the body ends; `Error` (or nothing, per the
/// noise policy) when a read fails.
pub fn decode_stream<S, B, E>(body: S, ctx: DecodeContext) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        utf8: Utf8ChunkDecoder::new(),
        ctx,
        phase: Phase::Reading,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Finished => return None,
                Phase::Closing => {
                    state.phase = Phase::Finished;
                    return Some((StreamEvent::Done, state));
                }
                Phase::Reading => {}
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let text = state.utf8.decode(bytes.as_ref());
                    if let Some(event) = state.accept(&text) {
                        return Some((event, state));
                    }
                }
                Some(Err(err)) => {
                    state.phase = Phase::Finished;
                    let description = err.to_string();
                    let event = failure_event(
                        state.ctx.policy.as_ref(),
                        &description,
                        state.ctx.status,
                    )?;
                    return Some((event, state));
                }
                None => {
                    let tail = state.utf8.finish();
                    if let Some(event) = state.accept(&tail) {
                        state.phase = Phase::Closing;
                        return Some((event, state));
                    }
                    state.phase = Phase::Finished;
                    tracing::debug!("Query stream closed by peer");
                    return Some((StreamEvent::Done, state));
                }
            }
        }
    })
    .boxed()
}
