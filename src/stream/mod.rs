//! Streaming response ingestion for `process_query_v2`.
//!
//! The backend answers with a chunked text body in which plain token
//! deltas are interleaved with JSON metadata (thread ids, status
//! envelopes) and, on a bad day, HTML error pages. This module turns
//! that byte stream into a finite sequence of [`StreamEvent`]s:
//!
//! - `classify`: ordered per-chunk classifier (metadata → error page → content)
//! - `noise`: the single policy deciding which server-error shapes are swallowed
//! - `decoder`: incremental UTF-8 decoding and the event state machine
//! - `thread`: shared cell holding the captured thread id

pub mod classify;
pub mod decoder;
pub mod events;
pub mod noise;
pub mod thread;

pub use classify::*;
pub use decoder::*;
pub use events::*;
pub use noise::*;
pub use thread::*;

/// Lazy, non-restartable sequence of events for one query.
pub type EventStream = futures_util::stream::BoxStream<'static, StreamEvent>;
