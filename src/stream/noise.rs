//! Server-error noise policy.
//!
//! The backend is known to wrap otherwise valid streamed answers in
//! spurious 500 framing: an HTML error page may arrive on the same
//! connection as real tokens, and transport failures may carry a 500
//! signature while the answer itself was delivered. Everything shaped
//! like that is dropped, at the chunk level and at the failure level.
//!
//! A genuine fatal 500 is indistinguishable from the spurious kind, so
//! it is dropped too. The heuristic lives here and nowhere else so it
//! can be replaced through [`NoisePolicy`] without touching the decoder.

/// Markers of an HTML error page (Flask/waitress defaults).
const HTML_ERROR_MARKERS: &[&str] = &[
    "<!doctype html>",
    "<html",
    "<title>500 Internal Server Error</title>",
    "<h1>Internal Server Error</h1>",
    "The server encountered an internal error and was unable to complete",
];

/// Plain-text server error phrases.
const SERVER_ERROR_MARKERS: &[&str] = &[
    "Internal Server Error",
    "generated by waitress",
    "The server encountered an unexpected internal server error",
    "500 Internal Server Error",
];

/// What the policy is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseSignal<'a> {
    /// A decoded body chunk that was not recognized as metadata.
    Chunk(&'a str),
    /// A transport failure, with the HTTP status of the response it
    /// interrupted when one had been received.
    Failure {
        description: &'a str,
        status: Option<u16>,
    },
}

/// Decide whether a chunk or failure is server-error noise to be
/// swallowed without surfacing anything to the caller.
pub fn is_ignorable_transport_noise(signal: NoiseSignal<'_>) -> bool {
    match signal {
        NoiseSignal::Chunk(chunk) => {
            HTML_ERROR_MARKERS.iter().any(|m| chunk.contains(m))
                || SERVER_ERROR_MARKERS.iter().any(|m| chunk.contains(m))
        }
        NoiseSignal::Failure {
            description,
            status,
        } => {
            // Plain substring match: "5000" counts as well.
            status == Some(500)
                || description.contains("Internal Server Error")
                || description.contains("500")
        }
    }
}

/// Overridable home for the noise heuristic.
pub trait NoisePolicy: Send + Sync {
    fn is_ignorable(&self, signal: NoiseSignal<'_>) -> bool;
}

/// Policy backed by [`is_ignorable_transport_noise`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNoisePolicy;

impl NoisePolicy for DefaultNoisePolicy {
    fn is_ignorable(&self, signal: NoiseSignal<'_>) -> bool {
        is_ignorable_transport_noise(signal)
    }
}

/// Policy that swallows nothing: every error page becomes content
/// and every failure becomes a terminal error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictNoisePolicy;

impl NoisePolicy for StrictNoisePolicy {
    fn is_ignorable(&self, _signal: NoiseSignal<'_>) -> bool {
        false
    }
}
