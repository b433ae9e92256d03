use serde::{Deserialize, Serialize};

/// One normalized event of a query's response stream.
///
/// A stream yields any number of `Content` events followed by at most
/// one terminal event (`Error` or `Done`). Nothing follows a terminal
/// event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    Content { text: String },
    Error { message: String },
    Done,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}
