use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FileAttachment, Message, MessageRole};

/// Body of `POST /process_query_v2`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessQueryRequest {
    pub query: String,
    pub assistant_id: String,
    pub company_id: String,
    pub file_ids: Vec<String>,
    pub user_id: i64,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// `{success, data, error}` wrapper used by the non-streaming endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
}

/// Attachment as reported by `get_thread_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub file_attachments: Vec<RemoteAttachment>,
}

/// One page of `get_thread_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessagesPage {
    pub thread_id: String,
    pub messages: Vec<ThreadMessage>,
    pub total_count: usize,
    #[serde(default)]
    pub has_more: bool,
}

impl ThreadMessage {
    /// Local id for a remote message. Derived deterministically from the
    /// backend id so re-fetching a page never duplicates messages.
    pub fn local_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, self.id.as_bytes())
    }

    pub fn to_message(&self) -> Message {
        Message {
            id: self.local_id(),
            content: self.content.clone(),
            role: self.role,
            timestamp: parse_timestamp(&self.timestamp).unwrap_or_else(Utc::now),
            file_attachment: self.file_attachments.first().map(|a| FileAttachment {
                name: a.name.clone(),
                size: a.size,
                mime_type: a.mime_type.clone(),
                url: a.url.clone(),
            }),
            complete: true,
        }
    }
}

/// RFC 3339 first, then naive ISO 8601 (assumed UTC), then unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
