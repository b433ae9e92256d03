use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// File metadata shown alongside a message. The bytes themselves live
/// on the backend once uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_attachment: Option<FileAttachment>,
    /// False only while an assistant reply is still streaming in.
    /// Snapshots written mid-stream load back as complete.
    #[serde(default = "complete_on_load", skip_serializing)]
    pub complete: bool,
}

fn complete_on_load() -> bool {
    true
}

impl Message {
    pub fn user(content: &str, file_attachment: Option<FileAttachment>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.to_string(),
            role: MessageRole::User,
            timestamp: Utc::now(),
            file_attachment,
            complete: true,
        }
    }

    /// Empty assistant message awaiting streamed content.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            content: String::new(),
            role: MessageRole::Assistant,
            timestamp: Utc::now(),
            file_attachment: None,
            complete: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}
