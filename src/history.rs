//! Chat-history logging to a PostgREST `chat_sessions` table.
//!
//! One row per backend thread. Logging is best effort: the controller
//! calls [`ChatHistoryService::record_exchange`] from a detached task and
//! only logs failures.

use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::HistoryConfig;

const TABLE: &str = "chat_sessions";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Chat history service is not configured")]
    NotConfigured,

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Chat history service error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub session_title: String,
    pub company_id: String,
    pub assistant_id: String,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Insert payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSession {
    pub user_id: String,
    pub thread_id: Option<String>,
    pub session_title: String,
    pub company_id: String,
    pub assistant_id: String,
    pub message_count: u32,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Partial update. Unset fields are left untouched; `updated_at` is
/// stamped on send when not given.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_messages: u64,
    /// Rounded to two decimals.
    pub average_messages_per_session: f64,
}

impl SessionStats {
    pub fn from_counts(counts: &[u32]) -> Self {
        let total_sessions = counts.len();
        let total_messages: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        let average = if total_sessions == 0 {
            0.0
        } else {
            total_messages as f64 / total_sessions as f64
        };
        Self {
            total_sessions,
            total_messages,
            average_messages_per_session: (average * 100.0).round() / 100.0,
        }
    }
}

#[derive(Deserialize)]
struct MessageCountRow {
    #[serde(default)]
    message_count: u32,
}

// ═══════════════════════════════════════════
// Service
// ═══════════════════════════════════════════

pub struct ChatHistoryService {
    http: reqwest::Client,
    table_url: String,
    key: String,
}

impl ChatHistoryService {
    pub fn new(config: HistoryConfig) -> Result<Self, HistoryError> {
        let base = config.url.trim().trim_end_matches('/');
        if base.is_empty() || config.key.trim().is_empty() {
            return Err(HistoryError::NotConfigured);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            table_url: format!("{base}/rest/v1/{TABLE}"),
            key: config.key,
        })
    }

    /// Build from `SITEGENIE_HISTORY_URL` / `SITEGENIE_HISTORY_KEY`.
    pub fn from_env() -> Result<Self, HistoryError> {
        HistoryConfig::from_env()
            .ok_or(HistoryError::NotConfigured)
            .and_then(Self::new)
    }

    pub async fn create_session(&self, session: &NewSession) -> Result<ChatSession, HistoryError> {
        let rows: Vec<ChatSession> = self
            .send(
                self.request(Method::POST)
                    .header("Prefer", "return=representation")
                    .json(session),
            )
            .await?;
        let created = rows
            .into_iter()
            .next()
            .ok_or_else(|| HistoryError::ResponseParsing("insert returned no rows".into()))?;
        tracing::debug!(session_id = %created.id, "Chat session created");
        Ok(created)
    }

    pub async fn update_session(
        &self,
        id: &str,
        update: &SessionUpdate,
    ) -> Result<Option<ChatSession>, HistoryError> {
        self.update_where("id", id, update).await
    }

    pub async fn update_session_by_thread(
        &self,
        thread_id: &str,
        update: &SessionUpdate,
    ) -> Result<Option<ChatSession>, HistoryError> {
        self.update_where("thread_id", thread_id, update).await
    }

    /// `Ok(None)` when no row exists for the thread.
    pub async fn get_session_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<ChatSession>, HistoryError> {
        let rows: Vec<ChatSession> = self
            .send(self.request(Method::GET).query(&[
                ("thread_id", format!("eq.{thread_id}")),
                ("select", "*".to_string()),
            ]))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Most recently updated first.
    pub async fn list_user_sessions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatSession>, HistoryError> {
        self.send(self.request(Method::GET).query(&[
            ("user_id", format!("eq.{user_id}")),
            ("select", "*".to_string()),
            ("order", "updated_at.desc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]))
        .await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), HistoryError> {
        let response = self
            .request(Method::DELETE)
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await
            .map_err(|e| HistoryError::Http(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn session_stats(&self, user_id: &str) -> Result<SessionStats, HistoryError> {
        let rows: Vec<MessageCountRow> = self
            .send(self.request(Method::GET).query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "message_count".to_string()),
            ]))
            .await?;
        let counts: Vec<u32> = rows.iter().map(|r| r.message_count).collect();
        Ok(SessionStats::from_counts(&counts))
    }

    /// Upsert the row for a finished exchange: update the thread's row
    /// when one exists, insert otherwise.
    pub async fn record_exchange(&self, session: &NewSession) -> Result<ChatSession, HistoryError> {
        if let Some(thread_id) = session.thread_id.as_deref() {
            if self.get_session_by_thread(thread_id).await?.is_some() {
                let update = SessionUpdate {
                    session_title: Some(session.session_title.clone()),
                    message_count: Some(session.message_count),
                    ..SessionUpdate::default()
                };
                if let Some(updated) = self.update_session_by_thread(thread_id, &update).await? {
                    return Ok(updated);
                }
            }
        }
        self.create_session(session).await
    }

    async fn update_where(
        &self,
        column: &str,
        value: &str,
        update: &SessionUpdate,
    ) -> Result<Option<ChatSession>, HistoryError> {
        let mut update = update.clone();
        if update.updated_at.is_none() {
            update.updated_at = Some(Utc::now().to_rfc3339());
        }
        let rows: Vec<ChatSession> = self
            .send(
                self.request(Method::PATCH)
                    .query(&[(column, format!("eq.{value}"))])
                    .header("Prefer", "return=representation")
                    .json(&update),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.http
            .request(method, &self.table_url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HistoryError> {
        let response = request
            .send()
            .await
            .map_err(|e| HistoryError::Http(e.without_url().to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| HistoryError::ResponseParsing(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HistoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HistoryError::Status {
        status: status.as_u16(),
        body,
    })
}
