use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use futures_util::stream::{self, StreamExt};

use super::types::{Envelope, ProcessQueryRequest, ThreadMessagesPage, UploadedFile};
use super::ApiError;
use crate::attachment::FileUpload;
use crate::config::{SiteGenieConfig, CONFIG_REQUIRED_MESSAGE};
use crate::stream::{
    decode_stream, failure_event, DecodeContext, DefaultNoisePolicy, EventStream, NoisePolicy,
    StreamEvent, ThreadSlot,
};

/// Connection establishment limit. No overall request timeout is set:
/// answers stream for as long as generation runs.
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default page size for `get_thread_messages`.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Shown when the backend cannot be reached at all.
pub const NETWORK_ERROR_MESSAGE: &str =
    "Network error: Unable to connect to the API. Check console for details.";

/// Events of one query plus the backend thread they belong to.
///
/// `thread` holds the thread id the request was sent with, or the first
/// one the backend reported while streaming. It is never touched by
/// other queries, unlike the client's session slot.
pub struct QueryStream {
    pub events: EventStream,
    pub thread: ThreadSlot,
}

/// Client for one SiteGenie session.
///
/// Holds the configuration and the backend thread id. The thread id is
/// captured from response metadata and attached to every later query
/// until [`reset_thread`](Self::reset_thread) is called.
pub struct SiteGenieClient {
    config: SiteGenieConfig,
    http: reqwest::Client,
    thread: ThreadSlot,
    policy: Arc<dyn NoisePolicy>,
}

impl SiteGenieClient {
    pub fn new(config: SiteGenieConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self::with_http_client(config, http))
    }

    pub fn with_http_client(config: SiteGenieConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            thread: ThreadSlot::new(),
            policy: Arc::new(DefaultNoisePolicy),
        }
    }

    /// Replace the server-error noise heuristic.
    pub fn with_noise_policy(mut self, policy: Arc<dyn NoisePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SiteGenieConfig {
        &self.config
    }

    pub fn thread_id(&self) -> Option<String> {
        self.thread.get()
    }

    pub fn set_thread_id(&self, thread_id: impl Into<String>) {
        self.thread.set(thread_id);
    }

    /// Forget the backend thread so the next query starts a fresh one.
    pub fn reset_thread(&self) {
        self.thread.clear();
    }

    /// Send `query` on the session thread and stream the answer.
    ///
    /// Nothing is sent until the returned stream is first polled. With
    /// placeholder or missing identifiers the stream holds exactly one
    /// configuration error and no request is made.
    pub fn process_query(&self, query: &str, file_ids: &[String]) -> EventStream {
        self.start_query(query, file_ids, self.thread.get(), Some(self.thread.clone()))
            .events
    }

    /// Send `query` on an explicit backend thread (`None` starts a new
    /// one). The session slot is neither read nor written.
    pub fn query_in_thread(
        &self,
        query: &str,
        file_ids: &[String],
        thread_id: Option<String>,
    ) -> QueryStream {
        self.start_query(query, file_ids, thread_id, None)
    }

    fn start_query(
        &self,
        query: &str,
        file_ids: &[String],
        thread_id: Option<String>,
        session: Option<ThreadSlot>,
    ) -> QueryStream {
        let captured = ThreadSlot::new();
        if let Some(id) = &thread_id {
            captured.set(id.as_str());
        }

        if let Err(e) = self.config.validate() {
            tracing::warn!(error = %e, "Query refused: API configuration incomplete");
            return QueryStream {
                events: stream::once(future::ready(StreamEvent::error(CONFIG_REQUIRED_MESSAGE)))
                    .boxed(),
                thread: captured,
            };
        }

        let body = ProcessQueryRequest {
            query: query.to_string(),
            assistant_id: self.config.assistant_id.clone(),
            company_id: self.config.company_id.clone(),
            file_ids: file_ids.to_vec(),
            user_id: self.config.user_id,
            user_name: self.config.user_name.clone(),
            thread_id,
        };
        let url = format!("{}/process_query_v2", self.config.base_url());

        tracing::info!(
            url = %url,
            files = body.file_ids.len(),
            thread_id = body.thread_id.as_deref().unwrap_or("<new>"),
            "Sending query"
        );

        let request = self.http.post(url).json(&body);
        let thread = captured.clone();
        let policy = Arc::clone(&self.policy);

        let response_stream = async move {
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 500 {
                        tracing::warn!("API returned 500; streaming body anyway");
                    } else if !status.is_success() {
                        tracing::warn!(status = status.as_u16(), "Non-success status; streaming body anyway");
                    } else {
                        tracing::debug!(status = status.as_u16(), "Query accepted");
                    }

                    let body = response.bytes_stream().map(|r| r.map_err(|e| e.without_url()));
                    decode_stream(
                        body,
                        DecodeContext {
                            thread,
                            session,
                            policy,
                            status: Some(status.as_u16()),
                        },
                    )
                }
                Err(err) => {
                    let status = err.status().map(|s| s.as_u16());
                    let description = describe_send_error(err);
                    match failure_event(policy.as_ref(), &description, status) {
                        Some(event) => stream::once(future::ready(event)).boxed(),
                        None => stream::empty().boxed(),
                    }
                }
            }
        };

        QueryStream {
            events: stream::once(response_stream).flatten().boxed(),
            thread: captured,
        }
    }

    /// Upload a file for use in the next query. Returns the backend id.
    pub async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile, ApiError> {
        let url = format!("{}/upload_file", self.config.base_url());
        tracing::info!(
            name = %upload.name,
            size = upload.size(),
            mime = %upload.mime_type,
            "Uploading file"
        );

        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Upload failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<UploadedFile> = response
            .json()
            .await
            .map_err(|e| ApiError::ResponseParsing(e.to_string()))?;

        match envelope.data {
            Some(file) if envelope.success => {
                tracing::info!(file_id = %file.file_id, "File uploaded");
                Ok(file)
            }
            _ => Err(ApiError::UploadRejected(
                envelope
                    .error
                    .unwrap_or_else(|| "response did not contain file data".to_string()),
            )),
        }
    }

    /// Fetch one page of a backend thread's history.
    pub async fn get_thread_messages(
        &self,
        thread_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<ThreadMessagesPage, ApiError> {
        let url = format!("{}/get_thread_messages", self.config.base_url());
        let limit = limit.to_string();
        let offset = offset.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[
                ("thread_id", thread_id),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<ThreadMessagesPage> = response
            .json()
            .await
            .map_err(|e| ApiError::ResponseParsing(e.to_string()))?;

        match envelope.data {
            Some(page) if envelope.success => {
                tracing::debug!(
                    thread_id,
                    count = page.messages.len(),
                    total = page.total_count,
                    has_more = page.has_more,
                    "Fetched thread messages"
                );
                Ok(page)
            }
            _ => Err(ApiError::Rejected(
                envelope
                    .error
                    .unwrap_or_else(|| "thread messages unavailable".to_string()),
            )),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_connect() {
            ApiError::Connection(self.config.base_url().to_string())
        } else {
            ApiError::Http(e.without_url().to_string())
        }
    }
}

/// Description of a failed send. URLs are stripped so the noise policy
/// only sees the failure itself.
fn describe_send_error(err: reqwest::Error) -> String {
    if err.is_connect() {
        NETWORK_ERROR_MESSAGE.to_string()
    } else {
        err.without_url().to_string()
    }
}
