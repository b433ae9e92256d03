//! In-process stand-in for the SiteGenie backend, used by tests.
//!
//! Serves the three endpoints on an ephemeral localhost port. Streamed
//! replies are scripted per query and sent one chunk at a time with a
//! short pause between chunks so each arrives as its own read.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{json, Value};

const CHUNK_GAP: Duration = Duration::from_millis(30);

/// Scripted answer to one `process_query_v2` call.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub chunks: Vec<String>,
}

impl MockReply {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self {
            status: 200,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

impl Default for MockReply {
    fn default() -> Self {
        Self::chunks(&["OK"])
    }
}

#[derive(Clone, Default)]
struct MockState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    queries: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<(String, usize)>>>,
    thread_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    fail_uploads: Arc<Mutex<bool>>,
}

pub struct MockBackend {
    pub base_url: String,
    state: MockState,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/process_query_v2", post(process_query))
            .route("/upload_file", post(upload_file))
            .route("/get_thread_messages", get(thread_messages))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        }
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.state.replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_uploads(&self) {
        *self.state.fail_uploads.lock().unwrap() = true;
    }

    /// JSON bodies of every `process_query_v2` call, in arrival order.
    pub fn queries(&self) -> Vec<Value> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Total requests across all endpoints.
    pub fn request_count(&self) -> usize {
        self.state.queries.lock().unwrap().len()
            + self.state.uploads.lock().unwrap().len()
            + self.state.thread_requests.lock().unwrap().len()
    }

    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn thread_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.thread_requests.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn process_query(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.queries.lock().unwrap().push(body);
    let reply = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_default();

    let chunks = futures_util::stream::iter(reply.chunks).then(|chunk| async move {
        tokio::time::sleep(CHUNK_GAP).await;
        Ok::<_, std::convert::Infallible>(chunk)
    });
    let status = StatusCode::from_u16(reply.status).unwrap();
    (status, Body::from_stream(chunks)).into_response()
}

async fn upload_file(State(state): State<MockState>, mut multipart: Multipart) -> Response {
    if *state.fail_uploads.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upload backend down").into_response();
    }

    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("unnamed").to_string();
        let bytes = field.bytes().await.unwrap();
        let mut uploads = state.uploads.lock().unwrap();
        uploads.push((name.clone(), bytes.len()));
        let file_id = format!("file_{}", uploads.len());
        return Json(json!({
            "success": true,
            "data": {"file_id": file_id, "filename": name}
        }))
        .into_response();
    }

    Json(json!({"success": false, "error": "no file field"})).into_response()
}

async fn thread_messages(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let thread_id = params.get("thread_id").cloned().unwrap_or_default();
    let offset: usize = params
        .get("offset")
        .and_then(|o| o.parse().ok())
        .unwrap_or(0);
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(2);
    state.thread_requests.lock().unwrap().push(params);

    // Four messages in total; pages count back from the newest.
    let all = [
        ("m1", "user", "First question"),
        ("m2", "assistant", "First answer"),
        ("m3", "user", "Second question"),
        ("m4", "assistant", "Second answer"),
    ];
    let end = all.len().saturating_sub(offset);
    let start = end.saturating_sub(limit);
    let messages: Vec<Value> = all[start..end]
        .iter()
        .map(|(id, role, content)| {
            json!({
                "id": id,
                "role": role,
                "content": content,
                "timestamp": "2025-03-01T10:00:00Z"
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "data": {
            "thread_id": thread_id,
            "messages": messages,
            "total_count": all.len(),
            "has_more": start > 0
        }
    }))
}
