//! Runs exchanges against the backend and keeps local state in step.
//!
//! State lives behind a `std::sync::Mutex` locked for one reducer call
//! at a time, never across an `.await`. Each exchange folds its own
//! stream into its own placeholder, so any number can run at once.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::state::{ChatState, Exchange};
use super::ChatError;
use crate::api::{QueryStream, SiteGenieClient, DEFAULT_PAGE_LIMIT};
use crate::attachment::FileUpload;
use crate::config::SiteGenieConfig;
use crate::history::{ChatHistoryService, ChatSession, HistoryError, NewSession};
use crate::models::Conversation;
use crate::storage::SnapshotStore;
use crate::stream::StreamEvent;

/// Cloneable handle; clones share state, client and store.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
    history: Option<Arc<ChatHistoryService>>,
}

struct Inner {
    state: Mutex<ChatState>,
    client: RwLock<Arc<SiteGenieClient>>,
    store: Arc<dyn SnapshotStore>,
}

impl ChatController {
    pub fn new(client: SiteGenieClient, store: Arc<dyn SnapshotStore>) -> Self {
        Self::with_state(client, store, ChatState::new())
    }

    /// Restore the last snapshot from `store`, or start empty.
    pub fn load(client: SiteGenieClient, store: Arc<dyn SnapshotStore>) -> Result<Self, ChatError> {
        let state = match store.load_state()? {
            Some(persisted) => {
                tracing::info!(
                    conversations = persisted.conversations.len(),
                    "Restored chat snapshot"
                );
                ChatState::from_persisted(persisted)
            }
            None => ChatState::new(),
        };

        let controller = Self::with_state(client, store, state);
        // Continue the active conversation's backend thread.
        if let Some(thread_id) = controller
            .snapshot()
            .current_conversation()
            .and_then(|c| c.thread_id.clone())
        {
            controller.client().set_thread_id(thread_id);
        }
        Ok(controller)
    }

    fn with_state(client: SiteGenieClient, store: Arc<dyn SnapshotStore>, state: ChatState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                client: RwLock::new(Arc::new(client)),
                store,
            }),
            history: None,
        }
    }

    /// Log finished exchanges to the chat-history service.
    pub fn with_history(mut self, history: ChatHistoryService) -> Self {
        self.history = Some(Arc::new(history));
        self
    }

    fn client(&self) -> Arc<SiteGenieClient> {
        let guard = self.inner.client.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn persist(&self) {
        let snapshot = self.update(|s| s.to_persisted());
        if let Err(e) = self.inner.store.save_state(&snapshot) {
            tracing::warn!(error = %e, "Failed to save chat snapshot");
        }
    }

    // ═══════════════════════════════════════════
    // Observers
    // ═══════════════════════════════════════════

    /// Copy of the current state.
    pub fn snapshot(&self) -> ChatState {
        self.update(|s| s.clone())
    }

    pub fn is_responding(&self) -> bool {
        self.update(|s| s.is_responding())
    }

    pub fn config(&self) -> SiteGenieConfig {
        self.client().config().clone()
    }

    // ═══════════════════════════════════════════
    // Exchanges
    // ═══════════════════════════════════════════

    /// Send a message in the active conversation and stream the reply
    /// into it. Resolves once the reply is finished.
    ///
    /// A failed upload is logged and the message is sent without the file.
    pub async fn send_message(
        &self,
        text: &str,
        upload: Option<FileUpload>,
    ) -> Result<Exchange, ChatError> {
        let text = text.trim();
        if text.is_empty() && upload.is_none() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(upload) = &upload {
            upload.validate()?;
        }

        let client = self.client();
        let mut file_ids = Vec::new();
        if let Some(upload) = &upload {
            match client.upload_file(upload).await {
                Ok(uploaded) => {
                    tracing::info!(file = %uploaded.filename, file_id = %uploaded.file_id, "Attachment uploaded");
                    file_ids.push(uploaded.file_id);
                }
                Err(e) => tracing::warn!(file = %upload.name, error = %e, "Attachment upload failed; sending without it"),
            }
        }

        let attachment = upload.as_ref().map(FileUpload::attachment);
        let (exchange, thread_id) = self.update(|s| {
            let exchange = s.start_exchange(None, text, attachment);
            let thread_id = s
                .conversation(exchange.conversation_id)
                .and_then(|c| c.thread_id.clone());
            (exchange, thread_id)
        });
        self.persist();

        self.drive(&client, exchange, thread_id, text, &file_ids).await;
        Ok(exchange)
    }

    /// Run [`send_message`](Self::send_message) as its own task.
    pub fn spawn_message(
        &self,
        text: impl Into<String>,
        upload: Option<FileUpload>,
    ) -> JoinHandle<Result<Exchange, ChatError>> {
        let controller = self.clone();
        let text = text.into();
        tokio::spawn(async move { controller.send_message(&text, upload).await })
    }

    /// Fold one exchange's stream into its placeholder. The query goes out
    /// on the conversation's own thread.
    async fn drive(
        &self,
        client: &SiteGenieClient,
        exchange: Exchange,
        thread_id: Option<String>,
        query: &str,
        file_ids: &[String],
    ) {
        let QueryStream { mut events, thread } =
            client.query_in_thread(query, file_ids, thread_id);
        let mut finished = false;

        while let Some(event) = events.next().await {
            self.update(|s| {
                s.apply_event(exchange.conversation_id, exchange.assistant_message_id, &event)
            });
            if event.is_terminal() {
                finished = true;
                if event == StreamEvent::Done {
                    self.on_completed(client, exchange, thread.get());
                }
                break;
            }
        }

        if !finished {
            tracing::warn!(
                message_id = %exchange.assistant_message_id,
                "Stream ended without a terminal event"
            );
            self.update(|s| s.abandon_exchange(exchange.assistant_message_id));
        }
        self.persist();
    }

    /// `thread_id` is the thread this exchange's own stream ran on.
    fn on_completed(
        &self,
        client: &SiteGenieClient,
        exchange: Exchange,
        thread_id: Option<String>,
    ) {
        let Some(thread_id) = thread_id else {
            return;
        };
        let (conversation, is_current) = self.update(|s| {
            if s.adopt_thread_id(exchange.conversation_id, &thread_id) {
                tracing::debug!(
                    conversation_id = %exchange.conversation_id,
                    thread_id = %thread_id,
                    "Conversation bound to thread"
                );
            }
            (
                s.conversation(exchange.conversation_id).cloned(),
                s.current_conversation_id() == Some(exchange.conversation_id),
            )
        });
        let Some(conversation) = conversation else {
            return;
        };
        if is_current {
            if let Some(bound) = &conversation.thread_id {
                client.set_thread_id(bound.as_str());
            }
        }

        if let Some(history) = self.history.clone() {
            let session = session_for(client.config(), &conversation, thread_id);
            tokio::spawn(async move {
                if let Err(e) = history.record_exchange(&session).await {
                    tracing::warn!(error = %e, "Failed to log chat session");
                }
            });
        }
    }

    // ═══════════════════════════════════════════
    // Conversation management
    // ═══════════════════════════════════════════

    /// Forget the active conversation and backend thread.
    pub fn new_chat(&self) {
        self.update(|s| s.new_chat());
        self.client().reset_thread();
        self.persist();
    }

    /// Activate a conversation and continue its backend thread.
    pub fn select_conversation(&self, id: Uuid) -> Result<(), ChatError> {
        let thread_id = self.update(|s| {
            s.select_conversation(id)
                .then(|| s.conversation(id).and_then(|c| c.thread_id.clone()))
        });
        let Some(thread_id) = thread_id else {
            return Err(ChatError::ConversationNotFound(id));
        };

        let client = self.client();
        match thread_id {
            Some(thread_id) => client.set_thread_id(thread_id),
            None => client.reset_thread(),
        }
        self.persist();
        Ok(())
    }

    pub fn delete_conversation(&self, id: Uuid) -> Result<(), ChatError> {
        let (deleted, next_thread) = self.update(|s| {
            let deleted = s.delete_conversation(id);
            (deleted, s.current_conversation().and_then(|c| c.thread_id.clone()))
        });
        if !deleted {
            return Err(ChatError::ConversationNotFound(id));
        }

        let client = self.client();
        match next_thread {
            Some(thread_id) => client.set_thread_id(thread_id),
            None => client.reset_thread(),
        }
        self.persist();
        Ok(())
    }

    pub fn rename_conversation(&self, id: Uuid, title: &str) -> Result<(), ChatError> {
        if !self.update(|s| s.rename_conversation(id, title)) {
            return Err(ChatError::ConversationNotFound(id));
        }
        self.persist();
        Ok(())
    }

    pub fn search(&self, query: &str) -> Vec<Conversation> {
        self.update(|s| s.search(query).into_iter().cloned().collect())
    }

    /// Open a backend thread as a local conversation; its messages are
    /// fetched by [`load_more_messages`](Self::load_more_messages).
    pub fn open_thread(&self, thread_id: &str, title: &str) -> Uuid {
        let id = self.update(|s| s.open_thread(thread_id, title));
        self.client().set_thread_id(thread_id);
        self.persist();
        id
    }

    /// Fetch the next older page of a conversation's remote history.
    /// Returns the number of messages added; zero when there is nothing
    /// to fetch or a fetch is already running.
    pub async fn load_more_messages(&self, conversation_id: Uuid) -> Result<usize, ChatError> {
        let cursor = self.update(|s| {
            s.conversation(conversation_id)
                .is_some()
                .then(|| s.begin_history_load(conversation_id))
        });
        let Some(cursor) = cursor else {
            return Err(ChatError::ConversationNotFound(conversation_id));
        };
        let Some(cursor) = cursor else {
            return Ok(0);
        };

        let client = self.client();
        match client
            .get_thread_messages(&cursor.thread_id, DEFAULT_PAGE_LIMIT, cursor.offset)
            .await
        {
            Ok(page) => {
                let added = self.update(|s| s.merge_thread_page(conversation_id, &page));
                tracing::debug!(thread_id = %cursor.thread_id, added, "Merged thread page");
                self.persist();
                Ok(added)
            }
            Err(e) => {
                self.update(|s| s.cancel_history_load(conversation_id));
                Err(e.into())
            }
        }
    }

    /// Sessions previously logged for the configured user.
    pub async fn remote_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let history = self.history.clone().ok_or(HistoryError::NotConfigured)?;
        let user_id = self.client().config().user_id.to_string();
        Ok(history.list_user_sessions(&user_id, limit, offset).await?)
    }

    // ═══════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════

    /// Swap in a client for `config` and save it. The next message opens a
    /// new conversation on a fresh backend thread; exchanges already
    /// running finish on the old client.
    pub fn update_config(&self, config: SiteGenieConfig) -> Result<(), ChatError> {
        let client = SiteGenieClient::new(config.clone())?;
        self.inner.store.save_config(&config)?;
        {
            let mut guard = self.inner.client.write().unwrap_or_else(PoisonError::into_inner);
            *guard = Arc::new(client);
        }
        self.update(|s| s.new_chat());
        self.persist();
        tracing::info!(api_url = %config.api_url, "API configuration updated");
        Ok(())
    }
}

fn session_for(config: &SiteGenieConfig, conversation: &Conversation, thread_id: String) -> NewSession {
    NewSession {
        user_id: config.user_id.to_string(),
        thread_id: Some(thread_id),
        session_title: conversation.title.clone(),
        company_id: config.company_id.clone(),
        assistant_id: config.assistant_id.clone(),
        message_count: u32::try_from(conversation.messages.len()).unwrap_or(u32::MAX),
        metadata: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::api::mock_backend::{MockBackend, MockReply};
    use crate::config::CONFIG_REQUIRED_MESSAGE;
    use crate::storage::MemorySnapshotStore;

    fn config_for(base_url: &str) -> SiteGenieConfig {
        SiteGenieConfig {
            api_url: base_url.to_string(),
            assistant_id: "asst_1".into(),
            company_id: "20".into(),
            user_id: 7,
            user_name: "Ana".into(),
        }
    }

    fn controller_for(backend: &MockBackend) -> (ChatController, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        let client = SiteGenieClient::new(config_for(&backend.base_url)).unwrap();
        (ChatController::new(client, store.clone()), store)
    }

    fn reply_content(controller: &ChatController, exchange: &Exchange) -> String {
        controller
            .snapshot()
            .conversation(exchange.conversation_id)
            .and_then(|c| c.message(exchange.assistant_message_id))
            .map(|m| m.content.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn hello_streams_into_placeholder() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["Hi", " there"]));
        let (controller, store) = controller_for(&backend);

        let exchange = controller.send_message("Hello", None).await.unwrap();

        assert_eq!(reply_content(&controller, &exchange), "Hi there");
        assert!(!controller.is_responding());
        let saved = store.load_state().unwrap().unwrap();
        assert_eq!(saved.conversations[0].messages[1].content, "Hi there");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let backend = MockBackend::start().await;
        let (controller, _) = controller_for(&backend);
        assert!(matches!(
            controller.send_message("   ", None).await,
            Err(ChatError::EmptyMessage)
        ));
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_exchanges_do_not_mix() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["A1", "A2", "A3"]));
        backend.push_reply(MockReply::chunks(&["B1", "B2", "B3"]));
        let (controller, _) = controller_for(&backend);

        let first = controller.spawn_message("First", None);
        let second = controller.spawn_message("Second", None);
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        let contents: HashSet<String> = [&first, &second]
            .iter()
            .map(|ex| reply_content(&controller, ex))
            .collect();
        let expected: HashSet<String> = ["A1A2A3".to_string(), "B1B2B3".to_string()].into();
        assert_eq!(contents, expected);
        assert!(!controller.is_responding());
        assert_eq!(controller.snapshot().conversations().len(), 1);
    }

    #[tokio::test]
    async fn thread_is_stored_on_conversation() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_123\"}", "Sure"]));
        backend.push_reply(MockReply::chunks(&["Again"]));
        let (controller, _) = controller_for(&backend);

        let exchange = controller.send_message("Hello", None).await.unwrap();
        assert_eq!(reply_content(&controller, &exchange), "Sure");
        let conv = controller.snapshot().current_conversation().cloned().unwrap();
        assert_eq!(conv.thread_id.as_deref(), Some("t_123"));

        controller.send_message("More", None).await.unwrap();
        assert_eq!(backend.queries()[1]["thread_id"], "t_123");
    }

    #[tokio::test]
    async fn new_chat_starts_fresh_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_1\"}", "One"]));
        backend.push_reply(MockReply::chunks(&["Two"]));
        let (controller, _) = controller_for(&backend);

        let first = controller.send_message("One", None).await.unwrap();
        controller.new_chat();
        let second = controller.send_message("Two", None).await.unwrap();

        assert_ne!(first.conversation_id, second.conversation_id);
        assert!(backend.queries()[1].get("thread_id").is_none());
    }

    #[tokio::test]
    async fn selecting_conversation_resumes_its_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_1\"}", "One"]));
        backend.push_reply(MockReply::chunks(&["Two"]));
        backend.push_reply(MockReply::chunks(&["Three"]));
        let (controller, _) = controller_for(&backend);

        let first = controller.send_message("One", None).await.unwrap();
        controller.new_chat();
        controller.send_message("Two", None).await.unwrap();
        controller.select_conversation(first.conversation_id).unwrap();
        controller.send_message("Three", None).await.unwrap();

        assert_eq!(backend.queries()[2]["thread_id"], "t_1");
        assert!(matches!(
            controller.select_conversation(Uuid::new_v4()),
            Err(ChatError::ConversationNotFound(_))
        ));
    }

    async fn wait_for_queries(backend: &MockBackend, count: usize) {
        while backend.queries().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn thread_of(controller: &ChatController, conversation_id: Uuid) -> Option<String> {
        controller
            .snapshot()
            .conversation(conversation_id)
            .and_then(|c| c.thread_id.clone())
    }

    #[tokio::test]
    async fn new_chat_mid_stream_keeps_threads_apart() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["a1", "a2", "a3", "a4", "a5", "a6"]));
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_B\"}", "B"]));
        backend.push_reply(MockReply::chunks(&["a7"]));
        let (controller, _) = controller_for(&backend);

        let slow = controller.spawn_message("First", None);
        wait_for_queries(&backend, 1).await;
        controller.new_chat();
        let b = controller.send_message("Second", None).await.unwrap();
        let a = slow.await.unwrap().unwrap();

        assert_eq!(reply_content(&controller, &a), "a1a2a3a4a5a6");
        assert_eq!(thread_of(&controller, a.conversation_id), None);
        assert_eq!(thread_of(&controller, b.conversation_id).as_deref(), Some("t_B"));

        controller.select_conversation(a.conversation_id).unwrap();
        controller.send_message("Third", None).await.unwrap();
        assert!(backend.queries()[2].get("thread_id").is_none());
    }

    #[tokio::test]
    async fn late_thread_report_lands_on_its_own_conversation() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["a1", "a2", "a3", "a4", "{\"thread_id\":\"t_A\"}"]));
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_B\"}", "B"]));
        backend.push_reply(MockReply::chunks(&["again A"]));
        backend.push_reply(MockReply::chunks(&["again B"]));
        let (controller, _) = controller_for(&backend);

        let slow = controller.spawn_message("First", None);
        wait_for_queries(&backend, 1).await;
        controller.new_chat();
        let b = controller.send_message("Second", None).await.unwrap();
        let a = slow.await.unwrap().unwrap();

        assert_eq!(thread_of(&controller, a.conversation_id).as_deref(), Some("t_A"));
        assert_eq!(thread_of(&controller, b.conversation_id).as_deref(), Some("t_B"));

        controller.select_conversation(a.conversation_id).unwrap();
        controller.send_message("Back to A", None).await.unwrap();
        controller.select_conversation(b.conversation_id).unwrap();
        controller.send_message("Back to B", None).await.unwrap();

        let sent = backend.queries();
        assert_eq!(sent[2]["thread_id"], "t_A");
        assert_eq!(sent[3]["thread_id"], "t_B");
    }

    #[tokio::test]
    async fn selecting_conversation_mid_stream_sends_its_own_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_1\"}", "One"]));
        backend.push_reply(MockReply::chunks(&["b1", "b2", "b3", "b4", "{\"thread_id\":\"t_2\"}"]));
        backend.push_reply(MockReply::chunks(&["Quick"]));
        backend.push_reply(MockReply::chunks(&["Later"]));
        let (controller, _) = controller_for(&backend);

        let first = controller.send_message("One", None).await.unwrap();
        controller.new_chat();
        let slow = controller.spawn_message("Two", None);
        wait_for_queries(&backend, 2).await;

        controller.select_conversation(first.conversation_id).unwrap();
        controller.send_message("Three", None).await.unwrap();
        let second = slow.await.unwrap().unwrap();
        controller.send_message("Four", None).await.unwrap();

        let sent = backend.queries();
        assert!(sent[1].get("thread_id").is_none());
        assert_eq!(sent[2]["thread_id"], "t_1");
        assert_eq!(sent[3]["thread_id"], "t_1");
        assert_eq!(thread_of(&controller, first.conversation_id).as_deref(), Some("t_1"));
        assert_eq!(thread_of(&controller, second.conversation_id).as_deref(), Some("t_2"));
    }

    #[tokio::test]
    async fn deleting_other_conversation_mid_stream_keeps_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["Old"]));
        backend.push_reply(MockReply::chunks(&["n1", "n2", "n3", "{\"thread_id\":\"t_N\"}"]));
        backend.push_reply(MockReply::chunks(&["Next"]));
        let (controller, _) = controller_for(&backend);

        let old = controller.send_message("Old", None).await.unwrap();
        controller.new_chat();
        let slow = controller.spawn_message("New", None);
        wait_for_queries(&backend, 2).await;
        controller.delete_conversation(old.conversation_id).unwrap();
        let new = slow.await.unwrap().unwrap();

        assert_eq!(thread_of(&controller, new.conversation_id).as_deref(), Some("t_N"));
        controller.send_message("Next", None).await.unwrap();
        assert_eq!(backend.queries()[2]["thread_id"], "t_N");
    }

    #[tokio::test]
    async fn deleting_conversation_mid_stream_drops_updates() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["a", "b", "c", "d"]));
        let (controller, _) = controller_for(&backend);

        let task = controller.spawn_message("Hello", None);
        // Wait for the exchange to be registered.
        let conversation_id = loop {
            if let Some(id) = controller.snapshot().current_conversation_id() {
                break id;
            }
            tokio::task::yield_now().await;
        };
        controller.delete_conversation(conversation_id).unwrap();

        task.await.unwrap().unwrap();
        assert!(controller.snapshot().conversations().is_empty());
        assert!(!controller.is_responding());
    }

    #[tokio::test]
    async fn missing_configuration_becomes_error_message() {
        let store = Arc::new(MemorySnapshotStore::new());
        let client = SiteGenieClient::new(SiteGenieConfig::default()).unwrap();
        let controller = ChatController::new(client, store);

        let exchange = controller.send_message("Hello", None).await.unwrap();
        assert_eq!(
            reply_content(&controller, &exchange),
            format!("Error: {CONFIG_REQUIRED_MESSAGE}")
        );
        assert!(!controller.is_responding());
    }

    #[tokio::test]
    async fn swallowed_server_error_still_finishes() {
        let backend = MockBackend::start().await;
        backend.push_reply(
            MockReply::chunks(&["<!DOCTYPE html><title>500 Internal Server Error</title>"])
                .with_status(500),
        );
        let (controller, _) = controller_for(&backend);

        let exchange = controller.send_message("Hello", None).await.unwrap();
        assert_eq!(reply_content(&controller, &exchange), "");
        assert!(!controller.is_responding());
    }

    #[tokio::test]
    async fn upload_is_sent_with_query() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["Got it"]));
        let (controller, _) = controller_for(&backend);
        let upload = FileUpload::new("menu.txt", "text/plain", b"soup".to_vec());

        let exchange = controller.send_message("Read this", Some(upload)).await.unwrap();

        assert_eq!(backend.uploads(), vec![("menu.txt".to_string(), 4)]);
        assert_eq!(backend.queries()[0]["file_ids"], serde_json::json!(["file_1"]));
        let state = controller.snapshot();
        let user = state
            .conversation(exchange.conversation_id)
            .and_then(|c| c.message(exchange.user_message_id))
            .unwrap();
        assert_eq!(user.file_attachment.as_ref().unwrap().name, "menu.txt");
    }

    #[tokio::test]
    async fn failed_upload_still_sends_message() {
        let backend = MockBackend::start().await;
        backend.fail_uploads();
        backend.push_reply(MockReply::chunks(&["No file"]));
        let (controller, _) = controller_for(&backend);
        let upload = FileUpload::new("menu.txt", "text/plain", b"soup".to_vec());

        let exchange = controller.send_message("Read this", Some(upload)).await.unwrap();
        assert_eq!(reply_content(&controller, &exchange), "No file");
        assert_eq!(backend.queries()[0]["file_ids"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn invalid_attachment_is_rejected_before_io() {
        let backend = MockBackend::start().await;
        let (controller, _) = controller_for(&backend);
        let upload = FileUpload::new("tool.exe", "application/x-msdownload", vec![1]);

        assert!(matches!(
            controller.send_message("Run", Some(upload)).await,
            Err(ChatError::Attachment(_))
        ));
        assert_eq!(backend.request_count(), 0);
        assert!(controller.snapshot().conversations().is_empty());
    }

    #[tokio::test]
    async fn remote_thread_loads_page_by_page() {
        let backend = MockBackend::start().await;
        let (controller, _) = controller_for(&backend);

        let id = controller.open_thread("thread_9", "Earlier chat");
        assert_eq!(controller.load_more_messages(id).await.unwrap(), 4);
        assert_eq!(controller.load_more_messages(id).await.unwrap(), 0);

        let conv = controller.snapshot().conversation(id).cloned().unwrap();
        assert_eq!(conv.messages[0].content, "First question");
        assert_eq!(conv.messages[3].content, "Second answer");
        assert!(!conv.has_more_messages);
        let requests = backend.thread_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["limit"], DEFAULT_PAGE_LIMIT.to_string());
        assert_eq!(requests[0]["offset"], "0");
    }

    #[tokio::test]
    async fn load_more_for_unknown_conversation() {
        let backend = MockBackend::start().await;
        let (controller, _) = controller_for(&backend);
        assert!(matches!(
            controller.load_more_messages(Uuid::new_v4()).await,
            Err(ChatError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn load_restores_snapshot_and_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_5\"}", "Hi"]));
        backend.push_reply(MockReply::chunks(&["Back"]));
        let (controller, store) = controller_for(&backend);
        controller.send_message("Hello", None).await.unwrap();

        let client = SiteGenieClient::new(config_for(&backend.base_url)).unwrap();
        let restored = ChatController::load(client, store).unwrap();
        assert_eq!(restored.snapshot().conversations().len(), 1);

        restored.send_message("Again", None).await.unwrap();
        assert_eq!(backend.queries()[1]["thread_id"], "t_5");
    }

    #[tokio::test]
    async fn rename_and_search() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["We deliver"]));
        let (controller, _) = controller_for(&backend);
        let exchange = controller.send_message("Delivery?", None).await.unwrap();

        controller
            .rename_conversation(exchange.conversation_id, "Shipping")
            .unwrap();
        assert_eq!(controller.search("shipping").len(), 1);
        assert_eq!(controller.search("DELIVER").len(), 1);
        assert!(controller.search("refund").is_empty());
    }

    #[tokio::test]
    async fn update_config_persists_and_resets_thread() {
        let backend = MockBackend::start().await;
        backend.push_reply(MockReply::chunks(&["{\"thread_id\":\"t_1\"}", "One"]));
        backend.push_reply(MockReply::chunks(&["Two"]));
        let (controller, store) = controller_for(&backend);
        let first = controller.send_message("One", None).await.unwrap();

        let mut config = config_for(&backend.base_url);
        config.assistant_id = "asst_2".into();
        controller.update_config(config.clone()).unwrap();

        assert_eq!(store.load_config().unwrap(), Some(config));
        let second = controller.send_message("Two", None).await.unwrap();
        assert_ne!(first.conversation_id, second.conversation_id);
        assert_eq!(backend.queries()[1]["assistant_id"], "asst_2");
        assert!(backend.queries()[1].get("thread_id").is_none());
    }

    #[tokio::test]
    async fn remote_sessions_need_history_service() {
        let backend = MockBackend::start().await;
        let (controller, _) = controller_for(&backend);
        assert!(matches!(
            controller.remote_sessions(10, 0).await,
            Err(ChatError::History(HistoryError::NotConfigured))
        ));
    }
}
