//! Conversation state reducer.
//!
//! Every mutation is keyed by conversation id and message id, so two
//! exchanges streaming at once only ever touch their own placeholder.
//! Updates aimed at something that no longer exists are dropped.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::api::ThreadMessagesPage;
use crate::models::{Conversation, FileAttachment, Message};
use crate::storage::PersistedChatState;
use crate::stream::StreamEvent;

/// Shown when the backend reports an error without a message.
pub const ERROR_FALLBACK_MESSAGE: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

const TITLE_MAX_CHARS: usize = 50;

/// Ids created by `start_exchange`, used to route stream events back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub conversation_id: Uuid,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
}

/// Where the next page of remote history starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub thread_id: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    conversations: Vec<Conversation>,
    current_conversation_id: Option<Uuid>,
    /// Assistant messages still waiting for a terminal event.
    in_flight: HashSet<Uuid>,
}

/// Title for a conversation started by `first_message`: the trimmed text,
/// cut to 50 characters with "..." appended when longer.
pub fn generate_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return "New conversation".to_string();
    }

    match trimmed.char_indices().nth(TITLE_MAX_CHARS) {
        Some((boundary, _)) => format!("{}...", &trimmed[..boundary]),
        None => trimmed.to_string(),
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a snapshot. A dangling active id is dropped.
    pub fn from_persisted(persisted: PersistedChatState) -> Self {
        let current = persisted
            .current_conversation_id
            .filter(|id| persisted.conversations.iter().any(|c| c.id == *id));
        Self {
            conversations: persisted.conversations,
            current_conversation_id: current,
            in_flight: HashSet::new(),
        }
    }

    pub fn to_persisted(&self) -> PersistedChatState {
        PersistedChatState {
            conversations: self.conversations.clone(),
            current_conversation_id: self.current_conversation_id,
        }
    }

    // ═══════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════

    /// Newest first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn current_conversation_id(&self) -> Option<Uuid> {
        self.current_conversation_id
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_conversation_id
            .and_then(|id| self.conversation(id))
    }

    /// True while any reply is still streaming.
    pub fn is_responding(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn is_in_flight(&self, assistant_message_id: Uuid) -> bool {
        self.in_flight.contains(&assistant_message_id)
    }

    /// Case-insensitive match on titles and message bodies.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.conversations.iter().collect();
        }
        self.conversations
            .iter()
            .filter(|c| c.matches(&needle))
            .collect()
    }

    // ═══════════════════════════════════════════
    // Exchanges
    // ═══════════════════════════════════════════

    /// Append a user message and an empty assistant placeholder.
    ///
    /// Targets `conversation_id` when given, the active conversation
    /// otherwise. If the target does not exist a new conversation titled
    /// from `query` is created, placed first and made active.
    pub fn start_exchange(
        &mut self,
        conversation_id: Option<Uuid>,
        query: &str,
        attachment: Option<FileAttachment>,
    ) -> Exchange {
        let target = conversation_id
            .or(self.current_conversation_id)
            .filter(|id| self.conversation(*id).is_some());

        let conversation_id = match target {
            Some(id) => id,
            None => {
                let conv = Conversation::new(generate_title(query));
                let id = conv.id;
                self.conversations.insert(0, conv);
                self.current_conversation_id = Some(id);
                tracing::debug!(conversation_id = %id, "Created conversation");
                id
            }
        };

        let user = Message::user(query, attachment);
        let placeholder = Message::assistant_placeholder();
        let exchange = Exchange {
            conversation_id,
            user_message_id: user.id,
            assistant_message_id: placeholder.id,
        };

        if let Some(conv) = self.conversation_mut(conversation_id) {
            conv.messages.push(user);
            conv.messages.push(placeholder);
            conv.touch();
        }
        self.in_flight.insert(exchange.assistant_message_id);
        exchange
    }

    /// Fold one stream event into its assistant message.
    ///
    /// Returns false when nothing changed: the conversation or message is
    /// gone, or the message already received its terminal event. Terminal
    /// events clear the in-flight entry either way.
    pub fn apply_event(
        &mut self,
        conversation_id: Uuid,
        assistant_message_id: Uuid,
        event: &StreamEvent,
    ) -> bool {
        if event.is_terminal() {
            self.in_flight.remove(&assistant_message_id);
        }

        let Some(message) = self
            .conversation_mut(conversation_id)
            .and_then(|c| c.message_mut(assistant_message_id))
        else {
            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %assistant_message_id,
                "Dropping stream event for missing message"
            );
            return false;
        };

        if message.complete {
            tracing::debug!(message_id = %assistant_message_id, "Message already complete");
            return false;
        }

        match event {
            StreamEvent::Content { text } => message.content.push_str(text),
            StreamEvent::Error { message: error } => {
                message.content = if error.is_empty() {
                    ERROR_FALLBACK_MESSAGE.to_string()
                } else {
                    format!("Error: {error}")
                };
                message.complete = true;
            }
            StreamEvent::Done => message.complete = true,
        }

        if event.is_terminal() {
            if let Some(conv) = self.conversation_mut(conversation_id) {
                conv.touch();
            }
        }
        true
    }

    /// Finish an exchange whose stream ended without a terminal event.
    /// Content is left as received.
    pub fn abandon_exchange(&mut self, assistant_message_id: Uuid) -> bool {
        let was_in_flight = self.in_flight.remove(&assistant_message_id);
        if let Some(message) = self
            .conversations
            .iter_mut()
            .find_map(|c| c.message_mut(assistant_message_id))
        {
            message.complete = true;
        }
        was_in_flight
    }

    // ═══════════════════════════════════════════
    // Conversation management
    // ═══════════════════════════════════════════

    /// Clear the active conversation; the next message starts a new one.
    pub fn new_chat(&mut self) {
        self.current_conversation_id = None;
    }

    pub fn select_conversation(&mut self, id: Uuid) -> bool {
        if self.conversation(id).is_none() {
            return false;
        }
        self.current_conversation_id = Some(id);
        true
    }

    /// Remove a conversation. Deleting the active one activates the first
    /// remaining conversation, if any.
    pub fn delete_conversation(&mut self, id: Uuid) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }
        if self.current_conversation_id == Some(id) {
            self.current_conversation_id = self.conversations.first().map(|c| c.id);
        }
        true
    }

    pub fn rename_conversation(&mut self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        match self.conversation_mut(id) {
            Some(conv) => {
                conv.title = title.to_string();
                conv.touch();
                true
            }
            None => false,
        }
    }

    /// Attach the thread an exchange ran on, unless the conversation is
    /// already bound to one. Returns true when the thread was stored.
    pub fn adopt_thread_id(&mut self, conversation_id: Uuid, thread_id: &str) -> bool {
        match self.conversation_mut(conversation_id) {
            Some(conv) if conv.thread_id.is_none() => {
                conv.thread_id = Some(thread_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn set_thread_id(&mut self, conversation_id: Uuid, thread_id: &str) -> bool {
        match self.conversation_mut(conversation_id) {
            Some(conv) => {
                conv.thread_id = Some(thread_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Create a conversation for an existing backend thread whose messages
    /// are fetched lazily, and make it active.
    pub fn open_thread(&mut self, thread_id: &str, title: &str) -> Uuid {
        if let Some(existing) = self
            .conversations
            .iter()
            .find(|c| c.thread_id.as_deref() == Some(thread_id))
        {
            let id = existing.id;
            self.current_conversation_id = Some(id);
            return id;
        }

        let mut conv = Conversation::new(generate_title(title));
        conv.thread_id = Some(thread_id.to_string());
        conv.has_more_messages = true;
        let id = conv.id;
        self.conversations.insert(0, conv);
        self.current_conversation_id = Some(id);
        id
    }

    // ═══════════════════════════════════════════
    // Remote history paging
    // ═══════════════════════════════════════════

    /// Mark a page load as started and return where it begins. `None` when
    /// the conversation has no thread, has nothing more to load, or a load
    /// is already running.
    pub fn begin_history_load(&mut self, conversation_id: Uuid) -> Option<HistoryCursor> {
        let conv = self.conversation_mut(conversation_id)?;
        if conv.is_loading_messages || !conv.has_more_messages {
            return None;
        }
        let thread_id = conv.thread_id.clone()?;
        conv.is_loading_messages = true;
        Some(HistoryCursor {
            thread_id,
            offset: conv.message_offset,
        })
    }

    pub fn cancel_history_load(&mut self, conversation_id: Uuid) {
        if let Some(conv) = self.conversation_mut(conversation_id) {
            conv.is_loading_messages = false;
        }
    }

    /// Prepend an older page of remote messages. Messages already present
    /// are skipped. Returns how many were added.
    pub fn merge_thread_page(&mut self, conversation_id: Uuid, page: &ThreadMessagesPage) -> usize {
        let Some(conv) = self.conversation_mut(conversation_id) else {
            return 0;
        };

        let older: Vec<Message> = page
            .messages
            .iter()
            .filter(|m| conv.message(m.local_id()).is_none())
            .map(|m| m.to_message())
            .collect();
        let added = older.len();

        conv.messages.splice(0..0, older);
        conv.message_offset += page.messages.len();
        conv.has_more_messages = page.has_more;
        conv.is_loading_messages = false;
        if conv.thread_id.is_none() {
            conv.thread_id = Some(page.thread_id.clone());
        }
        added
    }
}
