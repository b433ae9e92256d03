//! Conversation state and the controller that drives exchanges.
//!
//! - `state`: the pure reducer over conversations and in-flight replies
//! - `controller`: owns client, store and state; runs exchanges on tokio

pub mod controller;
pub mod state;

pub use controller::*;
pub use state::*;

use thiserror::Error;
use uuid::Uuid;

use crate::api::ApiError;
use crate::attachment::AttachmentError;
use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Message is empty")]
    EmptyMessage,
}
