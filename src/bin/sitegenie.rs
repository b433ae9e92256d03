//! Line-oriented chat against a SiteGenie assistant.
//!
//! Configuration comes from the saved settings, overridden by
//! `SITEGENIE_*` environment variables. Each stdin line is sent as a
//! message and the reply is printed as it streams in.
//!
//! Commands: `/new` starts a fresh chat, `/attach <path>` sends a file
//! with the next message, `/list` shows saved conversations, `/quit`.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sitegenie_chat::attachment::{format_file_size, FileUpload};
use sitegenie_chat::config::{HistoryConfig, SiteGenieConfig};
use sitegenie_chat::history::ChatHistoryService;
use sitegenie_chat::storage::{FileSnapshotStore, SnapshotStore};
use sitegenie_chat::{ChatController, ChatError, Exchange, SiteGenieClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(40);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sitegenie_chat::init_tracing();

    let store = Arc::new(FileSnapshotStore::in_app_data_dir()?);
    let config = store
        .load_config()?
        .unwrap_or_else(SiteGenieConfig::default)
        .with_env_overrides()?;
    if let Err(e) = config.validate() {
        eprintln!("warning: {e}");
    }

    let client = SiteGenieClient::new(config)?;
    let mut controller = ChatController::load(client, store.clone())?;
    if let Some(history) = HistoryConfig::from_env() {
        controller = controller.with_history(ChatHistoryService::new(history)?);
    }

    let mut pending_upload: Option<FileUpload> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/new" => {
                controller.new_chat();
                println!("(new chat)");
            }
            "/list" => {
                let state = controller.snapshot();
                for conv in state.conversations() {
                    let marker = if Some(conv.id) == state.current_conversation_id() { "*" } else { " " };
                    println!("{marker} {}  {} ({} messages)", conv.id, conv.title, conv.messages.len());
                }
            }
            _ if line.starts_with("/attach ") => {
                let path = line.trim_start_matches("/attach ").trim();
                match FileUpload::from_path(Path::new(path)).and_then(|u| u.validate().map(|_| u)) {
                    Ok(upload) => {
                        println!("(attached {}, {})", upload.name, format_file_size(upload.size()));
                        pending_upload = Some(upload);
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            text => {
                let task = controller.spawn_message(text, pending_upload.take());
                print_reply(&controller, task).await?;
            }
        }
        prompt();
    }

    Ok(())
}

/// Print the streaming reply by polling the active conversation until the
/// exchange task finishes.
async fn print_reply(
    controller: &ChatController,
    mut task: JoinHandle<Result<Exchange, ChatError>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut shown = String::new();
    let mut stdout = std::io::stdout();

    let result = loop {
        tokio::select! {
            result = &mut task => break result?,
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let state = controller.snapshot();
                let reply = state
                    .current_conversation()
                    .and_then(|c| c.messages.last())
                    .filter(|m| !m.is_user());
                if let Some(rest) = reply.and_then(|m| m.content.strip_prefix(shown.as_str())) {
                    write!(stdout, "{rest}")?;
                    stdout.flush()?;
                    shown.push_str(rest);
                }
            }
        }
    };

    match result {
        Ok(exchange) => {
            let state = controller.snapshot();
            let content = state
                .conversation(exchange.conversation_id)
                .and_then(|c| c.message(exchange.assistant_message_id))
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            // Error replies replace whatever was streamed so far.
            match content.strip_prefix(shown.as_str()) {
                Some(rest) => println!("{rest}"),
                None => println!("\n{content}"),
            }
        }
        Err(e) => eprintln!("error: {e}"),
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
