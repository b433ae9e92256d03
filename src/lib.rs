pub mod api; // Backend HTTP client
pub mod attachment;
pub mod chat; // Conversation state + controller
pub mod config;
pub mod history; // Chat-history logging (PostgREST)
pub mod models;
pub mod storage; // Local snapshots
pub mod stream; // Response stream decoding

use tracing_subscriber::EnvFilter;

pub use api::SiteGenieClient;
pub use chat::{ChatController, ChatError, ChatState, Exchange};
pub use config::SiteGenieConfig;
pub use stream::StreamEvent;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over
/// [`config::default_log_filter`]. Calling it again is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
