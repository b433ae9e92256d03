//! Application constants and the SiteGenie connection settings.
//!
//! `SiteGenieConfig` carries the identifiers every query is sent with.
//! Defaults mirror a fresh widget install: the API URL is real, the
//! assistant and company ids are placeholders that must be replaced
//! before any query is accepted.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "SiteGenie";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_API_URL: &str = "https://flaskapi.sitegenie.ai";
pub const PLACEHOLDER_ASSISTANT_ID: &str = "your-assistant-id";
pub const PLACEHOLDER_COMPANY_ID: &str = "your-company-id";

/// Shown to the user when a query is attempted with unset identifiers.
pub const CONFIG_REQUIRED_MESSAGE: &str = "API Configuration Required: Please configure your Assistant ID and Company ID in the settings.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    #[error("Setting {0} still holds its placeholder value")]
    Placeholder(&'static str),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Connection and identity settings for the SiteGenie backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteGenieConfig {
    pub api_url: String,
    pub assistant_id: String,
    pub company_id: String,
    pub user_id: i64,
    pub user_name: String,
}

impl Default for SiteGenieConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            assistant_id: PLACEHOLDER_ASSISTANT_ID.to_string(),
            company_id: PLACEHOLDER_COMPANY_ID.to_string(),
            user_id: 1,
            user_name: "User".to_string(),
        }
    }
}

impl SiteGenieConfig {
    /// Check that the identifiers a query needs are present and real.
    ///
    /// Only the assistant and company ids gate queries; user fields
    /// are forwarded as-is.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assistant_id.trim().is_empty() {
            return Err(ConfigError::MissingField("assistant_id"));
        }
        if self.assistant_id == PLACEHOLDER_ASSISTANT_ID {
            return Err(ConfigError::Placeholder("assistant_id"));
        }
        if self.company_id.trim().is_empty() {
            return Err(ConfigError::MissingField("company_id"));
        }
        if self.company_id == PLACEHOLDER_COMPANY_ID {
            return Err(ConfigError::Placeholder("company_id"));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }
        Ok(())
    }

    /// Base URL without trailing slash, ready for `format!("{}/path")`.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Overlay `SITEGENIE_*` environment variables on top of `self`.
    ///
    /// Unset or empty variables leave the existing value in place.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(url) = env_value("SITEGENIE_API_URL") {
            self.api_url = url;
        }
        if let Some(id) = env_value("SITEGENIE_ASSISTANT_ID") {
            self.assistant_id = id;
        }
        if let Some(id) = env_value("SITEGENIE_COMPANY_ID") {
            self.company_id = id;
        }
        if let Some(raw) = env_value("SITEGENIE_USER_ID") {
            self.user_id = raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "user_id",
                value: raw.clone(),
            })?;
        }
        if let Some(name) = env_value("SITEGENIE_USER_NAME") {
            self.user_name = name;
        }
        Ok(self)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }
}

/// Credentials for the chat-history (PostgREST) service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub url: String,
    pub key: String,
}

impl HistoryConfig {
    /// Read `SITEGENIE_HISTORY_URL` / `SITEGENIE_HISTORY_KEY`.
    /// Returns `None` unless both are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            url: env_value("SITEGENIE_HISTORY_URL")?,
            key: env_value("SITEGENIE_HISTORY_KEY")?,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "sitegenie_chat=info,warn"
}

/// Get the application data directory (platform data dir + `SiteGenie`).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_NAME))
}
