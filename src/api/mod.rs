//! HTTP client for the SiteGenie assistant backend.
//!
//! Three endpoints are used:
//! - `POST /process_query_v2`: streamed answer (see `crate::stream`)
//! - `POST /upload_file`: multipart upload, returns a file id
//! - `GET /get_thread_messages`: paginated history of a backend thread

pub mod client;
pub mod types;

#[cfg(test)]
pub(crate) mod mock_backend;

pub use client::*;
pub use types::*;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot reach SiteGenie API at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("SiteGenie API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    #[error("Request rejected by backend: {0}")]
    Rejected(String),
}
