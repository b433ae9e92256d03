//! File attachments: validation before upload and display helpers.
//!
//! The backend accepts one file per message, up to 10 MiB, limited to
//! plain documents, spreadsheets and common images.

use std::path::Path;

use thiserror::Error;

use crate::models::FileAttachment;

/// Largest accepted upload: 10 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/plain",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "image/png",
    "image/jpeg",
    "image/jpg",
];

#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("File size must be less than 10MB (got {})", format_file_size(*.0))]
    TooLarge(u64),

    #[error("File type not supported: {0}. Please upload .txt, .pdf, .docx, .xlsx, .csv, .png, .jpg, or .jpeg files.")]
    UnsupportedType(String),

    #[error("Cannot read attachment: {0}")]
    Io(#[from] std::io::Error),
}

/// A file the user wants to send with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn validate(&self) -> Result<(), AttachmentError> {
        if self.size() > MAX_UPLOAD_BYTES {
            return Err(AttachmentError::TooLarge(self.size()));
        }
        if !ALLOWED_MIME_TYPES.contains(&self.mime_type.as_str()) {
            return Err(AttachmentError::UnsupportedType(self.mime_type.clone()));
        }
        Ok(())
    }

    /// Metadata stored on the user message.
    pub fn attachment(&self) -> FileAttachment {
        FileAttachment {
            name: self.name.clone(),
            size: self.size(),
            mime_type: self.mime_type.clone(),
            url: None,
        }
    }
}

/// Human-readable size: "0 Bytes", "512 Bytes", "1.5 KB", "10 MB".
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
