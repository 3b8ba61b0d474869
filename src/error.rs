//! Error handling and custom error types
//!
//! `Error` covers failures of a whole replacement call (bad markup, bad
//! configuration, CDN setup). `ImageError` covers a single image task; those
//! are recorded in the run report and never abort the batch.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("S3/CDN error: {0}")]
    S3(String),

    #[error("Markup error: {0}")]
    Markup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of one image task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error("network error: {message}")]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("invalid image content: {0}")]
    InvalidContent(String),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("upload failed: {0}")]
    Persistence(String),

    #[error("scratch storage error: {0}")]
    Storage(String),

    #[error("worker exited without reporting a result")]
    WorkerLost,

    #[error("failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ImageError>,
    },
}

/// Flat classification of an [`ImageError`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    TooLarge,
    UnsupportedType,
    InvalidContent,
    Cancelled,
    Persistence,
    Storage,
    WorkerLost,
}

impl ImageError {
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            status,
            message: message.into(),
        }
    }

    /// The underlying cause, looking through `Exhausted`.
    pub fn root_cause(&self) -> &ImageError {
        match self {
            Self::Exhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { last, .. } => last.kind(),
            Self::Network { .. } => ErrorKind::Network,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Self::InvalidContent(_) => ErrorKind::InvalidContent,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Storage(_) => ErrorKind::Storage,
            Self::WorkerLost => ErrorKind::WorkerLost,
        }
    }

    /// Number of fetch attempts behind this error (0 when none was made).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Cancelled | Self::WorkerLost => 0,
            _ => 1,
        }
    }

    /// HTTP 4xx: the request is not going to succeed by repeating it.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Network { status: Some(status), .. } if (400..500).contains(status)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. }) && !self.is_client_error()
    }
}
