//! Image transport.
//!
//! Fetching is behind [`ImageSource`] so the pipeline can run against
//! reqwest in production and scripted responses in tests.

pub mod http;
pub mod mock;

pub use http::HttpSource;
pub use mock::{MockImageSource, MockResponse};

use crate::error::ImageError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Response body as a stream of chunks; never buffered up front.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ImageError>>;

pub struct SourceResponse {
    pub status: u16,
    /// Raw `Content-Type` header value.
    pub content_type: Option<String>,
    /// Declared `Content-Length`, if any.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl SourceResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Issue a GET for `url`. Transport failures map to
    /// [`ImageError::Network`]; non-2xx statuses are returned as-is.
    async fn get(&self, url: &str) -> Result<SourceResponse, ImageError>;
}
