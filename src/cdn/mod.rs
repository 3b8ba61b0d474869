//! Destinations for validated images.
//!
//! An uploader receives the path of a local file that has passed validation
//! and returns the location the markup should point at from now on.

pub mod client;
pub mod mock;

pub use client::CdnClient;
pub use mock::MockCdnClient;

use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait CdnService: Send + Sync {
    async fn upload_file(&self, local_path: &Path) -> Result<String>;
}

/// Wraps a plain callback as a [`CdnService`].
pub struct FnUploader<F> {
    callback: F,
}

impl<F> FnUploader<F>
where
    F: Fn(&Path) -> Result<String> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> CdnService for FnUploader<F>
where
    F: Fn(&Path) -> Result<String> + Send + Sync,
{
    async fn upload_file(&self, local_path: &Path) -> Result<String> {
        (self.callback)(local_path)
    }
}
