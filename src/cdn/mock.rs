use super::CdnService;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockCdnClient {
    uploads: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    base_url: String,
    upload_count: Arc<Mutex<usize>>,
    failure: Option<String>,
}

impl MockCdnClient {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(Mutex::new(HashMap::new())),
            base_url: "https://mock-cdn.example.com".to_string(),
            upload_count: Arc::new(Mutex::new(0)),
            failure: None,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Make every upload fail with `message`.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    /// Uploaded bytes keyed by file name.
    pub fn get_uploads(&self) -> HashMap<String, Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Default for MockCdnClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CdnService for MockCdnClient {
    async fn upload_file(&self, local_path: &Path) -> Result<String> {
        *self.upload_count.lock().unwrap() += 1;

        if let Some(message) = &self.failure {
            return Err(Error::S3(message.clone()));
        }

        let data = tokio::fs::read(local_path).await?;
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::S3(format!("Invalid upload path: {}", local_path.display())))?;

        self.uploads.lock().unwrap().insert(name.clone(), data);
        Ok(format!("{}/{}", self.base_url, name))
    }
}
