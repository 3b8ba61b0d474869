use super::{ImageSource, SourceResponse};
use crate::config::ReplacerConfig;
use crate::error::ImageError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// reqwest-backed source. The client is built on first use and shared by
/// every worker afterwards.
pub struct HttpSource {
    client: OnceCell<Client>,
    timeout: Duration,
    max_redirects: usize,
    user_agent: String,
    accept: String,
    referer: Option<String>,
    referer_map: HashMap<String, String>,
}

impl HttpSource {
    pub fn new(config: &ReplacerConfig) -> Self {
        Self {
            client: OnceCell::new(),
            timeout: config.per_attempt_timeout,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
            accept: config.accept.clone(),
            referer: config.referer.clone(),
            referer_map: config.referer_map.clone(),
        }
    }

    /// Use a pre-built client instead of building one lazily.
    pub fn with_client(config: &ReplacerConfig, client: Client) -> Self {
        let source = Self::new(config);
        // A fresh cell cannot already be set.
        let _ = source.client.set(client);
        source
    }

    async fn client(&self) -> Result<&Client, ImageError> {
        self.client
            .get_or_try_init(|| async {
                tracing::debug!("Building HTTP client for image downloads");
                Client::builder()
                    .timeout(self.timeout)
                    .redirect(redirect::Policy::limited(self.max_redirects))
                    .build()
            })
            .await
            .map_err(|e| ImageError::network(None, format!("failed to build HTTP client: {}", e)))
    }

    /// Referer for a request: exact host, then host without `www.`, then a
    /// `*.domain.tld` wildcard, then the global referer.
    pub fn referer_for(&self, url: &str) -> Option<&str> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));

        if let Some(host) = host {
            if let Some(referer) = self.referer_map.get(&host) {
                return Some(referer);
            }
            if let Some(referer) = host
                .strip_prefix("www.")
                .and_then(|bare| self.referer_map.get(bare))
            {
                return Some(referer);
            }
            let labels: Vec<&str> = host.split('.').collect();
            if labels.len() >= 2 {
                let wildcard = format!("*.{}", labels[labels.len() - 2..].join("."));
                if let Some(referer) = self.referer_map.get(&wildcard) {
                    return Some(referer);
                }
            }
        }

        self.referer.as_deref()
    }
}

#[async_trait]
impl ImageSource for HttpSource {
    async fn get(&self, url: &str) -> Result<SourceResponse, ImageError> {
        let client = self.client().await?;

        let mut request = client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, &self.accept);
        if let Some(referer) = self.referer_for(url) {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!("Image request to {} failed: {}", url, e);
            ImageError::network(e.status().map(|s| s.as_u16()), e.to_string())
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| ImageError::network(None, format!("error reading body: {}", e)))
            .boxed();

        Ok(SourceResponse {
            status: status.as_u16(),
            content_type,
            content_length,
            body,
        })
    }
}
