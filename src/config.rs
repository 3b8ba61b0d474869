//! Pipeline and CDN configuration.

use crate::mime::media_type_essence;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_REDIRECTS: usize = 3;
pub const DEFAULT_ALLOWED_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Settings for one [`ImageReplacer`](crate::replacer::ImageReplacer).
#[derive(Debug, Clone)]
pub struct ReplacerConfig {
    /// Hard cap on the bytes read for a single image.
    pub max_bytes: u64,
    /// Time allowed for one download attempt.
    pub per_attempt_timeout: Duration,
    /// Maximum number of downloads in flight.
    pub concurrency: usize,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Accepted `Content-Type` essences, e.g. `image/png`.
    pub allowed_mime_types: BTreeSet<String>,
    pub user_agent: String,
    pub accept: String,
    /// Referer sent when no per-host entry matches.
    pub referer: Option<String>,
    /// Per-host referers. Keys are hosts (`img.example.com`), bare domains
    /// (`example.com`, also matching `www.example.com`) or wildcards
    /// (`*.example.com`).
    pub referer_map: HashMap<String, String>,
    pub max_redirects: usize,
}

impl Default for ReplacerConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            per_attempt_timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            allowed_mime_types: DEFAULT_ALLOWED_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            referer: None,
            referer_map: HashMap::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl ReplacerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the accepted types. Values are normalised to their essence;
    /// unparsable entries are kept verbatim so [`validate`](Self::validate)
    /// can report them.
    pub fn with_allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_mime_types = types
            .into_iter()
            .map(|t| media_type_essence(t.as_ref()).unwrap_or_else(|| t.as_ref().to_string()))
            .collect();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_host_referer(mut self, host: impl Into<String>, referer: impl Into<String>) -> Self {
        self.referer_map.insert(host.into(), referer.into());
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Budget for a whole batch: every attempt of the slowest task.
    pub fn batch_deadline(&self) -> Duration {
        self.per_attempt_timeout
            .saturating_mul(self.max_retries.saturating_add(1))
    }

    pub fn is_allowed_type(&self, essence: &str) -> bool {
        self.allowed_mime_types.contains(essence)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.max_bytes == 0 {
            return Err(Error::Config("max_bytes must be greater than 0".to_string()));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(Error::Config(
                "per-attempt timeout must be greater than 0".to_string(),
            ));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(Error::Config(
                "at least one allowed image type is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .allowed_mime_types
            .iter()
            .find(|t| media_type_essence(t).as_deref() != Some(t.as_str()))
        {
            return Err(Error::Config(format!("invalid media type: {}", bad)));
        }
        if self.referer_map.keys().any(|host| host.trim().is_empty()) {
            return Err(Error::Config("referer host must not be empty".to_string()));
        }
        Ok(())
    }

    /// Defaults overridden by `RICHTEXT_IMG_*` environment variables
    /// (a `.env` file is honoured).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(max_bytes) = env_parse("RICHTEXT_IMG_MAX_BYTES")? {
            config.max_bytes = max_bytes;
        }
        if let Some(secs) = env_parse::<u64>("RICHTEXT_IMG_TIMEOUT_SECS")? {
            config.per_attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(concurrency) = env_parse("RICHTEXT_IMG_CONCURRENCY")? {
            config.concurrency = concurrency;
        }
        if let Some(max_retries) = env_parse("RICHTEXT_IMG_MAX_RETRIES")? {
            config.max_retries = max_retries;
        }
        if let Some(max_redirects) = env_parse("RICHTEXT_IMG_MAX_REDIRECTS")? {
            config.max_redirects = max_redirects;
        }
        if let Ok(types) = std::env::var("RICHTEXT_IMG_ALLOWED_TYPES") {
            config = config.with_allowed_types(
                types.split(',').map(str::trim).filter(|t| !t.is_empty()),
            );
        }
        if let Ok(user_agent) = std::env::var("RICHTEXT_IMG_USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Ok(referer) = std::env::var("RICHTEXT_IMG_REFERER") {
            config.referer = Some(referer);
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} is invalid ({}): {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

/// S3-compatible storage settings for [`CdnClient`](crate::cdn::CdnClient).
#[derive(Debug, Clone)]
pub struct CdnConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub base_url: String,
    pub key_prefix: String,
}

impl CdnConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            access_key_id: std::env::var("CDN_ACCESS_KEY_ID")
                .map_err(|_| Error::Config("CDN_ACCESS_KEY_ID not set".to_string()))?,
            secret_access_key: std::env::var("CDN_SECRET_ACCESS_KEY")
                .map_err(|_| Error::Config("CDN_SECRET_ACCESS_KEY not set".to_string()))?,
            endpoint: std::env::var("CDN_ENDPOINT")
                .unwrap_or_else(|_| "https://nyc3.digitaloceanspaces.com".to_string()),
            bucket: std::env::var("CDN_BUCKET").unwrap_or_else(|_| "richtext-img".to_string()),
            base_url: cdn_base_url_from_env(),
            key_prefix: std::env::var("CDN_KEY_PREFIX").unwrap_or_else(|_| "images".to_string()),
        })
    }
}

/// Public base URL, also used by dry runs that never touch S3.
pub fn cdn_base_url_from_env() -> String {
    std::env::var("CDN_BASE_URL").unwrap_or_else(|_| "https://cdn.example.com".to_string())
}
