//! A single download attempt: fetch, cap, validate, persist and upload.

use crate::cdn::CdnService;
use crate::config::ReplacerConfig;
use crate::error::ImageError;
use crate::mime::{detect_image_format, media_type_essence, ImageFormat, SNIFF_LEN};
use crate::scratch::ScratchArea;
use crate::source::{ByteStream, ImageSource};
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::debug;

/// Everything a worker needs to process one URL.
pub struct Fetcher {
    source: Arc<dyn ImageSource>,
    cdn: Arc<dyn CdnService>,
    scratch: Arc<ScratchArea>,
    config: Arc<ReplacerConfig>,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn ImageSource>,
        cdn: Arc<dyn CdnService>,
        scratch: Arc<ScratchArea>,
        config: Arc<ReplacerConfig>,
    ) -> Self {
        Self {
            source,
            cdn,
            scratch,
            config,
        }
    }

    /// One full attempt. Returns the location reported by the uploader.
    pub async fn fetch_and_persist(&self, url: &str) -> Result<String, ImageError> {
        let timeout = self.config.per_attempt_timeout;
        let (bytes, format) = match tokio::time::timeout(timeout, self.download(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ImageError::network(
                    None,
                    format!("timed out after {:?}", timeout),
                ))
            }
        };
        debug!("Validated {} ({} bytes, {})", url, bytes.len(), format.mime_type());

        // The guard deletes the file even if this future is dropped mid-upload.
        let file = self.scratch.write_image(&bytes, format).await?;
        drop(bytes);

        let uploaded = self
            .cdn
            .upload_file(file.path())
            .await
            .map_err(|e| ImageError::Persistence(e.to_string()));

        file.remove().await;
        uploaded
    }

    /// Fetch `url` and return its bytes once they pass every check.
    pub async fn download(&self, url: &str) -> Result<(Vec<u8>, ImageFormat), ImageError> {
        let response = self.source.get(url).await?;

        if !response.is_success() {
            return Err(ImageError::network(
                Some(response.status),
                format!("HTTP {} for {}", response.status, url),
            ));
        }

        let limit = self.config.max_bytes;
        if let Some(declared) = response.content_length {
            if declared > limit {
                debug!("{} declares {} bytes, over the {} byte limit", url, declared, limit);
                return Err(ImageError::TooLarge { limit });
            }
        }

        let bytes = read_capped(response.body, limit).await?;
        if bytes.is_empty() {
            return Err(ImageError::InvalidContent("empty response body".to_string()));
        }

        let format = validate_image(response.content_type.as_deref(), &bytes, &self.config)?;
        Ok((bytes, format))
    }
}

/// Collect `body`, failing with `TooLarge` as soon as more than `limit` bytes
/// have arrived. The rest of the stream is never polled.
pub async fn read_capped(mut body: ByteStream, limit: u64) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.try_next().await? {
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(ImageError::TooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Check the declared type against the allow-list and the leading bytes
/// against the declared type.
pub fn validate_image(
    content_type: Option<&str>,
    bytes: &[u8],
    config: &ReplacerConfig,
) -> Result<ImageFormat, ImageError> {
    let raw = content_type
        .ok_or_else(|| ImageError::UnsupportedType("missing Content-Type".to_string()))?;
    let essence = media_type_essence(raw)
        .ok_or_else(|| ImageError::UnsupportedType(raw.to_string()))?;

    if !config.is_allowed_type(&essence) {
        return Err(ImageError::UnsupportedType(essence));
    }

    let declared = ImageFormat::from_mime(&essence).ok_or_else(|| {
        ImageError::InvalidContent(format!("no known signature for {}", essence))
    })?;

    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    match detect_image_format(head) {
        Some(detected) if detected == declared => Ok(declared),
        Some(detected) => Err(ImageError::InvalidContent(format!(
            "declared {} but content is {}",
            essence,
            detected.mime_type()
        ))),
        None => Err(ImageError::InvalidContent(format!(
            "content does not match any image signature (declared {})",
            essence
        ))),
    }
}
