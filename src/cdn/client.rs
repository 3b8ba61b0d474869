use super::CdnService;
use crate::config::CdnConfig;
use crate::mime::ImageFormat;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, types::ObjectCannedAcl, Client as S3Client};
use std::path::Path;

/// Uploads images to an S3-compatible bucket with public-read access.
pub struct CdnClient {
    client: S3Client,
    bucket: String,
    base_url: String,
    key_prefix: String,
}

impl CdnClient {
    pub async fn new(config: CdnConfig) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "richtext-img-cdn",
        );

        // Spaces-style endpoints ignore the region, but the SDK requires one.
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .endpoint_url(config.endpoint)
            .load()
            .await;

        Ok(Self {
            client: S3Client::new(&sdk_config),
            bucket: config.bucket,
            base_url: config.base_url,
            key_prefix: config.key_prefix,
        })
    }

    fn object_key(&self, file_name: &str) -> String {
        object_key(&self.key_prefix, file_name)
    }

    fn get_public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
        .map(ImageFormat::mime_type)
        .unwrap_or("application/octet-stream")
}

#[async_trait]
impl CdnService for CdnClient {
    async fn upload_file(&self, local_path: &Path) -> Result<String> {
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::S3(format!("Invalid upload path: {}", local_path.display()))
            })?;
        let key = self.object_key(file_name);

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| Error::S3(format!("Failed to open {}: {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(content_type_for(local_path))
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| Error::S3(format!("Failed to upload file: {}", e)))?;

        tracing::debug!("Uploaded {} as {}", local_path.display(), key);
        Ok(self.get_public_url(&key))
    }
}
