//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from loft-core.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::io::AsyncWriteExt;

use loft_core::traits::{BatchDeleteResult, KeyError};
use loft_core::{
    BucketInfo, Error, ListOptions, ListPage, ObjectInfo, ObjectStore, Profile, Progress, Result,
};

use crate::error::map_sdk_error;
use crate::multipart::{self, MultipartConfig};

/// Characters left as-is in `x-amz-copy-source`: unreserved plus the key delimiter
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `bucket/key` with the key percent-encoded as S3 expects for server-side copies
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_ENCODE_SET))
}

fn timestamp(dt: &aws_sdk_s3::primitives::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(dt.secs()).ok()
}

fn etag(raw: Option<&str>) -> Option<String> {
    raw.map(|e| e.trim_matches('"').to_string())
}

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    multipart: MultipartConfig,
}

impl S3Client {
    /// Create a new S3 client from a credential profile
    pub async fn new(profile: &Profile, multipart: MultipartConfig) -> Result<Self> {
        profile.validate()?;

        let credentials = aws_credential_types::Credentials::new(
            profile.access_key.clone(),
            profile.secret_key.clone(),
            None, // session token
            None, // expiry
            "loft-profile",
        );

        let timeouts = profile.timeout_config();
        let timeout_config = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(Duration::from_millis(timeouts.connect_ms))
            .read_timeout(Duration::from_millis(timeouts.read_ms))
            .build();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(profile.region.clone()))
            .timeout_config(timeout_config);
        if let Some(endpoint) = &profile.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(profile.path_style)
            .build();

        tracing::debug!(
            profile = %profile.name,
            region = %profile.region,
            endpoint = ?profile.endpoint,
            "S3 client configured"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            multipart,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    async fn get_single(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        progress: Progress,
    ) -> Result<u64> {
        let response = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::Remote(format!("{bucket}/{key}: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if !progress.on_progress(written) {
                file.flush().await?;
                return Err(Error::Cancelled);
            }
        }
        file.flush().await?;
        Ok(written)
    }

    /// Single PUT. Progress is reported once the request completes, so the
    /// callback cannot cancel an upload below the multipart threshold.
    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        size: u64,
        progress: Progress,
    ) -> Result<u64> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::General(format!("Reading {}: {e}", source.display())))?;
        let content_type = mime_guess::from_path(key).first_or_octet_stream();

        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type.essence_str())
            .body(body)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;

        progress.on_progress(size);
        Ok(size)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self
            .inner
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "list buckets"))?;

        Ok(response
            .buckets()
            .iter()
            .map(|b| BucketInfo {
                name: b.name().unwrap_or_default().to_string(),
                created: b.creation_date().and_then(timestamp),
            })
            .collect())
    }

    async fn list_page(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        let mut request = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&options.prefix);

        if let Some(delimiter) = &options.delimiter {
            request = request.delimiter(delimiter);
        }
        if let Some(max) = options.max_keys {
            request = request.max_keys(max);
        }
        if let Some(token) = &options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{}", options.prefix)))?;

        let prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(String::from))
            .collect();

        let objects = response
            .contents()
            .iter()
            .map(|object| ObjectInfo {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or(0).max(0) as u64,
                last_modified: object.last_modified().and_then(timestamp),
                etag: etag(object.e_tag()),
            })
            .collect();

        Ok(ListPage {
            prefixes,
            objects,
            truncated: response.is_truncated().unwrap_or(false),
            next_token: response.next_continuation_token().map(String::from),
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let response = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(timestamp),
            etag: etag(response.e_tag()),
        })
    }

    async fn get_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        progress: Progress,
    ) -> Result<u64> {
        let size = self.head_object(bucket, key).await?.size;
        if self.multipart.is_multipart(size) {
            multipart::download(
                &self.inner,
                &self.multipart,
                bucket,
                key,
                destination,
                size,
                progress,
            )
            .await
        } else {
            self.get_single(bucket, key, destination, progress).await
        }
    }

    async fn put_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        progress: Progress,
    ) -> Result<u64> {
        let size = tokio::fs::metadata(source).await?.len();
        if self.multipart.is_multipart(size) {
            multipart::upload(
                &self.inner,
                &self.multipart,
                bucket,
                key,
                source,
                size,
                progress,
            )
            .await
        } else {
            self.put_single(bucket, key, source, size, progress).await
        }
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<BatchDeleteResult> {
        if keys.is_empty() {
            return Ok(BatchDeleteResult::default());
        }

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::General(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| Error::General(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket))?;

        Ok(BatchDeleteResult {
            deleted: response
                .deleted()
                .iter()
                .filter_map(|d| d.key().map(String::from))
                .collect(),
            errors: response
                .errors()
                .iter()
                .map(|e| KeyError {
                    key: e.key().unwrap_or_default().to_string(),
                    message: format!(
                        "{}: {}",
                        e.code().unwrap_or("Error"),
                        e.message().unwrap_or_default()
                    ),
                })
                .collect(),
        })
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.inner
            .copy_object()
            .copy_source(copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{src_bucket}/{src_key}")))?;
        Ok(())
    }
}
