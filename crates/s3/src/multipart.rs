//! Multipart transfer support
//!
//! Objects at or above the configured threshold move in parts: uploads via
//! S3 multipart upload, downloads via parallel ranged GETs written at their
//! offsets. A fixed number of parts are in flight at once and progress is
//! aggregated across them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_types::byte_stream::Length;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use loft_core::{Error, Progress, Result, TransferConfig};

use crate::error::map_sdk_error;

/// Minimum part size: 5 MiB (S3 requirement)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: u64 = 10_000;

/// Multipart transfer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Objects of at least this many bytes use multipart transfer
    pub threshold: u64,

    /// Part size in bytes
    pub part_size: u64,

    /// Parts in flight per transfer
    pub fan_out: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for MultipartConfig {
    fn from(config: &TransferConfig) -> Self {
        Self {
            threshold: config.multipart_threshold,
            part_size: config.chunk_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE),
            fan_out: config.fan_out.max(1),
        }
    }
}

impl MultipartConfig {
    /// Whether an object of `size` bytes should move in parts
    pub fn is_multipart(&self, size: u64) -> bool {
        size >= self.threshold && size > MIN_PART_SIZE
    }

    /// Part size for an object, grown if needed to stay within the part limit
    pub fn part_size_for(&self, size: u64) -> u64 {
        if size.div_ceil(self.part_size) <= MAX_PARTS {
            self.part_size
        } else {
            size.div_ceil(MAX_PARTS).clamp(MIN_PART_SIZE, MAX_PART_SIZE)
        }
    }

    /// Split `size` bytes into parts
    pub fn plan(&self, size: u64) -> Vec<Part> {
        let part_size = self.part_size_for(size);
        (0..size.div_ceil(part_size))
            .map(|i| {
                let start = i * part_size;
                Part {
                    number: i as i32 + 1,
                    start,
                    len: part_size.min(size - start),
                }
            })
            .collect()
    }
}

/// One byte range of a multipart transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// 1-based part number
    pub number: i32,
    pub start: u64,
    pub len: u64,
}

impl Part {
    /// HTTP range header value (inclusive end)
    pub fn range(&self) -> String {
        format!("bytes={}-{}", self.start, self.start + self.len - 1)
    }
}

/// Cumulative progress shared by concurrent parts
#[derive(Clone)]
pub(crate) struct SharedProgress {
    transferred: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    callback: Progress,
}

impl SharedProgress {
    pub(crate) fn new(callback: Progress) -> Self {
        Self {
            transferred: Arc::new(AtomicU64::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    /// Record `bytes` more; fails with `Cancelled` once the callback asks to stop
    pub(crate) fn advance(&self, bytes: u64) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let total = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if !self.callback.on_progress(total) {
            self.stopped.store(true, Ordering::SeqCst);
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn total(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }
}

/// Upload `source` in parts, aborting the upload on any failure
pub(crate) async fn upload(
    client: &aws_sdk_s3::Client,
    config: &MultipartConfig,
    bucket: &str,
    key: &str,
    source: &Path,
    size: u64,
    progress: Progress,
) -> Result<u64> {
    let content_type = mime_guess::from_path(key).first_or_octet_stream();
    let created = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .content_type(content_type.essence_str())
        .send()
        .await
        .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
    let upload_id = created
        .upload_id()
        .ok_or_else(|| Error::Remote("Store returned no multipart upload id".into()))?
        .to_string();

    let parts = config.plan(size);
    tracing::debug!(bucket, key, parts = parts.len(), %upload_id, "Multipart upload started");

    let shared = SharedProgress::new(progress);
    let uploaded = futures::stream::iter(parts)
        .map(|part| {
            let shared = shared.clone();
            let upload_id = upload_id.as_str();
            async move {
                let body = ByteStream::read_from()
                    .path(source)
                    .offset(part.start)
                    .length(Length::Exact(part.len))
                    .build()
                    .await
                    .map_err(|e| Error::General(format!("Reading part {}: {e}", part.number)))?;
                let response = client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part.number)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;
                shared.advance(part.len)?;
                Ok::<_, Error>(
                    CompletedPart::builder()
                        .part_number(part.number)
                        .set_e_tag(response.e_tag().map(String::from))
                        .build(),
                )
            }
        })
        .buffer_unordered(config.fan_out)
        .try_collect::<Vec<_>>()
        .await;

    let mut completed = match uploaded {
        Ok(completed) => completed,
        Err(e) => {
            abort(client, bucket, key, &upload_id).await;
            return Err(e);
        }
    };
    completed.sort_by_key(|p| p.part_number());

    let finished = client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(completed))
                .build(),
        )
        .send()
        .await;
    if let Err(e) = finished {
        abort(client, bucket, key, &upload_id).await;
        return Err(map_sdk_error(e, &format!("{bucket}/{key}")));
    }

    Ok(shared.total())
}

async fn abort(client: &aws_sdk_s3::Client, bucket: &str, key: &str, upload_id: &str) {
    let result = client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await;
    if let Err(e) = result {
        tracing::warn!(bucket, key, upload_id, "Failed to abort multipart upload: {e}");
    }
}

/// Download an object with parallel ranged GETs into a pre-sized file
pub(crate) async fn download(
    client: &aws_sdk_s3::Client,
    config: &MultipartConfig,
    bucket: &str,
    key: &str,
    destination: &Path,
    size: u64,
    progress: Progress,
) -> Result<u64> {
    let file = tokio::fs::File::create(destination).await?;
    file.set_len(size).await?;
    drop(file);

    let parts = config.plan(size);
    tracing::debug!(bucket, key, parts = parts.len(), "Ranged download started");

    let shared = SharedProgress::new(progress);
    futures::stream::iter(parts)
        .map(|part| {
            let shared = shared.clone();
            async move {
                let response = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .range(part.range())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &format!("{bucket}/{key}")))?;

                let mut file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(destination)
                    .await?;
                file.seek(std::io::SeekFrom::Start(part.start)).await?;

                let mut body = response.body;
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| Error::Remote(e.to_string()))?;
                    file.write_all(&chunk).await?;
                    shared.advance(chunk.len() as u64)?;
                }
                file.flush().await?;
                Ok::<_, Error>(())
            }
        })
        .buffer_unordered(config.fan_out)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(shared.total())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loft_core::progress_fn;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_default_config() {
        let config = MultipartConfig::default();
        assert_eq!(config.threshold, 32 * MIB);
        assert_eq!(config.part_size, 32 * MIB);
        assert_eq!(config.fan_out, 8);
    }

    #[test]
    fn test_part_size_clamping() {
        let transfer = TransferConfig {
            chunk_size: 1024,
            ..Default::default()
        };
        assert_eq!(MultipartConfig::from(&transfer).part_size, MIN_PART_SIZE);
    }

    #[test]
    fn test_threshold() {
        let config = MultipartConfig::default();
        assert!(!config.is_multipart(32 * MIB - 1));
        assert!(config.is_multipart(32 * MIB));
    }

    #[test]
    fn test_plan_covers_object() {
        let config = MultipartConfig::default();
        let parts = config.plan(70 * MIB);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].number, 1);
        assert_eq!(parts[2].start, 64 * MIB);
        assert_eq!(parts[2].len, 6 * MIB);
        assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), 70 * MIB);
        assert_eq!(parts[0].range(), format!("bytes=0-{}", 32 * MIB - 1));
    }

    #[test]
    fn test_part_size_grows_for_huge_objects() {
        let config = MultipartConfig::default();
        let huge = 32 * MIB * 20_000;
        let parts = config.plan(huge);
        assert!(parts.len() as u64 <= MAX_PARTS);
        assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), huge);
    }

    #[test]
    fn test_shared_progress_aggregates_and_stops() {
        let shared = SharedProgress::new(progress_fn(|total| total < 100));
        assert!(shared.advance(40).is_ok());
        assert!(shared.clone().advance(40).is_ok());
        assert_eq!(shared.total(), 80);
        assert!(matches!(shared.advance(40), Err(Error::Cancelled)));
        assert!(matches!(shared.advance(1), Err(Error::Cancelled)));
    }
}
