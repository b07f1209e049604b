//! Content-addressable blob store seam with retried downloads

use crate::error::{RecoveryError, RecoveryResult};
use crate::types::StorageBlob;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Client for the content-addressable store
///
/// Every method is single-attempt. Upload retries are the caller's
/// responsibility: re-uploading identical bytes is idempotent under content
/// addressing. Downloads are wrapped by [`download_with_retry`].
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Upload a payload; returns its content handle and byte length
    async fn put(
        &self,
        bytes: Vec<u8>,
        name: &str,
        tags: &HashMap<String, String>,
    ) -> RecoveryResult<StorageBlob>;

    /// Download the payload behind a content handle
    async fn get(&self, content_handle: &str) -> RecoveryResult<Vec<u8>>;

    /// Hint that the content may be reclaimed; content may remain available
    /// afterwards, so failure here is never a correctness problem
    async fn unpin(&self, content_handle: &str) -> RecoveryResult<()>;
}

/// Bounded exponential backoff for transient download failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first try
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Download with bounded exponential backoff; the final failure carries the
/// last error and the attempt count
pub async fn download_with_retry(
    client: &dyn BlobClient,
    content_handle: &str,
    policy: &RetryPolicy,
) -> RecoveryResult<Vec<u8>> {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        match client.get(content_handle).await {
            Ok(bytes) => {
                debug!(content_handle, attempt, "blob download succeeded");
                return Ok(bytes);
            }
            Err(err) => {
                last_error = err.to_string();
                warn!(
                    content_handle,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %last_error,
                    "blob download attempt failed"
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    Err(RecoveryError::DownloadExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Unpin a blob, logging instead of propagating on failure
pub async fn unpin_best_effort(client: &dyn BlobClient, content_handle: &str) {
    if let Err(err) = client.unpin(content_handle).await {
        warn!(content_handle, error = %err, "blob unpin failed; continuing");
    }
}
