//! Shared helpers for user-facing formatting and Telegram API retries.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Format a byte count for user-facing messages.
///
/// # Examples
///
/// ```
/// use image_ai_bot::utils::format_file_size;
/// assert_eq!(format_file_size(0), "0 B");
/// assert_eq!(format_file_size(20 * 1024 * 1024), "20.0 MB");
/// ```
#[must_use]
pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }

    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = size_bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{size_bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Intended for file operations (`get_file` + `download_file`) that can fail
/// on transient network errors. Backoff starts at 500ms, is capped at 4s,
/// and is jittered to avoid thundering herd.
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_format_file_size_units() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(20 * 1024 * 1024), "20.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);

        let result: Result<&str> = retry_telegram_operation(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok("downloaded")
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "downloaded");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = retry_telegram_operation(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("permanent")) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus the configured retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
