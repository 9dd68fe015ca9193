//! Readiness poll run before the first connection attempt.

use std::time::Duration;

use lvs_protocol::StatusResponse;

/// Polls performed before giving up.
pub const STATUS_ATTEMPTS: u32 = 10;

/// Delay between polls.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `url` until it reports `ready`.
///
/// Returns `false` after `attempts` polls without a ready answer. Transport
/// and decoding failures count as not ready.
pub async fn wait_until_ready(
    http: &reqwest::Client,
    url: &str,
    attempts: u32,
    interval: Duration,
) -> bool {
    for attempt in 1..=attempts {
        match poll(http, url).await {
            Ok(status) if status.ready => return true,
            Ok(_) => tracing::debug!(attempt, "Server not ready"),
            Err(e) => tracing::debug!(attempt, error = %e, "Status poll failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

async fn poll(http: &reqwest::Client, url: &str) -> Result<StatusResponse, crate::ClientError> {
    let body = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(serde_json::from_str(&body)?)
}
