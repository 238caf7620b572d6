//! Periodic self-ping
//!
//! Hosting platforms that idle inactive services are kept awake by fetching
//! our own public URL on a fixed interval.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Ping `url` every `interval` until the task is aborted
pub fn spawn(url: String, interval: Duration) -> Result<JoinHandle<()>, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(PING_TIMEOUT).build()?;

    Ok(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(url = %url, interval_secs = interval.as_secs(), "Keepalive started");

        loop {
            ticker.tick().await;
            match client.get(&url).send().await {
                Ok(response) => {
                    tracing::debug!(status = response.status().as_u16(), "Keepalive ping");
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!("Keepalive ping timed out");
                }
                Err(e) => {
                    tracing::warn!("Keepalive ping failed: {}", e);
                }
            }
        }
    }))
}
