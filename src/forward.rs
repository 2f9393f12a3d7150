//! Payload forwarding to the local message sink.
//!
//! The bridge does not interpret device payloads; it hands them to a
//! companion service over loopback HTTP. Transient sink failures are
//! retried with exponential backoff and jitter up to a small ceiling,
//! then surfaced as a gateway failure. Retries re-send the already
//! verified payload and never re-enter the authentication layer, so a
//! retry cannot trip the nonce or timestamp checks of the original
//! request.

use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::error::ForwardError;

/// Retry behavior for sink delivery.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Base URL of the sink service.
    pub sink_url: String,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
}

/// Delivers opaque payloads to the message sink.
pub struct MessageForwarder {
    client: reqwest::Client,
    config: ForwardConfig,
}

impl MessageForwarder {
    pub fn new(config: ForwardConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client with static config");
        Self { client, config }
    }

    /// Forward one payload on behalf of an authenticated device.
    ///
    /// Returns the sink's JSON response. 5xx responses and connection
    /// errors are retried; a 4xx means the sink understood and refused,
    /// which no retry will fix.
    pub async fn forward(&self, device_id: &str, payload: Value) -> Result<Value, ForwardError> {
        let envelope = serde_json::json!({
            "message_id": Uuid::new_v4(),
            "device_id": device_id,
            "payload": payload,
        });
        let url = format!("{}/messages", self.config.sink_url.trim_end_matches('/'));

        let mut last_error = String::new();
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.config.base_delay, attempt - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying sink delivery"
                );
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&url).json(&envelope).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json().await.unwrap_or(Value::Null));
                }
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("sink returned {}", response.status());
                }
                Ok(response) => {
                    return Err(ForwardError::SinkRejected {
                        status: response.status().as_u16(),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(ForwardError::SinkUnavailable {
            attempts: self.config.max_attempts,
            last_error,
        })
    }
}

/// Exponential backoff with additive jitter: `base * 2^attempt`, capped
/// at 30s, plus up to 25% decorrelation.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp_ms = (base.as_millis() as u64)
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
        .min(30_000);

    let jitter_range = exp_ms / 4;
    let jitter = if jitter_range > 0 {
        // Time-seeded jitter keeps retries decorrelated without
        // reaching for a full RNG here.
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_range + 1)
    } else {
        0
    };

    Duration::from_millis(exp_ms + jitter)
}
