//! Progress Notifier: best-effort outbound HTTP callbacks about job progress.
//!
//! Fire-and-forget by design — a notification failure never fails or stalls a job. Retries
//! are intentionally shallow and asymmetric: a 5xx probably means the receiver is briefly
//! overloaded (worth a couple of quick retries), a connect error probably means it's still
//! starting up (worth backing off more), and a timeout means something is already slow
//! enough that retrying immediately would just make it worse.

#![cfg(feature = "notifier-http")]

use std::time::Duration;

use serde::Serialize;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum NotificationPayload {
    Started {
        job_id: String,
        timestamp: String,
        total_chunks: usize,
    },
    ChunkCompleted {
        job_id: String,
        timestamp: String,
        chunk_index: usize,
        progress_percent: f32,
    },
    Completed {
        job_id: String,
        timestamp: String,
        chunk_count: usize,
    },
    Failed {
        job_id: String,
        timestamp: String,
        error_message: String,
    },
    Cancelled {
        job_id: String,
        timestamp: String,
    },
}

pub struct ProgressNotifier {
    client: reqwest::Client,
    target_url: Option<String>,
}

impl ProgressNotifier {
    pub fn new(target_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .expect("reqwest client with static timeouts should always build");

        Self { client, target_url }
    }

    /// Send `payload` to the configured URL, retrying per the policy described at the top of
    /// this module. Errors are logged and swallowed; this never returns a value the caller
    /// needs to act on.
    pub async fn notify(&self, payload: NotificationPayload) {
        let Some(url) = self.target_url.as_deref() else {
            return;
        };

        if let Err(e) = self.send_with_retries(url, &payload).await {
            tracing::warn!(error = %e, "progress notification failed after retries");
        }
    }

    async fn send_with_retries(&self, url: &str, payload: &NotificationPayload) -> Result<(), String> {
        let mut last_error = String::new();
        let mut backoff = Duration::from_millis(500);
        let mut retries_left: i32 = -1; // classified on the first attempt

        loop {
            let outcome = self.client.post(url).json(payload).send().await;

            let (is_retryable, doubles_backoff) = match &outcome {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = format!("server error: {}", resp.status());
                    if retries_left < 0 {
                        retries_left = 2; // 5xx: two retries, fixed backoff
                    }
                    (true, false)
                }
                Ok(resp) => return Err(format!("client error: {}", resp.status())), // 4xx: no retry
                Err(e) if e.is_timeout() => {
                    return Err(format!("timeout: {e}")); // timeout: no retry
                }
                Err(e) if e.is_connect() => {
                    last_error = format!("connect error: {e}");
                    if retries_left < 0 {
                        retries_left = 1; // connect error: one retry, doubled backoff
                    }
                    (true, true)
                }
                Err(e) => return Err(e.to_string()),
            };

            if !is_retryable || retries_left == 0 {
                return Err(last_error);
            }

            retries_left -= 1;
            tokio::time::sleep(backoff).await;
            if doubles_backoff {
                backoff *= 2;
            }
        }
    }
}
