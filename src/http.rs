//! JSON-over-HTTP helper shared by the embedding and chat backends.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Connection errors → retry
//! - Timeouts → fail immediately with [`BuddyError::ProviderTimeout`]
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;

use crate::error::{single_line, BuddyError, Result};

/// Build a client whose requests expire after `timeout_secs`.
pub(crate) fn client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BuddyError::provider(provider, format!("HTTP client setup failed: {}", e)))
}

/// POST `body` to `url` and decode the JSON response, retrying transient failures.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout_secs: u64,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| {
                        if e.is_timeout() {
                            timeout(provider, timeout_secs)
                        } else {
                            BuddyError::provider(provider, format!("invalid JSON response: {}", e))
                        }
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = BuddyError::provider(
                    provider,
                    format!("API error {}: {}", status, single_line(&body_text)),
                );

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(provider, %status, "transient API error");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) if e.is_timeout() => return Err(timeout(provider, timeout_secs)),
            Err(e) => {
                tracing::warn!(provider, error = %e, "request failed");
                last_err = Some(BuddyError::provider(
                    provider,
                    format!("connection error ({}): {}", url, e),
                ));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| BuddyError::provider(provider, "request failed after retries")))
}

fn timeout(provider: &str, secs: u64) -> BuddyError {
    BuddyError::ProviderTimeout {
        provider: provider.to_string(),
        secs,
    }
}
