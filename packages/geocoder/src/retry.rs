//! HTTP retry helper for transient errors.
//!
//! Geocoding calls use [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly. Unlike a bulk-download
//! pipeline, the coordinate resolver sits inside a rate-limited worker
//! pool, so the retry budget is deliberately small: one extra attempt
//! per call, after a short fixed pause. Anything still failing falls
//! through to the next strategy in the fallback chain.

use std::time::Duration;

use crate::GeocodeError;

/// Extra attempts after the first failure.
const MAX_RETRIES: u32 = 1;

/// Pause before the retry attempt.
const RETRY_PAUSE: Duration = Duration::from_millis(400);

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by
/// `.send()`).
///
/// Retries once on connection errors, timeouts, HTTP 429, and HTTP 5xx.
/// Other 4xx statuses are permanent and surface immediately.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the request fails after the retry, the
/// server returns a non-retryable status, or the body is not valid
/// JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, GeocodeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<GeocodeError> = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            log::debug!("  geocode retry {attempt}/{MAX_RETRIES} in {RETRY_PAUSE:?}...");
            tokio::time::sleep(RETRY_PAUSE).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                if is_transient(&e) && attempt < MAX_RETRIES {
                    log::debug!("  transient geocode error: {e}");
                    last_error = Some(GeocodeError::Http(e));
                    continue;
                }
                return Err(GeocodeError::Http(e));
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if attempt < MAX_RETRIES {
                log::debug!("  HTTP 429 (rate limited)");
                last_error = Some(GeocodeError::RateLimited);
                continue;
            }
            return Err(GeocodeError::RateLimited);
        }

        if status.is_server_error() {
            if attempt < MAX_RETRIES {
                log::debug!("  HTTP {status} (server error)");
                last_error = Some(GeocodeError::Status {
                    code: status.to_string(),
                });
                continue;
            }
            return Err(GeocodeError::Status {
                code: status.to_string(),
            });
        }

        if status.is_client_error() {
            return Err(GeocodeError::Status {
                code: status.to_string(),
            });
        }

        return response.json().await.map_err(GeocodeError::Http);
    }

    Err(last_error.unwrap_or(GeocodeError::Parse {
        message: "request failed after all retries".to_string(),
    }))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
