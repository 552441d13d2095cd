//! Shared HTTP plumbing for the network adapters.
//!
//! Every adapter funnels its request through [`SupplierHttp::send_json`], so
//! transport failures and HTTP status codes are classified the same way for
//! all suppliers:
//!
//! | Condition                         | SupplierError          | Retryable |
//! |-----------------------------------|------------------------|-----------|
//! | client timeout / 408              | `Timeout`              | yes       |
//! | connect/IO failure                | `Network`              | yes       |
//! | 429                               | `RateLimited`          | yes       |
//! | 5xx                               | `Unavailable`          | yes       |
//! | 401 / 403                         | `InvalidCredentials`   | no        |
//! | other 4xx                         | keyword classification | no*       |
//! | 2xx with a non-JSON body          | `UnexpectedResponse`   | no        |
//!
//! (*) unless the rejection message reads like a rate limit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;

use orderflow_fulfillment::SupplierError;

const MAX_MESSAGE_LEN: usize = 500;

/// HTTP client shared by the network adapters.
#[derive(Debug, Clone)]
pub struct SupplierHttp {
    client: reqwest::Client,
}

impl SupplierHttp {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SupplierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("orderflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SupplierError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request and decode a JSON success body.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<JsonValue, SupplierError> {
        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            SupplierError::UnexpectedResponse(format!(
                "undecodable {status} body ({e}): {}",
                truncate(&body)
            ))
        })
    }
}

/// Map a reqwest failure (no HTTP status) to a retryable error.
pub fn classify_transport_error(err: reqwest::Error) -> SupplierError {
    if err.is_timeout() {
        SupplierError::Timeout(err.to_string())
    } else {
        SupplierError::Network(err.to_string())
    }
}

/// Map a non-success HTTP status to a supplier error.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SupplierError {
    let message = extract_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("no message")
            .to_string()
    });

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            SupplierError::Timeout(format!("{status}: {message}"))
        }
        StatusCode::TOO_MANY_REQUESTS => SupplierError::RateLimited {
            message,
            retry_after: parse_retry_after(headers, Utc::now()),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SupplierError::InvalidCredentials(message)
        }
        s if s.is_server_error() => SupplierError::Unavailable {
            status: s.as_u16(),
            message,
        },
        s => classify_rejection(s.as_u16(), &message),
    }
}

/// Classify a rejection message by keyword.
///
/// Suppliers report business failures as free text (sometimes with a 200
/// status), so this is best-effort; anything unrecognized is a plain
/// non-retryable rejection.
pub fn classify_rejection(status: u16, message: &str) -> SupplierError {
    let lower = message.to_ascii_lowercase();
    let has = |stems: &[&str]| stems.iter().any(|stem| starts_word(&lower, stem));

    if has(&["too many requests", "too many calls", "rate limit", "frequency", "throttl"]) {
        SupplierError::RateLimited {
            message: message.to_string(),
            retry_after: None,
        }
    } else if has(&["token", "credential", "unauthori", "signature", "api key", "apikey"]) {
        SupplierError::InvalidCredentials(message.to_string())
    } else if has(&["stock", "inventory", "sold out"]) {
        SupplierError::OutOfStock(message.to_string())
    } else if has(&["address", "zip", "postal", "country", "province", "city"]) {
        SupplierError::InvalidAddress(message.to_string())
    } else {
        SupplierError::Rejected {
            status,
            message: message.to_string(),
        }
    }
}

/// Whether `stem` occurs in `haystack` at the start of a word.
fn starts_word(haystack: &str, stem: &str) -> bool {
    haystack.match_indices(stem).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_alphanumeric())
    })
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

/// Best-effort human-readable message out of an error body.
fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<JsonValue>(trimmed) {
        for key in ["message", "error_description", "errorMessage", "msg", "error"] {
            match json.get(key) {
                Some(JsonValue::String(s)) if !s.is_empty() => return Some(truncate(s)),
                Some(JsonValue::Object(inner)) => {
                    if let Some(JsonValue::String(s)) = inner.get("message") {
                        return Some(truncate(s));
                    }
                }
                _ => {}
            }
        }
    }
    Some(truncate(trimmed))
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
