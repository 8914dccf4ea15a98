//! Time source trait and response parsing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use epochsync_util::from_unix_millis;
use serde_json::Value;
use thiserror::Error;

/// Errors from a time source exchange
#[derive(Debug, Clone, Error)]
pub enum TimeSourceError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected HTTP status: {0}")]
    BadStatus(u16),

    #[error("Malformed time response: {0}")]
    Malformed(String),

    #[error("Client setup failed: {0}")]
    Setup(String),
}

pub type TimeSourceResult<T> = Result<T, TimeSourceError>;

/// Authoritative clock. Requests must be idempotent and side-effect free.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Ask the server for its current time
    async fn fetch_server_time(&self) -> TimeSourceResult<DateTime<Utc>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Parse a time endpoint response body.
///
/// Accepted shapes: a bare millisecond number, an RFC 3339 string, or a JSON
/// object whose `field` holds either of those.
pub fn parse_time_response(body: &str, field: &str) -> TimeSourceResult<DateTime<Utc>> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TimeSourceError::Malformed("empty body".into()));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get(field) {
            Some(value) => parse_time_value(value),
            None => Err(TimeSourceError::Malformed(format!(
                "field '{}' missing from response",
                field
            ))),
        },
        Ok(value) => parse_time_value(&value),
        // Plain-text RFC 3339 bodies are not valid JSON
        Err(_) => parse_time_text(body),
    }
}

fn parse_time_value(value: &Value) -> TimeSourceResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
                .ok_or_else(|| TimeSourceError::Malformed(format!("unusable number {}", n)))?;
            millis_to_instant(millis)
        }
        Value::String(s) => parse_time_text(s),
        other => Err(TimeSourceError::Malformed(format!(
            "expected a timestamp, got {}",
            other
        ))),
    }
}

fn parse_time_text(text: &str) -> TimeSourceResult<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(millis) = text.parse::<i64>() {
        return millis_to_instant(millis);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimeSourceError::Malformed(format!("'{}': {}", text, e)))
}

fn millis_to_instant(millis: i64) -> TimeSourceResult<DateTime<Utc>> {
    if millis <= 0 {
        return Err(TimeSourceError::Malformed(format!(
            "non-positive timestamp {}",
            millis
        )));
    }
    from_unix_millis(millis)
        .ok_or_else(|| TimeSourceError::Malformed(format!("timestamp {} out of range", millis)))
}
