//! HTTP time source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use epochsync_config::ClockSettings;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::{TimeSource, TimeSourceError, TimeSourceResult, parse_time_response};

/// Time source backed by a GET request to a time endpoint
#[derive(Debug, Clone)]
pub struct HttpTimeSource {
    client: Client,
    url: String,
    field: String,
}

impl HttpTimeSource {
    pub fn new(settings: &ClockSettings) -> TimeSourceResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.request_timeout)
            .build()
            .map_err(|e| TimeSourceError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            url: settings.time_url.clone(),
            field: settings.time_field.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TimeSource for HttpTimeSource {
    async fn fetch_server_time(&self) -> TimeSourceResult<DateTime<Utc>> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json, text/plain")
            .send()
            .await
            .map_err(|e| TimeSourceError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %self.url, status = %status, "Time endpoint returned error status");
            return Err(TimeSourceError::BadStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TimeSourceError::RequestFailed(e.to_string()))?;

        parse_time_response(&body, &self.field)
    }

    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }
}
