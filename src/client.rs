//! Outbound client for `response_url` deliveries

use crate::{Result, SlashConfig, SlashError, SlashMessage};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where replies go once the original HTTP response is closed.
///
/// Implementations must not block: delivery happens in the background and
/// failures are only logged.
pub trait FallbackDelivery: Send + Sync + 'static {
    /// Queue `message` for delivery to `url`
    fn deliver(&self, url: &str, message: SlashMessage);
}

/// Outcome of a single POST to a response_url
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Target URL
    pub url: String,
    /// HTTP status returned
    pub status: u16,
    /// Response body, if readable
    pub body: Option<String>,
    /// Round-trip time
    pub elapsed: Duration,
}

impl DeliveryReport {
    /// Whether the endpoint accepted the message
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts replies to `response_url` with `reqwest`
#[derive(Debug, Clone)]
pub struct ResponseUrlClient {
    http_client: Client,
}

impl ResponseUrlClient {
    /// Create a client using the configured timeout and User-Agent
    pub fn new(config: &SlashConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.outbound_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { http_client })
    }

    /// POST `message` as JSON to `url` and wait for the response.
    ///
    /// Non-2xx statuses are returned in the report, not as errors.
    pub async fn post(&self, url: &str, message: &SlashMessage) -> Result<DeliveryReport> {
        let target = url::Url::parse(url)?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(SlashError::UnsupportedScheme(target.scheme().to_string()));
        }

        let body = serde_json::to_vec(&message.to_outbound_json())?;
        debug!(url, bytes = body.len(), "Posting reply to response_url");

        let started = Instant::now();
        let response = self
            .http_client
            .post(target)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.ok();
        let report = DeliveryReport {
            url: url.to_string(),
            status: status.as_u16(),
            body,
            elapsed: started.elapsed(),
        };

        if report.is_success() {
            info!(url, status = report.status, "Reply delivered to response_url");
        } else {
            warn!(url, status = report.status, "response_url rejected reply");
        }

        Ok(report)
    }
}

impl FallbackDelivery for ResponseUrlClient {
    fn deliver(&self, url: &str, message: SlashMessage) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(url, error = %e, "No runtime available for response_url delivery");
                return;
            }
        };

        let client = self.clone();
        let url = url.to_string();
        handle.spawn(async move {
            if let Err(e) = client.post(&url, &message).await {
                error!(url = %url, error = %e, "response_url delivery failed");
            }
        });
    }
}
