use std::time::Duration;

use async_trait::async_trait;
use qrgen_core::{WebhookRequest, WebhookResponse, WebhookTransport};
use qrgen_domain::constants::{WEBHOOK_REQUEST_TIMEOUT_MS, WEBHOOK_USER_AGENT};
use qrgen_domain::{QrGenError, Result, WebhooksConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as ReqwestClient;
use tracing::{debug, warn};

use crate::errors::InfraError;

/// Webhook POSTs over reqwest.
///
/// Every request carries a hard timeout. Non-2xx responses are returned as
/// `Ok`; only transport failures are errors.
#[derive(Clone, Debug)]
pub struct HttpWebhookTransport {
    client: ReqwestClient,
}

impl HttpWebhookTransport {
    pub fn builder() -> HttpWebhookTransportBuilder {
        HttpWebhookTransportBuilder::default()
    }

    pub fn from_config(config: &WebhooksConfig) -> Result<Self> {
        Self::builder().timeout(Duration::from_millis(config.request_timeout_ms)).build()
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse> {
        let headers = header_map(request)?;

        debug!(url = %request.url, "sending webhook");
        let response = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|err| QrGenError::from(InfraError::from(err)))?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %request.url, status, error = %err, "failed to read webhook response body");
                String::new()
            }
        };
        debug!(url = %request.url, status, "received webhook response");

        Ok(WebhookResponse { status, body })
    }
}

fn header_map(request: &WebhookRequest) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| QrGenError::InvalidInput(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| QrGenError::InvalidInput(format!("invalid header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Builder for [`HttpWebhookTransport`].
#[derive(Debug)]
pub struct HttpWebhookTransportBuilder {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpWebhookTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(WEBHOOK_REQUEST_TIMEOUT_MS),
            user_agent: WEBHOOK_USER_AGENT.to_string(),
        }
    }
}

impl HttpWebhookTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn build(self) -> Result<HttpWebhookTransport> {
        if self.timeout.is_zero() {
            return Err(QrGenError::Config("webhook request timeout must be positive".into()));
        }

        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .no_proxy()
            .build()
            .map_err(|err| QrGenError::from(InfraError::from(err)))?;

        Ok(HttpWebhookTransport { client })
    }
}
