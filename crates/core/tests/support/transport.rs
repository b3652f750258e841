//! Scripted webhook transport

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use qrgen_core::{WebhookRequest, WebhookResponse, WebhookTransport};
use qrgen_domain::{QrGenError, Result as DomainResult};

/// Answers each URL with a fixed status; unknown URLs fail at the network
/// level. Every request is recorded.
#[derive(Default, Clone)]
pub struct ScriptedTransport {
    statuses: Arc<Mutex<HashMap<String, u16>>>,
    requests: Arc<Mutex<Vec<WebhookRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, status: u16) -> Self {
        self.statuses.lock().unwrap().insert(url.to_string(), status);
        self
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, request: &WebhookRequest) -> DomainResult<WebhookResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let status = self.statuses.lock().unwrap().get(&request.url).copied();
        match status {
            Some(status) => Ok(WebhookResponse { status, body: format!("status {status}") }),
            None => Err(QrGenError::Network(format!("connection refused: {}", request.url))),
        }
    }
}
