//! Outbound HTTP

pub mod webhook_transport;

pub use webhook_transport::{HttpWebhookTransport, HttpWebhookTransportBuilder};
