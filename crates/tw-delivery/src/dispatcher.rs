//! Processor Dispatcher
//!
//! One protocol sender per [`ProcessorKind`] variant. Dispatch never returns an error: every
//! transport or protocol problem becomes a failed [`DispatchOutcome`] so it can be recorded
//! as an attempt.

use std::sync::Arc;

use async_trait::async_trait;
use tw_common::ProcessorKind;

use crate::broker_sender::BrokerSender;
use crate::http_sender::HttpSender;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn success() -> Self {
        Self { success: true, status_code: None, response_body: None, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            response_body: None,
            error: Some(error.into()),
        }
    }

    /// Outcome of a completed HTTP exchange; 2xx is success.
    pub fn http(status: u16, body: String) -> Self {
        let success = (200..300).contains(&status);
        Self {
            success,
            status_code: Some(status),
            response_body: Some(body),
            error: (!success).then(|| format!("HTTP {}", status)),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, processor: &ProcessorKind, payload: &serde_json::Value) -> DispatchOutcome;
}

pub struct ProcessorDispatcher {
    http: HttpSender,
    broker: Arc<dyn BrokerSender>,
}

impl ProcessorDispatcher {
    pub fn new(http: HttpSender, broker: Arc<dyn BrokerSender>) -> Self {
        Self { http, broker }
    }
}

#[async_trait]
impl Dispatcher for ProcessorDispatcher {
    async fn dispatch(&self, processor: &ProcessorKind, payload: &serde_json::Value) -> DispatchOutcome {
        match processor {
            ProcessorKind::HttpWebhook(config) => self.http.send(config, payload).await,
            ProcessorKind::BrokerPublish(config) => self.broker.publish(config, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_outcome_classification() {
        assert!(DispatchOutcome::http(200, String::new()).success);
        assert!(DispatchOutcome::http(204, String::new()).success);

        let redirect = DispatchOutcome::http(302, String::new());
        assert!(!redirect.success);
        assert_eq!(redirect.error.as_deref(), Some("HTTP 302"));

        let server_error = DispatchOutcome::http(500, "boom".into());
        assert!(!server_error.success);
        assert_eq!(server_error.status_code, Some(500));
        assert_eq!(server_error.response_body.as_deref(), Some("boom"));
    }
}
