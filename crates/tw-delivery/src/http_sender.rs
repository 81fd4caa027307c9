//! HTTP webhook sender
//!
//! POSTs the delivery payload as JSON. Optional static headers, bearer/basic auth and an
//! HMAC-SHA256 signature over `"{timestamp}.{body}"`.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tracing::{debug, warn};
use tw_common::{HttpWebhookConfig, WebhookAuth};

use crate::dispatcher::DispatchOutcome;
use crate::error::Result;

pub const SIGNATURE_HEADER: &str = "X-Tidewire-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Tidewire-Timestamp";

/// Response bodies longer than this are cut before being stored on the attempt.
pub const MAX_RESPONSE_BODY: usize = 64 * 1024;

pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn send(&self, config: &HttpWebhookConfig, payload: &serde_json::Value) -> DispatchOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => return DispatchOutcome::failure(format!("payload encoding failed: {}", e)),
        };

        let mut request = self
            .client
            .post(&config.url)
            .header(CONTENT_TYPE, "application/json");

        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = match &config.auth {
            Some(WebhookAuth::Bearer { token }) => request.bearer_auth(token),
            Some(WebhookAuth::Basic { username, password }) => request.basic_auth(username, Some(password)),
            None => request,
        };

        if let Some(secret) = &config.signing_secret {
            let timestamp = Utc::now().timestamp();
            match sign_payload(secret, timestamp, &body) {
                Ok(signature) => {
                    request = request
                        .header(TIMESTAMP_HEADER, timestamp.to_string())
                        .header(SIGNATURE_HEADER, signature);
                }
                Err(e) => return DispatchOutcome::failure(format!("signing failed: {}", e)),
            }
        }

        if let Some(secs) = config.timeout_seconds {
            request = request.timeout(Duration::from_secs(secs));
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = match response.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(url = %config.url, status, error = %e, "Failed to read webhook response body");
                        String::new()
                    }
                };
                debug!(url = %config.url, status, "Webhook responded");
                DispatchOutcome::http(status, truncate_body(text))
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "Webhook request failed");
                DispatchOutcome::failure(e.to_string())
            }
        }
    }
}

/// `sha256=<hex>` of HMAC-SHA256(secret, "{timestamp}.{body}").
pub fn sign_payload(
    secret: &str,
    timestamp: i64,
    body: &[u8],
) -> std::result::Result<String, hmac::digest::InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_RESPONSE_BODY {
        let mut cut = MAX_RESPONSE_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
