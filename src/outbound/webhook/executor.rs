use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::hmac_signer::HmacSigner;
use super::http_client::{
    HttpClientError, HttpResponse, WebhookHttpClient, collect_headers,
};
use super::retry_strategy::is_retryable_status;
use super::schemas::WebhookPayload;
use crate::domain::{
    ConfigurationFault, DeliveryAttempt, RequestSnapshot, ResponseSnapshot, Webhook,
};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const EVENT_HEADER: &str = "x-webhook-event";
pub const DELIVERY_HEADER: &str = "x-webhook-delivery";

/// Headers owned by the engine; webhook custom headers never replace these
const RESERVED_HEADERS: [&str; 4] = [
    "content-type",
    SIGNATURE_HEADER,
    EVENT_HEADER,
    DELIVERY_HEADER,
];

/// Precondition failures; ordinary HTTP and network failures are recorded
/// in the returned attempt instead.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationFault),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Performs single delivery attempts
#[derive(Clone)]
pub struct DeliveryExecutor {
    client: Arc<WebhookHttpClient>,
}

impl DeliveryExecutor {
    pub fn new(client: Arc<WebhookHttpClient>) -> Self {
        Self { client }
    }

    /// POST `payload` to the webhook once and classify the outcome.
    ///
    /// The returned attempt never has `next_retry_at` set; scheduling is the
    /// caller's decision.
    pub async fn attempt(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        attempt_number: u32,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        webhook.validate()?;

        let body = payload.to_json()?;
        let signature = HmacSigner::new(webhook.secret()).sign(&body);
        let headers = build_headers(webhook, payload, &signature)?;

        debug!(
            webhook_id = %webhook.id,
            delivery_id = %payload.delivery_id,
            attempt = attempt_number,
            "Attempting delivery"
        );

        let request = RequestSnapshot {
            url: webhook.url.clone(),
            headers: collect_headers(&headers),
            body: body.clone(),
        };

        let start = Instant::now();
        let result = self.client.post(&webhook.url, headers, body).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut attempt = blank_attempt(webhook, payload, attempt_number, request, duration_ms);

        match result {
            Ok(response) => classify_response(&mut attempt, response),
            Err(e) => {
                warn!(
                    webhook_id = %webhook.id,
                    delivery_id = %payload.delivery_id,
                    attempt = attempt_number,
                    error = %e,
                    "Delivery request failed"
                );
                attempt.can_retry = !matches!(e, HttpClientError::InvalidUrl(_));
                attempt.error = Some(e.to_string());
            }
        }

        Ok(attempt)
    }
}

/// Terminal record for an attempt that was due but never sent: no response,
/// `can_retry = false`, `reason` as the error.
pub fn unsent_attempt(
    webhook: &Webhook,
    payload: &WebhookPayload,
    attempt_number: u32,
    reason: String,
) -> DeliveryAttempt {
    let request = RequestSnapshot {
        url: webhook.url.clone(),
        headers: Default::default(),
        body: payload.to_json().unwrap_or_default(),
    };

    let mut attempt = blank_attempt(webhook, payload, attempt_number, request, 0);
    attempt.error = Some(reason);
    attempt
}

fn blank_attempt(
    webhook: &Webhook,
    payload: &WebhookPayload,
    attempt_number: u32,
    request: RequestSnapshot,
    duration_ms: u64,
) -> DeliveryAttempt {
    DeliveryAttempt {
        id: Uuid::new_v4(),
        webhook_id: webhook.id.clone(),
        delivery_id: payload.delivery_id,
        event: payload.event,
        attempt_number,
        request,
        response: None,
        success: false,
        error: None,
        can_retry: false,
        retry_after_secs: None,
        duration_ms,
        created_at: OffsetDateTime::now_utc(),
        next_retry_at: None,
    }
}

fn classify_response(attempt: &mut DeliveryAttempt, response: HttpResponse) {
    let status = response.status;

    if response.is_success() {
        attempt.success = true;
    } else {
        attempt.can_retry = is_retryable_status(status);
        attempt.error = Some(format!("Endpoint responded with HTTP {status}"));
        if status == 429 {
            attempt.retry_after_secs = response.retry_after_secs();
        }
    }

    attempt.response = Some(ResponseSnapshot {
        status_code: status,
        headers: response.headers,
        body: response.body,
    });
}

fn build_headers(
    webhook: &Webhook,
    payload: &WebhookPayload,
    signature: &str,
) -> Result<HeaderMap, ConfigurationFault> {
    let mut headers = HeaderMap::new();

    for (name, value) in &webhook.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigurationFault::InvalidHeader(name.clone()))?;

        if RESERVED_HEADERS.contains(&header_name.as_str()) {
            debug!(webhook_id = %webhook.id, header = %name, "Skipping reserved custom header");
            continue;
        }

        let header_value = HeaderValue::from_str(value)
            .map_err(|_| ConfigurationFault::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        SIGNATURE_HEADER,
        HeaderValue::from_str(signature)
            .map_err(|_| ConfigurationFault::InvalidHeader(SIGNATURE_HEADER.to_string()))?,
    );
    headers.insert(EVENT_HEADER, HeaderValue::from_static(payload.event.as_str()));
    headers.insert(
        DELIVERY_HEADER,
        HeaderValue::from_str(&payload.delivery_id.to_string())
            .map_err(|_| ConfigurationFault::InvalidHeader(DELIVERY_HEADER.to_string()))?,
    );

    Ok(headers)
}
