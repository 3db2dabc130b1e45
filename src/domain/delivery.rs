use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use super::events::SurveyEventKind;

/// What was actually put on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// What came back, when anything did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Where a delivery stands after one of its attempts was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Succeeded,

    RetryScheduled,

    Exhausted,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryScheduled)
    }
}

/// One HTTP attempt for one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: Uuid,

    pub webhook_id: String,

    /// Stable across every retry of the same event occurrence
    pub delivery_id: Uuid,

    pub event: SurveyEventKind,

    /// 1-based
    pub attempt_number: u32,

    pub request: RequestSnapshot,

    /// `None` when the request never got a response (network error, timeout)
    pub response: Option<ResponseSnapshot>,

    pub success: bool,

    pub error: Option<String>,

    pub can_retry: bool,

    /// Seconds the endpoint asked us to wait (429 `Retry-After`)
    pub retry_after_secs: Option<u64>,

    pub duration_ms: u64,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
}

impl DeliveryAttempt {
    pub fn state(&self) -> DeliveryState {
        if self.success {
            DeliveryState::Succeeded
        } else if self.can_retry && self.next_retry_at.is_some() {
            DeliveryState::RetryScheduled
        } else {
            DeliveryState::Exhausted
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }
}

/// Rolling delivery summary for one webhook, derived from its attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryStatus {
    pub webhook_id: String,

    pub total_deliveries: u64,

    pub successful_deliveries: u64,

    pub failed_deliveries: u64,

    pub pending_retries: u64,

    #[serde(with = "time::serde::rfc3339::option")]
    pub last_delivery_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,

    pub success_rate: f64,
}

impl WebhookDeliveryStatus {
    pub fn empty(webhook_id: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            pending_retries: 0,
            last_delivery_at: None,
            last_success_at: None,
            last_failure_at: None,
            success_rate: 0.0,
        }
    }
}

/// `succeeded / total`, or 0 when nothing has been delivered yet
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_attempt(success: bool, can_retry: bool, retry: bool) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            webhook_id: "wh-1".to_string(),
            delivery_id: Uuid::new_v4(),
            event: SurveyEventKind::ResponseSubmitted,
            attempt_number: 1,
            request: RequestSnapshot {
                url: "https://example.com".to_string(),
                headers: BTreeMap::new(),
                body: "{}".to_string(),
            },
            response: None,
            success,
            error: None,
            can_retry,
            retry_after_secs: None,
            duration_ms: 12,
            created_at: OffsetDateTime::now_utc(),
            next_retry_at: retry.then(OffsetDateTime::now_utc),
        }
    }

    #[test]
    fn test_attempt_state() {
        assert_eq!(
            make_attempt(true, false, false).state(),
            DeliveryState::Succeeded
        );
        assert_eq!(
            make_attempt(false, true, true).state(),
            DeliveryState::RetryScheduled
        );
        assert_eq!(
            make_attempt(false, false, false).state(),
            DeliveryState::Exhausted
        );
        assert!(!make_attempt(false, true, true).is_terminal());
    }

    #[test]
    fn test_success_rate_zero_total() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert!(!success_rate(0, 0).is_nan());
    }

    #[test]
    fn test_success_rate_ratio() {
        for total in 1..20u64 {
            for successful in 0..=total {
                assert_eq!(
                    success_rate(successful, total),
                    successful as f64 / total as f64
                );
            }
        }
    }

    #[test]
    fn test_attempt_serializes_camel_case() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(make_attempt(false, true, true))?;

        assert!(json.get("deliveryId").is_some());
        assert!(json.get("attemptNumber").is_some());
        assert!(json.get("canRetry").is_some());
        assert!(json["nextRetryAt"].is_string());
        Ok(())
    }
}
