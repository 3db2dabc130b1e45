use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::delivery::success_rate;
use crate::domain::{
    DeliveryAttempt, DeliveryLogStore, DeliveryState, StoreError, WebhookDeliveryStatus,
};

/// Derives delivery summaries from the attempt log on demand
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn DeliveryLogStore>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn DeliveryLogStore>) -> Self {
        Self { store }
    }

    pub async fn summarize(&self, webhook_id: &str) -> Result<WebhookDeliveryStatus, StoreError> {
        let attempts = self.store.attempts_for_webhook(webhook_id).await?;
        Ok(summarize(webhook_id, &attempts))
    }
}

/// Fold one webhook's attempt history into a status summary.
///
/// Each delivery id is counted once, by its highest-numbered attempt.
pub fn summarize(webhook_id: &str, attempts: &[DeliveryAttempt]) -> WebhookDeliveryStatus {
    let mut status = WebhookDeliveryStatus::empty(webhook_id);
    let mut latest: HashMap<Uuid, &DeliveryAttempt> = HashMap::new();

    for attempt in attempts.iter().filter(|a| a.webhook_id == webhook_id) {
        latest
            .entry(attempt.delivery_id)
            .and_modify(|current| {
                if attempt.attempt_number > current.attempt_number {
                    *current = attempt;
                }
            })
            .or_insert(attempt);

        status.last_delivery_at = status.last_delivery_at.max(Some(attempt.created_at));
        if attempt.success {
            status.last_success_at = status.last_success_at.max(Some(attempt.created_at));
        } else {
            status.last_failure_at = status.last_failure_at.max(Some(attempt.created_at));
        }
    }

    for attempt in latest.values() {
        match attempt.state() {
            DeliveryState::Succeeded => status.successful_deliveries += 1,
            DeliveryState::Exhausted => status.failed_deliveries += 1,
            DeliveryState::RetryScheduled => status.pending_retries += 1,
        }
    }

    status.total_deliveries =
        status.successful_deliveries + status.failed_deliveries + status.pending_retries;
    status.success_rate = success_rate(status.successful_deliveries, status.total_deliveries);
    status
}
