use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{DeliveryAttempt, DeliveryLogStore, StoreError};

/// In-memory delivery log.
///
/// Keeps every attempt in insertion order and enforces the attempt sequence
/// of each delivery: numbers start at 1, never skip, never repeat, and nothing
/// follows a terminal attempt.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryLog {
    inner: Arc<RwLock<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    attempts: Vec<DeliveryAttempt>,

    /// Index of the latest attempt per delivery
    latest: HashMap<Uuid, usize>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.attempts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.attempts.is_empty()
    }

    /// Every recorded attempt, oldest first
    pub async fn all(&self) -> Vec<DeliveryAttempt> {
        self.inner.read().await.attempts.clone()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryDeliveryLog {
    async fn append(&self, attempt: DeliveryAttempt) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        let expected = match inner.latest.get(&attempt.delivery_id) {
            Some(&idx) => {
                let last = &inner.attempts[idx];
                if last.is_terminal() {
                    return Err(StoreError::DeliveryClosed(attempt.delivery_id));
                }
                last.attempt_number + 1
            }
            None => 1,
        };

        if attempt.attempt_number != expected {
            return Err(StoreError::Conflict {
                delivery_id: attempt.delivery_id,
                attempt_number: attempt.attempt_number,
                expected,
            });
        }

        debug!(
            webhook_id = %attempt.webhook_id,
            delivery_id = %attempt.delivery_id,
            attempt = attempt.attempt_number,
            "Recording delivery attempt"
        );

        let idx = inner.attempts.len();
        inner.latest.insert(attempt.delivery_id, idx);
        inner.attempts.push(attempt);
        Ok(())
    }

    async fn attempts_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.webhook_id == webhook_id)
            .cloned()
            .collect())
    }

    async fn attempts_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn pending_retries(&self) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<DeliveryAttempt> = inner
            .latest
            .values()
            .map(|&idx| &inner.attempts[idx])
            .filter(|a| !a.is_terminal())
            .cloned()
            .collect();

        pending.sort_by_key(|a| a.next_retry_at);
        Ok(pending)
    }
}
