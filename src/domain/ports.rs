/*
   Interfaces to the collaborators the delivery engine does not own:
   the webhook registry and the delivery log store.
*/

use crate::domain::delivery::DeliveryAttempt;
use crate::domain::events::SurveyEventKind;
use crate::domain::webhook::Webhook;
use async_trait::async_trait;
use uuid::Uuid;

/// Error type for webhook registry lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Registry lookup failed: {0}")]
    LookupFailed(String),
}

/// Error type for the delivery log store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to persist attempt: {0}")]
    WriteFailed(String),

    #[error("Failed to read attempts: {0}")]
    ReadFailed(String),

    #[error(
        "Attempt {attempt_number} for delivery {delivery_id} conflicts with the log (expected attempt {expected})"
    )]
    Conflict {
        delivery_id: Uuid,
        attempt_number: u32,
        expected: u32,
    },

    #[error("Delivery {0} already reached a terminal attempt")]
    DeliveryClosed(Uuid),
}

/// Lookup of webhook subscriptions
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    /// Active webhooks on `survey_id` subscribed to `kind`
    async fn active_webhooks_for(
        &self,
        survey_id: &str,
        kind: SurveyEventKind,
    ) -> Result<Vec<Webhook>, RegistryError>;

    /// Current state of one webhook, used for the pre-attempt active check
    async fn find(&self, webhook_id: &str) -> Result<Option<Webhook>, RegistryError>;
}

/// Append-only log of delivery attempts.
///
/// Implementations must be safe for concurrent writers and must reject a
/// second attempt with the same (delivery id, attempt number).
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn append(&self, attempt: DeliveryAttempt) -> Result<(), StoreError>;

    async fn attempts_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;

    async fn attempts_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;

    /// Latest attempt of every delivery that is waiting on a scheduled retry
    async fn pending_retries(&self) -> Result<Vec<DeliveryAttempt>, StoreError>;
}
