use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::{
    ConfigurationFault, DeliveryAttempt, RegistryError, SurveyEvent, Webhook, WebhookRegistry,
};
use crate::outbound::webhook::delivery_queue::{DeliveryQueue, QueuedDelivery};
use crate::outbound::webhook::executor::{DeliveryError, DeliveryExecutor};
use crate::outbound::webhook::payload_builder;

/// One delivery pipeline started by a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedDelivery {
    pub webhook_id: String,
    pub delivery_id: Uuid,
}

/// A matching webhook that was not attempted because of its configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedWebhook {
    pub webhook_id: String,
    pub fault: ConfigurationFault,
}

/// What a dispatch started; no HTTP has happened yet when this is returned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub deliveries: Vec<DispatchedDelivery>,
    pub rejected: Vec<RejectedWebhook>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to resolve webhooks: {0}")]
    Registry(#[from] RegistryError),
}

/// Entry point for survey events.
///
/// Resolves the active webhooks subscribed to an event and enqueues one
/// independent delivery per webhook. Delivery itself happens on the
/// [`DeliveryService`](super::delivery_service::DeliveryService) workers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn WebhookRegistry>,
    queue: DeliveryQueue,
    executor: DeliveryExecutor,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn WebhookRegistry>,
        queue: DeliveryQueue,
        executor: DeliveryExecutor,
    ) -> Self {
        Self {
            registry,
            queue,
            executor,
        }
    }

    /// Fan one event occurrence out to every matching webhook
    pub async fn dispatch(&self, event: &SurveyEvent) -> Result<DispatchReceipt, DispatchError> {
        let webhooks = self
            .registry
            .active_webhooks_for(event.survey_id(), event.kind)
            .await?;

        debug!(
            survey_id = %event.survey_id(),
            event = %event.kind,
            matching = webhooks.len(),
            "Dispatching survey event"
        );

        let mut receipt = DispatchReceipt::default();

        for webhook in webhooks {
            let snapshot = webhook.snapshot_for_delivery();

            if let Err(fault) = snapshot.validate() {
                error!(
                    webhook_id = %snapshot.id,
                    error = %fault,
                    "Webhook misconfigured, not attempting delivery"
                );
                receipt.rejected.push(RejectedWebhook {
                    webhook_id: snapshot.id,
                    fault,
                });
                continue;
            }

            let payload = payload_builder::build(&snapshot, event);
            receipt.deliveries.push(DispatchedDelivery {
                webhook_id: snapshot.id.clone(),
                delivery_id: payload.delivery_id,
            });

            self.queue.enqueue(QueuedDelivery::new(snapshot, payload)).await;
        }

        info!(
            survey_id = %event.survey_id(),
            event = %event.kind,
            enqueued = receipt.deliveries.len(),
            rejected = receipt.rejected.len(),
            "Survey event dispatched"
        );

        Ok(receipt)
    }

    /// Send `sample` to `webhook` once, bypassing the queue, retries and log
    pub async fn test_delivery(
        &self,
        webhook: &Webhook,
        sample: &SurveyEvent,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        let snapshot = webhook.snapshot_for_delivery();
        let payload = payload_builder::build(&snapshot, sample);

        info!(
            webhook_id = %snapshot.id,
            delivery_id = %payload.delivery_id,
            "Sending test webhook"
        );

        self.executor.attempt(&snapshot, &payload, 1).await
    }
}
