use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::{RegistryError, SurveyEventKind, Webhook, WebhookRegistry};

/// Webhook registry backed by a shared in-memory map
#[derive(Debug, Clone, Default)]
pub struct InMemoryWebhookRegistry {
    webhooks: Arc<RwLock<HashMap<String, Webhook>>>,
}

impl InMemoryWebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a webhook
    pub async fn register(&self, webhook: Webhook) {
        info!(
            webhook_id = %webhook.id,
            survey_id = %webhook.survey_id,
            url = %webhook.url,
            "Registering webhook"
        );
        self.webhooks.write().await.insert(webhook.id.clone(), webhook);
    }

    /// Toggle a webhook's active flag; returns false if it does not exist
    pub async fn set_active(&self, webhook_id: &str, active: bool) -> bool {
        let mut webhooks = self.webhooks.write().await;
        match webhooks.get_mut(webhook_id) {
            Some(webhook) => {
                if active {
                    webhook.enable();
                } else {
                    webhook.disable();
                }
                info!(webhook_id = %webhook_id, active, "Webhook active flag changed");
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, webhook_id: &str) -> Option<Webhook> {
        self.webhooks.write().await.remove(webhook_id)
    }

    pub async fn get(&self, webhook_id: &str) -> Option<Webhook> {
        self.webhooks.read().await.get(webhook_id).cloned()
    }
}

#[async_trait]
impl WebhookRegistry for InMemoryWebhookRegistry {
    async fn active_webhooks_for(
        &self,
        survey_id: &str,
        kind: SurveyEventKind,
    ) -> Result<Vec<Webhook>, RegistryError> {
        let webhooks = self.webhooks.read().await;
        let mut matching: Vec<Webhook> = webhooks
            .values()
            .filter(|w| w.survey_id == survey_id && w.matches_event(kind))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn find(&self, webhook_id: &str) -> Result<Option<Webhook>, RegistryError> {
        Ok(self.get(webhook_id).await)
    }
}
