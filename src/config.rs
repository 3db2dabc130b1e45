use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use config::{
    Config as ConfigLib, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState,
};
use serde::{Deserialize, Serialize};

use crate::domain::{QuestionMapping, SurveyEventKind, Webhook};
use crate::outbound::webhook::http_client::default_user_agent;
use crate::outbound::webhook::retry_strategy::RetryStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    /// Webhooks registered at startup
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Tunables of the delivery engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Per-attempt HTTP timeout
    pub timeout_secs: u64,
    /// Maximum number of attempts in flight at once
    pub worker_concurrency: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            worker_concurrency: 16,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            jitter_ratio: 0.2,
            user_agent: default_user_agent(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::new(self.base_delay_ms, self.max_delay_ms).with_jitter(self.jitter_ratio)
    }
}

const CONFIG_FILE: &str = "survey-webhooks";

/// A webhook subscription declared in the config file
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub survey_id: String,
    pub url: String,
    /// Generated when absent
    pub secret: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Empty subscribes to every event kind
    #[serde(default)]
    pub events: Vec<SurveyEventKind>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub include_metadata: bool,
    /// Non-empty switches the payload to external question ids
    #[serde(default)]
    pub question_mappings: Vec<QuestionMappingConfig>,
}

/// `question_id` → `external_id`. Config keys are lowercased on load, so no camelCase here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionMappingConfig {
    pub question_id: String,
    pub external_id: String,
}

impl WebhookConfig {
    pub fn into_webhook(self) -> Webhook {
        let mut webhook = match self.secret {
            Some(secret) => Webhook::with_secret(self.id, self.survey_id, self.url, secret),
            None => Webhook::new(self.id, self.survey_id, self.url),
        };

        webhook = if self.events.is_empty() {
            webhook.subscribe_all()
        } else {
            webhook.subscribe_to(self.events)
        };
        if let Some(name) = self.name {
            webhook = webhook.with_name(name);
        }
        if let Some(description) = self.description {
            webhook = webhook.with_description(description);
        }
        if let Some(max_retries) = self.max_retries {
            webhook = webhook.with_max_retries(max_retries);
        }
        for (name, value) in self.headers {
            webhook = webhook.with_header(name, value);
        }
        if self.include_metadata {
            webhook = webhook.with_metadata();
        }
        if !self.question_mappings.is_empty() {
            webhook = webhook.with_question_mappings(
                self.question_mappings
                    .into_iter()
                    .map(|m| QuestionMapping::new(m.question_id, m.external_id))
                    .collect(),
            );
        }
        webhook
    }
}

// Keeps the signing secret out of logs
impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("id", &self.id)
            .field("survey_id", &self.survey_id)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("name", &self.name)
            .field("events", &self.events)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // Explicit overrides replace the process environment so tests stay isolated
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // survey-webhooks.{toml,yaml,json} in the working directory, if any
            builder = builder.add_source(File::with_name(CONFIG_FILE).required(false));
            // APP_SERVER__PORT, APP_DELIVERY__TIMEOUT_SECS, ...
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Built-in defaults, used when nothing overrides them
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let delivery = DeliveryConfig::default();

        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("delivery.timeout_secs", delivery.timeout_secs)?
            .set_default("delivery.worker_concurrency", delivery.worker_concurrency as u64)?
            .set_default("delivery.base_delay_ms", delivery.base_delay_ms)?
            .set_default("delivery.max_delay_ms", delivery.max_delay_ms)?
            .set_default("delivery.jitter_ratio", delivery.jitter_ratio)?
            .set_default("delivery.user_agent", delivery.user_agent)
    }
}
