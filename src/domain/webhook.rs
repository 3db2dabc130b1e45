use rand::RngCore;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;

use super::events::SurveyEventKind;

/// Default retry budget for a new webhook
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maps an internal question id to the id the receiving system knows it by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMapping {
    pub question_id: String,
    pub external_id: String,
}

impl QuestionMapping {
    pub fn new(question_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            external_id: external_id.into(),
        }
    }
}

/// A webhook subscription on one survey
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,

    pub survey_id: String,

    pub url: String,

    pub name: String,

    pub description: Option<String>,

    pub is_active: bool,

    pub events: HashSet<SurveyEventKind>,

    /// Extra request headers; the reserved `X-Webhook-*` and `Content-Type`
    /// headers always win over these.
    pub headers: BTreeMap<String, String>,

    pub include_metadata: bool,

    pub use_question_mappings: bool,

    pub question_mappings: Vec<QuestionMapping>,

    /// Set once at creation
    #[serde(skip_serializing, default)]
    secret: String,

    pub max_retries: u32,

    /// Retries spent on the delivery currently in flight
    pub retry_count: u32,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Webhook {
    /// Create a webhook with a freshly generated signing secret
    pub fn new(id: String, survey_id: String, url: String) -> Self {
        Self::with_secret(id, survey_id, url, generate_secret())
    }

    /// Rehydrate a webhook whose secret was generated earlier
    pub fn with_secret(id: String, survey_id: String, url: String, secret: String) -> Self {
        Self {
            name: id.clone(),
            id,
            survey_id,
            url,
            description: None,
            is_active: true,
            events: HashSet::new(),
            headers: BTreeMap::new(),
            include_metadata: false,
            use_question_mappings: false,
            question_mappings: Vec::new(),
            secret,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Subscribe to specific event kinds
    pub fn subscribe_to(mut self, events: impl IntoIterator<Item = SurveyEventKind>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    /// Subscribe to every event kind
    pub fn subscribe_all(self) -> Self {
        self.subscribe_to(SurveyEventKind::all())
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = name;
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    /// Enable external question ids with the given mapping table
    pub fn with_question_mappings(mut self, mappings: Vec<QuestionMapping>) -> Self {
        self.use_question_mappings = true;
        self.question_mappings = mappings;
        self
    }

    pub fn disable(&mut self) {
        self.is_active = false;
    }

    pub fn enable(&mut self) {
        self.is_active = true;
    }

    /// Whether this webhook should receive the given event kind
    pub fn matches_event(&self, kind: SurveyEventKind) -> bool {
        self.is_active && self.events.contains(&kind)
    }

    /// External id for an internal question id, if mapped
    pub fn external_id_for(&self, question_id: &str) -> Option<&str> {
        self.question_mappings
            .iter()
            .find(|m| m.question_id == question_id)
            .map(|m| m.external_id.as_str())
    }

    /// Snapshot taken when an event is dispatched: retry budget starts fresh
    pub fn snapshot_for_delivery(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.retry_count = 0;
        snapshot
    }

    /// Check the preconditions for attempting a delivery at all
    pub fn validate(&self) -> Result<(), ConfigurationFault> {
        let parsed =
            url::Url::parse(&self.url).map_err(|e| ConfigurationFault::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigurationFault::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if self.secret.is_empty() {
            return Err(ConfigurationFault::MissingSecret);
        }

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(ConfigurationFault::InvalidHeader(name.clone()));
            }
        }

        if self.use_question_mappings {
            let mut seen = HashSet::new();
            for mapping in &self.question_mappings {
                if !seen.insert(mapping.external_id.as_str()) {
                    return Err(ConfigurationFault::DuplicateExternalId(
                        mapping.external_id.clone(),
                    ));
                }
            }
        }

        if self.retry_count > self.max_retries {
            return Err(ConfigurationFault::RetryBudgetExceeded {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }

        Ok(())
    }
}

/// A webhook that can never be attempted as configured
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationFault {
    #[error("Invalid webhook URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Webhook has no signing secret")]
    MissingSecret,

    #[error("Invalid custom header '{0}'")]
    InvalidHeader(String),

    /// Two questions would share one answer key in the payload
    #[error("External question id '{0}' is mapped more than once")]
    DuplicateExternalId(String),

    #[error("Retry count {retry_count} exceeds max retries {max_retries}")]
    RetryBudgetExceeded { retry_count: u32, max_retries: u32 },
}

/// 32 random bytes, hex encoded
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_webhook() -> Webhook {
        Webhook::new(
            "wh-123".to_string(),
            "srv-1".to_string(),
            "https://api.example.com/webhook".to_string(),
        )
    }

    #[test]
    fn test_webhook_creation() {
        let webhook = make_webhook();

        assert_eq!(webhook.id, "wh-123");
        assert_eq!(webhook.survey_id, "srv-1");
        assert!(webhook.is_active);
        assert!(webhook.events.is_empty());
        assert_eq!(webhook.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(webhook.retry_count, 0);
    }

    #[test]
    fn test_secret_generated_once() {
        let webhook = make_webhook();
        assert_eq!(webhook.secret().len(), 64);
        assert!(webhook.secret().chars().all(|c| c.is_ascii_hexdigit()));

        // Builders and snapshots never touch the secret
        let configured = webhook
            .clone()
            .subscribe_all()
            .with_max_retries(5)
            .with_metadata();
        assert_eq!(configured.secret(), webhook.secret());
        assert_eq!(configured.snapshot_for_delivery().secret(), webhook.secret());

        assert_ne!(make_webhook().secret(), webhook.secret());
    }

    #[test]
    fn test_subscribe_to_specific_events() {
        let webhook = make_webhook().subscribe_to([
            SurveyEventKind::ResponseSubmitted,
            SurveyEventKind::ResponseUpdated,
        ]);

        assert!(webhook.matches_event(SurveyEventKind::ResponseSubmitted));
        assert!(webhook.matches_event(SurveyEventKind::ResponseUpdated));
        assert!(!webhook.matches_event(SurveyEventKind::SurveyPublished));
    }

    #[test]
    fn test_inactive_webhook_does_not_match() {
        let mut webhook = make_webhook().subscribe_all();
        webhook.disable();
        assert!(!webhook.matches_event(SurveyEventKind::ResponseSubmitted));

        webhook.enable();
        assert!(webhook.matches_event(SurveyEventKind::ResponseSubmitted));
    }

    #[test]
    fn test_external_id_lookup() {
        let webhook = make_webhook().with_question_mappings(vec![
            QuestionMapping::new("q1", "rating"),
            QuestionMapping::new("q2", "comment"),
        ]);

        assert!(webhook.use_question_mappings);
        assert_eq!(webhook.external_id_for("q1"), Some("rating"));
        assert_eq!(webhook.external_id_for("q3"), None);
    }

    #[test]
    fn test_snapshot_resets_retry_count() {
        let mut webhook = make_webhook();
        webhook.retry_count = 2;

        let snapshot = webhook.snapshot_for_delivery();
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(snapshot.id, webhook.id);
    }

    #[test]
    fn test_validate_accepts_well_formed_webhook() {
        let webhook = make_webhook().with_header("X-Tenant", "acme");
        assert_eq!(webhook.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_malformed_url() {
        let webhook = Webhook::new(
            "wh-1".to_string(),
            "srv-1".to_string(),
            "not a url".to_string(),
        );
        assert!(matches!(
            webhook.validate(),
            Err(ConfigurationFault::InvalidUrl { .. })
        ));

        let ftp = Webhook::new(
            "wh-2".to_string(),
            "srv-1".to_string(),
            "ftp://example.com/hook".to_string(),
        );
        assert!(matches!(
            ftp.validate(),
            Err(ConfigurationFault::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_secret() {
        let webhook = Webhook::with_secret(
            "wh-1".to_string(),
            "srv-1".to_string(),
            "https://example.com/hook".to_string(),
            String::new(),
        );
        assert_eq!(webhook.validate(), Err(ConfigurationFault::MissingSecret));
    }

    #[test]
    fn test_validate_rejects_bad_header() {
        let webhook = make_webhook().with_header("Bad Header", "x");
        assert_eq!(
            webhook.validate(),
            Err(ConfigurationFault::InvalidHeader("Bad Header".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_external_ids() {
        let webhook = make_webhook().with_question_mappings(vec![
            QuestionMapping::new("q1", "score"),
            QuestionMapping::new("q2", "score"),
        ]);
        assert_eq!(
            webhook.validate(),
            Err(ConfigurationFault::DuplicateExternalId("score".to_string()))
        );

        // Only enforced when mappings shape the payload
        let mut unused = webhook.clone();
        unused.use_question_mappings = false;
        assert_eq!(unused.validate(), Ok(()));
    }

    #[test]
    fn test_secret_not_serialized() -> Result<(), serde_json::Error> {
        let webhook = make_webhook().subscribe_all();
        let json = serde_json::to_string(&webhook)?;

        assert!(!json.contains(webhook.secret()));
        assert!(json.contains("\"surveyId\":\"srv-1\""));
        Ok(())
    }
}
