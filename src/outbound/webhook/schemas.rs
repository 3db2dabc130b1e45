use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{QuestionMapping, SurveyEventKind};

/// Webhook payload sent to receiving endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub delivery_id: Uuid,

    pub event: SurveyEventKind,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    pub survey: SurveySummary,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_mappings: Option<Vec<QuestionMapping>>,
}

impl WebhookPayload {
    /// Serialize to the exact body that gets signed and sent
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rebuild a payload from a recorded request body
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurveySummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub id: String,

    #[serde(with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,

    pub is_complete: bool,

    /// Keyed by internal question id, or by external id when mappings are on
    pub answers: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_payload() -> WebhookPayload {
        WebhookPayload {
            delivery_id: Uuid::new_v4(),
            event: SurveyEventKind::SurveyPublished,
            timestamp: OffsetDateTime::now_utc(),
            survey: SurveySummary {
                id: "srv-1".to_string(),
                name: "Onboarding".to_string(),
                status: "published".to_string(),
            },
            response: None,
            question_mappings: None,
        }
    }

    #[test]
    fn test_payload_field_names() -> Result<(), serde_json::Error> {
        let payload = make_payload();
        let json: Value = serde_json::from_str(&payload.to_json()?)?;

        assert_eq!(json["deliveryId"], json!(payload.delivery_id.to_string()));
        assert_eq!(json["event"], json!("survey.published"));
        assert!(json["timestamp"].is_string());
        assert_eq!(json["survey"]["id"], json!("srv-1"));
        Ok(())
    }

    #[test]
    fn test_optional_sections_omitted() -> Result<(), serde_json::Error> {
        let json: Value = serde_json::from_str(&make_payload().to_json()?)?;

        assert!(json.get("response").is_none());
        assert!(json.get("questionMappings").is_none());
        Ok(())
    }

    #[test]
    fn test_payload_restored_from_body() -> Result<(), serde_json::Error> {
        let mut payload = make_payload();
        payload.event = SurveyEventKind::ResponseSubmitted;
        payload.response = Some(ResponseSummary {
            id: "resp-1".to_string(),
            submitted_at: None,
            completed_at: None,
            is_complete: false,
            answers: BTreeMap::from([("q1".to_string(), json!(5))]),
            metadata: None,
        });
        payload.question_mappings = Some(vec![QuestionMapping::new("q1", "rating")]);

        let body = payload.to_json()?;
        let restored = WebhookPayload::from_json(&body)?;

        assert_eq!(restored.delivery_id, payload.delivery_id);
        assert_eq!(restored.response, payload.response);
        assert_eq!(restored.to_json()?, body);
        Ok(())
    }
}
