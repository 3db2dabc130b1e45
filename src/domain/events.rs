use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Survey events a webhook can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SurveyEventKind {
    #[serde(rename = "response.submitted")]
    ResponseSubmitted,
    #[serde(rename = "response.updated")]
    ResponseUpdated,
    #[serde(rename = "response.deleted")]
    ResponseDeleted,
    #[serde(rename = "survey.published")]
    SurveyPublished,
    #[serde(rename = "survey.unpublished")]
    SurveyUnpublished,
}

impl SurveyEventKind {
    pub fn all() -> [Self; 5] {
        [
            Self::ResponseSubmitted,
            Self::ResponseUpdated,
            Self::ResponseDeleted,
            Self::SurveyPublished,
            Self::SurveyUnpublished,
        ]
    }

    /// Wire name, as sent in `X-Webhook-Event` and the payload `event` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResponseSubmitted => "response.submitted",
            Self::ResponseUpdated => "response.updated",
            Self::ResponseDeleted => "response.deleted",
            Self::SurveyPublished => "survey.published",
            Self::SurveyUnpublished => "survey.unpublished",
        }
    }

    /// Response events carry a response snapshot in their payload
    pub fn is_response_event(&self) -> bool {
        matches!(
            self,
            Self::ResponseSubmitted | Self::ResponseUpdated | Self::ResponseDeleted
        )
    }
}

impl fmt::Display for SurveyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown survey event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for SurveyEventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Survey state at the moment the event fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveySnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Response state at the moment the event fired.
///
/// Answers are always keyed by internal question id here; external ids are
/// only applied when a payload is built for a specific webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: String,

    #[serde(with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,

    pub is_complete: bool,

    pub answers: BTreeMap<String, Value>,

    pub metadata: Option<Value>,
}

/// One occurrence of a survey event, as handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyEvent {
    pub kind: SurveyEventKind,

    pub survey: SurveySnapshot,

    pub response: Option<SurveyResponse>,

    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl SurveyEvent {
    /// A survey-level event (published / unpublished)
    pub fn survey(kind: SurveyEventKind, survey: SurveySnapshot) -> Self {
        Self {
            kind,
            survey,
            response: None,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    /// A response-level event (submitted / updated / deleted)
    pub fn response(
        kind: SurveyEventKind,
        survey: SurveySnapshot,
        response: SurveyResponse,
    ) -> Self {
        Self {
            kind,
            survey,
            response: Some(response),
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn survey_id(&self) -> &str {
        &self.survey.id
    }
}
