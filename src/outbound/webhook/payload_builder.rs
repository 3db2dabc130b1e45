use time::OffsetDateTime;
use uuid::Uuid;

use super::schemas::{ResponseSummary, SurveySummary, WebhookPayload};
use crate::domain::{SurveyEvent, SurveyResponse, Webhook};

/// Build the wire payload for one webhook and one event occurrence.
///
/// A fresh delivery id is generated on every call; retries reuse the payload
/// rather than rebuilding it.
pub fn build(webhook: &Webhook, event: &SurveyEvent) -> WebhookPayload {
    let response = event
        .response
        .as_ref()
        .filter(|_| event.kind.is_response_event())
        .map(|response| summarize_response(webhook, response));

    let question_mappings = webhook
        .use_question_mappings
        .then(|| webhook.question_mappings.clone());

    WebhookPayload {
        delivery_id: Uuid::new_v4(),
        event: event.kind,
        timestamp: OffsetDateTime::now_utc(),
        survey: SurveySummary {
            id: event.survey.id.clone(),
            name: event.survey.name.clone(),
            status: event.survey.status.clone(),
        },
        response,
        question_mappings,
    }
}

fn summarize_response(webhook: &Webhook, response: &SurveyResponse) -> ResponseSummary {
    let answers = if webhook.use_question_mappings {
        // Unmapped questions are dropped so keys never mix internal and external ids
        response
            .answers
            .iter()
            .filter_map(|(question_id, answer)| {
                webhook
                    .external_id_for(question_id)
                    .map(|external_id| (external_id.to_string(), answer.clone()))
            })
            .collect()
    } else {
        response.answers.clone()
    };

    ResponseSummary {
        id: response.id.clone(),
        submitted_at: response.submitted_at,
        completed_at: response.completed_at,
        is_complete: response.is_complete,
        answers,
        metadata: webhook
            .include_metadata
            .then(|| response.metadata.clone())
            .flatten(),
    }
}
