use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{error, warn};

use crate::domain::{DeliveryAttempt, SurveyEvent};
use crate::server::AppState;
use crate::server::responses::ApiError;

/// `POST /events`: hand a survey event to the dispatcher.
///
/// Answers 202 once the event is buffered; delivery happens later.
pub async fn submit_event(
    State(state): State<AppState>,
    Json(event): Json<SurveyEvent>,
) -> Result<StatusCode, ApiError> {
    state.events.try_send(event).map_err(|e| {
        warn!(error = %e, "Rejecting survey event");
        ApiError::unavailable(e.to_string())
    })?;

    Ok(StatusCode::ACCEPTED)
}

/// `POST /webhooks/{id}/test`: one attempt with the posted sample event.
///
/// The attempt is returned to the caller and never logged or retried.
pub async fn send_test_delivery(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    Json(sample): Json<SurveyEvent>,
) -> Result<Json<DeliveryAttempt>, ApiError> {
    let webhook = state
        .registry
        .find(&webhook_id)
        .await
        .map_err(|e| {
            error!(webhook_id = %webhook_id, error = %e, "Failed to look up webhook");
            ApiError::unavailable("Webhook registry unavailable")
        })?
        .ok_or_else(|| ApiError::not_found(format!("Webhook '{webhook_id}' not found")))?;

    let attempt = state
        .dispatcher
        .test_delivery(&webhook, &sample)
        .await
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    Ok(Json(attempt))
}
