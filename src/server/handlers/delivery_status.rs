use axum::Json;
use axum::extract::{Path, State};
use tracing::error;

use crate::domain::WebhookDeliveryStatus;
use crate::server::AppState;
use crate::server::responses::ApiError;

/// `GET /webhooks/{id}/delivery-status`
pub async fn delivery_status(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<Json<WebhookDeliveryStatus>, ApiError> {
    let status = state.status.summarize(&webhook_id).await.map_err(|e| {
        error!(webhook_id = %webhook_id, error = %e, "Failed to read delivery log");
        ApiError::internal("Failed to read delivery log")
    })?;

    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DeliveryAttempt, DeliveryLogStore, RequestSnapshot, StoreError, SurveyEventKind,
    };
    use crate::outbound::webhook::{InMemoryDeliveryLog, InMemoryWebhookRegistry};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn state_with(log: &InMemoryDeliveryLog) -> Result<AppState, StoreError> {
        let (state, _listener) = AppState::for_tests(
            Arc::new(log.clone()),
            Arc::new(InMemoryWebhookRegistry::new()),
            1,
        )
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?;
        Ok(state)
    }

    #[tokio::test]
    async fn test_unknown_webhook_has_empty_status() -> Result<(), StoreError> {
        let log = InMemoryDeliveryLog::new();

        let Json(status) = delivery_status(State(state_with(&log)?), Path("wh-x".to_string()))
            .await
            .map_err(|_| StoreError::ReadFailed("handler failed".to_string()))?;

        assert_eq!(status, WebhookDeliveryStatus::empty("wh-x"));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_counts_logged_delivery() -> Result<(), StoreError> {
        let log = InMemoryDeliveryLog::new();
        log.append(DeliveryAttempt {
            id: Uuid::new_v4(),
            webhook_id: "wh-1".to_string(),
            delivery_id: Uuid::new_v4(),
            event: SurveyEventKind::ResponseSubmitted,
            attempt_number: 1,
            request: RequestSnapshot {
                url: "https://example.com/hook".to_string(),
                headers: BTreeMap::new(),
                body: "{}".to_string(),
            },
            response: None,
            success: true,
            error: None,
            can_retry: false,
            retry_after_secs: None,
            duration_ms: 12,
            created_at: OffsetDateTime::now_utc(),
            next_retry_at: None,
        })
        .await?;

        let Json(status) = delivery_status(State(state_with(&log)?), Path("wh-1".to_string()))
            .await
            .map_err(|_| StoreError::ReadFailed("handler failed".to_string()))?;

        assert_eq!(status.total_deliveries, 1);
        assert_eq!(status.successful_deliveries, 1);
        assert_eq!(status.success_rate, 1.0);
        Ok(())
    }

    #[test]
    fn test_api_error_is_500() {
        let response = ApiError::internal("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
