pub mod delivery_status;
pub mod intake;

use axum::http::StatusCode;

/// `GET /health`: the process is up and serving
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
