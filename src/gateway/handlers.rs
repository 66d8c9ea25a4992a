//! HTTP handlers: health and read-only request lookup
//!
//! Settlement intents arrive over the live connection; HTTP only reads.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;

use super::state::AppState;
use super::types::{ApiResponse, HealthResponse, error_codes};
use crate::error::SettlementError;
use crate::request::RequestRef;
use crate::request::types::UserId;
use crate::websocket::messages::RequestView;

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(err: &SettlementError) -> ApiResult<T> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiResponse::from_error(err)))
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, ...}}
/// - Unhealthy: 503 + {code: 5001, msg: "unavailable"}
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Err(e) = state.store.health_check().await {
        tracing::error!(error = %e, "[HEALTH] request store unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error(
                error_codes::SERVICE_UNAVAILABLE,
                "unavailable",
            )),
        );
    }

    let (online_users, connections) = state.ws_manager.stats();
    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: Utc::now().timestamp_millis(),
            online_users,
            connections,
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: UserId,
}

/// GET /api/v1/requests/{request_ref}?user_id=
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(request_ref): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> ApiResult<RequestView> {
    match state.router.status(owner.user_id, &request_ref, None).await {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(RequestView::from(&record))),
        ),
        Err(e) => failure(&e),
    }
}

/// POST /api/v1/requests/{request_ref}/monitor
///
/// Re-attaches a confirmation monitor, e.g. to a `blockchain_timeout` request.
pub async fn resume_monitor(
    State(state): State<Arc<AppState>>,
    Path(request_ref): Path<String>,
) -> ApiResult<String> {
    let parsed: RequestRef = match request_ref.parse() {
        Ok(r) => r,
        Err(_) => return failure(&SettlementError::RequestNotFound(request_ref)),
    };
    match state.monitor.resume(&parsed).await {
        Ok(_) => {
            tracing::info!(%parsed, "Confirmation monitor re-attached");
            (StatusCode::ACCEPTED, Json(ApiResponse::success(parsed.to_string())))
        }
        Err(e) => failure(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rails::testkit::{Harness, intent};
    use crate::request::{Direction, RequestStatus};

    fn app_state(h: &Harness) -> Arc<AppState> {
        Arc::new(AppState::new(
            h.router.clone(),
            h.notifier.clone(),
            h.store.clone(),
            h.monitor.clone(),
        ))
    }

    #[tokio::test]
    async fn test_health_ok() {
        let h = Harness::new();
        let _rx = h.connect(5);
        let (status, Json(body)) = health_check(State(app_state(&h))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.code, 0);
        let data = body.data.unwrap();
        assert_eq!(data.online_users, 1);
        assert_eq!(data.connections, 1);
    }

    #[tokio::test]
    async fn test_get_request_scoped_to_owner() {
        let h = Harness::new();
        let record = h.settle(42, Direction::Deposit, intent("10", "USD")).await;
        let state = app_state(&h);

        let (status, Json(body)) = get_request(
            State(state.clone()),
            Path(record.request_ref.to_string()),
            Query(OwnerQuery { user_id: 42 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().status, RequestStatus::Completed.as_str());

        let (status, Json(body)) = get_request(
            State(state),
            Path(record.request_ref.to_string()),
            Query(OwnerQuery { user_id: 43 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, error_codes::REQUEST_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resume_rejects_settled_request() {
        let h = Harness::new();
        let record = h.settle(42, Direction::Deposit, intent("10", "USD")).await;

        let (status, Json(body)) =
            resume_monitor(State(app_state(&h)), Path(record.request_ref.to_string())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, error_codes::CONFLICT);
    }
}
