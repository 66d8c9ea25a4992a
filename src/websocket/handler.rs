//! WebSocket handler for client connections
//!
//! Handles the upgrade, registers the connection for pushes, and answers
//! inbound frames through the request router.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::messages::{ClientMessage, RequestView, WsMessage};
use crate::error::SettlementError;
use crate::gateway::state::AppState;
use crate::rails::{RequestRouter, Submitted};
use crate::request::types::{Direction, UserId};

/// WebSocket connection query parameters
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: UserId,
}

/// WebSocket upgrade handler
///
/// Endpoint: GET /ws?user_id=1001
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.user_id, state))
}

/// Handle WebSocket connection lifecycle
async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let manager = state.ws_manager.clone();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = manager.channel();

    let conn_id = manager.add_connection(user_id, tx.clone());

    if let Ok(json) = serde_json::to_string(&WsMessage::connected(user_id)) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward queued replies and pushes to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg)
                && sender.send(Message::Text(json.into())).await.is_err()
            {
                break;
            }
        }
    });

    let router = state.router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(request) => dispatch(&router, user_id, request).await,
                        Err(e) => {
                            debug!(user_id, error = %e, "Unparseable frame");
                            WsMessage::from_error(&SettlementError::InvalidPayload(e.to_string()))
                        }
                    };
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    manager.remove_connection(user_id, conn_id);
}

/// Answer one inbound frame for `user_id`
pub async fn dispatch(router: &RequestRouter, user_id: UserId, msg: ClientMessage) -> WsMessage {
    let result = match msg {
        ClientMessage::Ping => return WsMessage::pong(),
        ClientMessage::DepositRequest(intent) => router
            .submit(user_id, Direction::Deposit, intent)
            .await
            .map(|s| accepted(Direction::Deposit, s)),
        ClientMessage::WithdrawRequest(intent) => router
            .submit(user_id, Direction::Withdrawal, intent)
            .await
            .map(|s| accepted(Direction::Withdrawal, s)),
        ClientMessage::Transfer(intent) => router
            .transfer(user_id, intent)
            .await
            .map(|s| accepted(Direction::Withdrawal, s)),
        ClientMessage::GetDepositStatus(q) => router
            .status(user_id, &q.request_ref, Some(Direction::Deposit))
            .await
            .map(|r| WsMessage::request_ack("deposit status", &r)),
        ClientMessage::GetWithdrawalStatus(q) => router
            .status(user_id, &q.request_ref, Some(Direction::Withdrawal))
            .await
            .map(|r| WsMessage::request_ack("withdrawal status", &r)),
        ClientMessage::GetRequestHistory(q) => router
            .history(user_id, q.direction, q.effective_limit())
            .await
            .map(|rows| {
                let views: Vec<RequestView> = rows.iter().map(RequestView::from).collect();
                WsMessage::success(
                    "request history",
                    serde_json::to_value(views).unwrap_or(Value::Null),
                )
            }),
        ClientMessage::CancelDeposit(q) => router
            .cancel(user_id, &q.request_ref, Direction::Deposit)
            .await
            .map(|r| WsMessage::request_ack("deposit cancelled", &r)),
        ClientMessage::CancelWithdrawal(q) => router
            .cancel(user_id, &q.request_ref, Direction::Withdrawal)
            .await
            .map(|r| WsMessage::request_ack("withdrawal cancelled", &r)),
    };

    result.unwrap_or_else(|e| {
        if e.http_status() >= 500 {
            warn!(user_id, code = e.code(), error = %e, "Request failed");
        }
        WsMessage::from_error(&e)
    })
}

fn accepted(direction: Direction, submitted: Submitted) -> WsMessage {
    let message = if submitted.is_replay() {
        format!("{direction} request already submitted")
    } else {
        format!("{direction} request accepted")
    };
    WsMessage::request_ack(message, &submitted.request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rails::testkit::Harness;

    fn frame(json: &str) -> ClientMessage {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let h = Harness::new();
        let reply = dispatch(&h.router, 1, frame(r#"{"type":"ping"}"#)).await;
        assert_eq!(reply.kind, "pong");
    }

    #[tokio::test]
    async fn test_deposit_then_status_and_history() {
        let h = Harness::new();
        let reply = dispatch(
            &h.router,
            42,
            frame(r#"{"type":"deposit_request","data":{"amount":"12","currency":"USD","cid":"c-1"}}"#),
        )
        .await;
        assert_eq!(reply.kind, "success");
        assert_eq!(reply.message.as_deref(), Some("deposit request accepted"));
        let data = reply.data.unwrap();
        let request_ref = data["request_ref"].as_str().unwrap().to_string();
        assert_eq!(data["currency"], "USD");

        let replay = dispatch(
            &h.router,
            42,
            frame(r#"{"type":"deposit_request","data":{"amount":"12","currency":"USD","cid":"c-1"}}"#),
        )
        .await;
        assert_eq!(
            replay.message.as_deref(),
            Some("deposit request already submitted")
        );

        let status = dispatch(
            &h.router,
            42,
            frame(&format!(
                r#"{{"type":"get_deposit_status","data":{{"request_ref":"{request_ref}"}}}}"#
            )),
        )
        .await;
        assert_eq!(status.kind, "success");

        let foreign = dispatch(
            &h.router,
            7,
            frame(&format!(
                r#"{{"type":"get_deposit_status","data":{{"request_ref":"{request_ref}"}}}}"#
            )),
        )
        .await;
        assert_eq!(foreign.kind, "error");
        assert_eq!(foreign.code.as_deref(), Some("REQUEST_NOT_FOUND"));

        let history = dispatch(
            &h.router,
            42,
            frame(r#"{"type":"get_request_history","data":{"limit":5}}"#),
        )
        .await;
        assert_eq!(history.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_become_error_frames() {
        let h = Harness::new();
        let reply = dispatch(
            &h.router,
            42,
            frame(r#"{"type":"withdraw_request","data":{"amount":"5","currency":"KES"}}"#),
        )
        .await;
        assert_eq!(reply.kind, "error");
        assert_eq!(reply.code.as_deref(), Some("CURRENCY_MISMATCH"));

        let reply = dispatch(
            &h.router,
            42,
            frame(r#"{"type":"transfer","data":{"amount":"1","currency":"ETH"}}"#),
        )
        .await;
        assert_eq!(reply.code.as_deref(), Some("MISSING_DESTINATION"));
    }
}
