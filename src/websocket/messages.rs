//! Live connection wire protocol
//!
//! Inbound frames are `{"type": ..., "data": {...}}`. Outbound frames carry a
//! `type` plus optional `message`, `code` and `data`. Replies use the types
//! `success` and `error`; pushed events are named `<direction>_<event>`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SettlementError;
use crate::rails::SettlementIntent;
use crate::request::types::{Direction, SettlementRequest, UserId};

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    DepositRequest(SettlementIntent),
    WithdrawRequest(SettlementIntent),
    /// Crypto send; same pipeline as a crypto withdrawal
    Transfer(SettlementIntent),
    GetDepositStatus(RequestQuery),
    GetWithdrawalStatus(RequestQuery),
    GetRequestHistory(HistoryQuery),
    CancelDeposit(RequestQuery),
    CancelWithdrawal(RequestQuery),
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestQuery {
    pub request_ref: String,
}

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Lifecycle events pushed to the request owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Processing,
    Completed,
    Failed,
    SentToPartner,
    BlockchainInitiated,
    Confirming,
    BlockchainFailed,
    Delayed,
    Cancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Processing => "processing",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::SentToPartner => "sent_to_partner",
            EventKind::BlockchainInitiated => "blockchain_initiated",
            EventKind::Confirming => "confirming",
            EventKind::BlockchainFailed => "blockchain_failed",
            EventKind::Delayed => "delayed",
            EventKind::Cancelled => "cancelled",
        }
    }

    pub fn event_name(&self, direction: Direction) -> String {
        format!("{}_{}", direction.as_str(), self.as_str())
    }
}

/// Request as shown to its owner
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request_ref: String,
    pub direction: Direction,
    pub rail: String,
    pub service: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&SettlementRequest> for RequestView {
    fn from(r: &SettlementRequest) -> Self {
        Self {
            request_ref: r.request_ref.to_string(),
            direction: r.direction,
            rail: r.rail().as_str().to_string(),
            service: r.service.clone(),
            status: r.status.as_str().to_string(),
            amount: r.amount,
            currency: r.currency.clone(),
            destination: r.destination.clone(),
            receipt_code: r.receipt_code.clone(),
            journal_id: r.journal_id.clone(),
            error_message: r.error_message.clone(),
            metadata: r.metadata(),
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn view_value(record: &SettlementRequest) -> Value {
    serde_json::to_value(RequestView::from(record)).unwrap_or(Value::Null)
}

impl WsMessage {
    fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            code: None,
            data: None,
        }
    }

    pub fn connected(user_id: UserId) -> Self {
        let mut msg = Self::bare("connected");
        msg.data = Some(serde_json::json!({ "user_id": user_id }));
        msg
    }

    pub fn pong() -> Self {
        Self::bare("pong")
    }

    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            kind: "success".into(),
            message: Some(message.into()),
            code: None,
            data: Some(data),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error".into(),
            message: Some(message.into()),
            code: Some(code.into()),
            data: None,
        }
    }

    pub fn from_error(err: &SettlementError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    /// Acknowledgement carrying one request
    pub fn request_ack(message: impl Into<String>, record: &SettlementRequest) -> Self {
        Self::success(message, view_value(record))
    }

    /// Lifecycle event for the request owner
    ///
    /// `processing` and `delayed` always read as status "processing": the
    /// owner is not shown internal failure or timeout states.
    pub fn event(kind: EventKind, record: &SettlementRequest) -> Self {
        let mut data = view_value(record);
        if matches!(kind, EventKind::Processing | EventKind::Delayed)
            && let Some(obj) = data.as_object_mut()
        {
            obj.insert("status".into(), Value::String("processing".into()));
            obj.remove("error_message");
        }
        let mut msg = Self::bare(kind.event_name(record.direction));
        msg.message = record.error_message.clone().filter(|_| {
            matches!(kind, EventKind::Failed | EventKind::BlockchainFailed)
        });
        msg.data = Some(data);
        msg
    }

    /// Pushed to the recipient of an internal crypto transfer
    pub fn transfer_received(record: &SettlementRequest) -> Self {
        let mut msg = Self::bare("transfer_received");
        msg.data = Some(serde_json::json!({
            "request_ref": record.request_ref.to_string(),
            "from_user_id": record.user_id,
            "amount": record.amount,
            "currency": record.currency,
            "receipt_code": record.receipt_code,
        }));
        msg
    }

    /// Hand-off notice pushed to the agent handling a request
    pub fn agent_assignment(record: &SettlementRequest, receipt_code: &str) -> Self {
        let mut msg = Self::bare("agent_settlement_assigned");
        msg.data = Some(serde_json::json!({
            "request_ref": record.request_ref.to_string(),
            "direction": record.direction,
            "user_id": record.user_id,
            "amount": record.amount,
            "currency": record.currency,
            "receipt_code": receipt_code,
        }));
        msg
    }
}
