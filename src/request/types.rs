//! Settlement Request Types
//!
//! The durable record of one user-initiated movement of value, plus the
//! rail-specific details frozen into it at submission time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::state::RequestStatus;
use crate::clients::ledger::LedgerAccount;
use crate::resolver::address::Chain;
use crate::resolver::destination::DestinationKind;

pub type UserId = u64;

/// Free-form operational metadata merged into a request as it progresses
pub type OpsMetadata = Map<String, Value>;

/// Well-known operational metadata keys
pub mod ops {
    pub const PARTNER_NOTIFICATION_FAILED: &str = "partner_notification_failed";
    pub const PARTNER_ERROR: &str = "partner_error";
    pub const PARTNER_TX_ID: &str = "partner_transaction_id";
    pub const PARTNER_TX_REF: &str = "partner_transaction_ref";
    pub const REQUIRES_MANUAL_REVIEW: &str = "requires_manual_review";
    pub const CUSTODY_TX_ID: &str = "custody_transaction_id";
    pub const CUSTODY_STATUS: &str = "custody_status";
    pub const TX_HASH: &str = "tx_hash";
    pub const CONFIRMATIONS: &str = "confirmations";
    pub const REQUIRED_CONFIRMATIONS: &str = "required_confirmations";
    pub const MONITOR_TIMED_OUT_AT: &str = "monitor_timed_out_at";
    pub const FEE_AMOUNT: &str = "fee_amount";
    pub const BALANCE_AFTER: &str = "balance_after";
    pub const AGENT_COMMISSION: &str = "agent_commission";
    pub const PAYABLE_AMOUNT: &str = "payable_amount";
    pub const AGENT_NOTIFIED: &str = "agent_notified";
}

// ============================================================================
// Request reference
// ============================================================================

/// Globally unique, time-sortable request reference (ULID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestRef(ulid::Ulid);

impl RequestRef {
    pub fn from_ulid(id: ulid::Ulid) -> Self {
        Self(id)
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl fmt::Display for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestRef {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for RequestRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Direction / rail
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Direction {
    Deposit = 1,
    Withdrawal = 2,
}

impl Direction {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Direction::Deposit),
            2 => Some(Direction::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailKind {
    Direct,
    Partner,
    Agent,
    CryptoInternal,
    CryptoExternal,
}

impl RailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailKind::Direct => "direct",
            RailKind::Partner => "partner",
            RailKind::Agent => "agent",
            RailKind::CryptoInternal => "crypto_internal",
            RailKind::CryptoExternal => "crypto_external",
        }
    }
}

impl fmt::Display for RailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RailKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RailKind::Direct),
            "partner" => Ok(RailKind::Partner),
            "agent" => Ok(RailKind::Agent),
            "crypto_internal" => Ok(RailKind::CryptoInternal),
            "crypto_external" => Ok(RailKind::CryptoExternal),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Frozen settlement facts
// ============================================================================

/// What the user typed, and the rate used to get to the settlement amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub original_amount: Decimal,
    pub original_currency: String,
    pub exchange_rate: Decimal,
}

/// Ledger movement decided at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Movement {
    Transfer {
        from: LedgerAccount,
        to: LedgerAccount,
    },
    Debit {
        account: LedgerAccount,
    },
    Credit {
        account: LedgerAccount,
    },
}

impl Movement {
    /// Account whose balance this movement reduces, if any
    pub fn debited_account(&self) -> Option<&LedgerAccount> {
        match self {
            Movement::Transfer { from, .. } => Some(from),
            Movement::Debit { account } => Some(account),
            Movement::Credit { .. } => None,
        }
    }
}

/// Rail-specific details; exactly one variant per rail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum RailDetails {
    Direct,
    Partner {
        partner_id: String,
        partner_name: String,
        destination_kind: DestinationKind,
        destination: String,
        local_currency: Option<String>,
    },
    Agent {
        agent_id: String,
        agent_name: String,
        agent_user_id: UserId,
        account_number: String,
    },
    CryptoInternal {
        chain: Chain,
        asset: String,
        address: String,
        recipient_user_id: UserId,
    },
    CryptoExternal {
        chain: Chain,
        asset: String,
        address: String,
        decimals: u32,
        /// Decimal string; u128 does not survive JSON numbers
        amount_smallest_unit: String,
    },
}

impl RailDetails {
    pub fn kind(&self) -> RailKind {
        match self {
            RailDetails::Direct => RailKind::Direct,
            RailDetails::Partner { .. } => RailKind::Partner,
            RailDetails::Agent { .. } => RailKind::Agent,
            RailDetails::CryptoInternal { .. } => RailKind::CryptoInternal,
            RailDetails::CryptoExternal { .. } => RailKind::CryptoExternal,
        }
    }
}

// ============================================================================
// Request record
// ============================================================================

/// Everything needed to persist a new request in `pending`
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request_ref: RequestRef,
    pub cid: Option<String>,
    pub user_id: UserId,
    pub direction: Direction,
    pub service: String,
    /// Settlement-currency amount
    pub amount: Decimal,
    pub currency: String,
    pub quote: Quote,
    pub agent_external_id: Option<String>,
    pub partner_id: Option<String>,
    pub destination: Option<String>,
    pub movement: Movement,
    pub details: RailDetails,
    pub expires_at: DateTime<Utc>,
}

/// Persisted settlement request
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub id: i64,
    pub request_ref: RequestRef,
    pub cid: Option<String>,
    pub user_id: UserId,
    pub direction: Direction,
    pub service: String,
    pub amount: Decimal,
    pub currency: String,
    pub quote: Quote,
    pub agent_external_id: Option<String>,
    pub partner_id: Option<String>,
    pub destination: Option<String>,
    pub movement: Movement,
    pub details: RailDetails,
    pub ops: OpsMetadata,
    pub status: RequestStatus,
    pub receipt_code: Option<String>,
    pub journal_id: Option<String>,
    pub error_message: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementRequest {
    /// Materialize a freshly inserted record
    pub fn from_new(id: i64, new: NewRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request_ref: new.request_ref,
            cid: new.cid,
            user_id: new.user_id,
            direction: new.direction,
            service: new.service,
            amount: new.amount,
            currency: new.currency,
            quote: new.quote,
            agent_external_id: new.agent_external_id,
            partner_id: new.partner_id,
            destination: new.destination,
            movement: new.movement,
            details: new.details,
            ops: OpsMetadata::new(),
            status: RequestStatus::Pending,
            receipt_code: None,
            journal_id: None,
            error_message: None,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn rail(&self) -> RailKind {
        self.details.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn flag(&self, key: &str) -> bool {
        self.ops.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Flattened metadata map: quote, rail details, then operational entries
    pub fn metadata(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(
            "original_amount".into(),
            Value::String(self.quote.original_amount.to_string()),
        );
        out.insert(
            "original_currency".into(),
            Value::String(self.quote.original_currency.clone()),
        );
        out.insert(
            "exchange_rate".into(),
            Value::String(self.quote.exchange_rate.to_string()),
        );
        if let Ok(Value::Object(details)) = serde_json::to_value(&self.details) {
            out.extend(details);
        }
        out.extend(self.ops.clone());
        out
    }
}

/// Fields written together with a status change
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub receipt_code: Option<String>,
    pub journal_id: Option<String>,
    pub error_message: Option<String>,
    pub ops: OpsMetadata,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipt(mut self, receipt_code: impl Into<String>, journal_id: impl Into<String>) -> Self {
        self.receipt_code = Some(receipt_code.into());
        self.journal_id = Some(journal_id.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn op(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.ops.insert(key.to_string(), value.into());
        self
    }

    pub fn ops(mut self, ops: OpsMetadata) -> Self {
        self.ops.extend(ops);
        self
    }

    /// Apply to an in-memory record (used by the memory store)
    pub fn apply(self, record: &mut SettlementRequest) {
        if let Some(receipt_code) = self.receipt_code {
            record.receipt_code = Some(receipt_code);
        }
        if let Some(journal_id) = self.journal_id {
            record.journal_id = Some(journal_id);
        }
        if let Some(error_message) = self.error_message {
            record.error_message = Some(error_message);
        }
        record.ops.extend(self.ops);
    }
}
