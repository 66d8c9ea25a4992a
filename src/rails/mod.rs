//! Settlement Rails
//!
//! One request travels over exactly one rail:
//! - direct: single-sided ledger posting on the user's own account
//! - partner: ledger leg against a partner float, then a partner webhook
//! - agent: ledger leg against an agent's wallet account
//! - crypto: internal user-to-user transfer, or an on-chain withdrawal
//!
//! Each rail contributes a context builder (resolve + freeze, before
//! persistence) and a settle step run by the shared executor.

pub mod agent;
pub mod crypto;
pub mod direct;
pub mod executor;
pub mod partner;
pub mod router;

#[cfg(test)]
pub(crate) mod testkit;

pub use executor::SettlementExecutor;
pub use router::{RailSelection, RequestRouter, Submitted};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use crate::clients::ledger::{LedgerAccount, LedgerClient, TxType};
use crate::clients::{AgentDirectory, ClientError, CustodyClient, PartnerClient, ProfileClient};
use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::request::types::{Direction, RequestRef, UserId};
use crate::request::RequestStore;
use crate::websocket::ConnectionManager;

/// Inbound settlement intent, as received on the live connection
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SettlementIntent {
    /// Client idempotency key, unique per user
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub cid: Option<String>,

    /// Amount as entered by the user, in `currency`
    pub amount: Decimal,

    #[validate(length(min = 2, max = 10))]
    pub currency: String,

    /// Partner service name (e.g. "mpesa"), or "crypto"
    #[serde(default)]
    #[validate(length(max = 64))]
    pub service: Option<String>,

    #[serde(default)]
    #[validate(length(max = 64))]
    pub partner_id: Option<String>,

    /// Agent external id; selects the agent rail
    #[serde(default, alias = "agent_external_id")]
    #[validate(length(max = 64))]
    pub agent_id: Option<String>,

    /// Phone, bank account, or crypto address
    #[serde(default)]
    #[validate(length(max = 128))]
    pub destination: Option<String>,

    /// Crypto chain; defaults from the asset when unambiguous
    #[serde(default)]
    pub chain: Option<String>,

    #[serde(default)]
    #[validate(length(max = 256))]
    pub note: Option<String>,
}

impl SettlementIntent {
    pub fn service_name(&self) -> Option<&str> {
        self.service
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn agent_ref(&self) -> Option<&str> {
        self.agent_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn partner_ref(&self) -> Option<&str> {
        self.partner_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Upstreams and settings every rail works against
pub struct RailServices {
    pub store: Arc<dyn RequestStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub agents: Arc<dyn AgentDirectory>,
    pub partners: Arc<dyn PartnerClient>,
    pub custody: Arc<dyn CustodyClient>,
    pub profiles: Arc<dyn ProfileClient>,
    pub notifier: Arc<ConnectionManager>,
    pub settlement: SettlementConfig,
}

/// Identity of a request being built, fixed before any rail runs
#[derive(Debug, Clone)]
pub struct Intake {
    pub request_ref: RequestRef,
    pub user_id: UserId,
    pub direction: Direction,
    pub cid: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) fn ledger_error(e: ClientError) -> SettlementError {
    SettlementError::Ledger(e.to_string())
}

pub(crate) fn tx_type(direction: Direction) -> TxType {
    match direction {
        Direction::Deposit => TxType::Deposit,
        Direction::Withdrawal => TxType::Withdrawal,
    }
}

/// Reject when `account` cannot cover `amount`
pub(crate) async fn ensure_available(
    ledger: &dyn LedgerClient,
    account: &LedgerAccount,
    amount: Decimal,
) -> Result<(), SettlementError> {
    let balance = ledger.get_balance(account).await.map_err(ledger_error)?;
    if balance.available_balance < amount {
        tracing::info!(
            %account,
            %amount,
            available = %balance.available_balance,
            "insufficient balance"
        );
        return Err(SettlementError::InsufficientBalance);
    }
    Ok(())
}
