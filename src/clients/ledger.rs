//! Ledger client
//!
//! The ledger is the system of record for balances. Every posting carries
//! the request reference as `external_ref`, which the ledger dedupes on.

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ClientError, ServiceHttp};
use crate::config::ServiceEndpoint;
use crate::request::types::UserId;

/// A ledger account, addressed by owner and currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner_type", rename_all = "snake_case")]
pub enum LedgerAccount {
    User { user_id: UserId, currency: String },
    Partner { partner_id: String, currency: String },
    Agent { account_number: String, currency: String },
    /// Pool that funds outgoing on-chain withdrawals
    SystemLiquidity { currency: String },
}

impl LedgerAccount {
    pub fn user(user_id: UserId, currency: &str) -> Self {
        LedgerAccount::User {
            user_id,
            currency: currency.to_string(),
        }
    }

    pub fn partner(partner_id: &str, currency: &str) -> Self {
        LedgerAccount::Partner {
            partner_id: partner_id.to_string(),
            currency: currency.to_string(),
        }
    }

    pub fn agent(account_number: &str, currency: &str) -> Self {
        LedgerAccount::Agent {
            account_number: account_number.to_string(),
            currency: currency.to_string(),
        }
    }

    pub fn liquidity(currency: &str) -> Self {
        LedgerAccount::SystemLiquidity {
            currency: currency.to_string(),
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            LedgerAccount::User { currency, .. }
            | LedgerAccount::Partner { currency, .. }
            | LedgerAccount::Agent { currency, .. }
            | LedgerAccount::SystemLiquidity { currency } => currency,
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAccount::User { user_id, currency } => write!(f, "user:{user_id}:{currency}"),
            LedgerAccount::Partner {
                partner_id,
                currency,
            } => write!(f, "partner:{partner_id}:{currency}"),
            LedgerAccount::Agent {
                account_number,
                currency,
            } => write!(f, "agent:{account_number}:{currency}"),
            LedgerAccount::SystemLiquidity { currency } => write!(f, "liquidity:{currency}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Transfer,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferCommand {
    pub from: LedgerAccount,
    pub to: LedgerAccount,
    pub amount: Decimal,
    pub currency: String,
    pub external_ref: String,
    pub tx_type: TxType,
    pub description: Option<String>,
}

/// Single-sided posting (direct deposits and withdrawals)
#[derive(Debug, Clone, Serialize)]
pub struct PostingCommand {
    pub account: LedgerAccount,
    pub amount: Decimal,
    pub currency: String,
    pub external_ref: String,
    pub tx_type: TxType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub receipt_code: String,
    pub journal_id: String,
    #[serde(default)]
    pub fee_amount: Decimal,
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub agent_commission: Option<Decimal>,
    #[serde(default)]
    pub payable_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Decimal,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountPurpose {
    Wallet,
    Commission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAccount {
    pub account_number: String,
    pub currency: String,
    pub purpose: AccountPurpose,
    pub active: bool,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub user_id: UserId,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub accounts: Vec<AgentAccount>,
}

/// Balance-moving operations
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn transfer(&self, cmd: &TransferCommand) -> Result<LedgerReceipt, ClientError>;

    async fn debit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError>;

    async fn credit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError>;

    async fn get_balance(&self, account: &LedgerAccount) -> Result<Balance, ClientError>;
}

/// Agent directory, hosted by the ledger
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_agent_by_id(
        &self,
        agent_id: &str,
        include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError>;

    async fn get_agent_by_user_id(
        &self,
        user_id: UserId,
        include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError>;
}

pub struct HttpLedgerClient {
    http: ServiceHttp,
}

impl HttpLedgerClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ClientError> {
        Ok(Self {
            http: ServiceHttp::new("ledger", endpoint)?,
        })
    }
}

#[derive(Serialize)]
struct BalanceQuery<'a> {
    account: &'a LedgerAccount,
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn transfer(&self, cmd: &TransferCommand) -> Result<LedgerReceipt, ClientError> {
        self.http.post("/v1/transfers", cmd).await
    }

    async fn debit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError> {
        self.http.post("/v1/debits", cmd).await
    }

    async fn credit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError> {
        self.http.post("/v1/credits", cmd).await
    }

    async fn get_balance(&self, account: &LedgerAccount) -> Result<Balance, ClientError> {
        // Balance reads are POSTed so the account selector stays structured
        self.http
            .post("/v1/balances/query", &BalanceQuery { account })
            .await
    }
}

#[async_trait]
impl AgentDirectory for HttpLedgerClient {
    async fn get_agent_by_id(
        &self,
        agent_id: &str,
        include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError> {
        self.http
            .get_optional(
                &format!("/v1/agents/{agent_id}"),
                &[("include_accounts", include_accounts.to_string())],
            )
            .await
    }

    async fn get_agent_by_user_id(
        &self,
        user_id: UserId,
        include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError> {
        self.http
            .get_optional(
                &format!("/v1/agents/by-user/{user_id}"),
                &[("include_accounts", include_accounts.to_string())],
            )
            .await
    }
}
