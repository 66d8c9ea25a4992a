//! Custody client
//!
//! Custody owns user wallets and broadcasts on-chain withdrawals. It dedupes
//! withdrawals on both the accounting transaction id and the idempotency key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ClientError, ServiceHttp};
use crate::config::ServiceEndpoint;
use crate::request::types::UserId;
use crate::resolver::address::Chain;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: String,
    pub user_id: UserId,
    pub chain: Chain,
    pub asset: String,
    pub address: String,
}

impl Wallet {
    pub fn holds(&self, chain: Chain, asset: &str) -> bool {
        self.chain == chain && self.asset.eq_ignore_ascii_case(asset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustodyWithdrawal {
    /// Ledger receipt code of the debit that funds this withdrawal
    pub accounting_tx_id: String,
    /// Request reference
    pub idempotency_key: String,
    pub user_id: UserId,
    pub chain: Chain,
    pub asset: String,
    /// Smallest on-chain unit, as a decimal string
    pub amount: String,
    pub to_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyReceipt {
    pub transaction_id: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
    pub status: String,
}

/// Raw transaction status as custody reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTxStatus {
    pub status: String,
    #[serde(default)]
    pub confirmations: u32,
    #[serde(default)]
    pub required_confirmations: u32,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait CustodyClient: Send + Sync {
    async fn get_user_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, ClientError>;

    async fn get_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ClientError>;

    async fn withdraw(&self, cmd: &CustodyWithdrawal) -> Result<CustodyReceipt, ClientError>;

    async fn get_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<ChainTxStatus, ClientError>;
}

pub struct HttpCustodyClient {
    http: ServiceHttp,
}

impl HttpCustodyClient {
    pub fn new(endpoint: &ServiceEndpoint) -> Result<Self, ClientError> {
        Ok(Self {
            http: ServiceHttp::new("custody", endpoint)?,
        })
    }
}

#[async_trait]
impl CustodyClient for HttpCustodyClient {
    async fn get_user_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, ClientError> {
        self.http
            .get_optional(&format!("/v1/users/{user_id}/wallets"), &[])
            .await
            .map(Option::unwrap_or_default)
    }

    async fn get_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ClientError> {
        self.http
            .get_optional("/v1/wallets/lookup", &[("address", address.to_string())])
            .await
    }

    async fn withdraw(&self, cmd: &CustodyWithdrawal) -> Result<CustodyReceipt, ClientError> {
        self.http.post("/v1/withdrawals", cmd).await
    }

    async fn get_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<ChainTxStatus, ClientError> {
        self.http
            .get(&format!("/v1/transactions/{transaction_id}"), &[])
            .await
    }
}
