//! Mock upstream clients for testing
//!
//! Each mock counts calls and has switches to force failures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::ClientError;
use super::custody::{ChainTxStatus, CustodyClient, CustodyReceipt, CustodyWithdrawal, Wallet};
use super::ledger::{
    AccountPurpose, Agent, AgentAccount, AgentDirectory, Balance, LedgerAccount, LedgerClient,
    LedgerReceipt, PostingCommand, TransferCommand,
};
use super::partner::{Partner, PartnerAck, PartnerClient, PartnerInitiation};
use super::profile::{OwnerType, Profile, ProfileClient};
use crate::request::types::UserId;
use crate::resolver::address::Chain;
use crate::resolver::destination::DestinationKind;

fn remote(service: &'static str, message: &str) -> ClientError {
    ClientError::Remote {
        service,
        status: 503,
        message: message.to_string(),
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCall {
    pub kind: &'static str,
    pub external_ref: String,
    pub from: Option<LedgerAccount>,
    pub to: Option<LedgerAccount>,
    pub amount: Decimal,
}

pub struct MockLedger {
    /// Accounts without an explicit balance report this much available
    default_balance: Decimal,
    balances: Mutex<HashMap<LedgerAccount, Decimal>>,
    agents: Mutex<Vec<Agent>>,
    calls: Mutex<Vec<LedgerCall>>,
    posting_count: AtomicUsize,
    balance_queries: AtomicUsize,
    fail_postings: Mutex<bool>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            default_balance: Decimal::from(1_000_000),
            balances: Mutex::new(HashMap::new()),
            agents: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            posting_count: AtomicUsize::new(0),
            balance_queries: AtomicUsize::new(0),
            fail_postings: Mutex::new(false),
        }
    }

    pub fn set_balance(&self, account: LedgerAccount, available: Decimal) {
        self.balances.lock().unwrap().insert(account, available);
    }

    pub fn add_agent(&self, agent: Agent) {
        self.agents.lock().unwrap().push(agent);
    }

    pub fn set_fail_postings(&self, fail: bool) {
        *self.fail_postings.lock().unwrap() = fail;
    }

    pub fn posting_count(&self) -> usize {
        self.posting_count.load(Ordering::SeqCst)
    }

    pub fn balance_queries(&self) -> usize {
        self.balance_queries.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn post(&self, call: LedgerCall) -> Result<LedgerReceipt, ClientError> {
        if *self.fail_postings.lock().unwrap() {
            return Err(remote("ledger", "ledger unavailable"));
        }
        let n = self.posting_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(call);
        Ok(LedgerReceipt {
            receipt_code: format!("RC-{n:04}"),
            journal_id: format!("J-{n:04}"),
            fee_amount: Decimal::ZERO,
            balance_after: None,
            agent_commission: None,
            payable_amount: None,
        })
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn transfer(&self, cmd: &TransferCommand) -> Result<LedgerReceipt, ClientError> {
        self.post(LedgerCall {
            kind: "transfer",
            external_ref: cmd.external_ref.clone(),
            from: Some(cmd.from.clone()),
            to: Some(cmd.to.clone()),
            amount: cmd.amount,
        })
    }

    async fn debit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError> {
        self.post(LedgerCall {
            kind: "debit",
            external_ref: cmd.external_ref.clone(),
            from: Some(cmd.account.clone()),
            to: None,
            amount: cmd.amount,
        })
    }

    async fn credit(&self, cmd: &PostingCommand) -> Result<LedgerReceipt, ClientError> {
        self.post(LedgerCall {
            kind: "credit",
            external_ref: cmd.external_ref.clone(),
            from: None,
            to: Some(cmd.account.clone()),
            amount: cmd.amount,
        })
    }

    async fn get_balance(&self, account: &LedgerAccount) -> Result<Balance, ClientError> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        let available = self
            .balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(self.default_balance);
        Ok(Balance {
            balance: available,
            available_balance: available,
        })
    }
}

#[async_trait]
impl AgentDirectory for MockLedger {
    async fn get_agent_by_id(
        &self,
        agent_id: &str,
        _include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.agent_id == agent_id)
            .cloned())
    }

    async fn get_agent_by_user_id(
        &self,
        user_id: UserId,
        _include_accounts: bool,
    ) -> Result<Option<Agent>, ClientError> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.user_id == user_id)
            .cloned())
    }
}

/// Active agent with one active USD wallet account
pub fn agent(agent_id: &str, user_id: UserId) -> Agent {
    Agent {
        agent_id: agent_id.to_string(),
        user_id,
        name: format!("Agent {agent_id}"),
        active: true,
        accounts: vec![AgentAccount {
            account_number: format!("{agent_id}-USD-W"),
            currency: "USD".to_string(),
            purpose: AccountPurpose::Wallet,
            active: true,
            locked: false,
        }],
    }
}

// ============================================================================
// Partners
// ============================================================================

pub struct MockPartners {
    partners: Mutex<Vec<Partner>>,
    deposit_count: AtomicUsize,
    withdrawal_count: AtomicUsize,
    last_initiation: Mutex<Option<PartnerInitiation>>,
    fail_webhook: Mutex<bool>,
}

impl Default for MockPartners {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPartners {
    pub fn new() -> Self {
        Self {
            partners: Mutex::new(Vec::new()),
            deposit_count: AtomicUsize::new(0),
            withdrawal_count: AtomicUsize::new(0),
            last_initiation: Mutex::new(None),
            fail_webhook: Mutex::new(false),
        }
    }

    pub fn add_partner(&self, partner: Partner) {
        self.partners.lock().unwrap().push(partner);
    }

    pub fn set_fail_webhook(&self, fail: bool) {
        *self.fail_webhook.lock().unwrap() = fail;
    }

    pub fn deposit_count(&self) -> usize {
        self.deposit_count.load(Ordering::SeqCst)
    }

    pub fn withdrawal_count(&self) -> usize {
        self.withdrawal_count.load(Ordering::SeqCst)
    }

    pub fn last_initiation(&self) -> Option<PartnerInitiation> {
        self.last_initiation.lock().unwrap().clone()
    }

    fn webhook(&self, req: &PartnerInitiation) -> Result<PartnerAck, ClientError> {
        *self.last_initiation.lock().unwrap() = Some(req.clone());
        if *self.fail_webhook.lock().unwrap() {
            return Err(remote("partner", "webhook endpoint down"));
        }
        Ok(PartnerAck {
            transaction_id: format!("PTX-{}", req.transaction_ref),
            transaction_ref: Some(req.transaction_ref.clone()),
        })
    }
}

#[async_trait]
impl PartnerClient for MockPartners {
    async fn get_partners_by_service(&self, service: &str) -> Result<Vec<Partner>, ClientError> {
        Ok(self
            .partners
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.offers(service))
            .cloned()
            .collect())
    }

    async fn initiate_deposit(&self, req: &PartnerInitiation) -> Result<PartnerAck, ClientError> {
        self.deposit_count.fetch_add(1, Ordering::SeqCst);
        self.webhook(req)
    }

    async fn initiate_withdrawal(
        &self,
        req: &PartnerInitiation,
    ) -> Result<PartnerAck, ClientError> {
        self.withdrawal_count.fetch_add(1, Ordering::SeqCst);
        self.webhook(req)
    }
}

/// Mobile-money partner quoting KES at `rate` per USD
pub fn kes_partner(id: &str, service: &str, rate: i64) -> Partner {
    Partner {
        id: id.to_string(),
        name: format!("Partner {id}"),
        services: vec![service.to_string()],
        local_currency: Some("KES".to_string()),
        exchange_rate: Some(Decimal::from(rate)),
        destination_kind: DestinationKind::Phone,
        active: true,
    }
}

// ============================================================================
// Custody
// ============================================================================

pub struct MockCustody {
    wallets: Mutex<Vec<Wallet>>,
    /// Scripted status replies; the last one repeats once the script runs out
    statuses: Mutex<VecDeque<Result<ChainTxStatus, ClientError>>>,
    last_withdrawal: Mutex<Option<CustodyWithdrawal>>,
    withdraw_count: AtomicUsize,
    status_polls: AtomicUsize,
    fail_withdraw: Mutex<bool>,
}

impl Default for MockCustody {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCustody {
    pub fn new() -> Self {
        Self {
            wallets: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
            last_withdrawal: Mutex::new(None),
            withdraw_count: AtomicUsize::new(0),
            status_polls: AtomicUsize::new(0),
            fail_withdraw: Mutex::new(false),
        }
    }

    pub fn add_wallet(&self, user_id: UserId, chain: Chain, asset: &str, address: &str) {
        self.wallets.lock().unwrap().push(Wallet {
            wallet_id: format!("w-{user_id}-{}", chain.as_str()),
            user_id,
            chain,
            asset: asset.to_string(),
            address: address.to_string(),
        });
    }

    pub fn script_status(&self, status: &str, confirmations: u32) {
        self.statuses.lock().unwrap().push_back(Ok(ChainTxStatus {
            status: status.to_string(),
            confirmations,
            required_confirmations: 12,
            tx_hash: Some("0xabc".to_string()),
            error: None,
        }));
    }

    pub fn script_poll_error(&self) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Err(remote("custody", "status endpoint down")));
    }

    pub fn set_fail_withdraw(&self, fail: bool) {
        *self.fail_withdraw.lock().unwrap() = fail;
    }

    pub fn withdraw_count(&self) -> usize {
        self.withdraw_count.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn last_withdrawal(&self) -> Option<CustodyWithdrawal> {
        self.last_withdrawal.lock().unwrap().clone()
    }
}

#[async_trait]
impl CustodyClient for MockCustody {
    async fn get_user_wallets(&self, user_id: UserId) -> Result<Vec<Wallet>, ClientError> {
        Ok(self
            .wallets
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ClientError> {
        Ok(self
            .wallets
            .lock()
            .unwrap()
            .iter()
            .find(|w| {
                w.address == address
                    || w.chain.canonical_address(&w.address).is_ok_and(|a| a == address)
            })
            .cloned())
    }

    async fn withdraw(&self, cmd: &CustodyWithdrawal) -> Result<CustodyReceipt, ClientError> {
        self.withdraw_count.fetch_add(1, Ordering::SeqCst);
        *self.last_withdrawal.lock().unwrap() = Some(cmd.clone());
        if *self.fail_withdraw.lock().unwrap() {
            return Err(remote("custody", "signer offline"));
        }
        Ok(CustodyReceipt {
            transaction_id: format!("CTX-{}", cmd.idempotency_key),
            tx_hash: None,
            status: "submitted".to_string(),
        })
    }

    async fn get_transaction_status(
        &self,
        _transaction_id: &str,
    ) -> Result<ChainTxStatus, ClientError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.statuses.lock().unwrap();
        if script.len() > 1 {
            return script.pop_front().unwrap_or_else(|| Err(remote("custody", "empty script")));
        }
        match script.front() {
            Some(reply) => reply.clone(),
            None => Ok(ChainTxStatus {
                status: "pending".to_string(),
                confirmations: 0,
                required_confirmations: 12,
                tx_hash: None,
                error: None,
            }),
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Default)]
pub struct MockProfiles {
    profiles: Mutex<HashMap<(OwnerType, String), Profile>>,
    lookups: AtomicUsize,
}

impl MockProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_phone(&self, owner_type: OwnerType, owner_id: &str, phone: &str) {
        self.profiles
            .lock()
            .unwrap()
            .entry((owner_type, owner_id.to_string()))
            .or_default()
            .phone = Some(phone.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileClient for MockProfiles {
    async fn fetch_profile(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> Result<Option<Profile>, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(&(owner_type, owner_id.to_string()))
            .cloned())
    }
}
