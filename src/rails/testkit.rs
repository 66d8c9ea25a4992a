//! Wiring for rail tests: in-memory store, mock upstreams, live registry

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use super::{Intake, RailServices, RequestRouter, SettlementExecutor, SettlementIntent};
use crate::clients::mock::{MockCustody, MockLedger, MockPartners, MockProfiles};
use crate::config::SettlementConfig;
use crate::monitor::{ConfirmationMonitor, MonitorSettings};
use crate::request::types::UserId;
use crate::request::{Direction, MemoryRequestStore, RequestRef, RequestStatus, RequestStore, SettlementRequest};
use crate::websocket::ConnectionManager;
use crate::websocket::messages::WsMessage;

pub const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
pub const ETH_ADDR: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const ETH_ADDR_2: &str = "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359";

pub fn intent(amount: &str, currency: &str) -> SettlementIntent {
    SettlementIntent {
        cid: None,
        amount: amount.parse().unwrap(),
        currency: currency.to_string(),
        service: None,
        partner_id: None,
        agent_id: None,
        destination: None,
        chain: None,
        note: None,
    }
}

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub partners: Arc<MockPartners>,
    pub custody: Arc<MockCustody>,
    pub profiles: Arc<MockProfiles>,
    pub store: Arc<MemoryRequestStore>,
    pub notifier: Arc<ConnectionManager>,
    pub services: Arc<RailServices>,
    pub monitor: Arc<ConfirmationMonitor>,
    pub executor: Arc<SettlementExecutor>,
    pub router: Arc<RequestRouter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_monitor(MonitorSettings {
            poll_interval: Duration::from_millis(10),
            max_duration: Duration::from_secs(5),
        })
    }

    pub fn with_monitor(settings: MonitorSettings) -> Self {
        let ledger = Arc::new(MockLedger::new());
        let partners = Arc::new(MockPartners::new());
        let custody = Arc::new(MockCustody::new());
        let profiles = Arc::new(MockProfiles::new());
        let store = Arc::new(MemoryRequestStore::new());
        let notifier = Arc::new(ConnectionManager::with_buffer(32));

        let services = Arc::new(RailServices {
            store: store.clone(),
            ledger: ledger.clone(),
            agents: ledger.clone(),
            partners: partners.clone(),
            custody: custody.clone(),
            profiles: profiles.clone(),
            notifier: notifier.clone(),
            settlement: SettlementConfig::default(),
        });
        let monitor = Arc::new(ConfirmationMonitor::new(
            store.clone(),
            custody.clone(),
            notifier.clone(),
            settings,
        ));
        let executor = Arc::new(SettlementExecutor::new(services.clone(), monitor.clone()));
        let router = Arc::new(RequestRouter::new(services.clone(), executor.clone()));

        Self {
            ledger,
            partners,
            custody,
            profiles,
            store,
            notifier,
            services,
            monitor,
            executor,
            router,
        }
    }

    pub fn intake(&self, user_id: UserId, direction: Direction) -> Intake {
        Intake {
            request_ref: RequestRef::from_ulid(ulid::Ulid::new()),
            user_id,
            direction,
            cid: None,
            expires_at: Utc::now() + self.services.settlement.request_ttl(),
        }
    }

    pub fn intent(&self, amount: &str, currency: &str) -> SettlementIntent {
        intent(amount, currency)
    }

    /// Register a live connection for `user_id`
    pub fn connect(&self, user_id: UserId) -> mpsc::Receiver<WsMessage> {
        let (tx, rx) = self.notifier.channel();
        self.notifier.add_connection(user_id, tx);
        rx
    }

    /// Submit and wait for the executor task
    pub async fn settle(
        &self,
        user_id: UserId,
        direction: Direction,
        intent: SettlementIntent,
    ) -> SettlementRequest {
        let submitted = self.router.submit(user_id, direction, intent).await.unwrap();
        if let Some(task) = submitted.task {
            task.await.unwrap();
        }
        self.load(&submitted.request.request_ref).await
    }

    pub async fn load(&self, request_ref: &RequestRef) -> SettlementRequest {
        self.store.get(request_ref).await.unwrap().unwrap()
    }

    /// Poll the store until the request reaches `status`
    pub async fn wait_for(&self, request_ref: &RequestRef, status: RequestStatus) -> SettlementRequest {
        for _ in 0..300 {
            let record = self.load(request_ref).await;
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = self.load(request_ref).await;
        panic!("request stuck in {} waiting for {}", record.status, status);
    }
}

/// Everything queued on a connection so far
pub fn drain(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<WsMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Message types, in delivery order
pub fn kinds(messages: &[WsMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.kind.as_str()).collect()
}
