//! Multirail - settlement gateway
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌───────────────┐
//! │ Live WS  │───▶│  Router  │───▶│ Executor │───▶│ Ledger / Rail │
//! │ (intent) │    │ (build)  │    │  (FSM)   │    │  / Custody    │
//! └──────────┘    └──────────┘    └──────────┘    └───────────────┘
//!                                      │
//!                                      ▼
//!                               ┌─────────────┐
//!                               │   Monitor   │
//!                               │ (on-chain)  │
//!                               └─────────────┘
//! ```
//!
//! Usage: `multirail [--env dev] [--port 8080]`

use std::sync::Arc;

use anyhow::Context;

use multirail::clients::{HttpCustodyClient, HttpLedgerClient, HttpPartnerClient, HttpProfileClient};
use multirail::config::AppConfig;
use multirail::db::Database;
use multirail::gateway::{self, state::AppState};
use multirail::monitor::{ConfirmationMonitor, MonitorSettings};
use multirail::rails::{RailServices, RequestRouter, SettlementExecutor};
use multirail::request::{MemoryRequestStore, PgRequestStore, RequestStore};
use multirail::websocket::ConnectionManager;

/// Pending requests re-dispatched per startup
const RESUME_PENDING_LIMIT: usize = 1000;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RequestStore>> {
    match &config.postgres {
        Some(pg) => {
            let db = Database::connect(pg)
                .await
                .context("connecting to request store")?;
            let store = PgRequestStore::new(db.into_pool());
            store.ensure_schema().await?;
            tracing::info!("Request store: PostgreSQL");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No postgres section configured, requests are kept in memory");
            Ok(Arc::new(MemoryRequestStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = multirail::logging::init_logging(&config);

    tracing::info!(
        "Starting multirail {} ({}) in {} mode",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env
    );

    let store = open_store(&config).await?;

    let ledger = Arc::new(HttpLedgerClient::new(&config.services.ledger)?);
    let partners = Arc::new(HttpPartnerClient::new(&config.services.partner)?);
    let custody = Arc::new(HttpCustodyClient::new(&config.services.custody)?);
    let profiles = Arc::new(HttpProfileClient::new(&config.services.profile)?);
    let ws_manager = Arc::new(ConnectionManager::with_buffer(config.gateway.ws_buffer));

    let monitor = Arc::new(ConfirmationMonitor::new(
        store.clone(),
        custody.clone(),
        ws_manager.clone(),
        MonitorSettings::from(&config.monitor),
    ));

    let services = Arc::new(RailServices {
        store: store.clone(),
        ledger: ledger.clone(),
        agents: ledger,
        partners,
        custody,
        profiles,
        notifier: ws_manager.clone(),
        settlement: config.settlement.clone(),
    });
    let executor = Arc::new(SettlementExecutor::new(services.clone(), monitor.clone()));
    let router = Arc::new(RequestRouter::new(services, executor.clone()));

    if config.monitor.resume_on_startup {
        let monitors = monitor.resume_in_flight().await?;
        let pending = executor.resume_pending(RESUME_PENDING_LIMIT).await?;
        tracing::info!(monitors, pending, "Resumed in-flight requests");
    }

    let state = Arc::new(AppState::new(router, ws_manager, store, monitor));
    gateway::run_server(&config.gateway.host, config.gateway.port, state).await
}
