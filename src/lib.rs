//! Multirail - settlement orchestration across payment rails
//!
//! A deposit or withdrawal intent arrives on a live connection, is routed to
//! exactly one rail, persisted, and driven through a state machine that
//! moves value on an external double-entry ledger and then hands off to a
//! partner, an agent, or on-chain custody.
//!
//! # Modules
//!
//! - [`request`] - Durable settlement requests, FSM and stores
//! - [`rails`] - Router, context builders and the settlement executor
//! - [`monitor`] - Blockchain confirmation monitor
//! - [`resolver`] - Destination, address, partner and agent resolution
//! - [`money`] - Currency conversion and precision
//! - [`clients`] - Ledger, partner, custody and profile service clients
//! - [`websocket`] - Live connection registry and wire protocol
//! - [`gateway`] - HTTP / WebSocket server

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod money;
pub mod monitor;
pub mod rails;
pub mod request;
pub mod resolver;
pub mod websocket;

// Convenient re-exports at crate root
pub use error::{ErrorClass, SettlementError};
pub use monitor::{ConfirmationMonitor, MonitorOutcome, MonitorSettings};
pub use rails::{RailServices, RequestRouter, SettlementExecutor, SettlementIntent};
pub use request::{
    Direction, RailKind, RequestRef, RequestStatus, RequestStore, SettlementRequest,
};
