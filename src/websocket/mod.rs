//! Live connection: per-user push channel plus the request/reply protocol
//! clients use to submit and track settlement requests.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::ConnectionManager;
pub use handler::ws_handler;
pub use messages::{ClientMessage, EventKind, WsMessage};
