//! Settlement requests: durable records, their FSM and storage

pub mod db;
pub mod state;
pub mod store;
pub mod types;

pub use db::PgRequestStore;
pub use state::RequestStatus;
pub use store::{MemoryRequestStore, RequestStore};
pub use types::{
    Direction, Movement, NewRequest, OpsMetadata, Quote, RailDetails, RailKind, RequestRef,
    SettlementRequest, StatusUpdate, UserId,
};
