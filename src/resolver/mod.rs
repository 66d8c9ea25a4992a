//! Pre-persistence resolution: destinations, crypto addresses, partners and agents

pub mod address;
pub mod destination;
pub mod selector;

pub use address::{AddressError, Chain};
pub use destination::{DestinationKind, DestinationResolver, ResolvedDestination};
pub use selector::{AgentSelector, PartnerSelector, SelectedAgent};
