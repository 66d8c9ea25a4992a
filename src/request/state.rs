//! Settlement Request FSM
//!
//! State IDs are stored as SMALLINT. Positive ids are the happy path, negative
//! ids are failure or waiting states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Settlement request status
///
/// Terminal: COMPLETED (40), FAILED (-10), CANCELLED (-20),
/// SENT_TO_PARTNER (25), BLOCKCHAIN_FAILED (-30).
/// BLOCKCHAIN_TIMEOUT (-40) is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RequestStatus {
    /// Persisted, not yet picked up by an executor
    Pending = 0,

    /// Claimed by an executor (persist-before-call)
    Processing = 10,

    /// Terminal: ledger moved, partner owns the rest
    SentToPartner = 25,

    /// Custody accepted the on-chain withdrawal
    BlockchainPending = 30,

    /// Transaction seen on chain, collecting confirmations
    Confirming = 35,

    /// Terminal: settled
    Completed = 40,

    /// Terminal: ledger movement failed, no funds moved
    Failed = -10,

    /// Terminal: cancelled before processing
    Cancelled = -20,

    /// Terminal: on-chain leg failed after the ledger moved
    BlockchainFailed = -30,

    /// Monitor gave up waiting; may be resumed
    BlockchainTimeout = -40,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 10] = [
        RequestStatus::Pending,
        RequestStatus::Processing,
        RequestStatus::SentToPartner,
        RequestStatus::BlockchainPending,
        RequestStatus::Confirming,
        RequestStatus::Completed,
        RequestStatus::Failed,
        RequestStatus::Cancelled,
        RequestStatus::BlockchainFailed,
        RequestStatus::BlockchainTimeout,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::SentToPartner
                | RequestStatus::BlockchainFailed
        )
    }

    /// Waiting on the chain; a confirmation monitor should own it
    #[inline]
    pub fn is_on_chain(&self) -> bool {
        matches!(
            self,
            RequestStatus::BlockchainPending
                | RequestStatus::Confirming
                | RequestStatus::BlockchainTimeout
        )
    }

    /// Allowed edges of the FSM
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match self {
            Pending => matches!(next, Processing | Cancelled),
            Processing => matches!(
                next,
                Completed | Failed | SentToPartner | BlockchainPending | BlockchainFailed
            ),
            BlockchainPending => matches!(
                next,
                Confirming | Completed | BlockchainFailed | BlockchainTimeout
            ),
            Confirming => matches!(next, Completed | BlockchainFailed | BlockchainTimeout),
            BlockchainTimeout => matches!(
                next,
                BlockchainPending | Confirming | Completed | BlockchainFailed
            ),
            Completed | Failed | Cancelled | SentToPartner | BlockchainFailed => false,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RequestStatus::Pending),
            10 => Some(RequestStatus::Processing),
            25 => Some(RequestStatus::SentToPartner),
            30 => Some(RequestStatus::BlockchainPending),
            35 => Some(RequestStatus::Confirming),
            40 => Some(RequestStatus::Completed),
            -10 => Some(RequestStatus::Failed),
            -20 => Some(RequestStatus::Cancelled),
            -30 => Some(RequestStatus::BlockchainFailed),
            -40 => Some(RequestStatus::BlockchainTimeout),
            _ => None,
        }
    }

    /// Wire name, as used in events and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::SentToPartner => "sent_to_partner",
            RequestStatus::BlockchainPending => "blockchain_pending",
            RequestStatus::Confirming => "confirming",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::BlockchainFailed => "blockchain_failed",
            RequestStatus::BlockchainTimeout => "blockchain_timeout",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for RequestStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        RequestStatus::from_id(value).ok_or(())
    }
}

impl FromStr for RequestStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or(())
    }
}
