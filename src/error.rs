//! Settlement Error Types
//!
//! One taxonomy for every rejection the orchestrator can produce. Each
//! variant carries a stable machine code and a class; the class tells the
//! caller whether anything was persisted and which HTTP status to suggest.

use thiserror::Error;

use crate::money::ConversionError;
use crate::request::state::RequestStatus;
use crate::resolver::address::AddressError;

/// Coarse error class
///
/// Validation and Resolution errors are raised before anything is persisted,
/// so no compensating action is ever needed for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Resolution,
    NotFound,
    Conflict,
    Upstream,
    Internal,
}

#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No destination supplied and none stored on the profile")]
    MissingDestination,

    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Cannot send to your own address")]
    SelfTransfer,

    #[error("Asset mismatch: {0}")]
    AssetMismatch(String),

    #[error("Crypto deposits are credited by custody and cannot be requested")]
    CryptoDepositUnsupported,

    // === Resolution Errors ===
    #[error("No partner available for service {0}")]
    NoPartnerAvailable(String),

    #[error("Partner {partner_id} does not offer service {service}")]
    PartnerServiceMismatch { partner_id: String, service: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent is not active")]
    AgentInactive,

    #[error("agent does not have an active {0} account")]
    AgentAccountMissing(String),

    #[error("No wallet found for {0}")]
    WalletNotFound(String),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Insufficient balance")]
    InsufficientBalance,

    // === Request Store Errors ===
    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Duplicate request reference: {0}")]
    DuplicateRequest(String),

    #[error("Request cannot be cancelled while {0}")]
    CancelNotAllowed(RequestStatus),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Confirmation monitor already running for {0}")]
    MonitorAlreadyRunning(String),

    // === Upstream Errors ===
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Partner service error: {0}")]
    Partner(String),

    #[error("Custody service error: {0}")]
    Custody(String),

    #[error("Profile service error: {0}")]
    Profile(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),

    #[error("Failed to generate request reference")]
    RefGeneration,
}

impl SettlementError {
    /// Stable error code for API responses and event payloads
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidAmount => "INVALID_AMOUNT",
            SettlementError::InvalidPayload(_) => "INVALID_PAYLOAD",
            SettlementError::MissingDestination => "MISSING_DESTINATION",
            SettlementError::CurrencyMismatch(_) => "CURRENCY_MISMATCH",
            SettlementError::InvalidAddress(_) => "INVALID_ADDRESS",
            SettlementError::UnsupportedAsset(_) => "UNSUPPORTED_ASSET",
            SettlementError::SelfTransfer => "SELF_TRANSFER",
            SettlementError::AssetMismatch(_) => "ASSET_MISMATCH",
            SettlementError::CryptoDepositUnsupported => "CRYPTO_DEPOSIT_UNSUPPORTED",
            SettlementError::RefGeneration => "REF_GENERATION_FAILED",
            SettlementError::NoPartnerAvailable(_) => "NO_PARTNER_AVAILABLE",
            SettlementError::PartnerServiceMismatch { .. } => "PARTNER_SERVICE_MISMATCH",
            SettlementError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            SettlementError::AgentInactive => "AGENT_INACTIVE",
            SettlementError::AgentAccountMissing(_) => "AGENT_ACCOUNT_MISSING",
            SettlementError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            SettlementError::Conversion(_) => "CONVERSION_FAILED",
            SettlementError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            SettlementError::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            SettlementError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            SettlementError::CancelNotAllowed(_) => "CANCEL_NOT_ALLOWED",
            SettlementError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            SettlementError::MonitorAlreadyRunning(_) => "MONITOR_ALREADY_RUNNING",
            SettlementError::Ledger(_) => "LEDGER_ERROR",
            SettlementError::Partner(_) => "PARTNER_ERROR",
            SettlementError::Custody(_) => "CUSTODY_ERROR",
            SettlementError::Profile(_) => "PROFILE_ERROR",
            SettlementError::DatabaseError(_) => "DATABASE_ERROR",
            SettlementError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SettlementError::InvalidAmount
            | SettlementError::InvalidPayload(_)
            | SettlementError::MissingDestination
            | SettlementError::CurrencyMismatch(_)
            | SettlementError::InvalidAddress(_)
            | SettlementError::UnsupportedAsset(_)
            | SettlementError::SelfTransfer
            | SettlementError::AssetMismatch(_)
            | SettlementError::CryptoDepositUnsupported => ErrorClass::Validation,
            SettlementError::NoPartnerAvailable(_)
            | SettlementError::PartnerServiceMismatch { .. }
            | SettlementError::AgentNotFound(_)
            | SettlementError::AgentInactive
            | SettlementError::AgentAccountMissing(_)
            | SettlementError::WalletNotFound(_)
            | SettlementError::Conversion(_)
            | SettlementError::InsufficientBalance => ErrorClass::Resolution,
            SettlementError::RequestNotFound(_) => ErrorClass::NotFound,
            SettlementError::DuplicateRequest(_)
            | SettlementError::CancelNotAllowed(_)
            | SettlementError::InvalidStateTransition { .. }
            | SettlementError::MonitorAlreadyRunning(_) => ErrorClass::Conflict,
            SettlementError::Ledger(_)
            | SettlementError::Partner(_)
            | SettlementError::Custody(_)
            | SettlementError::Profile(_) => ErrorClass::Upstream,
            SettlementError::DatabaseError(_)
            | SettlementError::SystemError(_)
            | SettlementError::RefGeneration => ErrorClass::Internal,
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.class() {
            ErrorClass::Validation => 400,
            ErrorClass::Resolution => 422,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Upstream => 502,
            ErrorClass::Internal => 500,
        }
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(e: serde_json::Error) -> Self {
        SettlementError::SystemError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SettlementError::SelfTransfer.code(), "SELF_TRANSFER");
        assert_eq!(
            SettlementError::InsufficientBalance.code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(
            SettlementError::CancelNotAllowed(RequestStatus::Processing).code(),
            "CANCEL_NOT_ALLOWED"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(SettlementError::InvalidAmount.http_status(), 400);
        assert_eq!(SettlementError::RefGeneration.http_status(), 500);
        assert_eq!(SettlementError::AgentInactive.http_status(), 422);
        assert_eq!(
            SettlementError::RequestNotFound("x".into()).http_status(),
            404
        );
        assert_eq!(SettlementError::Ledger("down".into()).http_status(), 502);
        assert_eq!(SettlementError::SystemError("x".into()).http_status(), 500);
    }

    #[test]
    fn test_agent_account_message() {
        let err = SettlementError::AgentAccountMissing("USD".to_string());
        assert_eq!(err.to_string(), "agent does not have an active USD account");
    }
}
