//! API Response types and error codes

use serde::Serialize;

use crate::error::{ErrorClass, SettlementError};

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn from_error(err: &SettlementError) -> Self {
        Self::error(error_codes::for_error(err), err.to_string())
    }
}

/// Health check response data
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub online_users: usize,
    pub connections: usize,
}

/// Standard API error codes
pub mod error_codes {
    use super::*;

    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const UNRESOLVABLE: i32 = 1003;

    // Resource errors (4xxx)
    pub const REQUEST_NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const UPSTREAM_ERROR: i32 = 5002;

    pub fn for_error(err: &SettlementError) -> i32 {
        match (err, err.class()) {
            (SettlementError::InsufficientBalance, _) => INSUFFICIENT_BALANCE,
            (_, ErrorClass::Validation) => INVALID_PARAMETER,
            (_, ErrorClass::Resolution) => UNRESOLVABLE,
            (_, ErrorClass::NotFound) => REQUEST_NOT_FOUND,
            (_, ErrorClass::Conflict) => CONFLICT,
            (_, ErrorClass::Upstream) => UPSTREAM_ERROR,
            (_, ErrorClass::Internal) => INTERNAL_ERROR,
        }
    }
}
