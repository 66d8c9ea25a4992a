//! Destination resolution
//!
//! A supplied destination always wins. Otherwise the owner's stored profile
//! is consulted; if that has nothing either, the request is rejected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::profile::{OwnerType, ProfileClient};
use crate::error::SettlementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Phone,
    BankAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationSource {
    Supplied,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    pub kind: DestinationKind,
    pub value: String,
    pub source: DestinationSource,
}

pub struct DestinationResolver {
    profiles: Arc<dyn ProfileClient>,
}

impl DestinationResolver {
    pub fn new(profiles: Arc<dyn ProfileClient>) -> Self {
        Self { profiles }
    }

    pub async fn resolve(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
        kind: DestinationKind,
        supplied: Option<&str>,
    ) -> Result<ResolvedDestination, SettlementError> {
        if let Some(value) = supplied.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(ResolvedDestination {
                kind,
                value: normalize(kind, value)?,
                source: DestinationSource::Supplied,
            });
        }

        let profile = self
            .profiles
            .fetch_profile(owner_type, owner_id)
            .await
            .map_err(|e| SettlementError::Profile(e.to_string()))?;

        let stored = profile.and_then(|p| match kind {
            DestinationKind::Phone => p.phone,
            DestinationKind::BankAccount => p.bank_account,
        });
        let Some(value) = stored.filter(|v| !v.trim().is_empty()) else {
            return Err(SettlementError::MissingDestination);
        };

        debug!(%owner_type, owner_id, ?kind, "destination taken from profile");
        Ok(ResolvedDestination {
            kind,
            value: normalize(kind, value.trim())?,
            source: DestinationSource::Profile,
        })
    }
}

fn normalize(kind: DestinationKind, value: &str) -> Result<String, SettlementError> {
    match kind {
        DestinationKind::Phone => normalize_phone(value),
        DestinationKind::BankAccount => Ok(value.to_string()),
    }
}

/// Strip separators; keep a leading `+`; require 7-15 digits (E.164 length)
fn normalize_phone(value: &str) -> Result<String, SettlementError> {
    let (plus, rest) = match value.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", value),
    };
    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) || !(7..=15).contains(&digits.len()) {
        return Err(SettlementError::InvalidPayload(format!(
            "invalid phone number: {value}"
        )));
    }
    Ok(format!("{plus}{digits}"))
}
