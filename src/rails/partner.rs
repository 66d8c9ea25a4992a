//! Partner rail
//!
//! Ledger leg against the partner's settlement-currency float, then a
//! webhook hands the request to the partner. A failed webhook does not undo
//! the ledger leg: the request still ends in `sent_to_partner`, flagged for
//! follow-up.

use tracing::warn;

use super::executor::{Outcome, SettlementExecutor};
use super::{Intake, RailServices, SettlementIntent};
use crate::clients::ledger::LedgerAccount;
use crate::clients::partner::PartnerInitiation;
use crate::clients::profile::OwnerType;
use crate::error::SettlementError;
use crate::money::{self, ConversionError, Precision};
use crate::request::types::{OpsMetadata, ops};
use crate::request::{Direction, Movement, NewRequest, Quote, RailDetails, SettlementRequest};
use crate::resolver::{DestinationKind, DestinationResolver, PartnerSelector};

pub async fn build(
    services: &RailServices,
    intake: &Intake,
    intent: &SettlementIntent,
) -> Result<NewRequest, SettlementError> {
    let service = intent
        .service_name()
        .ok_or_else(|| SettlementError::InvalidPayload("service is required".into()))?
        .to_ascii_lowercase();

    let partner = PartnerSelector::new(services.partners.clone())
        .select(&service, intent.partner_ref())
        .await?;

    let settlement_currency = services.settlement.currency.to_ascii_uppercase();
    let entered = intent.currency.trim().to_ascii_uppercase();
    let conversion = if entered == settlement_currency {
        money::identity(intent.amount, Precision::Fiat)?
    } else {
        let local = partner
            .local_currency
            .as_deref()
            .ok_or_else(|| ConversionError::NoLocalCurrency(partner.id.clone()))?;
        if !local.eq_ignore_ascii_case(&entered) {
            return Err(SettlementError::CurrencyMismatch(format!(
                "partner {} accepts {} or {}, got {}",
                partner.id,
                local.to_ascii_uppercase(),
                settlement_currency,
                entered
            )));
        }
        let rate = partner.exchange_rate.ok_or(ConversionError::InvalidRate)?;
        money::to_settlement(intent.amount, rate, Precision::Fiat)?
    };

    let destination = DestinationResolver::new(services.profiles.clone())
        .resolve(
            OwnerType::User,
            &intake.user_id.to_string(),
            partner.destination_kind,
            intent.destination.as_deref(),
        )
        .await?;

    let user = LedgerAccount::user(intake.user_id, &settlement_currency);
    let float = LedgerAccount::partner(&partner.id, &settlement_currency);
    let movement = match intake.direction {
        Direction::Deposit => Movement::Transfer {
            from: float,
            to: user,
        },
        Direction::Withdrawal => Movement::Transfer {
            from: user,
            to: float,
        },
    };

    Ok(NewRequest {
        request_ref: intake.request_ref,
        cid: intake.cid.clone(),
        user_id: intake.user_id,
        direction: intake.direction,
        service,
        amount: conversion.amount,
        currency: settlement_currency,
        quote: Quote {
            original_amount: intent.amount,
            original_currency: entered,
            exchange_rate: conversion.rate,
        },
        agent_external_id: None,
        partner_id: Some(partner.id.clone()),
        destination: Some(destination.value.clone()),
        movement,
        details: RailDetails::Partner {
            partner_id: partner.id,
            partner_name: partner.name,
            destination_kind: destination.kind,
            destination: destination.value,
            local_currency: partner.local_currency,
        },
        expires_at: intake.expires_at,
    })
}

pub async fn settle(
    exec: &SettlementExecutor,
    record: &SettlementRequest,
    partner_id: &str,
    destination_kind: DestinationKind,
    destination: &str,
) -> Outcome {
    let receipt = match exec.move_value(record).await {
        Ok(receipt) => receipt,
        Err(e) => return Outcome::LedgerFailed(e.to_string()),
    };

    let initiation = PartnerInitiation {
        partner_id: partner_id.to_string(),
        transaction_ref: record.request_ref.to_string(),
        user_id: record.user_id,
        destination: destination.to_string(),
        destination_kind,
        amount: record.amount,
        currency: record.currency.clone(),
        original_amount: record.quote.original_amount,
        original_currency: record.quote.original_currency.clone(),
        exchange_rate: record.quote.exchange_rate,
    };
    let partners = &exec.services().partners;
    let result = match record.direction {
        Direction::Deposit => partners.initiate_deposit(&initiation).await,
        Direction::Withdrawal => partners.initiate_withdrawal(&initiation).await,
    };

    let mut ops = OpsMetadata::new();
    match result {
        Ok(ack) => {
            ops.insert(ops::PARTNER_TX_ID.into(), ack.transaction_id.into());
            if let Some(tx_ref) = ack.transaction_ref {
                ops.insert(ops::PARTNER_TX_REF.into(), tx_ref.into());
            }
        }
        Err(e) => {
            warn!(
                request_ref = %record.request_ref,
                partner_id,
                error = %e,
                "Partner notification failed after ledger leg"
            );
            ops.insert(ops::PARTNER_NOTIFICATION_FAILED.into(), true.into());
            ops.insert(ops::PARTNER_ERROR.into(), e.to_string().into());
        }
    }
    Outcome::SentToPartner { receipt, ops }
}
