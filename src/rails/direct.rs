//! Direct rail: the user's own settlement-currency account, no counterparty

use super::executor::{Outcome, SettlementExecutor};
use super::{Intake, RailServices, SettlementIntent};
use crate::clients::ledger::LedgerAccount;
use crate::error::SettlementError;
use crate::money::{self, Precision};
use crate::request::types::OpsMetadata;
use crate::request::{Direction, Movement, NewRequest, Quote, RailDetails, SettlementRequest};

pub const SERVICE: &str = "direct";

pub fn build(
    services: &RailServices,
    intake: &Intake,
    intent: &SettlementIntent,
) -> Result<NewRequest, SettlementError> {
    let settlement_currency = services.settlement.currency.to_ascii_uppercase();
    let entered = intent.currency.trim().to_ascii_uppercase();
    if entered != settlement_currency {
        return Err(SettlementError::CurrencyMismatch(format!(
            "direct settlement is only available in {settlement_currency}, got {entered}"
        )));
    }

    let conversion = money::identity(intent.amount, Precision::Fiat)?;
    let account = LedgerAccount::user(intake.user_id, &settlement_currency);
    let movement = match intake.direction {
        Direction::Deposit => Movement::Credit { account },
        Direction::Withdrawal => Movement::Debit { account },
    };

    Ok(NewRequest {
        request_ref: intake.request_ref,
        cid: intake.cid.clone(),
        user_id: intake.user_id,
        direction: intake.direction,
        service: SERVICE.to_string(),
        amount: conversion.amount,
        currency: settlement_currency,
        quote: Quote {
            original_amount: intent.amount,
            original_currency: entered,
            exchange_rate: conversion.rate,
        },
        agent_external_id: None,
        partner_id: None,
        destination: None,
        movement,
        details: RailDetails::Direct,
        expires_at: intake.expires_at,
    })
}

pub async fn settle(exec: &SettlementExecutor, record: &SettlementRequest) -> Outcome {
    match exec.move_value(record).await {
        Ok(receipt) => Outcome::Completed {
            receipt,
            ops: OpsMetadata::new(),
        },
        Err(e) => Outcome::LedgerFailed(e.to_string()),
    }
}
