//! Agent rail: ledger leg against a field agent's wallet account, then a
//! hand-off notice to the agent's live connection

use super::executor::{Outcome, SettlementExecutor};
use super::{Intake, RailServices, SettlementIntent, ledger_error};
use crate::clients::ledger::{AccountPurpose, LedgerAccount};
use crate::error::SettlementError;
use crate::money::{self, Precision};
use crate::request::types::{OpsMetadata, UserId, ops};
use crate::request::{Direction, Movement, NewRequest, Quote, RailDetails, SettlementRequest};
use crate::resolver::AgentSelector;
use crate::websocket::messages::WsMessage;

pub const SERVICE: &str = "agent";

pub async fn build(
    services: &RailServices,
    intake: &Intake,
    intent: &SettlementIntent,
) -> Result<NewRequest, SettlementError> {
    let agent_id = intent
        .agent_ref()
        .ok_or_else(|| SettlementError::InvalidPayload("agent_id is required".into()))?;
    let currency = intent.currency.trim().to_ascii_uppercase();

    // An agent cannot settle their own request
    if let Some(own) = services
        .agents
        .get_agent_by_user_id(intake.user_id, false)
        .await
        .map_err(ledger_error)?
        && own.agent_id == agent_id
    {
        return Err(SettlementError::SelfTransfer);
    }

    let selected = AgentSelector::new(services.agents.clone())
        .select(agent_id, &currency, AccountPurpose::Wallet)
        .await?;
    let conversion = money::identity(intent.amount, Precision::Fiat)?;

    let user = LedgerAccount::user(intake.user_id, &currency);
    let wallet = LedgerAccount::agent(&selected.account.account_number, &currency);
    let movement = match intake.direction {
        Direction::Deposit => Movement::Transfer {
            from: wallet,
            to: user,
        },
        Direction::Withdrawal => Movement::Transfer {
            from: user,
            to: wallet,
        },
    };

    Ok(NewRequest {
        request_ref: intake.request_ref,
        cid: intake.cid.clone(),
        user_id: intake.user_id,
        direction: intake.direction,
        service: intent
            .service_name()
            .unwrap_or(SERVICE)
            .to_ascii_lowercase(),
        amount: conversion.amount,
        currency: currency.clone(),
        quote: Quote {
            original_amount: intent.amount,
            original_currency: currency,
            exchange_rate: conversion.rate,
        },
        agent_external_id: Some(selected.agent.agent_id.clone()),
        partner_id: None,
        destination: None,
        movement,
        details: RailDetails::Agent {
            agent_id: selected.agent.agent_id,
            agent_name: selected.agent.name,
            agent_user_id: selected.agent.user_id,
            account_number: selected.account.account_number,
        },
        expires_at: intake.expires_at,
    })
}

pub async fn settle(
    exec: &SettlementExecutor,
    record: &SettlementRequest,
    agent_user_id: UserId,
) -> Outcome {
    let receipt = match exec.move_value(record).await {
        Ok(receipt) => receipt,
        Err(e) => return Outcome::LedgerFailed(e.to_string()),
    };

    let delivered = exec.services().notifier.send_to_user(
        agent_user_id,
        WsMessage::agent_assignment(record, &receipt.receipt_code),
    );
    let mut ops = OpsMetadata::new();
    ops.insert(ops::AGENT_NOTIFIED.into(), (delivered > 0).into());
    Outcome::Completed { receipt, ops }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock;
    use crate::rails::testkit::Harness;

    #[tokio::test]
    async fn test_agent_withdrawal_moves_to_agent_wallet() {
        let h = Harness::new();
        h.ledger.add_agent(mock::agent("AG1", 900));

        let mut intent = h.intent("50", "usd");
        intent.agent_id = Some("AG1".into());
        let new = build(&h.services, &h.intake(42, Direction::Withdrawal), &intent)
            .await
            .unwrap();

        assert_eq!(new.agent_external_id.as_deref(), Some("AG1"));
        assert_eq!(new.service, "agent");
        assert_eq!(
            new.movement,
            Movement::Transfer {
                from: LedgerAccount::user(42, "USD"),
                to: LedgerAccount::agent("AG1-USD-W", "USD"),
            }
        );
        assert!(matches!(
            new.details,
            RailDetails::Agent {
                agent_user_id: 900,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_currency_account() {
        let h = Harness::new();
        h.ledger.add_agent(mock::agent("AG1", 900));

        let mut intent = h.intent("50", "kes");
        intent.agent_id = Some("AG1".into());
        let err = build(&h.services, &h.intake(42, Direction::Deposit), &intent)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "agent does not have an active KES account"
        );
    }

    #[tokio::test]
    async fn test_agent_cannot_serve_self() {
        let h = Harness::new();
        h.ledger.add_agent(mock::agent("AG1", 42));

        let mut intent = h.intent("50", "USD");
        intent.agent_id = Some("AG1".into());
        let err = build(&h.services, &h.intake(42, Direction::Deposit), &intent)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::SelfTransfer));
    }

    #[tokio::test]
    async fn test_inactive_agent() {
        let h = Harness::new();
        let mut agent = mock::agent("AG2", 901);
        agent.active = false;
        h.ledger.add_agent(agent);

        let mut intent = h.intent("50", "USD");
        intent.agent_id = Some("AG2".into());
        let err = build(&h.services, &h.intake(42, Direction::Deposit), &intent)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::AgentInactive));
    }
}
