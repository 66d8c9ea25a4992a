//! Partner and agent selection

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::clients::ledger::{AccountPurpose, Agent, AgentAccount, AgentDirectory};
use crate::clients::partner::{Partner, PartnerClient};
use crate::error::SettlementError;

pub struct PartnerSelector {
    partners: Arc<dyn PartnerClient>,
}

impl PartnerSelector {
    pub fn new(partners: Arc<dyn PartnerClient>) -> Self {
        Self { partners }
    }

    /// Pick the partner that will carry `service`
    ///
    /// An explicit `partner_id` must offer the service. Without one, a
    /// partner is drawn at random from the active partners offering it.
    pub async fn select(
        &self,
        service: &str,
        partner_id: Option<&str>,
    ) -> Result<Partner, SettlementError> {
        let candidates: Vec<Partner> = self
            .partners
            .get_partners_by_service(service)
            .await
            .map_err(|e| SettlementError::Partner(e.to_string()))?
            .into_iter()
            .filter(|p| p.active && p.offers(service))
            .collect();

        if let Some(partner_id) = partner_id.filter(|id| !id.is_empty()) {
            return candidates
                .into_iter()
                .find(|p| p.id == partner_id)
                .ok_or_else(|| SettlementError::PartnerServiceMismatch {
                    partner_id: partner_id.to_string(),
                    service: service.to_string(),
                });
        }

        let partner = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| SettlementError::NoPartnerAvailable(service.to_string()))?;
        debug!(service, partner_id = %partner.id, "partner selected");
        Ok(partner)
    }
}

#[derive(Debug, Clone)]
pub struct SelectedAgent {
    pub agent: Agent,
    pub account: AgentAccount,
}

pub struct AgentSelector {
    directory: Arc<dyn AgentDirectory>,
}

impl AgentSelector {
    pub fn new(directory: Arc<dyn AgentDirectory>) -> Self {
        Self { directory }
    }

    /// Agent must exist, be active, and hold an active unlocked account for
    /// `currency` with the given purpose.
    pub async fn select(
        &self,
        agent_id: &str,
        currency: &str,
        purpose: AccountPurpose,
    ) -> Result<SelectedAgent, SettlementError> {
        let agent = self
            .directory
            .get_agent_by_id(agent_id, true)
            .await
            .map_err(|e| SettlementError::Ledger(e.to_string()))?
            .ok_or_else(|| SettlementError::AgentNotFound(agent_id.to_string()))?;

        if !agent.active {
            return Err(SettlementError::AgentInactive);
        }

        let account = agent
            .accounts
            .iter()
            .find(|a| {
                a.purpose == purpose
                    && a.active
                    && !a.locked
                    && a.currency.eq_ignore_ascii_case(currency)
            })
            .cloned()
            .ok_or_else(|| SettlementError::AgentAccountMissing(currency.to_ascii_uppercase()))?;

        Ok(SelectedAgent { agent, account })
    }
}
