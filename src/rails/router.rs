//! Request Router
//!
//! Entry point for every inbound settlement intent:
//! validate -> classify rail -> build context -> balance check -> persist
//! -> hand off to the executor.
//!
//! Nothing is persisted until the context is fully resolved and the debited
//! account can cover the settlement amount.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use validator::Validate;

use super::executor::SettlementExecutor;
use super::{Intake, RailServices, SettlementIntent, agent, crypto, direct, ensure_available, partner};
use crate::error::SettlementError;
use crate::request::types::UserId;
use crate::request::{Direction, RequestRef, RequestStatus, SettlementRequest, StatusUpdate};
use crate::websocket::messages::{EventKind, WsMessage};

/// Rail chosen for an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailSelection {
    Agent,
    Crypto,
    Partner,
    Direct,
}

impl RailSelection {
    /// Agent id wins, then the crypto service, then any partner service or
    /// explicit partner; otherwise the direct rail
    pub fn classify(intent: &SettlementIntent) -> Self {
        if intent.agent_ref().is_some() {
            return RailSelection::Agent;
        }
        match intent.service_name() {
            Some(service) if service.eq_ignore_ascii_case(crypto::SERVICE) => RailSelection::Crypto,
            Some(service) if service.eq_ignore_ascii_case(direct::SERVICE) => {
                RailSelection::Direct
            }
            Some(_) => RailSelection::Partner,
            None if intent.partner_ref().is_some() => RailSelection::Partner,
            None => RailSelection::Direct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RailSelection::Agent => "agent",
            RailSelection::Crypto => "crypto",
            RailSelection::Partner => "partner",
            RailSelection::Direct => "direct",
        }
    }
}

/// A persisted request and, when newly created, its executor task
#[derive(Debug)]
pub struct Submitted {
    pub request: SettlementRequest,
    /// `None` when the intent replayed an existing `cid`
    pub task: Option<JoinHandle<()>>,
}

impl Submitted {
    pub fn is_replay(&self) -> bool {
        self.task.is_none()
    }
}

pub struct RequestRouter {
    services: Arc<RailServices>,
    executor: Arc<SettlementExecutor>,
    /// Monotonic within one process
    refs: Mutex<ulid::Generator>,
}

impl RequestRouter {
    pub fn new(services: Arc<RailServices>, executor: Arc<SettlementExecutor>) -> Self {
        Self {
            services,
            executor,
            refs: Mutex::new(ulid::Generator::new()),
        }
    }

    pub fn executor(&self) -> &Arc<SettlementExecutor> {
        &self.executor
    }

    pub async fn submit(
        &self,
        user_id: UserId,
        direction: Direction,
        intent: SettlementIntent,
    ) -> Result<Submitted, SettlementError> {
        intent
            .validate()
            .map_err(|e| SettlementError::InvalidPayload(e.to_string()))?;
        if intent.amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount);
        }

        let store = &self.services.store;
        if let Some(cid) = intent.cid.as_deref()
            && let Some(existing) = store.get_by_cid(user_id, cid).await?
        {
            info!(user_id, cid, request_ref = %existing.request_ref, "Replayed client id");
            return Ok(Submitted {
                request: existing,
                task: None,
            });
        }

        let now = Utc::now();
        let intake = Intake {
            request_ref: self.next_ref()?,
            user_id,
            direction,
            cid: intent.cid.clone(),
            expires_at: now + self.services.settlement.request_ttl(),
        };

        let rail = RailSelection::classify(&intent);
        debug!(request_ref = %intake.request_ref, rail = rail.as_str(), %direction, "Routing intent");
        let new = match rail {
            RailSelection::Agent => agent::build(&self.services, &intake, &intent).await?,
            RailSelection::Crypto => crypto::build(&self.services, &intake, &intent).await?,
            RailSelection::Partner => partner::build(&self.services, &intake, &intent).await?,
            RailSelection::Direct => direct::build(&self.services, &intake, &intent)?,
        };

        if let Some(account) = new.movement.debited_account() {
            ensure_available(self.services.ledger.as_ref(), account, new.amount).await?;
        }

        let request = match store.create(new).await {
            Ok(request) => request,
            // A concurrent submit with the same cid won the insert
            Err(SettlementError::DuplicateRequest(dup)) => {
                let existing = match intake.cid.as_deref() {
                    Some(cid) => store.get_by_cid(user_id, cid).await?,
                    None => None,
                };
                let Some(existing) = existing else {
                    return Err(SettlementError::DuplicateRequest(dup));
                };
                info!(user_id, request_ref = %existing.request_ref, "Replayed client id after insert race");
                return Ok(Submitted {
                    request: existing,
                    task: None,
                });
            }
            Err(e) => return Err(e),
        };
        info!(
            request_ref = %request.request_ref,
            user_id,
            rail = %request.rail(),
            %direction,
            amount = %request.amount,
            currency = %request.currency,
            "Settlement request accepted"
        );
        let task = self.executor.spawn(request.request_ref);
        Ok(Submitted {
            request,
            task: Some(task),
        })
    }

    /// Send crypto to an address; always a withdrawal on the crypto rail
    pub async fn transfer(
        &self,
        user_id: UserId,
        mut intent: SettlementIntent,
    ) -> Result<Submitted, SettlementError> {
        intent.service = Some(crypto::SERVICE.to_string());
        intent.agent_id = None;
        intent.partner_id = None;
        self.submit(user_id, Direction::Withdrawal, intent).await
    }

    /// Look up one request owned by `user_id`
    ///
    /// Someone else's request reads as not found.
    pub async fn status(
        &self,
        user_id: UserId,
        request_ref: &str,
        direction: Option<Direction>,
    ) -> Result<SettlementRequest, SettlementError> {
        let not_found = || SettlementError::RequestNotFound(request_ref.to_string());
        let parsed: RequestRef = request_ref.trim().parse().map_err(|_| not_found())?;
        let record = self
            .services
            .store
            .get(&parsed)
            .await?
            .ok_or_else(not_found)?;
        if record.user_id != user_id || direction.is_some_and(|d| d != record.direction) {
            return Err(not_found());
        }
        Ok(record)
    }

    /// Cancel a request that has not been picked up yet
    pub async fn cancel(
        &self,
        user_id: UserId,
        request_ref: &str,
        direction: Direction,
    ) -> Result<SettlementRequest, SettlementError> {
        let mut record = self.status(user_id, request_ref, Some(direction)).await?;
        if record.status != RequestStatus::Pending {
            return Err(SettlementError::CancelNotAllowed(record.status));
        }

        let update = StatusUpdate::new().error("cancelled by user");
        let applied = self
            .services
            .store
            .transition(
                &record.request_ref,
                RequestStatus::Pending,
                RequestStatus::Cancelled,
                update.clone(),
            )
            .await?;
        if !applied {
            // The executor claimed it between our read and the CAS
            let current = self.status(user_id, request_ref, Some(direction)).await?;
            return Err(SettlementError::CancelNotAllowed(current.status));
        }

        record.status = RequestStatus::Cancelled;
        update.apply(&mut record);
        info!(request_ref = %record.request_ref, user_id, "Request cancelled by owner");
        self.services
            .notifier
            .send_to_user(user_id, WsMessage::event(EventKind::Cancelled, &record));
        Ok(record)
    }

    /// Newest first
    pub async fn history(
        &self,
        user_id: UserId,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError> {
        self.services
            .store
            .list_for_user(user_id, direction, limit)
            .await
    }

    fn next_ref(&self) -> Result<RequestRef, SettlementError> {
        let mut generator = self
            .refs
            .lock()
            .map_err(|_| SettlementError::RefGeneration)?;
        generator
            .generate()
            .map(RequestRef::from_ulid)
            .map_err(|_| SettlementError::RefGeneration)
    }
}
