//! Blockchain Confirmation Monitor
//!
//! One task per on-chain withdrawal. Polls custody for the transaction
//! status on a fixed interval and settles the request when the chain
//! reports a final result, or parks it in `blockchain_timeout` once the
//! maximum duration elapses.
//!
//! At most one monitor runs per request in this process. Every status change
//! still goes through the store CAS; a monitor that loses the race to an
//! operator stays quiet and stops on its next poll.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clients::custody::{ChainTxStatus, CustodyClient};
use crate::config::MonitorConfig;
use crate::error::SettlementError;
use crate::request::types::{OpsMetadata, ops};
use crate::request::{RequestRef, RequestStatus, RequestStore, SettlementRequest, StatusUpdate};
use crate::websocket::ConnectionManager;
use crate::websocket::messages::{EventKind, WsMessage};

/// On-chain requests re-attached per startup sweep
const RESUME_BATCH: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_duration: Duration,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_duration: Duration::from_secs(config.max_duration_secs),
        }
    }
}

/// Custody status normalized to what the monitor acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPhase {
    Pending,
    Confirming,
    Confirmed,
    Failed(String),
    Unknown(String),
}

impl ChainPhase {
    pub fn classify(status: &ChainTxStatus) -> Self {
        match status.status.to_ascii_lowercase().as_str() {
            "pending" | "queued" | "signing" | "submitted" | "broadcast" | "broadcasted" => {
                if status.confirmations > 0 {
                    ChainPhase::Confirming
                } else {
                    ChainPhase::Pending
                }
            }
            "confirming" => ChainPhase::Confirming,
            "confirmed" | "completed" | "success" | "succeeded" => ChainPhase::Confirmed,
            "failed" | "reverted" | "dropped" | "rejected" => ChainPhase::Failed(
                status
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("transaction {}", status.status)),
            ),
            other => ChainPhase::Unknown(other.to_string()),
        }
    }
}

/// How a monitor task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Confirmed,
    Failed,
    TimedOut,
    /// Request left the on-chain states without this monitor
    Abandoned,
}

type ActiveSet = Arc<Mutex<HashSet<RequestRef>>>;

/// A request's monitor slot, released on drop
struct MonitorSlot {
    active: ActiveSet,
    request_ref: RequestRef,
}

impl Drop for MonitorSlot {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_ref);
    }
}

pub struct ConfirmationMonitor {
    store: Arc<dyn RequestStore>,
    custody: Arc<dyn CustodyClient>,
    notifier: Arc<ConnectionManager>,
    settings: MonitorSettings,
    active: ActiveSet,
}

impl ConfirmationMonitor {
    pub fn new(
        store: Arc<dyn RequestStore>,
        custody: Arc<dyn CustodyClient>,
        notifier: Arc<ConnectionManager>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            custody,
            notifier,
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, request_ref: RequestRef) -> Option<MonitorSlot> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(request_ref).then(|| MonitorSlot {
            active: Arc::clone(&self.active),
            request_ref,
        })
    }

    /// Whether a monitor task currently owns `request_ref`
    pub fn is_tracking(&self, request_ref: &RequestRef) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(request_ref)
    }

    /// Start a monitor unless one already owns the request
    pub fn spawn(
        self: &Arc<Self>,
        request_ref: RequestRef,
        custody_tx_id: String,
    ) -> JoinHandle<MonitorOutcome> {
        let slot = self.claim(request_ref);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Some(_slot) = slot else {
                debug!(%request_ref, "Confirmation monitor already running");
                return MonitorOutcome::Abandoned;
            };
            this.track(request_ref, &custody_tx_id).await
        })
    }

    /// Poll until the transaction settles, fails or the window closes
    pub async fn track(&self, request_ref: RequestRef, custody_tx_id: &str) -> MonitorOutcome {
        debug!(%request_ref, custody_tx_id, "Confirmation monitor started");
        match self.run(request_ref, custody_tx_id).await {
            Ok(outcome) => {
                info!(%request_ref, custody_tx_id, ?outcome, "Confirmation monitor finished");
                outcome
            }
            Err(e) => {
                error!(%request_ref, custody_tx_id, error = %e, "Confirmation monitor aborted");
                MonitorOutcome::Abandoned
            }
        }
    }

    async fn run(
        &self,
        request_ref: RequestRef,
        custody_tx_id: &str,
    ) -> Result<MonitorOutcome, SettlementError> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_confirmations: Option<u32> = None;

        loop {
            ticker.tick().await;

            let Some(record) = self.store.get(&request_ref).await? else {
                warn!(%request_ref, "Monitored request disappeared");
                return Ok(MonitorOutcome::Abandoned);
            };
            if !record.status.is_on_chain() {
                debug!(%request_ref, status = %record.status, "Request no longer on chain");
                return Ok(MonitorOutcome::Abandoned);
            }
            if started.elapsed() >= self.settings.max_duration {
                return self.time_out(&record).await;
            }

            let status = match self.custody.get_transaction_status(custody_tx_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(%request_ref, custody_tx_id, error = %e, "Custody status poll failed");
                    continue;
                }
            };

            match ChainPhase::classify(&status) {
                ChainPhase::Confirmed => {
                    let update = StatusUpdate::new().ops(chain_ops(&status));
                    if self
                        .conclude(&record, RequestStatus::Completed, update, EventKind::Completed)
                        .await?
                    {
                        return Ok(MonitorOutcome::Confirmed);
                    }
                }
                ChainPhase::Failed(reason) => {
                    let update = StatusUpdate::new()
                        .error(reason)
                        .ops(chain_ops(&status))
                        .op(ops::REQUIRES_MANUAL_REVIEW, true);
                    if self
                        .conclude(
                            &record,
                            RequestStatus::BlockchainFailed,
                            update,
                            EventKind::BlockchainFailed,
                        )
                        .await?
                    {
                        return Ok(MonitorOutcome::Failed);
                    }
                }
                phase @ (ChainPhase::Pending | ChainPhase::Confirming) => {
                    self.progress(&record, &status, phase, &mut last_confirmations)
                        .await?;
                }
                ChainPhase::Unknown(raw) => {
                    warn!(%request_ref, custody_tx_id, status = %raw, "Unrecognized custody status");
                }
            }
        }
    }

    /// Record confirmations; move between the in-flight states when allowed
    async fn progress(
        &self,
        record: &SettlementRequest,
        status: &ChainTxStatus,
        phase: ChainPhase,
        last_confirmations: &mut Option<u32>,
    ) -> Result<(), SettlementError> {
        let target = match phase {
            ChainPhase::Confirming => RequestStatus::Confirming,
            _ => RequestStatus::BlockchainPending,
        };
        let changed = *last_confirmations != Some(status.confirmations);
        *last_confirmations = Some(status.confirmations);

        if record.status != target && record.status.can_transition_to(target) {
            let update = StatusUpdate::new().ops(chain_ops(status));
            let event = match target {
                RequestStatus::Confirming => Some(EventKind::Confirming),
                _ => None,
            };
            self.apply(record, target, update, event).await?;
        } else if changed {
            self.store
                .merge_ops(&record.request_ref, chain_ops(status))
                .await?;
            if record.status == RequestStatus::Confirming {
                let mut updated = record.clone();
                updated.ops.extend(chain_ops(status));
                self.notifier.send_to_user(
                    updated.user_id,
                    WsMessage::event(EventKind::Confirming, &updated),
                );
            }
        }
        Ok(())
    }

    async fn time_out(&self, record: &SettlementRequest) -> Result<MonitorOutcome, SettlementError> {
        if record.status == RequestStatus::BlockchainTimeout {
            return Ok(MonitorOutcome::TimedOut);
        }
        warn!(
            request_ref = %record.request_ref,
            max_duration_secs = self.settings.max_duration.as_secs(),
            "Confirmation window elapsed"
        );
        let update = StatusUpdate::new().op(ops::MONITOR_TIMED_OUT_AT, Utc::now().to_rfc3339());
        if self
            .conclude(record, RequestStatus::BlockchainTimeout, update, EventKind::Delayed)
            .await?
        {
            Ok(MonitorOutcome::TimedOut)
        } else {
            Ok(MonitorOutcome::Abandoned)
        }
    }

    async fn conclude(
        &self,
        record: &SettlementRequest,
        next: RequestStatus,
        update: StatusUpdate,
        event: EventKind,
    ) -> Result<bool, SettlementError> {
        self.apply(record, next, update, Some(event)).await
    }

    /// CAS from the status we observed; notify only if it was applied
    async fn apply(
        &self,
        record: &SettlementRequest,
        next: RequestStatus,
        update: StatusUpdate,
        event: Option<EventKind>,
    ) -> Result<bool, SettlementError> {
        let applied = self
            .store
            .transition(&record.request_ref, record.status, next, update.clone())
            .await?;
        if !applied {
            debug!(request_ref = %record.request_ref, target = %next, "Status moved under monitor");
            return Ok(false);
        }

        let mut updated = record.clone();
        updated.status = next;
        update.apply(&mut updated);
        if let Some(event) = event {
            self.notifier
                .send_to_user(updated.user_id, WsMessage::event(event, &updated));
        }
        Ok(true)
    }

    /// Re-attach a monitor to one on-chain request
    pub async fn resume(
        self: &Arc<Self>,
        request_ref: &RequestRef,
    ) -> Result<JoinHandle<MonitorOutcome>, SettlementError> {
        let record = self
            .store
            .get(request_ref)
            .await?
            .ok_or_else(|| SettlementError::RequestNotFound(request_ref.to_string()))?;
        if !record.status.is_on_chain() {
            return Err(SettlementError::InvalidStateTransition {
                from: record.status,
                to: RequestStatus::Confirming,
            });
        }
        if self.is_tracking(request_ref) {
            return Err(SettlementError::MonitorAlreadyRunning(request_ref.to_string()));
        }
        let custody_tx_id = record
            .ops
            .get(ops::CUSTODY_TX_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SettlementError::SystemError(format!(
                    "request {request_ref} has no custody transaction id"
                ))
            })?;
        Ok(self.spawn(record.request_ref, custody_tx_id.to_string()))
    }

    /// Startup sweep over requests still waiting on the chain
    pub async fn resume_in_flight(self: &Arc<Self>) -> Result<usize, SettlementError> {
        let in_flight = self
            .store
            .list_by_status(
                &[RequestStatus::BlockchainPending, RequestStatus::Confirming],
                RESUME_BATCH,
            )
            .await?;

        let mut resumed = 0;
        for record in &in_flight {
            match self.resume(&record.request_ref).await {
                Ok(_) => resumed += 1,
                Err(e) => {
                    warn!(request_ref = %record.request_ref, error = %e, "Cannot resume monitor")
                }
            }
        }
        info!(resumed, "Confirmation monitors resumed");
        Ok(resumed)
    }
}

fn chain_ops(status: &ChainTxStatus) -> OpsMetadata {
    let mut out = OpsMetadata::new();
    out.insert(ops::CUSTODY_STATUS.into(), status.status.clone().into());
    out.insert(ops::CONFIRMATIONS.into(), status.confirmations.into());
    out.insert(
        ops::REQUIRED_CONFIRMATIONS.into(),
        status.required_confirmations.into(),
    );
    if let Some(hash) = &status.tx_hash {
        out.insert(ops::TX_HASH.into(), hash.clone().into());
    }
    out
}
