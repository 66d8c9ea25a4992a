//! Settlement Executor
//!
//! Runs a persisted request through the three-phase contract shared by all
//! rails:
//!
//! 1. claim: CAS `pending -> processing` before any ledger call
//! 2. settle: the rail moves value on the ledger, then performs its
//!    follow-up (partner webhook, agent hand-off, custody broadcast)
//! 3. finish: CAS `processing -> outcome`, then notify
//!
//! Only the executor that wins the claim ever touches the ledger, so running
//! `execute` twice for one request never produces two ledger movements.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{RailServices, agent, crypto, direct, partner, tx_type};
use crate::clients::ClientError;
use crate::clients::custody::CustodyReceipt;
use crate::clients::ledger::{LedgerReceipt, PostingCommand, TransferCommand, TxType};
use crate::error::SettlementError;
use crate::monitor::ConfirmationMonitor;
use crate::request::types::{OpsMetadata, ops};
use crate::request::{
    Movement, RailDetails, RequestRef, RequestStatus, SettlementRequest, StatusUpdate,
};
use crate::websocket::messages::{EventKind, WsMessage};

/// Result of a rail's settle step
#[derive(Debug)]
pub enum Outcome {
    /// Ledger movement failed; no funds moved
    LedgerFailed(String),
    Completed {
        receipt: LedgerReceipt,
        ops: OpsMetadata,
    },
    SentToPartner {
        receipt: LedgerReceipt,
        ops: OpsMetadata,
    },
    BlockchainInitiated {
        receipt: LedgerReceipt,
        custody: CustodyReceipt,
    },
    /// Ledger moved but custody refused the broadcast
    BlockchainFailed {
        receipt: LedgerReceipt,
        error: String,
    },
}

pub struct SettlementExecutor {
    services: Arc<RailServices>,
    monitor: Arc<ConfirmationMonitor>,
}

impl SettlementExecutor {
    pub fn new(services: Arc<RailServices>, monitor: Arc<ConfirmationMonitor>) -> Self {
        Self { services, monitor }
    }

    pub fn services(&self) -> &RailServices {
        &self.services
    }

    /// Run `execute` in the background
    pub fn spawn(self: &Arc<Self>, request_ref: RequestRef) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.execute(&request_ref).await {
                error!(%request_ref, error = %e, "Settlement execution aborted");
            }
        })
    }

    /// Drive one request from `pending` to its outcome
    ///
    /// Returns the status the request ended in (or was already in).
    pub async fn execute(&self, request_ref: &RequestRef) -> Result<RequestStatus, SettlementError> {
        let store = &self.services.store;
        let mut record = store
            .get(request_ref)
            .await?
            .ok_or_else(|| SettlementError::RequestNotFound(request_ref.to_string()))?;

        if record.status != RequestStatus::Pending {
            debug!(%request_ref, status = %record.status, "Request already picked up");
            return Ok(record.status);
        }

        if record.is_expired(Utc::now()) {
            return self.expire(record).await;
        }

        // Persist-before-call: claim the request before the ledger sees it
        let claimed = store
            .transition(
                request_ref,
                RequestStatus::Pending,
                RequestStatus::Processing,
                StatusUpdate::new(),
            )
            .await?;
        if !claimed {
            debug!(%request_ref, "Lost claim to another executor or a cancel");
            return self.current_status(request_ref).await;
        }
        record.status = RequestStatus::Processing;
        info!(
            %request_ref,
            user_id = record.user_id,
            rail = %record.rail(),
            direction = %record.direction,
            amount = %record.amount,
            currency = %record.currency,
            "Settlement processing"
        );
        self.notify(EventKind::Processing, &record);

        let outcome = match &record.details {
            RailDetails::Direct => direct::settle(self, &record).await,
            RailDetails::Partner {
                partner_id,
                destination_kind,
                destination,
                ..
            } => partner::settle(self, &record, partner_id, *destination_kind, destination).await,
            RailDetails::Agent { agent_user_id, .. } => {
                agent::settle(self, &record, *agent_user_id).await
            }
            RailDetails::CryptoInternal { .. } => crypto::settle_internal(self, &record).await,
            RailDetails::CryptoExternal {
                chain,
                asset,
                address,
                amount_smallest_unit,
                ..
            } => {
                crypto::settle_external(self, &record, *chain, asset, address, amount_smallest_unit)
                    .await
            }
        };

        self.finish(record, outcome).await
    }

    /// Phase (a): move value on the ledger, keyed by the request reference
    pub(crate) async fn move_value(
        &self,
        record: &SettlementRequest,
    ) -> Result<LedgerReceipt, ClientError> {
        let ledger = &self.services.ledger;
        let external_ref = record.request_ref.to_string();
        let tx_type = match record.details {
            RailDetails::CryptoInternal { .. } => TxType::Transfer,
            _ => tx_type(record.direction),
        };
        let description = Some(format!(
            "{} via {} ({})",
            record.direction,
            record.rail(),
            record.service
        ));

        match &record.movement {
            Movement::Transfer { from, to } => {
                ledger
                    .transfer(&TransferCommand {
                        from: from.clone(),
                        to: to.clone(),
                        amount: record.amount,
                        currency: record.currency.clone(),
                        external_ref,
                        tx_type,
                        description,
                    })
                    .await
            }
            Movement::Debit { account } => {
                ledger
                    .debit(&PostingCommand {
                        account: account.clone(),
                        amount: record.amount,
                        currency: record.currency.clone(),
                        external_ref,
                        tx_type,
                        description,
                    })
                    .await
            }
            Movement::Credit { account } => {
                ledger
                    .credit(&PostingCommand {
                        account: account.clone(),
                        amount: record.amount,
                        currency: record.currency.clone(),
                        external_ref,
                        tx_type,
                        description,
                    })
                    .await
            }
        }
    }

    /// Phase (c): persist the outcome, then notify
    async fn finish(
        &self,
        mut record: SettlementRequest,
        outcome: Outcome,
    ) -> Result<RequestStatus, SettlementError> {
        let request_ref = record.request_ref;
        let (next, update, event) = match &outcome {
            Outcome::LedgerFailed(message) => {
                warn!(%request_ref, error = %message, "Ledger movement failed");
                (
                    RequestStatus::Failed,
                    StatusUpdate::new().error(message.clone()),
                    EventKind::Failed,
                )
            }
            Outcome::Completed { receipt, ops } => (
                RequestStatus::Completed,
                with_receipt(receipt).ops(ops.clone()),
                EventKind::Completed,
            ),
            Outcome::SentToPartner { receipt, ops } => (
                RequestStatus::SentToPartner,
                with_receipt(receipt).ops(ops.clone()),
                EventKind::SentToPartner,
            ),
            Outcome::BlockchainInitiated { receipt, custody } => {
                let mut update = with_receipt(receipt)
                    .op(ops::CUSTODY_TX_ID, custody.transaction_id.clone())
                    .op(ops::CUSTODY_STATUS, custody.status.clone());
                if let Some(hash) = &custody.tx_hash {
                    update = update.op(ops::TX_HASH, hash.clone());
                }
                (
                    RequestStatus::BlockchainPending,
                    update,
                    EventKind::BlockchainInitiated,
                )
            }
            Outcome::BlockchainFailed { receipt, error } => {
                error!(
                    %request_ref,
                    receipt_code = %receipt.receipt_code,
                    error = %error,
                    "Ledger debited but custody broadcast failed; manual review required"
                );
                (
                    RequestStatus::BlockchainFailed,
                    with_receipt(receipt)
                        .error(error.clone())
                        .op(ops::REQUIRES_MANUAL_REVIEW, true),
                    // The owner sees "processing" while operations investigates
                    EventKind::Processing,
                )
            }
        };

        let applied = self
            .services
            .store
            .transition(&request_ref, RequestStatus::Processing, next, update.clone())
            .await?;
        if !applied {
            error!(%request_ref, target = %next, "Request left processing while executing");
            return self.current_status(&request_ref).await;
        }

        record.status = next;
        update.apply(&mut record);
        info!(
            %request_ref,
            status = %next,
            receipt_code = record.receipt_code.as_deref().unwrap_or("-"),
            "Settlement step finished"
        );
        self.notify(event, &record);

        match outcome {
            Outcome::BlockchainInitiated { custody, .. } => {
                self.monitor.spawn(request_ref, custody.transaction_id);
            }
            Outcome::Completed { .. } => {
                if let RailDetails::CryptoInternal {
                    recipient_user_id, ..
                } = &record.details
                {
                    self.services
                        .notifier
                        .send_to_user(*recipient_user_id, WsMessage::transfer_received(&record));
                }
            }
            _ => {}
        }

        Ok(next)
    }

    /// Cancel a pending request whose TTL ran out
    async fn expire(&self, mut record: SettlementRequest) -> Result<RequestStatus, SettlementError> {
        let request_ref = record.request_ref;
        let update = StatusUpdate::new().error("request expired");
        let applied = self
            .services
            .store
            .transition(
                &request_ref,
                RequestStatus::Pending,
                RequestStatus::Cancelled,
                update.clone(),
            )
            .await?;
        if !applied {
            return self.current_status(&request_ref).await;
        }

        record.status = RequestStatus::Cancelled;
        update.apply(&mut record);
        info!(%request_ref, expires_at = %record.expires_at, "Pending request expired");
        self.notify(EventKind::Cancelled, &record);
        Ok(RequestStatus::Cancelled)
    }

    /// Re-dispatch requests still sitting in `pending` (e.g. after a restart)
    pub async fn resume_pending(self: &Arc<Self>, limit: usize) -> Result<usize, SettlementError> {
        let pending = self
            .services
            .store
            .list_by_status(&[RequestStatus::Pending], limit)
            .await?;
        for record in &pending {
            self.spawn(record.request_ref);
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Re-dispatched pending requests");
        }
        Ok(pending.len())
    }

    pub(crate) fn notify(&self, kind: EventKind, record: &SettlementRequest) {
        self.services
            .notifier
            .send_to_user(record.user_id, WsMessage::event(kind, record));
    }

    async fn current_status(&self, request_ref: &RequestRef) -> Result<RequestStatus, SettlementError> {
        self.services
            .store
            .get(request_ref)
            .await?
            .map(|r| r.status)
            .ok_or_else(|| SettlementError::RequestNotFound(request_ref.to_string()))
    }
}

fn with_receipt(receipt: &LedgerReceipt) -> StatusUpdate {
    let mut update = StatusUpdate::new()
        .receipt(receipt.receipt_code.clone(), receipt.journal_id.clone())
        .op(ops::FEE_AMOUNT, receipt.fee_amount.to_string());
    if let Some(balance_after) = receipt.balance_after {
        update = update.op(ops::BALANCE_AFTER, balance_after.to_string());
    }
    if let Some(commission) = receipt.agent_commission {
        update = update.op(ops::AGENT_COMMISSION, commission.to_string());
    }
    if let Some(payable) = receipt.payable_amount {
        update = update.op(ops::PAYABLE_AMOUNT, payable.to_string());
    }
    update
}
