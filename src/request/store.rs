//! Request Store
//!
//! Durable home of settlement requests. Every status change is a
//! compare-and-set on the current status, so two workers racing on the same
//! request can never both win.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::state::RequestStatus;
use super::types::{
    Direction, NewRequest, OpsMetadata, RequestRef, SettlementRequest, StatusUpdate, UserId,
};
use crate::error::SettlementError;

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new request in `pending`
    ///
    /// Fails with `DuplicateRequest` if the ref, or the (user, cid) pair, exists.
    async fn create(&self, new: NewRequest) -> Result<SettlementRequest, SettlementError>;

    async fn get(
        &self,
        request_ref: &RequestRef,
    ) -> Result<Option<SettlementRequest>, SettlementError>;

    async fn get_by_cid(
        &self,
        user_id: UserId,
        cid: &str,
    ) -> Result<Option<SettlementRequest>, SettlementError>;

    /// CAS status update
    ///
    /// Returns `Ok(false)` if the request is no longer in `expected`.
    /// Rejects edges the FSM does not allow before touching storage.
    async fn transition(
        &self,
        request_ref: &RequestRef,
        expected: RequestStatus,
        next: RequestStatus,
        update: StatusUpdate,
    ) -> Result<bool, SettlementError>;

    /// Merge operational metadata without changing status
    async fn merge_ops(
        &self,
        request_ref: &RequestRef,
        ops: OpsMetadata,
    ) -> Result<(), SettlementError>;

    /// Oldest first
    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError>;

    /// Newest first
    async fn list_for_user(
        &self,
        user_id: UserId,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError>;

    async fn health_check(&self) -> Result<(), SettlementError>;
}

pub(crate) fn check_edge(expected: RequestStatus, next: RequestStatus) -> Result<(), SettlementError> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(SettlementError::InvalidStateTransition {
            from: expected,
            to: next,
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    rows: HashMap<RequestRef, SettlementRequest>,
    next_id: i64,
}

/// Process-local store, used when no database is configured and in tests
#[derive(Default)]
pub struct MemoryRequestStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, SettlementError> {
        self.inner
            .lock()
            .map_err(|_| SettlementError::SystemError("request store lock poisoned".into()))
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, new: NewRequest) -> Result<SettlementRequest, SettlementError> {
        let mut inner = self.lock()?;
        if inner.rows.contains_key(&new.request_ref) {
            return Err(SettlementError::DuplicateRequest(new.request_ref.to_string()));
        }
        if let Some(cid) = &new.cid
            && inner
                .rows
                .values()
                .any(|r| r.user_id == new.user_id && r.cid.as_ref() == Some(cid))
        {
            return Err(SettlementError::DuplicateRequest(cid.clone()));
        }

        inner.next_id += 1;
        let record = SettlementRequest::from_new(inner.next_id, new, Utc::now());
        inner.rows.insert(record.request_ref, record.clone());
        Ok(record)
    }

    async fn get(
        &self,
        request_ref: &RequestRef,
    ) -> Result<Option<SettlementRequest>, SettlementError> {
        Ok(self.lock()?.rows.get(request_ref).cloned())
    }

    async fn get_by_cid(
        &self,
        user_id: UserId,
        cid: &str,
    ) -> Result<Option<SettlementRequest>, SettlementError> {
        Ok(self
            .lock()?
            .rows
            .values()
            .find(|r| r.user_id == user_id && r.cid.as_deref() == Some(cid))
            .cloned())
    }

    async fn transition(
        &self,
        request_ref: &RequestRef,
        expected: RequestStatus,
        next: RequestStatus,
        update: StatusUpdate,
    ) -> Result<bool, SettlementError> {
        check_edge(expected, next)?;
        let mut inner = self.lock()?;
        let Some(record) = inner.rows.get_mut(request_ref) else {
            return Err(SettlementError::RequestNotFound(request_ref.to_string()));
        };
        if record.status != expected {
            return Ok(false);
        }

        let now = Utc::now();
        record.status = next;
        record.updated_at = now;
        if next.is_terminal() {
            record.completed_at = Some(now);
        }
        update.apply(record);
        Ok(true)
    }

    async fn merge_ops(
        &self,
        request_ref: &RequestRef,
        ops: OpsMetadata,
    ) -> Result<(), SettlementError> {
        let mut inner = self.lock()?;
        let Some(record) = inner.rows.get_mut(request_ref) else {
            return Err(SettlementError::RequestNotFound(request_ref.to_string()));
        };
        record.ops.extend(ops);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError> {
        let inner = self.lock()?;
        let mut rows: Vec<_> = inner
            .rows
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError> {
        let inner = self.lock()?;
        let mut rows: Vec<_> = inner
            .rows
            .values()
            .filter(|r| r.user_id == user_id && direction.is_none_or(|d| r.direction == d))
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), SettlementError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::types::fixtures::direct_deposit;
    use crate::request::types::ops;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryRequestStore::new();
        let record = store.create(direct_deposit(1, Decimal::TEN)).await.unwrap();
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.id, 1);

        let fetched = store.get(&record.request_ref).await.unwrap().unwrap();
        assert_eq!(fetched.amount, Decimal::TEN);
    }

    #[tokio::test]
    async fn test_duplicate_ref_and_cid() {
        let store = MemoryRequestStore::new();
        let mut new = direct_deposit(1, Decimal::TEN);
        new.cid = Some("c-1".into());
        store.create(new.clone()).await.unwrap();

        let err = store.create(new.clone()).await.unwrap_err();
        assert!(matches!(err, SettlementError::DuplicateRequest(_)));

        let mut same_cid = direct_deposit(1, Decimal::ONE);
        same_cid.cid = Some("c-1".into());
        assert!(store.create(same_cid).await.is_err());

        // Same cid for another user is fine
        let mut other_user = direct_deposit(2, Decimal::ONE);
        other_user.cid = Some("c-1".into());
        assert!(store.create(other_user).await.is_ok());

        assert!(store.get_by_cid(1, "c-1").await.unwrap().is_some());
        assert!(store.get_by_cid(3, "c-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_cas() {
        let store = MemoryRequestStore::new();
        let record = store.create(direct_deposit(1, Decimal::TEN)).await.unwrap();
        let r = record.request_ref;

        assert!(
            store
                .transition(&r, RequestStatus::Pending, RequestStatus::Processing, StatusUpdate::new())
                .await
                .unwrap()
        );
        // Second claim loses
        assert!(
            !store
                .transition(&r, RequestStatus::Pending, RequestStatus::Processing, StatusUpdate::new())
                .await
                .unwrap()
        );

        let update = StatusUpdate::new().receipt("RC", "J1");
        assert!(
            store
                .transition(&r, RequestStatus::Processing, RequestStatus::Completed, update)
                .await
                .unwrap()
        );
        let done = store.get(&r).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.receipt_code.as_deref(), Some("RC"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_rejects_illegal_edge() {
        let store = MemoryRequestStore::new();
        let record = store.create(direct_deposit(1, Decimal::TEN)).await.unwrap();
        let err = store
            .transition(
                &record.request_ref,
                RequestStatus::Pending,
                RequestStatus::Completed,
                StatusUpdate::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidStateTransition { .. }));
        let unchanged = store.get(&record.request_ref).await.unwrap().unwrap();
        assert_eq!(unchanged.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_merge_ops_and_listing() {
        let store = MemoryRequestStore::new();
        let a = store.create(direct_deposit(1, Decimal::ONE)).await.unwrap();
        let b = store.create(direct_deposit(1, Decimal::TWO)).await.unwrap();
        let _c = store.create(direct_deposit(2, Decimal::TEN)).await.unwrap();

        let mut extra = OpsMetadata::new();
        extra.insert(ops::CONFIRMATIONS.into(), 3.into());
        store.merge_ops(&a.request_ref, extra).await.unwrap();
        let a = store.get(&a.request_ref).await.unwrap().unwrap();
        assert_eq!(a.ops[ops::CONFIRMATIONS], 3);

        let mine = store.list_for_user(1, None, 10).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].request_ref, b.request_ref);

        let pending = store
            .list_by_status(&[RequestStatus::Pending], 2)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].request_ref, a.request_ref);

        let withdrawals = store
            .list_for_user(1, Some(Direction::Withdrawal), 10)
            .await
            .unwrap();
        assert!(withdrawals.is_empty());
    }
}
