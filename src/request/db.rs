//! Request Database Layer
//!
//! PostgreSQL persistence for settlement requests.
//! All status updates use atomic CAS on the `status` column.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::state::RequestStatus;
use super::store::{RequestStore, check_edge};
use super::types::{
    Direction, Movement, NewRequest, OpsMetadata, Quote, RailDetails, RequestRef,
    SettlementRequest, StatusUpdate, UserId,
};
use crate::error::SettlementError;

const SELECT_COLUMNS: &str = r#"
    id, request_ref, cid, user_id, direction, service, amount, currency, quote,
    agent_external_id, partner_id, destination, movement, details, ops, status,
    receipt_code, journal_id, error_message, expires_at, created_at, updated_at, completed_at
"#;

pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and indexes if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), SettlementError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settlement_requests_tb (
                id                BIGSERIAL PRIMARY KEY,
                request_ref       VARCHAR(26) NOT NULL UNIQUE,
                cid               VARCHAR(64),
                user_id           BIGINT NOT NULL,
                direction         SMALLINT NOT NULL,
                rail              VARCHAR(20) NOT NULL,
                service           VARCHAR(64) NOT NULL,
                amount            NUMERIC(38, 18) NOT NULL,
                currency          VARCHAR(16) NOT NULL,
                quote             JSONB NOT NULL,
                agent_external_id VARCHAR(64),
                partner_id        VARCHAR(64),
                destination       VARCHAR(128),
                movement          JSONB NOT NULL,
                details           JSONB NOT NULL,
                ops               JSONB NOT NULL DEFAULT '{}'::jsonb,
                status            SMALLINT NOT NULL,
                receipt_code      VARCHAR(64),
                journal_id        VARCHAR(64),
                error_message     TEXT,
                expires_at        TIMESTAMPTZ NOT NULL,
                created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                completed_at      TIMESTAMPTZ,
                UNIQUE (user_id, cid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_settlement_requests_status \
             ON settlement_requests_tb (status, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_settlement_requests_user \
             ON settlement_requests_tb (user_id, id DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SettlementRequest, SettlementError> {
        let request_ref: String = row.try_get("request_ref")?;
        let request_ref: RequestRef = request_ref
            .parse()
            .map_err(|e| SettlementError::DatabaseError(format!("bad request_ref: {e}")))?;

        let direction_id: i16 = row.try_get("direction")?;
        let direction = Direction::from_id(direction_id).ok_or_else(|| {
            SettlementError::DatabaseError(format!("invalid direction: {direction_id}"))
        })?;

        let status_id: i16 = row.try_get("status")?;
        let status = RequestStatus::from_id(status_id).ok_or_else(|| {
            SettlementError::DatabaseError(format!("invalid status: {status_id}"))
        })?;

        let user_id: i64 = row.try_get("user_id")?;
        let quote: Json<Quote> = row.try_get("quote")?;
        let movement: Json<Movement> = row.try_get("movement")?;
        let details: Json<RailDetails> = row.try_get("details")?;
        let ops: Json<OpsMetadata> = row.try_get("ops")?;
        let amount: Decimal = row.try_get("amount")?;

        Ok(SettlementRequest {
            id: row.try_get("id")?,
            request_ref,
            cid: row.try_get("cid")?,
            user_id: user_id as UserId,
            direction,
            service: row.try_get("service")?,
            amount: amount.normalize(),
            currency: row.try_get("currency")?,
            quote: quote.0,
            agent_external_id: row.try_get("agent_external_id")?,
            partner_id: row.try_get("partner_id")?,
            destination: row.try_get("destination")?,
            movement: movement.0,
            details: details.0,
            ops: ops.0,
            status,
            receipt_code: row.try_get("receipt_code")?,
            journal_id: row.try_get("journal_id")?,
            error_message: row.try_get("error_message")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn create(&self, new: NewRequest) -> Result<SettlementRequest, SettlementError> {
        let request_ref = new.request_ref.to_string();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO settlement_requests_tb
                (request_ref, cid, user_id, direction, rail, service, amount, currency, quote,
                 agent_external_id, partner_id, destination, movement, details, status, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&request_ref)
        .bind(&new.cid)
        .bind(new.user_id as i64)
        .bind(new.direction.id())
        .bind(new.details.kind().as_str())
        .bind(&new.service)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(Json(&new.quote))
        .bind(&new.agent_external_id)
        .bind(&new.partner_id)
        .bind(&new.destination)
        .bind(Json(&new.movement))
        .bind(Json(&new.details))
        .bind(RequestStatus::Pending.id())
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Self::row_to_record(&row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(SettlementError::DuplicateRequest(
                    new.cid.unwrap_or(request_ref),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        request_ref: &RequestRef,
    ) -> Result<Option<SettlementRequest>, SettlementError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM settlement_requests_tb WHERE request_ref = $1"
        ))
        .bind(request_ref.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_cid(
        &self,
        user_id: UserId,
        cid: &str,
    ) -> Result<Option<SettlementRequest>, SettlementError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM settlement_requests_tb WHERE user_id = $1 AND cid = $2"
        ))
        .bind(user_id as i64)
        .bind(cid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn transition(
        &self,
        request_ref: &RequestRef,
        expected: RequestStatus,
        next: RequestStatus,
        update: StatusUpdate,
    ) -> Result<bool, SettlementError> {
        check_edge(expected, next)?;

        let result = sqlx::query(
            r#"
            UPDATE settlement_requests_tb
            SET status = $1,
                receipt_code = COALESCE($2, receipt_code),
                journal_id = COALESCE($3, journal_id),
                error_message = COALESCE($4, error_message),
                ops = ops || $5,
                updated_at = NOW(),
                completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END
            WHERE request_ref = $7 AND status = $8
            "#,
        )
        .bind(next.id())
        .bind(update.receipt_code)
        .bind(update.journal_id)
        .bind(update.error_message)
        .bind(Json(update.ops))
        .bind(next.is_terminal())
        .bind(request_ref.to_string())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn merge_ops(
        &self,
        request_ref: &RequestRef,
        ops: OpsMetadata,
    ) -> Result<(), SettlementError> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_requests_tb
            SET ops = ops || $1, updated_at = NOW()
            WHERE request_ref = $2
            "#,
        )
        .bind(Json(ops))
        .bind(request_ref.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SettlementError::RequestNotFound(request_ref.to_string()));
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        statuses: &[RequestStatus],
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError> {
        let ids: Vec<i16> = statuses.iter().map(RequestStatus::id).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM settlement_requests_tb
            WHERE status = ANY($1)
            ORDER BY id ASC
            LIMIT $2
            "#
        ))
        .bind(ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<SettlementRequest>, SettlementError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM settlement_requests_tb
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR direction = $2)
            ORDER BY id DESC
            LIMIT $3
            "#
        ))
        .bind(user_id as i64)
        .bind(direction.map(|d| d.id()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn health_check(&self) -> Result<(), SettlementError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
