use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    MessageId, OutboxMessage, Result, StoreError, TransactionId, TransactionRecord, Version,
    store::{OutboxStore, TransactionStore, validate_outbox_for_write},
};

const TRANSACTION_COLUMNS: &str =
    "id, idempotency_key, status, version, created_at, updated_at, state";

const MESSAGE_COLUMNS: &str =
    "id, aggregate_id, event_type, payload, created_at, processed_at, delivery_attempts, last_error";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url` and returns a store over the pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<TransactionRecord> {
        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            idempotency_key: row.try_get("idempotency_key")?,
            status: row.try_get("status")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let attempts: i32 = row.try_get("delivery_attempts")?;
        Ok(OutboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            delivery_attempts: attempts.max(0) as u32,
            last_error: row.try_get("last_error")?,
        })
    }

    async fn insert_messages(
        tx: &mut Transaction<'_, Postgres>,
        outbox: &[OutboxMessage],
    ) -> Result<()> {
        for message in outbox {
            sqlx::query(
                r#"
                INSERT INTO outbox_messages
                    (id, aggregate_id, event_type, payload, created_at, processed_at, delivery_attempts, last_error)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(message.aggregate_id.as_uuid())
            .bind(&message.event_type)
            .bind(&message.payload)
            .bind(message.created_at)
            .bind(message.processed_at)
            .bind(message.delivery_attempts as i32)
            .bind(&message.last_error)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert_transaction(
        &self,
        record: TransactionRecord,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        validate_outbox_for_write(&record, &outbox).map_err(StoreError::InvalidWrite)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, idempotency_key, status, version, created_at, updated_at, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.idempotency_key)
        .bind(&record.status)
        .bind(Version::first().as_i64())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.state)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // The unique constraint is the authoritative idempotency check
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_idempotency_key")
            {
                return StoreError::DuplicateIdempotencyKey(record.idempotency_key.clone());
            }
            StoreError::Database(e)
        })?;

        Self::insert_messages(&mut tx, &outbox).await?;

        tx.commit().await?;
        Ok(Version::first())
    }

    async fn update_transaction(
        &self,
        record: TransactionRecord,
        expected_version: Version,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Version> {
        validate_outbox_for_write(&record, &outbox).map_err(StoreError::InvalidWrite)?;

        let mut tx = self.pool.begin().await?;
        let new_version = expected_version.next();

        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, version = $3, updated_at = $4, state = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.status)
        .bind(new_version.as_i64())
        .bind(Utc::now())
        .bind(&record.state)
        .bind(expected_version.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM transactions WHERE id = $1")
                    .bind(record.id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            return match actual {
                Some(actual) => {
                    metrics::counter!("store_concurrency_conflicts_total").increment(1);
                    tracing::debug!(
                        transaction_id = %record.id,
                        expected = %expected_version,
                        actual,
                        "Version conflict on update"
                    );
                    Err(StoreError::ConcurrencyConflict {
                        transaction_id: record.id,
                        expected: expected_version,
                        actual: Version::new(actual),
                    })
                }
                None => Err(StoreError::NotFound(record.id)),
            };
        }

        Self::insert_messages(&mut tx, &outbox).await?;

        tx.commit().await?;
        Ok(new_version)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_status(&self, status: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE status = $1 ORDER BY updated_at ASC LIMIT $2"
        ))
        .bind(status)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn fetch_pending_messages(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM outbox_messages
            WHERE processed_at IS NULL AND delivery_attempts < $1
            ORDER BY created_at ASC, seq ASC
            LIMIT $2
            "#
        ))
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn count_pending_messages(&self, max_attempts: u32) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_messages WHERE processed_at IS NULL AND delivery_attempts < $1",
        )
        .bind(max_attempts as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn save_messages(&self, messages: Vec<OutboxMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for message in &messages {
            sqlx::query(
                r#"
                UPDATE outbox_messages
                SET processed_at = $2,
                    delivery_attempts = GREATEST(delivery_attempts, $3),
                    last_error = $4
                WHERE id = $1 AND processed_at IS NULL
                "#,
            )
            .bind(message.id.as_uuid())
            .bind(message.processed_at)
            .bind(message.delivery_attempts as i32)
            .bind(&message.last_error)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbox_messages WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn messages_for_transaction(&self, id: TransactionId) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM outbox_messages WHERE aggregate_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }
}
