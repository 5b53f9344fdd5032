#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! The Write gate: a fleet-wide, spacing-limited, idempotent commit of a
//! quorum-complete [`Observation`] to PostgreSQL.
//!
//! Grounded directly on `internal/infra/db/postgres.go`: a single
//! transaction acquires a constant-keyed advisory lock, reads the most
//! recent commit time, and either inserts (if enough time has passed) or
//! aborts without error (if not). `ON CONFLICT (message_id) DO NOTHING`
//! makes the insert idempotent against re-delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use oracle_types::Observation;
use sqlx::{PgPool, Row};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("observation created_at {seconds} is not a representable timestamp")]
    InvalidTimestamp { seconds: i64 },
}

/// The three-valued outcome of a write-gate attempt. Only `Err` is ever
/// logged as a warning; `SkippedSpacing` is a normal, silent outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    SkippedSpacing,
}

/// The fleet-wide constant key for the PostgreSQL advisory lock. There is
/// exactly one oracle instance's worth of write coordination happening, so
/// one lock key suffices.
const ADVISORY_LOCK_KEY: i64 = 1;

#[async_trait]
pub trait PriceMessageRepository: Send + Sync {
    /// Attempts to commit `observation`, subject to `min_interval` having
    /// elapsed since the most recently committed record, fleet-wide.
    async fn store_if_allowed(
        &self,
        observation: &Observation,
        min_interval: Duration,
    ) -> Result<WriteOutcome, StoreError>;
}

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            StoreError::Database(sqlx::Error::Migrate(Box::new(e)))
        })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceMessageRepository for PostgresRepository {
    async fn store_if_allowed(
        &self,
        observation: &Observation,
        min_interval: Duration,
    ) -> Result<WriteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let last_timestamp: Option<DateTime<Utc>> = sqlx::query(
            "SELECT timestamp FROM eth_price_messages ORDER BY timestamp DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get(0));

        let last = last_timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let now = Utc::now();
        let min_interval = ChronoDuration::from_std(min_interval)
            .unwrap_or_else(|_| ChronoDuration::zero());

        if now.signed_duration_since(last) < min_interval {
            tx.rollback().await?;
            tracing::debug!("write gate: not enough time has passed since the last commit");
            return Ok(WriteOutcome::SkippedSpacing);
        }

        let created_at = Utc
            .timestamp_opt(observation.created_at, 0)
            .single()
            .ok_or(StoreError::InvalidTimestamp {
                seconds: observation.created_at,
            })?;
        sqlx::query(
            "INSERT INTO eth_price_messages \
             (message_id, price, publisher, writer, signers, signatures, created_at, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(&observation.id)
        .bind(&observation.price)
        .bind(&observation.publisher)
        .bind(&observation.writer)
        .bind(&observation.signers)
        .bind(&observation.signatures)
        .bind(created_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WriteOutcome::Committed)
    }
}
