//! # PostgreSQL Item Store
//!
//! `ItemStore` over a `deadpool_postgres` connection pool.
//!
//! ## Atomicity
//! - **Claim** runs `SELECT ... FOR UPDATE SKIP LOCKED` and the state flip in one
//!   transaction, so two claimers can never both see the same pending row.
//! - **Assign** is a single conditional `UPDATE` on `state IN (-1, 0)`; the row
//!   count tells us whether we won.
//!
//! Every operation checks a client out of the pool and returns it before the
//! call completes; nothing holds a connection across the engine's sleeps.
//! All timestamps are written as UTC by the process clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::core::item::{consumer_key, ConsumerId, Item, ItemState};
use crate::core::store::{ItemStore, StoreError};

/// Column list shared by every statement that returns items.
const ITEM_COLUMNS: &str = "id, text, state, created_at, assigned_at, assigned_consumer";

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::QueryError(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::ConnectionError(e.to_string())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// # PostgreSQL Item Store
pub struct PgItemStore {
    pool: Pool,
    table: String,
}

impl PgItemStore {
    /// Builds a pool for `database_url` with at most `max_size` connections.
    ///
    /// No connection is opened here; the first query does that.
    pub fn connect(database_url: &str, max_size: usize, table: &str) -> Result<Self, StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::ConnectionError(format!("invalid table name '{table}'")));
        }

        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.url = Some(database_url.to_string());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_pool_config.pool = Some(PoolConfig::new(max_size));

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::ConnectionError(format!("Failed to create database pool: {e}")))?;
        info!(table, max_size, "PostgreSQL item store pool created");

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Creates the item table and its indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let t = &self.table;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id BIGSERIAL PRIMARY KEY,
                text TEXT NOT NULL,
                state SMALLINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                claimed_at TIMESTAMPTZ NULL,
                assigned_at TIMESTAMPTZ NULL,
                assigned_consumer TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS {t}_pending_idx ON {t} (state, created_at);
            CREATE INDEX IF NOT EXISTS {t}_consumer_idx ON {t} (assigned_consumer, id);"
        );
        client.batch_execute(&ddl).await?;
        info!(table = %t, "Item table schema ensured");
        Ok(())
    }

    /// Closes the pool; outstanding clients are dropped when returned.
    pub fn close(&self) {
        self.pool.close();
    }

    fn row_to_item(row: &Row) -> Result<Item, StoreError> {
        let code: i16 = row.try_get("state")?;
        let state = ItemState::from_code(code)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown state code {code}")))?;
        Ok(Item {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            state,
            created_at: row.try_get("created_at")?,
            assigned_at: row.try_get("assigned_at")?,
            assigned_consumer: row.try_get("assigned_consumer")?,
        })
    }

    fn rows_to_items(rows: &[Row]) -> Result<Vec<Item>, StoreError> {
        rows.iter().map(Self::row_to_item).collect()
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn claim_pending_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<Item>, StoreError> {
        let t = &self.table;
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let locked = tx
            .query(
                &format!(
                    "SELECT id FROM {t} WHERE state = $1 AND created_at < $2 \
                     ORDER BY id FOR UPDATE SKIP LOCKED"
                ),
                &[&ItemState::Pending.code(), &threshold],
            )
            .await?;
        if locked.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = locked.iter().map(|r| r.try_get(0)).collect::<Result<_, _>>()?;

        let rows = tx
            .query(
                &format!(
                    "UPDATE {t} SET state = $1, claimed_at = $2 WHERE id = ANY($3) \
                     RETURNING {ITEM_COLUMNS}"
                ),
                &[&ItemState::Claimed.code(), &Utc::now(), &ids],
            )
            .await?;
        tx.commit().await?;

        let mut items = Self::rows_to_items(&rows)?;
        items.sort_by_key(|item| item.id);
        debug!(count = items.len(), "Claimed pending items");
        Ok(items)
    }

    async fn assign(&self, item_id: i64, consumer: ConsumerId) -> Result<bool, StoreError> {
        let t = &self.table;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                &format!(
                    "UPDATE {t} SET state = $1, assigned_at = $2, assigned_consumer = $3, claimed_at = NULL \
                     WHERE id = $4 AND state IN ($5, $6)"
                ),
                &[
                    &ItemState::Assigned.code(),
                    &Utc::now(),
                    &consumer_key(consumer),
                    &item_id,
                    &ItemState::Claimed.code(),
                    &ItemState::Pending.code(),
                ],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn items_since(
        &self,
        consumer: ConsumerId,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let t = &self.table;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM {t} \
                     WHERE state = $1 AND assigned_consumer = $2 AND id > $3 \
                     ORDER BY assigned_at ASC, id ASC LIMIT $4"
                ),
                &[&ItemState::Assigned.code(), &consumer_key(consumer), &min_id, &limit],
            )
            .await?;
        Self::rows_to_items(&rows)
    }

    async fn latest_id(&self) -> Result<i64, StoreError> {
        let t = &self.table;
        let client = self.pool.get().await?;
        let row = client
            .query_one(&format!("SELECT COALESCE(MAX(id), 0)::BIGINT FROM {t}"), &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn insert(&self, text: &str) -> Result<i64, StoreError> {
        let t = &self.table;
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!("INSERT INTO {t} (text, state, created_at) VALUES ($1, $2, $3) RETURNING id"),
                &[&text, &ItemState::Pending.code(), &Utc::now()],
            )
            .await?;
        let id: i64 = row.try_get(0)?;
        info!(id, "Inserted item");
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<Item>, StoreError> {
        let t = &self.table;
        let client = self.pool.get().await?;
        let rows = client
            .query(&format!("SELECT {ITEM_COLUMNS} FROM {t} ORDER BY id DESC"), &[])
            .await?;
        Self::rows_to_items(&rows)
    }

    async fn reclaim_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let t = &self.table;
        let client = self.pool.get().await?;
        let released = client
            .execute(
                &format!(
                    "UPDATE {t} SET state = $1, claimed_at = NULL \
                     WHERE state = $2 AND claimed_at < $3"
                ),
                &[&ItemState::Pending.code(), &ItemState::Claimed.code(), &claimed_before],
            )
            .await?;
        Ok(released)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}
