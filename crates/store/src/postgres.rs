use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CustomerId, HoldChange, OrderId, OrderLine, OrderRecord, ProductId, ReservationId,
    ReservationRecord, Result, StockChange, StockHold, StockRecord, StoreError, Version,
    store::{OrderStore, ReservationStore, StockStore},
};

/// PostgreSQL-backed store implementation.
///
/// Versions live in explicit `version` columns and are compare-and-swapped
/// with `UPDATE ... WHERE version = $n` inside a transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn to_quantity(value: i64) -> std::result::Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_column<T>(row: &PgRow, column: &str) -> std::result::Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
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
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_stock(row: PgRow) -> Result<StockRecord> {
        Ok(StockRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            total: to_quantity(row.try_get("total")?)?,
            reserved: to_quantity(row.try_get("reserved")?)?,
            status: parse_column(&row, "status")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_hold(row: PgRow) -> Result<StockHold> {
        Ok(StockHold {
            token: ReservationId::from_uuid(row.try_get::<Uuid, _>("token")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: to_quantity(row.try_get("quantity")?)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<ReservationRecord> {
        Ok(ReservationRecord {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: to_quantity(row.try_get("quantity")?)?,
            state: parse_column(&row, "state")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        let lines_json: serde_json::Value = row.try_get("lines")?;
        let lines: Vec<OrderLine> = serde_json::from_value(lines_json)?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            lines,
            state: parse_column(&row, "state")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    /// Builds the error for a CAS that matched no row: either the row is
    /// gone or someone else bumped its version.
    async fn cas_miss(
        tx: &mut Transaction<'_, Postgres>,
        table: &'static str,
        key_column: &'static str,
        entity: &'static str,
        id: String,
        expected: Version,
        bind: KeyBind,
    ) -> StoreError {
        let sql = format!("SELECT version FROM {table} WHERE {key_column} = $1");
        let query = sqlx::query_scalar::<Postgres, i64>(&sql);
        let query = match bind {
            KeyBind::Text(text) => query.bind(text),
            KeyBind::Uuid(uuid) => query.bind(uuid),
        };

        match query.fetch_optional(&mut **tx).await {
            Ok(Some(actual)) => {
                metrics::counter!("store_stale_version_total", "entity" => entity).increment(1);
                StoreError::StaleVersion {
                    entity,
                    id,
                    expected,
                    actual: Version::new(actual),
                }
            }
            Ok(None) => StoreError::NotFound { entity, id },
            Err(e) => StoreError::Database(e),
        }
    }
}

enum KeyBind {
    Text(String),
    Uuid(Uuid),
}

fn unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl StockStore for PostgresStore {
    async fn insert_stock(&self, record: StockRecord) -> Result<StockRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_records (product_id, total, reserved, status, version, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5)
            RETURNING product_id, total, reserved, status, version, updated_at
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(i64::from(record.total))
        .bind(i64::from(record.reserved))
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                return StoreError::AlreadyExists {
                    entity: "stock",
                    id: record.product_id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        Self::row_to_stock(row)
    }

    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<StockRecord>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, total, reserved, status, version, updated_at
            FROM stock_records
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
    }

    async fn apply_stock_change(&self, change: StockChange) -> Result<StockRecord> {
        let StockChange { record, hold } = change;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE stock_records
            SET total = $2, reserved = $3, status = $4, updated_at = $5, version = version + 1
            WHERE product_id = $1 AND version = $6
            RETURNING product_id, total, reserved, status, version, updated_at
            "#,
        )
        .bind(record.product_id.as_str())
        .bind(i64::from(record.total))
        .bind(i64::from(record.reserved))
        .bind(record.status.as_str())
        .bind(record.updated_at)
        .bind(record.version.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let err = Self::cas_miss(
                &mut tx,
                "stock_records",
                "product_id",
                "stock",
                record.product_id.to_string(),
                record.version,
                KeyBind::Text(record.product_id.to_string()),
            )
            .await;
            tx.rollback().await?;
            return Err(err);
        };

        match hold {
            HoldChange::None => {}
            HoldChange::Insert(hold) => {
                sqlx::query(
                    r#"
                    INSERT INTO stock_holds (token, product_id, quantity, created_at)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(hold.token.as_uuid())
                .bind(hold.product_id.as_str())
                .bind(i64::from(hold.quantity))
                .bind(hold.created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if unique_violation(&e) {
                        return StoreError::AlreadyExists {
                            entity: "hold",
                            id: hold.token.to_string(),
                        };
                    }
                    StoreError::Database(e)
                })?;
            }
            HoldChange::Remove(token) => {
                let deleted = sqlx::query("DELETE FROM stock_holds WHERE token = $1")
                    .bind(token.as_uuid())
                    .execute(&mut *tx)
                    .await?;
                if deleted.rows_affected() == 0 {
                    tx.rollback().await?;
                    return Err(StoreError::NotFound {
                        entity: "hold",
                        id: token.to_string(),
                    });
                }
            }
        }

        let stored = Self::row_to_stock(row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_hold(&self, token: ReservationId) -> Result<Option<StockHold>> {
        let row = sqlx::query(
            r#"
            SELECT token, product_id, quantity, created_at
            FROM stock_holds
            WHERE token = $1
            "#,
        )
        .bind(token.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_hold).transpose()
    }

    async fn holds_for_product(&self, product_id: &ProductId) -> Result<Vec<StockHold>> {
        let rows = sqlx::query(
            r#"
            SELECT token, product_id, quantity, created_at
            FROM stock_holds
            WHERE product_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_hold).collect()
    }
}

const RESERVATION_COLUMNS: &str =
    "id, order_id, product_id, quantity, state, created_at, expires_at, updated_at, version";

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn insert_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord> {
        let sql = format!(
            r#"
            INSERT INTO reservations ({RESERVATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
            RETURNING {RESERVATION_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(record.id.as_uuid())
            .bind(record.order_id.as_uuid())
            .bind(record.product_id.as_str())
            .bind(i64::from(record.quantity))
            .bind(record.state.as_str())
            .bind(record.created_at)
            .bind(record.expires_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if unique_violation(&e) {
                    return StoreError::AlreadyExists {
                        entity: "reservation",
                        id: record.id.to_string(),
                    };
                }
                StoreError::Database(e)
            })?;

        Self::row_to_reservation(row)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn update_reservation(&self, record: ReservationRecord) -> Result<ReservationRecord> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            UPDATE reservations
            SET state = $2, expires_at = $3, updated_at = $4, version = version + 1
            WHERE id = $1 AND version = $5
            RETURNING {RESERVATION_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(record.id.as_uuid())
            .bind(record.state.as_str())
            .bind(record.expires_at)
            .bind(record.updated_at)
            .bind(record.version.as_i64())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            let err = Self::cas_miss(
                &mut tx,
                "reservations",
                "id",
                "reservation",
                record.id.to_string(),
                record.version,
                KeyBind::Uuid(record.id.as_uuid()),
            )
            .await;
            tx.rollback().await?;
            return Err(err);
        };

        let stored = Self::row_to_reservation(row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<ReservationRecord>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn expired_active_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReservationRecord>> {
        let sql = format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE state = 'ACTIVE' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, record: OrderRecord) -> Result<OrderRecord> {
        let lines_json = serde_json::to_value(&record.lines)?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, lines, state, failure_reason, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
            RETURNING id, customer_id, lines, state, failure_reason, created_at, updated_at, version
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.customer_id.as_uuid())
        .bind(lines_json)
        .bind(record.state.as_str())
        .bind(&record.failure_reason)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                return StoreError::AlreadyExists {
                    entity: "order",
                    id: record.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        Self::row_to_order(row)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, lines, state, failure_reason, created_at, updated_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update_order(&self, record: OrderRecord) -> Result<OrderRecord> {
        let lines_json = serde_json::to_value(&record.lines)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET lines = $2, state = $3, failure_reason = $4, updated_at = $5, version = version + 1
            WHERE id = $1 AND version = $6
            RETURNING id, customer_id, lines, state, failure_reason, created_at, updated_at, version
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(lines_json)
        .bind(record.state.as_str())
        .bind(&record.failure_reason)
        .bind(record.updated_at)
        .bind(record.version.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let err = Self::cas_miss(
                &mut tx,
                "orders",
                "id",
                "order",
                record.id.to_string(),
                record.version,
                KeyBind::Uuid(record.id.as_uuid()),
            )
            .await;
            tx.rollback().await?;
            return Err(err);
        };

        let stored = Self::row_to_order(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}
