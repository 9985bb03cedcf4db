//! `PostgreSQL` reservation store for seatguard.
//!
//! Implements [`ReservationStore`] from `seatguard-core` on top of a sqlx
//! connection pool:
//!
//! - [`LockMode::Exclusive`] reads use `SELECT ... FOR UPDATE`, so the record
//!   lock lives exactly as long as the database transaction
//! - compare-and-swap decrements are a single conditional `UPDATE ... WHERE
//!   version = $expected AND remaining > 0`
//! - the write-back decrement overwrites the row with the caller's snapshot;
//!   it is only correct while the caller holds exclusivity
//! - `remaining` carries a `CHECK (remaining >= 0)` constraint as a last line
//!   of defence
//!
//! # Example
//!
//! ```ignore
//! use seatguard_postgres::PostgresReservationStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresReservationStore::connect("postgres://localhost/seatguard", 20).await?;
//!     store.migrate().await?;
//!     let resource = store.create_resource("concert", 100).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

use seatguard_core::store::{LockMode, ReservationStore, StoreFuture, StoreTransaction};
use seatguard_core::{Claim, ClaimantId, Resource, ResourceId, StoreError, Version};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

/// `SQLSTATE` for `check_violation`.
const CHECK_VIOLATION: &str = "23514";

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS resources (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        remaining INTEGER NOT NULL CHECK (remaining >= 0),
        version BIGINT NOT NULL DEFAULT 0
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS claims (
        id BIGSERIAL PRIMARY KEY,
        resource_id BIGINT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
        claimant_id TEXT NOT NULL,
        claimed_at TIMESTAMPTZ NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_claims_resource_claimant ON claims(resource_id, claimant_id)",
];

/// `PostgreSQL`-backed [`ReservationStore`].
#[derive(Debug, Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Connect with a pool of at most `max_connections` connections.
    ///
    /// The pool size bounds how many claims can be inside a transaction at once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(database)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `resources` and `claims` tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(database)?;
        }
        tracing::info!("Reservation schema ready");
        Ok(())
    }
}

fn database(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(CHECK_VIOLATION) => {
            StoreError::Constraint(db.message().to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

fn resource_from_row(row: &PgRow) -> Result<Resource, StoreError> {
    let id: i64 = row.try_get("id").map_err(database)?;
    let remaining: i32 = row.try_get("remaining").map_err(database)?;
    let version: i64 = row.try_get("version").map_err(database)?;

    Ok(Resource {
        id: ResourceId::new(id),
        name: row.try_get("name").map_err(database)?,
        remaining: u32::try_from(remaining)
            .map_err(|_| StoreError::Constraint(format!("resource {id} has remaining {remaining}")))?,
        version: Version::new(u64::try_from(version).map_err(|e| StoreError::Database(e.to_string()))?),
    })
}

fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value()).map_err(|e| StoreError::Database(e.to_string()))
}

impl ReservationStore for PostgresReservationStore {
    fn begin(&self, mode: LockMode) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(database)?;
            Ok(Box::new(PostgresTransaction { tx, mode }) as Box<dyn StoreTransaction>)
        })
    }

    fn get(&self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name, remaining, version FROM resources WHERE id = $1")
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(database)?
                .ok_or(StoreError::NotFound(id))?;
            resource_from_row(&row)
        })
    }

    fn count(&self, id: ResourceId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM claims WHERE resource_id = $1")
                .bind(id.value())
                .fetch_one(&self.pool)
                .await
                .map_err(database)?;
            u64::try_from(count).map_err(|e| StoreError::Database(e.to_string()))
        })
    }

    fn create_resource(&self, name: &str, remaining: u32) -> StoreFuture<'_, Resource> {
        let name = name.to_string();
        Box::pin(async move {
            let stock = i32::try_from(remaining)
                .map_err(|_| StoreError::Constraint(format!("stock {remaining} exceeds INTEGER")))?;
            let row = sqlx::query(
                "INSERT INTO resources (name, remaining, version) VALUES ($1, $2, 0) \
                 RETURNING id, name, remaining, version",
            )
            .bind(&name)
            .bind(stock)
            .fetch_one(&self.pool)
            .await
            .map_err(database)?;
            resource_from_row(&row)
        })
    }

    fn reset(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("TRUNCATE claims, resources")
                .execute(&self.pool)
                .await
                .map_err(database)?;
            tracing::info!("Reservation tables truncated");
            Ok(())
        })
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    mode: LockMode,
}

impl StoreTransaction for PostgresTransaction {
    fn get(&mut self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            let sql = match self.mode {
                LockMode::None => "SELECT id, name, remaining, version FROM resources WHERE id = $1",
                LockMode::Exclusive => {
                    "SELECT id, name, remaining, version FROM resources WHERE id = $1 FOR UPDATE"
                }
            };
            let row = sqlx::query(sql)
                .bind(id.value())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?
                .ok_or(StoreError::NotFound(id))?;
            resource_from_row(&row)
        })
    }

    fn compare_and_swap_decrement(
        &mut self,
        id: ResourceId,
        expected: Version,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let updated: Option<i64> = sqlx::query_scalar(
                "UPDATE resources SET remaining = remaining - 1, version = version + 1 \
                 WHERE id = $1 AND version = $2 AND remaining > 0 \
                 RETURNING version",
            )
            .bind(id.value())
            .bind(to_db_version(expected)?)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(database)?;

            if let Some(version) = updated {
                return u64::try_from(version)
                    .map(Version::new)
                    .map_err(|e| StoreError::Database(e.to_string()));
            }

            // No row matched: find out which condition failed.
            let current = sqlx::query("SELECT id, name, remaining, version FROM resources WHERE id = $1")
                .bind(id.value())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(database)?
                .ok_or(StoreError::NotFound(id))?;
            let current = resource_from_row(&current)?;

            if current.version == expected {
                Err(StoreError::Constraint(format!(
                    "resource {id} remaining would go negative"
                )))
            } else {
                Err(StoreError::VersionConflict {
                    resource_id: id,
                    expected,
                    actual: current.version,
                })
            }
        })
    }

    fn decrement_under_lock(&mut self, observed: &Resource) -> StoreFuture<'_, Resource> {
        let observed = observed.clone();
        Box::pin(async move {
            let remaining = observed.remaining.checked_sub(1).ok_or_else(|| {
                StoreError::Constraint(format!(
                    "resource {} remaining would go negative",
                    observed.id
                ))
            })?;
            let next = Resource {
                remaining,
                version: observed.version.next(),
                ..observed
            };

            let result = sqlx::query("UPDATE resources SET remaining = $2, version = $3 WHERE id = $1")
                .bind(next.id.value())
                .bind(i32::try_from(next.remaining).map_err(|e| StoreError::Constraint(e.to_string()))?)
                .bind(to_db_version(next.version)?)
                .execute(&mut *self.tx)
                .await
                .map_err(database)?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(next.id));
            }
            Ok(next)
        })
    }

    fn exists(
        &mut self,
        resource_id: ResourceId,
        claimant_id: &ClaimantId,
    ) -> StoreFuture<'_, bool> {
        let claimant_id = claimant_id.clone();
        Box::pin(async move {
            sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM claims WHERE resource_id = $1 AND claimant_id = $2)",
            )
            .bind(resource_id.value())
            .bind(claimant_id.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(database)
        })
    }

    fn append(&mut self, claim: &Claim) -> StoreFuture<'_, ()> {
        let claim = claim.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO claims (resource_id, claimant_id, claimed_at) VALUES ($1, $2, $3)",
            )
            .bind(claim.resource_id.value())
            .bind(claim.claimant_id.as_str())
            .bind(claim.claimed_at)
            .execute(&mut *self.tx)
            .await
            .map_err(database)?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(database) })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.rollback().await.map_err(database) })
    }
}
