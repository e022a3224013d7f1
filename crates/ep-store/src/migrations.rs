//! Versioned schema migrations. The set is a static in-binary registry
//! (the schema is fully known at compile time, so there's no need for a
//! file-convention scanning macro); `schema_migrations` on disk remains the
//! source of truth for which versions have actually been applied.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    up: include_str!("migrations/0001_initial.up.sql"),
    down: include_str!("migrations/0001_initial.down.sql"),
}];

/// Assert the static registry has no gaps and no duplicate version numbers.
pub fn validate_migrations() -> Result<(), StoreError> {
    let mut versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
    versions.sort_unstable();
    for (i, v) in versions.iter().enumerate() {
        let expected = i as i64 + 1;
        if *v != expected {
            return Err(StoreError::Migration(format!(
                "migration version gap or duplicate: expected {expected}, found {v}"
            )));
        }
    }
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT version FROM schema_migrations WHERE success = 1 ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(v,)| v).unwrap_or(0))
}

/// Applies every migration newer than the current version, each inside its
/// own transaction. On the first failure, records `success=false` and
/// aborts — the process must not proceed to ingest.
pub async fn migrate_up(pool: &SqlitePool) -> Result<(), StoreError> {
    validate_migrations()?;
    ensure_migrations_table(pool).await?;
    let current = current_version(pool).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        let applied = sqlx::query(migration.up).execute(&mut *tx).await;
        match applied {
            Ok(_) => {
                sqlx::query(
                    "INSERT INTO schema_migrations (version, applied_at, success) VALUES (?, ?, 1)",
                )
                .bind(migration.version)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                tracing::info!(version = migration.version, name = migration.name, "migration applied");
            }
            Err(e) => {
                tx.rollback().await.ok();
                record_failure(pool, migration.version).await?;
                return Err(StoreError::Migration(format!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.name
                )));
            }
        }
    }
    Ok(())
}

/// Rolls back the single most recently applied migration.
pub async fn migrate_down(pool: &SqlitePool) -> Result<(), StoreError> {
    let current = current_version(pool).await?;
    if current == 0 {
        return Ok(());
    }
    let migration = MIGRATIONS
        .iter()
        .find(|m| m.version == current)
        .ok_or_else(|| StoreError::Migration(format!("no migration registered for version {current}")))?;

    let mut tx = pool.begin().await?;
    sqlx::query(migration.down).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
        .bind(migration.version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!(version = migration.version, "migration rolled back");
    Ok(())
}

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            success INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn record_failure(pool: &SqlitePool, version: i64) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO schema_migrations (version, applied_at, success) VALUES (?, ?, 0)
         ON CONFLICT(version) DO UPDATE SET applied_at = excluded.applied_at, success = 0",
    )
    .bind(version)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_no_gaps_or_duplicates() {
        validate_migrations().unwrap();
    }

    #[tokio::test]
    async fn migrate_up_is_idempotent() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        migrate_up(&pool).await.unwrap();
        migrate_up(&pool).await.unwrap();
        let version = current_version(&pool).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn migrate_down_then_up_restores_schema() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        migrate_up(&pool).await.unwrap();
        migrate_down(&pool).await.unwrap();
        assert_eq!(current_version(&pool).await.unwrap(), 0);
        migrate_up(&pool).await.unwrap();
        assert_eq!(
            current_version(&pool).await.unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }
}
