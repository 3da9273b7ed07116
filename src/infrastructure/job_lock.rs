// Table-based single-flight lock for operator jobs
// Whoever inserts the `job_locks` row holds the lock; release deletes it.

use std::time::Duration;
use tracing::{info, warn};

use super::database::MarketDatabase;
use crate::core::Timestamp;
use crate::error::{AppError, AppResult};

/// A lock older than this is assumed to belong to a crashed run.
pub const STALE_AFTER: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug)]
pub struct JobLock {
    name: String,
}

impl JobLock {
    /// Take the lock or fail immediately with Conflict.
    pub async fn acquire(db: &MarketDatabase, name: &str) -> AppResult<Self> {
        let now = Timestamp::now().value();
        let stale_before = now - STALE_AFTER.as_millis() as i64;

        let stale = sqlx::query("DELETE FROM job_locks WHERE name = ? AND acquired_at < ?")
            .bind(name)
            .bind(stale_before)
            .execute(db.pool())
            .await?;
        if stale.rows_affected() > 0 {
            warn!(job = name, "removed stale job lock");
        }

        let inserted = sqlx::query(
            "INSERT INTO job_locks (name, acquired_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(now)
        .execute(db.pool())
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Job '{}' is already running. If no run is active, clear it with: DELETE FROM job_locks WHERE name = '{}'",
                name, name
            )));
        }

        info!(job = name, "acquired job lock");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(self, db: &MarketDatabase) -> AppResult<()> {
        sqlx::query("DELETE FROM job_locks WHERE name = ?")
            .bind(&self.name)
            .execute(db.pool())
            .await?;
        info!(job = %self.name, "released job lock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_conflicts_until_release() {
        let db = MarketDatabase::new_in_memory().await.unwrap();

        let lock = JobLock::acquire(&db, "migrate").await.unwrap();
        assert!(matches!(
            JobLock::acquire(&db, "migrate").await,
            Err(AppError::Conflict(_))
        ));
        // Other job names are independent
        JobLock::acquire(&db, "backfill").await.unwrap();

        lock.release(&db).await.unwrap();
        JobLock::acquire(&db, "migrate").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO job_locks (name, acquired_at) VALUES ('migrate', 0)")
            .execute(db.pool())
            .await
            .unwrap();

        let lock = JobLock::acquire(&db, "migrate").await.unwrap();
        assert_eq!(lock.name(), "migrate");
    }
}
