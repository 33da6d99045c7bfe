//! C5 — Upload queue & worker. A pending-upload row is written in the
//! same transaction as its Message/Content rows, making "visible but not
//! yet in the object store" an observable, well-defined state
//! (spec.md §4.5). The worker leases rows with
//! `FOR UPDATE SKIP LOCKED`, and the lease is implicit: `last_attempt_time`
//! doubles as the lease marker, with lease duration equal to
//! `retry_interval` (spec.md §9).

use chrono::{Duration, Utc};
use sqlx::PgPool;

use mailgram_store::Result;

use crate::fetch::{ObjectStore, Spool};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingUpload {
    pub id: i64,
    pub instance_id: String,
    pub content_hash: String,
    pub size: i64,
    pub attempts: i32,
}

/// Leases up to `limit` eligible tasks for `instance_id`: attempts below
/// `max_attempts` and either never attempted or last attempted more than
/// `retry_interval` ago. Setting `last_attempt_time = now()` in the same
/// transaction as the `SKIP LOCKED` select is the lease (spec.md §4.5).
pub async fn lease(
    pool: &PgPool,
    instance_id: &str,
    max_attempts: i32,
    retry_interval: Duration,
    limit: i64,
) -> Result<Vec<PendingUpload>> {
    let mut tx = pool.begin().await?;
    let cutoff = Utc::now() - retry_interval;

    let rows = sqlx::query_as::<_, PendingUpload>(
        "SELECT id, instance_id, content_hash, size, attempts FROM pending_uploads
         WHERE instance_id = $1 AND attempts < $2
           AND (last_attempt_time IS NULL OR last_attempt_time < $3)
         ORDER BY created_at
         LIMIT $4
         FOR UPDATE SKIP LOCKED",
    )
    .bind(instance_id)
    .bind(max_attempts)
    .bind(cutoff)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    if !rows.is_empty() {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        sqlx::query("UPDATE pending_uploads SET last_attempt_time = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(rows)
}

/// Processes one leased task: reads the spooled bytes, puts them to the
/// object store (idempotent), and on success flips `uploaded_flag` on
/// every Message row with that hash and deletes the pending-upload row,
/// all in one transaction. On failure, bumps `attempts` (spec.md §4.5).
pub async fn complete_one(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    spool: &dyn Spool,
    task: &PendingUpload,
) -> Result<bool> {
    let bytes = match spool.read(&task.content_hash).await? {
        Some(bytes) => bytes,
        None => {
            record_failure(pool, task.id).await?;
            return Ok(false);
        }
    };

    match object_store.put(&task.content_hash, &bytes).await {
        Ok(()) => {
            let mut tx = pool.begin().await?;
            sqlx::query("UPDATE messages SET uploaded_flag = true WHERE content_hash = $1")
                .bind(&task.content_hash)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM pending_uploads WHERE id = $1")
                .bind(task.id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(content_hash = %task.content_hash, error = %e, "upload attempt failed");
            record_failure(pool, task.id).await?;
            Ok(false)
        }
    }
}

async fn record_failure(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query("UPDATE pending_uploads SET attempts = attempts + 1, last_attempt_time = now() WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// One leasing + processing pass. Run periodically by the instance's
/// background worker task (spec.md §5, §4.15). Returns (leased,
/// succeeded, failed) counts for the worker's summary log line.
pub async fn run_once(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    spool: &dyn Spool,
    instance_id: &str,
    max_attempts: i32,
    retry_interval: Duration,
    batch_size: i64,
) -> Result<(usize, usize, usize)> {
    let tasks = lease(pool, instance_id, max_attempts, retry_interval, batch_size).await?;
    let leased = tasks.len();
    let mut succeeded = 0;
    let mut failed = 0;
    for task in &tasks {
        match complete_one(pool, object_store, spool, task).await? {
            true => succeeded += 1,
            false => failed += 1,
        }
    }
    tracing::info!(leased, succeeded, failed, "upload worker pass complete");
    Ok((leased, succeeded, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lease window arithmetic: a task attempted `retry_interval` ago is
    /// exactly at the re-eligibility boundary used by `lease`'s query.
    #[test]
    fn retry_cutoff_moves_backwards_in_time() {
        let retry_interval = Duration::minutes(5);
        let cutoff = Utc::now() - retry_interval;
        assert!(cutoff < Utc::now());
    }
}
