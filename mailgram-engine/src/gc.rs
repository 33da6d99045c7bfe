//! C11 — GC coordinator. Two phases gated by a single process-wide
//! advisory lock so at most one instance reaps at a time (spec.md §4.11).

use chrono::{Duration, Utc};
use sqlx::PgPool;

use mailgram_store::Result;

use crate::fetch::ObjectStore;

/// Fixed advisory-lock key. Any 64-bit constant works as long as every
/// instance in the deployment agrees on it (spec.md §9).
pub const GC_ADVISORY_LOCK_KEY: i64 = 0x6d61696c6772616d; // "mailgram" truncated to 8 bytes

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub candidates: usize,
    pub reaped: usize,
    pub skipped_lock_held: bool,
}

/// Runs one GC pass: acquires the advisory lock (no-op run if another
/// instance holds it), discovers candidates, reaps each. Lock is released
/// at the end of the function regardless of path (spec.md §4.11, §7).
pub async fn run_once(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    grace_period: Duration,
    batch_size: i64,
) -> Result<GcReport> {
    let mut conn = pool.acquire().await?;
    let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(GC_ADVISORY_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await?;

    if !acquired {
        tracing::debug!("GC advisory lock held elsewhere, skipping run");
        return Ok(GcReport { skipped_lock_held: true, ..Default::default() });
    }

    let report = reap(pool, object_store, grace_period, batch_size).await;

    let _: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .bind(GC_ADVISORY_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await?;

    report
}

async fn reap(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    grace_period: Duration,
    batch_size: i64,
) -> Result<GcReport> {
    let cutoff = Utc::now() - grace_period;

    // Phase 1: content hashes where every referencing message is
    // expunged past the grace period.
    let candidates: Vec<(String,)> = sqlx::query_as(
        "SELECT c.content_hash FROM content c
         WHERE NOT EXISTS (
             SELECT 1 FROM messages m
             WHERE m.content_hash = c.content_hash AND m.expunged_at IS NULL
         )
         AND NOT EXISTS (
             SELECT 1 FROM messages m
             WHERE m.content_hash = c.content_hash AND m.expunged_at >= $1
         )
         LIMIT $2",
    )
    .bind(cutoff)
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut reaped = 0;
    for (content_hash,) in &candidates {
        if reap_one(pool, object_store, content_hash).await? {
            reaped += 1;
        }
    }

    Ok(GcReport { candidates: candidates.len(), reaped, skipped_lock_held: false })
}

/// Phase 2 for a single hash: delete from the object store, then in one
/// transaction delete the Content row and the still-expunged Message
/// rows. A non-expunged row appearing in the race window (a fresh Append
/// landed on the same hash after discovery) aborts that hash's cleanup.
async fn reap_one(pool: &PgPool, object_store: &dyn ObjectStore, content_hash: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let (still_live,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE content_hash = $1 AND expunged_at IS NULL)",
    )
    .bind(content_hash)
    .fetch_one(&mut *tx)
    .await?;

    if still_live {
        tx.rollback().await?;
        return Ok(false);
    }

    // Object-store delete happens outside the transaction boundary since
    // it isn't transactional, but Put is idempotent and the Content/
    // Message rows are only removed after it succeeds, so a crash here
    // just leaves an orphaned object to be reaped (harmlessly) again.
    match object_store.delete(content_hash).await {
        Ok(()) => {}
        Err(e) => {
            tracing::warn!(content_hash, error = %e, "object store delete failed, will retry next run");
            tx.rollback().await?;
            return Ok(false);
        }
    }

    sqlx::query("DELETE FROM messages WHERE content_hash = $1 AND expunged_at IS NOT NULL")
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;
    mailgram_store::content::delete(&mut *tx, content_hash).await?;

    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_cutoff_moves_backwards() {
        let grace = Duration::days(7);
        assert!(Utc::now() - grace < Utc::now());
    }
}
