//! C12 — Vacation oracle. Throttles per-sender auto-replies with a
//! persistent ledger (spec.md §4.12); consulted by the Sieve executor
//! before dispatching a `vacation` action.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::{AccountId, Result};

/// True iff no ledger row exists with `response_date > now - duration`.
pub async fn is_allowed(
    pool: &PgPool,
    account: AccountId,
    sender: &str,
    handle: &str,
    duration: Duration,
) -> Result<bool> {
    let cutoff = Utc::now() - duration;
    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM vacation_ledger
         WHERE account_id = $1 AND sender_address = $2 AND handle = $3 AND response_date > $4",
    )
    .bind(account)
    .bind(sender)
    .bind(handle)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count == 0)
}

pub async fn record_sent(pool: &PgPool, account: AccountId, sender: &str, handle: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO vacation_ledger (account_id, sender_address, handle, response_date)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (account_id, sender_address, handle) DO UPDATE SET response_date = now()",
    )
    .bind(account)
    .bind(sender)
    .bind(handle)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes ledger rows older than `older_than`, run periodically
/// alongside the upload worker and GC coordinator.
pub async fn cleanup(pool: &PgPool, older_than: Duration) -> Result<u64> {
    let cutoff = Utc::now() - older_than;
    let result = sqlx::query("DELETE FROM vacation_ledger WHERE response_date < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Row shape exposed for callers that want to inspect the ledger rather
/// than just query its throttling decision (e.g. admin tooling).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VacationRecord {
    pub account_id: AccountId,
    pub sender_address: String,
    pub handle: String,
    pub response_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetic_sane() {
        let d = Duration::days(4);
        assert!(Utc::now() - d < Utc::now());
    }
}
