//! The single, store-wide MODSEQ sequence (spec.md §3, §5): monotonic,
//! shared across every mailbox and every account so that a Move between
//! mailboxes and an Expunge in either one are always comparably ordered.

use sqlx::{Executor, Postgres};

use crate::{ModSeq, Result};

/// Draw the next value from `modseq_seq` within the caller's transaction.
pub async fn next<'e, E>(executor: E) -> Result<ModSeq>
where
    E: Executor<'e, Database = Postgres>,
{
    let (value,): (i64,) = sqlx::query_as("SELECT nextval('modseq_seq')")
        .fetch_one(executor)
        .await?;
    Ok(value)
}

/// Read the current value without advancing it — used by the poll engine
/// (C8) to report the watermark of "everything visible up to here".
pub async fn current<'e, E>(executor: E) -> Result<ModSeq>
where
    E: Executor<'e, Database = Postgres>,
{
    let (value,): (i64,) = sqlx::query_as("SELECT last_value FROM modseq_seq")
        .fetch_one(executor)
        .await?;
    Ok(value)
}
