//! Account lifecycle. An account is created once and never reused; it
//! owns its mailboxes, credentials, Sieve scripts and vacation ledger.

use sqlx::PgPool;

use crate::{AccountId, Result};

/// Creates the account row and its auto-created root mailboxes (spec.md
/// §3: "a special root set ... is auto-created per account") in one go,
/// so no account is ever observable without its default mailboxes.
pub async fn create(pool: &PgPool, id: AccountId) -> Result<()> {
    sqlx::query("INSERT INTO accounts (id) VALUES ($1)")
        .bind(id)
        .execute(pool)
        .await?;
    mailgram_store::mailbox::ensure_default_mailboxes(pool, id).await?;
    Ok(())
}

pub async fn exists(pool: &PgPool, id: AccountId) -> Result<bool> {
    let (present,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;
    Ok(present)
}
