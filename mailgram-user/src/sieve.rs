//! Sieve script rows (spec.md §3, §6 ManageSieve). Script language
//! interpretation is out of scope (§1); this module only owns storage,
//! the at-most-one-active invariant, and the ManageSieve CRUD surface.

use sqlx::PgPool;

use crate::{AccountId, CoreError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SieveScript {
    pub account_id: AccountId,
    pub name: String,
    pub script_text: String,
    pub active: bool,
}

/// ManageSieve LISTSCRIPTS.
pub async fn list(pool: &PgPool, account: AccountId) -> Result<Vec<SieveScript>> {
    let rows = sqlx::query_as::<_, SieveScript>(
        "SELECT account_id, name, script_text, active FROM sieve_scripts
         WHERE account_id = $1 ORDER BY name",
    )
    .bind(account)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// ManageSieve GETSCRIPT.
pub async fn get(pool: &PgPool, account: AccountId, name: &str) -> Result<SieveScript> {
    sqlx::query_as::<_, SieveScript>(
        "SELECT account_id, name, script_text, active FROM sieve_scripts
         WHERE account_id = $1 AND name = $2",
    )
    .bind(account)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or(CoreError::NotFound)
}

/// ManageSieve PUTSCRIPT. Script syntax validation is an external
/// collaborator's job (§1); this only persists the text.
pub async fn put(pool: &PgPool, account: AccountId, name: &str, script_text: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::InvalidInput("empty script name".into()));
    }
    sqlx::query(
        "INSERT INTO sieve_scripts (account_id, name, script_text, active)
         VALUES ($1, $2, $3, false)
         ON CONFLICT (account_id, name) DO UPDATE SET script_text = excluded.script_text",
    )
    .bind(account)
    .bind(name)
    .bind(script_text)
    .execute(pool)
    .await?;
    Ok(())
}

/// ManageSieve SETACTIVE: exactly one active script per account. Passing
/// `None` deactivates every script (the protocol's "set none active").
pub async fn set_active(pool: &PgPool, account: AccountId, name: Option<&str>) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE sieve_scripts SET active = false WHERE account_id = $1")
        .bind(account)
        .execute(&mut *tx)
        .await?;
    if let Some(name) = name {
        let result = sqlx::query(
            "UPDATE sieve_scripts SET active = true WHERE account_id = $1 AND name = $2",
        )
        .bind(account)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }
    }
    tx.commit().await?;
    Ok(())
}

/// ManageSieve DELETESCRIPT.
pub async fn delete(pool: &PgPool, account: AccountId, name: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM sieve_scripts WHERE account_id = $1 AND name = $2")
        .bind(account)
        .bind(name)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// The account's single active script, if any — what the LMTP delivery
/// path (§6) runs before C10 append.
pub async fn active(pool: &PgPool, account: AccountId) -> Result<Option<SieveScript>> {
    let row = sqlx::query_as::<_, SieveScript>(
        "SELECT account_id, name, script_text, active FROM sieve_scripts
         WHERE account_id = $1 AND active",
    )
    .bind(account)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
