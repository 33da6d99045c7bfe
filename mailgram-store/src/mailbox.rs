//! C2 — Mailbox store: the hierarchical per-account mailbox tree,
//! subscription state, UID-validity and the highest-assigned UID.

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{AccountId, CoreError, MailboxId, Result};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Mailbox {
    pub id: MailboxId,
    pub account_id: AccountId,
    pub name: String,
    pub parent_id: Option<MailboxId>,
    pub uid_validity: i64,
    pub highest_uid: i64,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailboxSummary {
    pub uid_next: i64,
    pub message_count: i64,
    pub total_size: i64,
    pub highest_modseq: i64,
    pub recent_count: i64,
    pub unseen_count: i64,
}

/// `\Seen` bit of the system-flags bitmask (see `mailgram_engine::flags`).
const SEEN_BIT: i32 = 1;
/// `\Recent` bit.
const RECENT_BIT: i32 = 32;

pub async fn list(pool: &PgPool, account: AccountId, subscribed_only: bool) -> Result<Vec<Mailbox>> {
    let rows = if subscribed_only {
        sqlx::query_as::<_, Mailbox>(
            "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
             FROM mailboxes WHERE account_id = $1 AND subscribed ORDER BY name",
        )
        .bind(account)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, Mailbox>(
            "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
             FROM mailboxes WHERE account_id = $1 ORDER BY name",
        )
        .bind(account)
        .fetch_all(pool)
        .await?
    };
    Ok(rows)
}

pub async fn get(pool: &PgPool, id: MailboxId, account: AccountId) -> Result<Mailbox> {
    sqlx::query_as::<_, Mailbox>(
        "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
         FROM mailboxes WHERE id = $1 AND account_id = $2",
    )
    .bind(id)
    .bind(account)
    .fetch_optional(pool)
    .await?
    .ok_or(CoreError::NotFound)
}

/// Case-insensitive lookup, as IMAP mailbox names are compared
/// case-insensitively for the well-known hierarchy.
pub async fn get_by_name(pool: &PgPool, account: AccountId, name: &str) -> Result<Mailbox> {
    sqlx::query_as::<_, Mailbox>(
        "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
         FROM mailboxes WHERE account_id = $1 AND lower(name) = lower($2)",
    )
    .bind(account)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or(CoreError::NotFound)
}

/// Creates every root of `crate::DEFAULT_MAILBOXES` for a freshly-created
/// account that doesn't already have it, subscribed by default (spec.md
/// §3, §6). Idempotent: existing roots (by case-insensitive name) are left
/// untouched.
pub async fn ensure_default_mailboxes(pool: &PgPool, account: AccountId) -> Result<()> {
    for name in crate::DEFAULT_MAILBOXES {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM mailboxes
             WHERE account_id = $1 AND parent_id IS NULL AND lower(name) = lower($2))",
        )
        .bind(account)
        .bind(name)
        .fetch_one(pool)
        .await?;
        if !exists.0 {
            match create(pool, account, name, None).await {
                Ok(_) | Err(CoreError::UniqueViolation(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Looks up a mailbox by name, lazily creating it first if it is one of
/// the default roots and doesn't exist yet (spec.md §6: "lazy-created on
/// demand, case-insensitive match, subscribed by default"). Any other
/// missing name still fails `NotFound`.
pub async fn get_or_create_default(pool: &PgPool, account: AccountId, name: &str) -> Result<Mailbox> {
    match get_by_name(pool, account, name).await {
        Ok(mbox) => Ok(mbox),
        Err(CoreError::NotFound)
            if crate::DEFAULT_MAILBOXES.iter().any(|d| d.eq_ignore_ascii_case(name)) =>
        {
            match create(pool, account, name, None).await {
                Ok(mbox) => Ok(mbox),
                // Lost the race to a concurrent lazy-create; the row now exists.
                Err(CoreError::UniqueViolation(_)) => get_by_name(pool, account, name).await,
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

pub async fn create(
    pool: &PgPool,
    account: AccountId,
    name: &str,
    parent: Option<MailboxId>,
) -> Result<Mailbox> {
    if let Some(parent_id) = parent {
        // NotFound if parent_id is unknown.
        get(pool, parent_id, account).await?;
    }

    let uid_validity = Utc::now().timestamp();
    sqlx::query_as::<_, Mailbox>(
        "INSERT INTO mailboxes (account_id, name, parent_id, uid_validity, highest_uid, subscribed)
         VALUES ($1, $2, $3, $4, 0, true)
         RETURNING id, account_id, name, parent_id, uid_validity, highest_uid, subscribed",
    )
    .bind(account)
    .bind(name)
    .bind(parent)
    .bind(uid_validity)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

/// The mailbox row itself is removed, but its contents are soft-detached
/// rather than destroyed: messages keep their row (`mailbox_id` set to
/// NULL, `mailbox_path` preserved for restoration) and child mailboxes are
/// re-parented to top-level — the design choice spec.md §3 calls out as an
/// implementer decision (see DESIGN.md).
pub async fn delete(pool: &PgPool, id: MailboxId, account: AccountId) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mbox = sqlx::query_as::<_, Mailbox>(
        "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
         FROM mailboxes WHERE id = $1 AND account_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(account)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CoreError::NotFound)?;

    sqlx::query("UPDATE messages SET mailbox_id = NULL WHERE mailbox_id = $1")
        .bind(mbox.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE mailboxes SET parent_id = NULL WHERE parent_id = $1")
        .bind(mbox.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM mailboxes WHERE id = $1").bind(mbox.id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Renames a mailbox, rewriting descendant names by replacing the longest
/// common path prefix between the old and new name (spec.md §4.2).
/// `uid_validity` is preserved for the lifetime of the mailbox.
pub async fn rename(pool: &PgPool, id: MailboxId, account: AccountId, new_name: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mbox = sqlx::query_as::<_, Mailbox>(
        "SELECT id, account_id, name, parent_id, uid_validity, highest_uid, subscribed
         FROM mailboxes WHERE id = $1 AND account_id = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(account)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CoreError::NotFound)?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM mailboxes WHERE account_id = $1 AND lower(name) = lower($2) AND id != $3",
    )
    .bind(account)
    .bind(new_name)
    .bind(mbox.id)
    .fetch_one(&mut *tx)
    .await?;
    if existing > 0 {
        return Err(CoreError::UniqueViolation(format!("mailbox {new_name} already exists")));
    }

    rename_with_descendants(&mut tx, account, &mbox.name, new_name).await?;
    tx.commit().await?;
    Ok(())
}

async fn rename_with_descendants(
    tx: &mut Transaction<'_, Postgres>,
    account: AccountId,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    sqlx::query("UPDATE mailboxes SET name = $1 WHERE account_id = $2 AND name = $3")
        .bind(new_name)
        .bind(account)
        .bind(old_name)
        .execute(&mut **tx)
        .await?;

    let prefix = format!("{old_name}{}", crate::MAILBOX_HIERARCHY_DELIMITER);
    let descendants: Vec<(MailboxId, String)> = sqlx::query_as(
        "SELECT id, name FROM mailboxes WHERE account_id = $1 AND name LIKE $2",
    )
    .bind(account)
    .bind(format!("{prefix}%"))
    .fetch_all(&mut **tx)
    .await?;

    for (mid, descendant_name) in descendants {
        let suffix = &descendant_name[prefix.len()..];
        let rewritten = format!("{new_name}{}{suffix}", crate::MAILBOX_HIERARCHY_DELIMITER);
        sqlx::query("UPDATE mailboxes SET name = $1 WHERE id = $2")
            .bind(rewritten)
            .bind(mid)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Unsubscribing one of the default roots is a no-op (spec.md §3: "a
/// special root set ... unsubscribing a root is a no-op"); subscribing one
/// (already a no-op in effect, since it's subscribed by creation) still
/// goes through the normal path.
pub async fn set_subscribed(pool: &PgPool, id: MailboxId, account: AccountId, subscribed: bool) -> Result<()> {
    if !subscribed {
        let mbox = get(pool, id, account).await?;
        if mbox.parent_id.is_none() && crate::DEFAULT_MAILBOXES.iter().any(|d| d.eq_ignore_ascii_case(&mbox.name)) {
            return Ok(());
        }
    }
    let result = sqlx::query("UPDATE mailboxes SET subscribed = $1 WHERE id = $2 AND account_id = $3")
        .bind(subscribed)
        .bind(id)
        .bind(account)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound);
    }
    Ok(())
}

/// UIDNEXT, message count, total size, highest MODSEQ, recent/unseen
/// counts — computed in one transactional read (spec.md §4.2).
pub async fn summary(pool: &PgPool, id: MailboxId) -> Result<MailboxSummary> {
    let mut tx = pool.begin().await?;
    let (highest_uid,): (i64,) = sqlx::query_as("SELECT highest_uid FROM mailboxes WHERE id = $1 FOR SHARE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::NotFound)?;

    let row: (i64, Option<i64>, i64, i64, i64) = sqlx::query_as(
        "SELECT
            count(*),
            coalesce(sum(size), 0),
            coalesce(max(greatest(created_modseq, coalesce(updated_modseq, 0))), 0),
            count(*) FILTER (WHERE (system_flags_bitmask & $2) != 0),
            count(*) FILTER (WHERE (system_flags_bitmask & $3) = 0)
         FROM messages WHERE mailbox_id = $1 AND expunged_at IS NULL",
    )
    .bind(id)
    .bind(RECENT_BIT)
    .bind(SEEN_BIT)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(MailboxSummary {
        uid_next: highest_uid + 1,
        message_count: row.0,
        total_size: row.1.unwrap_or(0),
        highest_modseq: row.2,
        recent_count: row.3,
        unseen_count: row.4,
    })
}
