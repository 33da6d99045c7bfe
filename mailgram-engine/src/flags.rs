//! C7 — Flag engine. System flags are a 16-bit bitmask; custom keywords
//! are a canonical JSON set (sorted, deduplicated, length-capped).
//! `set`/`add`/`remove` are each a single transaction that re-reads and
//! returns the effective full set (spec.md §4.7).

use sqlx::PgPool;

use mailgram_store::{CoreError, MailboxId, ModSeq, Result, Uid};

/// System-flag bitmask bits (spec.md §4.7).
pub const SEEN: i32 = 1 << 0;
pub const ANSWERED: i32 = 1 << 1;
pub const FLAGGED: i32 = 1 << 2;
pub const DELETED: i32 = 1 << 3;
pub const DRAFT: i32 = 1 << 4;
pub const RECENT: i32 = 1 << 5;

/// A single flag as understood by the engine: either one of the six
/// system bits, or an arbitrary keyword atom not starting with `\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    System(i32),
    Custom(String),
}

impl Flag {
    /// Parses a wire-neutral flag name (`"\Seen"`, `"\Deleted"`, or a bare
    /// keyword atom). Unknown `\`-prefixed names are treated as custom
    /// keywords stripped of the backslash, matching how this lineage
    /// degrades unknown system-flag atoms.
    pub fn parse(name: &str) -> Flag {
        match name {
            "\\Seen" => Flag::System(SEEN),
            "\\Answered" => Flag::System(ANSWERED),
            "\\Flagged" => Flag::System(FLAGGED),
            "\\Deleted" => Flag::System(DELETED),
            "\\Draft" => Flag::System(DRAFT),
            "\\Recent" => Flag::System(RECENT),
            other => Flag::Custom(other.trim_start_matches('\\').to_string()),
        }
    }
}

/// The effective, normalized flag set of a message after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFlags {
    pub system: i32,
    pub custom: Vec<String>,
}

impl EffectiveFlags {
    pub fn to_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (bit, name) in [
            (SEEN, "\\Seen"),
            (ANSWERED, "\\Answered"),
            (FLAGGED, "\\Flagged"),
            (DELETED, "\\Deleted"),
            (DRAFT, "\\Draft"),
            (RECENT, "\\Recent"),
        ] {
            if self.system & bit != 0 {
                names.push(name.to_string());
            }
        }
        names.extend(self.custom.iter().cloned());
        names
    }
}

/// Partitions a flag list into (system bits OR'd together, canonical
/// custom-keyword set). Keywords longer than 100 characters are silently
/// dropped (spec.md §4.7, §8 boundary behaviors); cardinality > 50 is left
/// to the database check constraint so the transaction fails loudly.
pub(crate) fn canonical_custom(keywords: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut set: Vec<String> = keywords.into_iter().filter(|k| k.len() <= 100).collect();
    set.sort();
    set.dedup();
    set
}

fn partition(flags: &[Flag]) -> (i32, Vec<String>) {
    let mut system = 0;
    let mut custom = Vec::new();
    for flag in flags {
        match flag {
            Flag::System(bit) => system |= bit,
            Flag::Custom(name) => custom.push(name.clone()),
        }
    }
    (system, canonical_custom(custom))
}

struct Row {
    id: i64,
    system_flags_bitmask: i32,
    custom_keywords: sqlx::types::Json<Vec<String>>,
}

async fn lock_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    mailbox: MailboxId,
    uid: Uid,
) -> Result<Row> {
    let (id, system_flags_bitmask, custom_keywords) =
        sqlx::query_as::<_, (i64, i32, sqlx::types::Json<Vec<String>>)>(
            "SELECT id, system_flags_bitmask, custom_keywords FROM messages
             WHERE mailbox_id = $1 AND uid = $2 AND expunged_at IS NULL FOR UPDATE",
        )
        .bind(mailbox)
        .bind(uid)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(CoreError::NotFound)?;
    Ok(Row { id, system_flags_bitmask, custom_keywords })
}

async fn write_and_reread(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    message_id: i64,
    system: i32,
    custom: Vec<String>,
) -> Result<(EffectiveFlags, ModSeq)> {
    let modseq = mailgram_store::modseq::next(&mut **tx).await?;
    sqlx::query(
        "UPDATE messages SET system_flags_bitmask = $1, custom_keywords = $2,
         updated_modseq = $3, flags_changed_at = now() WHERE id = $4",
    )
    .bind(system)
    .bind(sqlx::types::Json(&custom))
    .bind(modseq)
    .bind(message_id)
    .execute(&mut **tx)
    .await?;

    let (sys, kw): (i32, sqlx::types::Json<Vec<String>>) = sqlx::query_as(
        "SELECT system_flags_bitmask, custom_keywords FROM messages WHERE id = $1",
    )
    .bind(message_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok((EffectiveFlags { system: sys, custom: kw.0 }, modseq))
}

/// `set(mailbox, uid, new_flags)`: replaces both representations wholesale.
pub async fn set(pool: &PgPool, mailbox: MailboxId, uid: Uid, new_flags: &[Flag]) -> Result<(EffectiveFlags, ModSeq)> {
    let (system, custom) = partition(new_flags);
    let mut tx = pool.begin().await?;
    let row = lock_message(&mut tx, mailbox, uid).await?;
    let result = write_and_reread(&mut tx, row.id, system, custom).await?;
    tx.commit().await?;
    Ok(result)
}

/// `add(mailbox, uid, flags)`: system bits OR'd in; custom keywords
/// unioned (sorted, deduped) with the existing set.
pub async fn add(pool: &PgPool, mailbox: MailboxId, uid: Uid, flags: &[Flag]) -> Result<(EffectiveFlags, ModSeq)> {
    let (add_system, add_custom) = partition(flags);
    let mut tx = pool.begin().await?;
    let row = lock_message(&mut tx, mailbox, uid).await?;
    let system = row.system_flags_bitmask | add_system;
    let custom = canonical_custom(row.custom_keywords.0.into_iter().chain(add_custom));
    let result = write_and_reread(&mut tx, row.id, system, custom).await?;
    tx.commit().await?;
    Ok(result)
}

/// `remove(mailbox, uid, flags)`: system bits AND'd with the complement;
/// custom keywords set-differenced.
pub async fn remove(pool: &PgPool, mailbox: MailboxId, uid: Uid, flags: &[Flag]) -> Result<(EffectiveFlags, ModSeq)> {
    let (rm_system, rm_custom) = partition(flags);
    let mut tx = pool.begin().await?;
    let row = lock_message(&mut tx, mailbox, uid).await?;
    let system = row.system_flags_bitmask & !rm_system;
    let custom: Vec<String> = row
        .custom_keywords
        .0
        .into_iter()
        .filter(|k| !rm_custom.contains(k))
        .collect();
    let result = write_and_reread(&mut tx, row.id, system, canonical_custom(custom)).await?;
    tx.commit().await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_system_flags() {
        assert_eq!(Flag::parse("\\Seen"), Flag::System(SEEN));
        assert_eq!(Flag::parse("\\Deleted"), Flag::System(DELETED));
    }

    #[test]
    fn parse_custom_keyword() {
        assert_eq!(Flag::parse("Important"), Flag::Custom("Important".to_string()));
    }

    #[test]
    fn canonical_custom_sorts_dedups_and_drops_overlong() {
        let long = "x".repeat(101);
        let result = canonical_custom(vec!["b".into(), "a".into(), "a".into(), long]);
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn partition_splits_system_and_custom() {
        let flags = vec![Flag::System(SEEN), Flag::Custom("Work".into()), Flag::System(FLAGGED)];
        let (system, custom) = partition(&flags);
        assert_eq!(system, SEEN | FLAGGED);
        assert_eq!(custom, vec!["Work".to_string()]);
    }

    #[test]
    fn effective_flags_to_names_roundtrip() {
        let eff = EffectiveFlags { system: SEEN | DELETED, custom: vec!["Work".into()] };
        let names = eff.to_names();
        assert!(names.contains(&"\\Seen".to_string()));
        assert!(names.contains(&"\\Deleted".to_string()));
        assert!(names.contains(&"Work".to_string()));
    }

    #[test]
    fn add_then_remove_same_flag_is_identity() {
        // Round-trip law from spec.md §8: Add then Remove the same flag
        // yields the original flag set — exercised here on the pure
        // algebra since it needs no database.
        let original = (SEEN, vec!["Work".to_string()]);
        let after_add = (original.0 | FLAGGED, canonical_custom(original.1.clone().into_iter().chain(vec!["Urgent".to_string()])));
        let after_remove = (after_add.0 & !FLAGGED, {
            let rm = vec!["Urgent".to_string()];
            canonical_custom(after_add.1.into_iter().filter(|k| !rm.contains(k)))
        });
        assert_eq!(after_remove, original);
    }
}
