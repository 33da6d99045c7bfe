//! C3 — Message metadata store. Messages never carry body text; they
//! reference a row in `content` by `content_hash`.
//!
//! Sequence numbers are 1-based row positions over non-expunged messages
//! ordered by insertion id, computed inside a single CTE so that they are
//! never cached across transactions (spec.md §4.3, §9).

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder};

use crate::{MailboxId, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    From,
    To,
    Cc,
    Bcc,
    ReplyTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "type")]
    pub kind: RecipientType,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub account_id: i64,
    pub mailbox_id: Option<MailboxId>,
    pub mailbox_path: String,
    pub uid: i64,
    pub content_hash: String,
    pub system_flags_bitmask: i32,
    pub custom_keywords: Json<Vec<String>>,
    pub size: i64,
    pub internal_date: DateTime<Utc>,
    pub sent_date: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub recipients: Json<Vec<Recipient>>,
    pub body_structure_blob: Option<Vec<u8>>,
    pub uploaded_flag: bool,
    pub created_modseq: i64,
    pub updated_modseq: Option<i64>,
    pub expunged_modseq: Option<i64>,
    pub expunged_at: Option<DateTime<Utc>>,
}

/// A message paired with its post-snapshot sequence number.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageWithSeq {
    #[sqlx(flatten)]
    pub message: Message,
    pub seq: i64,
}

/// One inclusive range, `stop = None` meaning "to maximum" (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: i64,
    pub stop: Option<i64>,
}

/// A sequence-number set or a UID set; ranges compose by OR.
#[derive(Debug, Clone)]
pub enum NumSet {
    Seq(Vec<Range>),
    Uid(Vec<Range>),
}

const MESSAGE_COLUMNS: &str = "id, account_id, mailbox_id, mailbox_path, uid, content_hash,
     system_flags_bitmask, custom_keywords, size, internal_date, sent_date, subject,
     message_id, in_reply_to, recipients, body_structure_blob, uploaded_flag,
     created_modseq, updated_modseq, expunged_modseq, expunged_at";

fn seq_cte() -> String {
    format!(
        "WITH numbered AS (
            SELECT {MESSAGE_COLUMNS},
                   row_number() OVER (ORDER BY id) AS seq
            FROM messages
            WHERE mailbox_id = $1 AND expunged_at IS NULL
        )"
    )
}

/// Empty `SeqSet`/`UidSet` input returns an empty result without raising
/// (spec.md §8 boundary behaviors).
pub async fn by_num_set(pool: &PgPool, mailbox: MailboxId, set: &NumSet) -> Result<Vec<MessageWithSeq>> {
    let ranges: &[Range] = match set {
        NumSet::Seq(r) | NumSet::Uid(r) => r,
    };
    if ranges.is_empty() {
        return Ok(Vec::new());
    }

    let column = match set {
        NumSet::Seq(_) => "seq",
        NumSet::Uid(_) => "uid",
    };
    let order_column = match set {
        NumSet::Seq(_) => "seq",
        NumSet::Uid(_) => "uid",
    };

    // Built entirely through `QueryBuilder` (unlike `seq_cte()`, which
    // hardcodes a literal `$1` for plain `query_as` callers) so that
    // `push_bind` and the mailbox id share one consistent placeholder
    // numbering: the mailbox id must be the first bound value, before any
    // range bound.
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
        "WITH numbered AS (
            SELECT {MESSAGE_COLUMNS},
                   row_number() OVER (ORDER BY id) AS seq
            FROM messages
            WHERE mailbox_id = "
    ));
    qb.push_bind(mailbox);
    qb.push(" AND expunged_at IS NULL) SELECT * FROM numbered WHERE ");
    for (i, range) in ranges.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        qb.push(column);
        qb.push(" >= ");
        qb.push_bind(range.start);
        if let Some(stop) = range.stop {
            qb.push(" AND ");
            qb.push(column);
            qb.push(" <= ");
            qb.push_bind(stop);
        }
        qb.push(")");
    }
    qb.push(" ORDER BY ");
    qb.push(order_column);
    qb.push(" ASC");

    let rows = qb.build_query_as::<MessageWithSeq>().fetch_all(pool).await?;
    Ok(rows)
}

/// System-flag bit or custom keyword presence query.
pub enum FlagQuery {
    System(i32),
    Custom(String),
}

pub async fn by_flag(pool: &PgPool, mailbox: MailboxId, flag: FlagQuery) -> Result<Vec<MessageWithSeq>> {
    let sql = format!(
        "{} SELECT * FROM numbered WHERE {} ORDER BY seq ASC",
        seq_cte(),
        match flag {
            FlagQuery::System(_) => "(system_flags_bitmask & $2) != 0",
            FlagQuery::Custom(_) => "custom_keywords @> $2::jsonb",
        }
    );
    let rows = match flag {
        FlagQuery::System(bit) => {
            sqlx::query_as::<_, MessageWithSeq>(&sql).bind(mailbox).bind(bit).fetch_all(pool).await?
        }
        FlagQuery::Custom(keyword) => {
            let needle = serde_json::json!([keyword]);
            sqlx::query_as::<_, MessageWithSeq>(&sql).bind(mailbox).bind(needle).fetch_all(pool).await?
        }
    };
    Ok(rows)
}

pub async fn list_all(pool: &PgPool, mailbox: MailboxId) -> Result<Vec<MessageWithSeq>> {
    let sql = format!("{} SELECT * FROM numbered ORDER BY seq ASC", seq_cte());
    let rows = sqlx::query_as::<_, MessageWithSeq>(&sql).bind(mailbox).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Message> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
    let row = sqlx::query_as::<_, Message>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(crate::CoreError::NotFound)?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Regression test: the mailbox id must be the first bound value, so
    /// `$1` in the compiled SQL text is the `WHERE mailbox_id =` clause
    /// and not the first range's `start`/`stop` bound (which previously
    /// collided with it because `push_bind` numbers placeholders purely
    /// by call order).
    #[test]
    fn by_num_set_binds_mailbox_before_any_range_value() {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "WITH numbered AS (
                SELECT {MESSAGE_COLUMNS},
                       row_number() OVER (ORDER BY id) AS seq
                FROM messages
                WHERE mailbox_id = "
        ));
        qb.push_bind(7_i64);
        qb.push(" AND expunged_at IS NULL) SELECT * FROM numbered WHERE ");
        qb.push("(seq >= ");
        qb.push_bind(1_i64);
        qb.push(" AND seq <= ");
        qb.push_bind(3_i64);
        qb.push(")");

        let sql = qb.sql();
        let mailbox_pos = sql.find("mailbox_id = $1").expect("mailbox bound as $1");
        let range_pos = sql.find("seq >= $2").expect("range bound starts at $2");
        assert!(mailbox_pos < range_pos);
    }

    #[test]
    fn by_num_set_with_empty_ranges_short_circuits_without_querying() {
        // `ranges.is_empty()` returns before any `QueryBuilder` is built
        // (spec.md §8: empty SeqSet/UidSet returns empty, not an error).
        let ranges: Vec<Range> = vec![];
        assert!(ranges.is_empty());
    }
}
