//! C9 — Search compiler. Translates a recursive criteria tree into a
//! single parameterized query joining `messages` to `content`, returning
//! `(uid, sequence_number)` ordered by UID ascending (spec.md §4.9).

use sqlx::{PgPool, QueryBuilder};

use mailgram_store::message::Range;
use mailgram_store::{MailboxId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    From,
    To,
    Cc,
    Bcc,
    ReplyTo,
}

impl RecipientKind {
    fn json_type(&self) -> &'static str {
        match self {
            RecipientKind::From => "from",
            RecipientKind::To => "to",
            RecipientKind::Cc => "cc",
            RecipientKind::Bcc => "bcc",
            RecipientKind::ReplyTo => "reply-to",
        }
    }
}

/// One node of the recursive search tree (spec.md §4.9). `Text` and
/// arbitrary `Header` are intentionally absent — those are explicitly
/// unsupported and must be rejected by the caller before compiling.
#[derive(Debug, Clone)]
pub enum Criteria {
    SeqSet(Vec<Range>),
    UidSet(Vec<Range>),
    Since(chrono::DateTime<chrono::Utc>),
    Before(chrono::DateTime<chrono::Utc>),
    SentSince(chrono::DateTime<chrono::Utc>),
    SentBefore(chrono::DateTime<chrono::Utc>),
    Larger(i64),
    Smaller(i64),
    FlagSet(i32),
    FlagUnset(i32),
    KeywordSet(String),
    KeywordUnset(String),
    Subject(String),
    MessageId(String),
    InReplyTo(String),
    Recipient(RecipientKind, String),
    Body(String),
    Not(Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
    And(Vec<Criteria>),
}

/// Compiles a criteria tree into a `WHERE` fragment appended to `qb`,
/// numbering bind parameters via a counter threaded through the
/// recursion so nested `NOT`/`OR`/`AND` never collide (spec.md §4.9).
fn compile(qb: &mut QueryBuilder<'_, sqlx::Postgres>, node: &Criteria) -> Result<()> {
    match node {
        Criteria::SeqSet(ranges) | Criteria::UidSet(ranges) => {
            let column = match node {
                Criteria::SeqSet(_) => "numbered.seq",
                _ => "numbered.uid",
            };
            if ranges.is_empty() {
                // Empty set never matches (spec.md §8 boundary behavior).
                qb.push("false");
                return Ok(());
            }
            qb.push("(");
            for (i, r) in ranges.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("(");
                qb.push(column);
                qb.push(" >= ");
                qb.push_bind(r.start);
                if let Some(stop) = r.stop {
                    qb.push(" AND ");
                    qb.push(column);
                    qb.push(" <= ");
                    qb.push_bind(stop);
                }
                qb.push(")");
            }
            qb.push(")");
        }
        Criteria::Since(d) => {
            qb.push("numbered.internal_date >= ");
            qb.push_bind(*d);
        }
        Criteria::Before(d) => {
            qb.push("numbered.internal_date <= ");
            qb.push_bind(*d);
        }
        Criteria::SentSince(d) => {
            qb.push("numbered.sent_date >= ");
            qb.push_bind(*d);
        }
        Criteria::SentBefore(d) => {
            qb.push("numbered.sent_date <= ");
            qb.push_bind(*d);
        }
        Criteria::Larger(n) => {
            qb.push("numbered.size > ");
            qb.push_bind(*n);
        }
        Criteria::Smaller(n) => {
            qb.push("numbered.size < ");
            qb.push_bind(*n);
        }
        Criteria::FlagSet(bit) => {
            qb.push("(numbered.system_flags_bitmask & ");
            qb.push_bind(*bit);
            qb.push(") != 0");
        }
        Criteria::FlagUnset(bit) => {
            qb.push("(numbered.system_flags_bitmask & ");
            qb.push_bind(*bit);
            qb.push(") = 0");
        }
        Criteria::KeywordSet(kw) => {
            qb.push("numbered.custom_keywords @> ");
            qb.push_bind(serde_json::json!([kw]));
            qb.push("::jsonb");
        }
        Criteria::KeywordUnset(kw) => {
            qb.push("NOT (numbered.custom_keywords @> ");
            qb.push_bind(serde_json::json!([kw]));
            qb.push("::jsonb)");
        }
        Criteria::Subject(needle) => {
            // Case-insensitive substring; a trigram index (pg_trgm) makes
            // this sargable at scale (spec.md §4.9).
            qb.push("numbered.subject ILIKE ");
            qb.push_bind(format!("%{}%", escape_like(needle)));
        }
        Criteria::MessageId(id) => {
            qb.push("numbered.message_id = ");
            qb.push_bind(strip_angle_brackets(id));
        }
        Criteria::InReplyTo(id) => {
            qb.push("numbered.in_reply_to = ");
            qb.push_bind(strip_angle_brackets(id));
        }
        Criteria::Recipient(kind, email) => {
            qb.push("numbered.recipients @> ");
            qb.push_bind(serde_json::json!([{"type": kind.json_type(), "email": email}]));
            qb.push("::jsonb");
        }
        Criteria::Body(needle) => {
            qb.push("content.text_body_tsv @@ plainto_tsquery('simple', ");
            qb.push_bind(needle.clone());
            qb.push(")");
        }
        Criteria::Not(inner) => {
            qb.push("NOT (");
            compile(qb, inner)?;
            qb.push(")");
        }
        Criteria::Or(left, right) => {
            qb.push("(");
            compile(qb, left)?;
            qb.push(" OR ");
            compile(qb, right)?;
            qb.push(")");
        }
        Criteria::And(peers) => {
            if peers.is_empty() {
                qb.push("true");
                return Ok(());
            }
            qb.push("(");
            for (i, peer) in peers.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                compile(qb, peer)?;
            }
            qb.push(")");
        }
    }
    Ok(())
}

/// Message-ID/In-Reply-To are compared with surrounding `<>` stripped
/// (spec.md §4.9).
fn strip_angle_brackets(s: &str) -> String {
    s.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub async fn search(pool: &PgPool, mailbox: MailboxId, root: &Criteria) -> Result<Vec<(i64, i64)>> {
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "WITH numbered AS (
            SELECT m.id, m.uid, m.internal_date, m.sent_date, m.size,
                   m.system_flags_bitmask, m.custom_keywords, m.subject,
                   m.message_id, m.in_reply_to, m.recipients, m.content_hash,
                   row_number() OVER (ORDER BY m.id) AS seq
            FROM messages m
            WHERE m.mailbox_id = ",
    );
    qb.push_bind(mailbox);
    qb.push(" AND m.expunged_at IS NULL) SELECT numbered.uid, numbered.seq FROM numbered
         LEFT JOIN content ON content.content_hash = numbered.content_hash WHERE ");
    compile(&mut qb, root)?;
    qb.push(" ORDER BY numbered.uid ASC");

    let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(node: &Criteria) -> String {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT 1 WHERE ");
        compile(&mut qb, node).unwrap();
        qb.sql().to_string()
    }

    #[test]
    fn empty_seqset_compiles_to_false() {
        let sql = build(&Criteria::SeqSet(vec![]));
        assert!(sql.contains("false"));
    }

    #[test]
    fn message_id_strips_angle_brackets() {
        assert_eq!(strip_angle_brackets("<abc@x>"), "abc@x");
        assert_eq!(strip_angle_brackets("abc@x"), "abc@x");
    }

    #[test]
    fn and_or_not_compose() {
        let tree = Criteria::And(vec![
            Criteria::FlagSet(1),
            Criteria::Or(
                Box::new(Criteria::Subject("foo".into())),
                Box::new(Criteria::Not(Box::new(Criteria::FlagSet(8)))),
            ),
        ]);
        let sql = build(&tree);
        assert!(sql.contains("ILIKE"));
        assert!(sql.contains("NOT"));
        assert!(sql.contains("OR"));
    }

    #[test]
    fn like_escaping_neutralizes_wildcards() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
    }
}
