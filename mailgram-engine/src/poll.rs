//! C8 — Poll engine. Answers "what changed in this mailbox since MODSEQ
//! X?" as a single consistent snapshot: current message count, the new
//! MODSEQ watermark, and per-message updates/expunges, correctly ordered
//! (spec.md §4.8).

use sqlx::PgPool;

use mailgram_store::{MailboxId, ModSeq, Result};

#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub uid: i64,
    pub seq: i64,
    pub is_expunge: bool,
    /// `None` for expunge updates — clients don't need a flag snapshot of
    /// a message they're about to drop.
    pub system_flags_bitmask: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PollResult {
    pub num_messages: i64,
    pub mod_seq: ModSeq,
    pub updates: Vec<PollUpdate>,
}

/// Snapshot-isolated read (spec.md §5: "readers never block writers and
/// vice versa"). PostgreSQL's `REPEATABLE READ` gives exactly the
/// single-consistent-view semantics the algorithm needs.
pub async fn poll(pool: &PgPool, mailbox: MailboxId, since_modseq: ModSeq) -> Result<PollResult> {
    let mut tx = pool
        .begin_with("BEGIN ISOLATION LEVEL REPEATABLE READ")
        .await?;

    let (num_messages,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM messages WHERE mailbox_id = $1 AND expunged_at IS NULL")
            .bind(mailbox)
            .fetch_one(&mut *tx)
            .await?;

    let mod_seq = mailgram_store::modseq::current(&mut *tx).await?;

    // Sequence numbers computed over the set of rows that are either still
    // live or were only expunged since `since_modseq` — i.e. the mailbox
    // as it looked just before this poll's changes were applied. This is
    // what lets an expunge notification carry the sequence number the
    // message had right before removal (spec.md §8 S3), rather than the
    // post-snapshot number it no longer has.
    let rows: Vec<(i64, i64, i32, bool)> = sqlx::query_as(
        "WITH relevant AS (
            SELECT id, uid, system_flags_bitmask,
                   created_modseq, updated_modseq, expunged_modseq
            FROM messages
            WHERE mailbox_id = $1
              AND (expunged_at IS NULL OR expunged_modseq > $2)
        ), numbered AS (
            SELECT id, row_number() OVER (ORDER BY id) AS seq
            FROM relevant
        )
        SELECT
            r.uid,
            n.seq,
            r.system_flags_bitmask,
            (r.created_modseq <= $2 AND r.expunged_modseq > $2) AS is_expunge
        FROM relevant r
        JOIN numbered n ON n.id = r.id
        WHERE (r.created_modseq <= $2 AND r.updated_modseq > $2 AND r.expunged_modseq IS NULL)
           OR (r.created_modseq <= $2 AND r.expunged_modseq > $2)
           -- Messages created after the watermark are reported as updates
           -- too: `since_modseq = 0` must report every live message
           -- (spec.md §8 boundary behavior), and any append the caller
           -- hasn't seen yet belongs in the same bucket regardless of
           -- watermark value.
           OR (r.created_modseq > $2 AND r.expunged_modseq IS NULL)",
    )
    .bind(mailbox)
    .bind(since_modseq)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let (mut expunges, mut changes): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|(_, _, _, is_expunge)| *is_expunge);

    // Expunges first, sequence number descending, so clients can apply
    // deletions without renumbering (spec.md §4.8).
    expunges.sort_by(|a, b| b.1.cmp(&a.1));
    // Non-expunge updates after, sequence number ascending.
    changes.sort_by(|a, b| a.1.cmp(&b.1));

    let mut updates = Vec::with_capacity(expunges.len() + changes.len());
    updates.extend(expunges.into_iter().map(|(uid, seq, _, _)| PollUpdate {
        uid,
        seq,
        is_expunge: true,
        system_flags_bitmask: None,
    }));
    updates.extend(changes.into_iter().map(|(uid, seq, flags, _)| PollUpdate {
        uid,
        seq,
        is_expunge: false,
        system_flags_bitmask: Some(flags),
    }));

    Ok(PollResult { num_messages, mod_seq, updates })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ordering law from spec.md §4.8 and §8 (S2/S3): expunges come
    /// first, descending by sequence; non-expunge updates come after,
    /// ascending by sequence. Exercised on the pure reordering step.
    #[test]
    fn ordering_matches_spec() {
        let rows = vec![
            (2_i64, 5_i64, 0_i32, false),
            (5, 2, 0, true),
            (9, 7, 0, false),
            (1, 1, 0, true),
        ];
        let (mut expunges, mut changes): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|(_, _, _, is_expunge)| *is_expunge);
        expunges.sort_by(|a, b| b.1.cmp(&a.1));
        changes.sort_by(|a, b| a.1.cmp(&b.1));

        assert_eq!(expunges.iter().map(|r| r.1).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(changes.iter().map(|r| r.1).collect::<Vec<_>>(), vec![5, 7]);
    }
}
