//! End-to-end scenarios S1–S6 from spec.md §8, exercised against a real
//! PostgreSQL instance. These are `#[ignore]`d by default — set
//! `DATABASE_URL` and run `cargo test -- --ignored` against a disposable
//! database to exercise them; they compile and are written to pass
//! unchanged against the schema in `mailgram-store/migrations`.

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use mailgram_engine::flags::{self, Flag};
use mailgram_engine::mutation::{self, AppendInput};
use mailgram_engine::poll;
use mailgram_store::message::Recipient;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored DB tests");
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    sqlx::migrate!("../mailgram-store/migrations").run(&pool).await.unwrap();
    pool
}

async fn make_account(pool: &PgPool, id: i64) {
    sqlx::query("INSERT INTO accounts (id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

async fn make_mailbox(pool: &PgPool, account: i64, name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO mailboxes (account_id, name, uid_validity, highest_uid, subscribed)
         VALUES ($1, $2, 1, 0, true) RETURNING id",
    )
    .bind(account)
    .bind(name)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

fn append_input(content_hash: &str, message_id: &str, size: i64) -> AppendInput {
    AppendInput {
        content_hash: content_hash.to_string(),
        message_id: message_id.to_string(),
        system_flags_bitmask: 0,
        custom_keywords: vec![],
        internal_date: Utc::now(),
        sent_date: None,
        subject: Some("hello".to_string()),
        in_reply_to: None,
        size,
        body_structure_blob: None,
        recipients: vec![] as Vec<Recipient>,
        raw_headers: "Subject: hello\r\n".to_string(),
        text_body: "hello world".to_string(),
    }
}

/// S1 — dedup across mailboxes: two appends with the same content hash
/// into different mailboxes share one Content row and one pending-upload
/// row, but get distinct Message rows both with UID 1.
#[tokio::test]
#[ignore]
async fn s1_dedup_across_mailboxes() {
    let pool = test_pool().await;
    make_account(&pool, 1001).await;
    let inbox = make_mailbox(&pool, 1001, "INBOX").await;
    let drafts = make_mailbox(&pool, 1001, "Drafts").await;

    let a = mutation::append(&pool, 1001, inbox, "instance-a", append_input("H1", "<m1@x>", 1200))
        .await
        .unwrap();
    let b = mutation::append(&pool, 1001, drafts, "instance-a", append_input("H1", "<m2@x>", 1200))
        .await
        .unwrap();

    assert_eq!(a.uid, 1);
    assert_eq!(b.uid, 1);

    let (content_rows,): (i64,) = sqlx::query_as("SELECT count(*) FROM content WHERE content_hash = 'H1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(content_rows, 1);

    let (pending_rows,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM pending_uploads WHERE content_hash = 'H1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(pending_rows, 1);
}

/// S2/S3 — poll after flag change and after expunge.
#[tokio::test]
#[ignore]
async fn s2_s3_poll_reports_flag_change_then_expunge() {
    let pool = test_pool().await;
    make_account(&pool, 1002).await;
    let inbox = make_mailbox(&pool, 1002, "INBOX").await;

    for i in 0..3 {
        mutation::append(&pool, 1002, inbox, "instance-a", append_input(&format!("H{i}"), &format!("<m{i}@x>"), 100))
            .await
            .unwrap();
    }

    // since_modseq = 0 is a boundary case (spec.md §8): every non-expunged
    // message is reported as an update, not just ones touched after some
    // prior watermark.
    let baseline = poll::poll(&pool, inbox, 0).await.unwrap();
    assert_eq!(baseline.num_messages, 3);
    assert_eq!(baseline.updates.len(), 3);
    assert!(baseline.updates.iter().all(|u| !u.is_expunge));
    let since = baseline.mod_seq;

    flags::add(&pool, inbox, 2, &[Flag::System(flags::SEEN)]).await.unwrap();
    let after_flag = poll::poll(&pool, inbox, since).await.unwrap();
    assert_eq!(after_flag.num_messages, 3);
    assert_eq!(after_flag.updates.len(), 1);
    assert_eq!(after_flag.updates[0].uid, 2);
    assert!(!after_flag.updates[0].is_expunge);

    let after_flag_modseq = after_flag.mod_seq;
    mutation::expunge(&pool, inbox, &[2]).await.unwrap();
    let after_expunge = poll::poll(&pool, inbox, after_flag_modseq).await.unwrap();
    assert_eq!(after_expunge.num_messages, 2);
    assert_eq!(after_expunge.updates.len(), 1);
    assert!(after_expunge.updates[0].is_expunge);

    let settled = poll::poll(&pool, inbox, after_expunge.mod_seq).await.unwrap();
    assert_eq!(settled.num_messages, 2);
    assert!(settled.updates.is_empty());
}

/// S4 — Move assigns sequential UIDs starting after the destination's
/// current highest UID, in source insertion order.
#[tokio::test]
#[ignore]
async fn s4_move_assigns_sequential_uids() {
    let pool = test_pool().await;
    make_account(&pool, 1004).await;
    let src = make_mailbox(&pool, 1004, "Source").await;
    let dst = make_mailbox(&pool, 1004, "Dest").await;

    sqlx::query("UPDATE mailboxes SET highest_uid = 20 WHERE id = $1").bind(dst).execute(&pool).await.unwrap();

    let mut uids = Vec::new();
    for i in 0..3 {
        let appended = mutation::append(&pool, 1004, src, "instance-a", append_input(&format!("H{i}"), &format!("<s{i}@x>"), 10))
            .await
            .unwrap();
        uids.push(appended.uid);
    }

    let mapping = mutation::r#move(&pool, src, &uids, dst).await.unwrap();
    let dest_uids: Vec<i64> = mapping.iter().map(|m| m.dest_uid).collect();
    assert_eq!(dest_uids, vec![21, 22, 23]);

    let (highest,): (i64,) = sqlx::query_as("SELECT highest_uid FROM mailboxes WHERE id = $1")
        .bind(dst)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(highest, 23);
}

/// S5 — Append with a duplicate message-id returns the existing row and
/// leaves `highest_uid` unchanged.
#[tokio::test]
#[ignore]
async fn s5_append_duplicate_message_id_is_idempotent() {
    let pool = test_pool().await;
    make_account(&pool, 1005).await;
    let inbox = make_mailbox(&pool, 1005, "INBOX").await;

    let first = mutation::append(&pool, 1005, inbox, "instance-a", append_input("H1", "<m1@x>", 100))
        .await
        .unwrap();
    let second = mutation::append(&pool, 1005, inbox, "instance-a", append_input("H2", "<m1@x>", 200))
        .await
        .unwrap();

    assert_eq!(first.message_id, second.message_id);
    assert_eq!(first.uid, second.uid);

    let (highest,): (i64,) = sqlx::query_as("SELECT highest_uid FROM mailboxes WHERE id = $1")
        .bind(inbox)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(highest, 1);

    let (h2_rows,): (i64,) = sqlx::query_as("SELECT count(*) FROM content WHERE content_hash = 'H2'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(h2_rows, 0);
}

/// Move(M→M) is rejected before any row is touched.
#[tokio::test]
#[ignore]
async fn move_within_same_mailbox_fails_and_changes_nothing() {
    let pool = test_pool().await;
    make_account(&pool, 1006).await;
    let inbox = make_mailbox(&pool, 1006, "INBOX").await;
    let appended = mutation::append(&pool, 1006, inbox, "instance-a", append_input("H1", "<m1@x>", 100))
        .await
        .unwrap();

    let err = mutation::r#move(&pool, inbox, &[appended.uid], inbox).await.unwrap_err();
    assert!(matches!(err, mailgram_store::CoreError::InvalidInput(_)));

    let (highest,): (i64,) = sqlx::query_as("SELECT highest_uid FROM mailboxes WHERE id = $1")
        .bind(inbox)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(highest, 1);
}
