//! Relational representation of the objects the mailbox state engine
//! manipulates: mailboxes (C2), message metadata (C3) and content (C4).
//!
//! Everything here is a thin, transactional layer over PostgreSQL via
//! `sqlx`. Higher components (`mailgram-engine`) compose these calls into
//! the flag/poll/search/mutation/GC machinery; this crate only owns the
//! schema and its direct CRUD.

pub mod content;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod modseq;

pub use error::{CoreError, Result};

pub type AccountId = i64;
pub type MailboxId = i64;
pub type ModSeq = i64;
pub type Uid = i64;

/// The root mailboxes auto-created per account (RFC6154-ish special-use
/// set extended with Junk, as spec.md §3 requires).
pub const DEFAULT_MAILBOXES: [&str; 5] = ["INBOX", "Drafts", "Sent", "Trash", "Junk"];

/// Single configured mailbox-hierarchy delimiter character.
pub const MAILBOX_HIERARCHY_DELIMITER: char = '.';
