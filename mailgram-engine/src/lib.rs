//! The mailbox state engine — the hard part of this server (spec.md §1).
//!
//! Everything here is a transaction against the pool exposed by
//! `mailgram-store`: upload queue & worker (C5), body fetch path (C6),
//! flag engine (C7), poll engine (C8), search compiler (C9), mutation
//! engine (C10), GC coordinator (C11).

pub mod fetch;
pub mod flags;
pub mod gc;
pub mod mutation;
pub mod poll;
pub mod search;
pub mod upload;

pub use mailgram_store::{AccountId, CoreError, MailboxId, ModSeq, Result, Uid};
