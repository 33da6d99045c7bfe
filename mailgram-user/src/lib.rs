//! C1 — Identity store, plus the account-owned entities that never touch
//! mailbox state: the vacation ledger (C12) and Sieve scripts.

pub mod account;
pub mod identity;
pub mod sieve;
pub mod vacation;

pub use mailgram_store::{AccountId, CoreError, Result};
