//! Concrete implementations of the engine's external-collaborator
//! contracts (`ObjectStore`, `Cache`, `Spool`). The core crates only
//! depend on the traits in `mailgram_engine::fetch`; this module is the
//! seam where the binary picks real backends for them.

pub mod cache;
pub mod object_store;
pub mod spool;
pub mod tls;
