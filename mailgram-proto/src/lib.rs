//! C13 — Session facade: the protocol-neutral handle every wire-level
//! front-end (IMAP, POP3, LMTP, ManageSieve) opens per connection, plus
//! the stable error taxonomy (spec.md §7) those front-ends translate into
//! protocol-specific response codes.
//!
//! Wire framing itself — byte-level parsing, response formatting, SASL
//! mechanisms — is out of scope (spec.md §1) and is deliberately not
//! implemented in this crate: it exposes only the contract the protocols
//! consume.

pub use mailgram_store::CoreError;
/// Re-exported so front-ends can write `mailgram_proto::Result<T>`
/// without also depending on `mailgram-store` directly.
pub use mailgram_store::Result;
pub use mailgram_store::{AccountId, MailboxId, ModSeq, Uid};

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

/// An authenticated user as carried by the session, set once on successful
/// `C1::authenticate` and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub account_id: AccountId,
    pub address: String,
}

/// Which wire protocol opened this session. Used only for logging and
/// metrics; the core never branches behavior on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Imap,
    Pop3,
    Lmtp,
    ManageSieve,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
            Protocol::Lmtp => "lmtp",
            Protocol::ManageSieve => "managesieve",
        }
    }
}

/// Protocol-neutral handle carrying session identity, remote address,
/// protocol name, the optional authenticated user, and the logging span
/// every component instruments calls under (spec.md §4.13).
///
/// One `Session` is created per connection by the protocol front-end; its
/// `cancellation` token is a child of the process-wide token and is
/// cancelled when the connection closes or the process shuts down, per
/// spec.md §5.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub remote_addr: SocketAddr,
    pub protocol: Protocol,
    pub user: Option<AuthenticatedUser>,
    pub cancellation: CancellationToken,
    span: Span,
}

impl Session {
    /// Creates a new, unauthenticated session as a child of `parent`, the
    /// process-wide cancellation token spawned at startup (§4.15).
    pub fn new(protocol: Protocol, remote_addr: SocketAddr, parent: &CancellationToken) -> Self {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "session",
            protocol = protocol.as_str(),
            session_id = %session_id,
            remote_addr = %remote_addr,
            account_id = tracing::field::Empty,
        );
        Session {
            session_id,
            remote_addr,
            protocol,
            user: None,
            cancellation: parent.child_token(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Attaches the authenticated user after a successful C1 authenticate
    /// call. Recorded on the session's span so every subsequent log line
    /// in this connection carries the account id.
    pub fn authenticate(&mut self, account_id: AccountId, address: String) {
        self.span.record("account_id", tracing::field::display(account_id));
        self.user = Some(AuthenticatedUser { account_id, address });
    }

    pub fn account_id(&self) -> Result<AccountId> {
        self.user
            .as_ref()
            .map(|u| u.account_id)
            .ok_or(CoreError::AuthenticationFailed)
    }

    /// Cancels every in-flight operation on this session; called by the
    /// front-end when the underlying connection closes.
    pub fn disconnect(&self) {
        self.cancellation.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:143".parse().unwrap()
    }

    #[test]
    fn fresh_session_is_unauthenticated() {
        let parent = CancellationToken::new();
        let session = Session::new(Protocol::Imap, addr(), &parent);
        assert!(!session.is_authenticated());
        assert!(session.account_id().is_err());
    }

    #[test]
    fn authenticate_attaches_user() {
        let parent = CancellationToken::new();
        let mut session = Session::new(Protocol::Lmtp, addr(), &parent);
        session.authenticate(42, "alice@example.com".into());
        assert!(session.is_authenticated());
        assert_eq!(session.account_id().unwrap(), 42);
    }

    #[test]
    fn disconnect_cancels_child_but_not_parent() {
        let parent = CancellationToken::new();
        let session = Session::new(Protocol::Pop3, addr(), &parent);
        session.disconnect();
        assert!(session.cancellation.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
