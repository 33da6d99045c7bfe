//! C1 — Identity store. Resolves a login address to an account and
//! verifies credentials against an Argon2 password hash (spec.md §4.1).
//!
//! Password hashing itself (`argon2`) is a primitive the core consumes,
//! not reimplements; normalization and lookup are the part owned here.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::PgPool;

use crate::{AccountId, CoreError, Result};

/// Trims and lower-cases an address before any lookup, per spec.md §4.1.
/// Empty input fails before reaching the store.
fn normalize(address: &str) -> Result<String> {
    let normalized = address.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(CoreError::InvalidInput("empty address".into()));
    }
    Ok(normalized)
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CoreError::Fatal(anyhow::anyhow!("argon2 hash: {e}")))
}

/// Constant-time comparison against the stored cost-parameterized hash,
/// delegated to `argon2`'s own verifier (which is constant-time).
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| CoreError::Fatal(anyhow::anyhow!("stored hash unparsable: {e}")))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

/// `authenticate(address, password) -> account_id | NotFound | InvalidCredentials`.
///
/// `NotFound` and a wrong password are not distinguished to the caller
/// beyond the shared `AuthenticationFailed` kind — the core never leaks
/// which half of the pair was wrong.
pub async fn authenticate(pool: &PgPool, address: &str, password: &str) -> Result<AccountId> {
    if password.is_empty() {
        return Err(CoreError::InvalidInput("empty password".into()));
    }
    let address = normalize(address)?;

    let row: Option<(AccountId, String)> =
        sqlx::query_as("SELECT account_id, password_hash FROM credentials WHERE address = $1")
            .bind(&address)
            .fetch_optional(pool)
            .await?;

    let (account_id, hash) = row.ok_or(CoreError::AuthenticationFailed)?;
    if verify_password(password, &hash)? {
        Ok(account_id)
    } else {
        Err(CoreError::AuthenticationFailed)
    }
}

/// `resolve_account(address) -> account_id`, used by LMTP RCPT TO without
/// a password (local delivery has already been authorized upstream).
pub async fn resolve_account(pool: &PgPool, address: &str) -> Result<AccountId> {
    let address = normalize(address)?;
    let (account_id,): (AccountId,) =
        sqlx::query_as("SELECT account_id FROM credentials WHERE address = $1")
            .bind(&address)
            .fetch_optional(pool)
            .await?
            .ok_or(CoreError::NotFound)?;
    Ok(account_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize("  Alice@Example.COM ").unwrap(), "alice@example.com");
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(normalize("   ").is_err());
    }

    #[test]
    fn hash_then_verify_roundtrips() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
