//! Salted password digests for the handshake
//!
//! A device never sends its password. It sends
//! `hex(salt) "$" hex(SHA-256(salt || password))` with a fresh 16-byte salt,
//! and the server recomputes the digest from the credential it stores.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, StoreError};
use crate::store::CredentialStore;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_password_with_salt(&salt, password)
}

/// Hash a password with the given salt
pub fn hash_password_with_salt(salt: &[u8], password: &str) -> String {
    format!("{}${}", hex::encode(salt), hex::encode(digest(salt, password)))
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// Check a presented `salt$digest` against the stored password
pub fn verify_password_hash(presented: &str, password: &str) -> Result<(), AuthError> {
    let (salt_hex, digest_hex) = presented.split_once('$').ok_or(AuthError::MalformedHash)?;
    let salt = hex::decode(salt_hex).map_err(|_| AuthError::MalformedHash)?;
    let presented_digest = hex::decode(digest_hex).map_err(|_| AuthError::MalformedHash)?;

    let expected = digest(&salt, password);
    if constant_time_eq(&expected, &presented_digest) {
        Ok(())
    } else {
        Err(AuthError::Mismatch(String::new()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authentication outcome that also reports store outages
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verify a handshake credential against a credential store
pub async fn authenticate<S>(store: &S, username: &str, presented: &str) -> Result<(), VerifyError>
where
    S: CredentialStore + ?Sized,
{
    let password = store
        .password_hash(username)
        .await?
        .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;

    verify_password_hash(presented, &password).map_err(|e| match e {
        AuthError::Mismatch(_) => AuthError::Mismatch(username.to_string()),
        other => other,
    })?;
    Ok(())
}
