//! Credential store: Argon2id password hashing.

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

lazy_static! {
    /// Verified against when a login names an unknown email, so that path
    /// costs one hash verification like a wrong password does.
    static ref DUMMY_HASH: Option<String> = hash_password("contactbook-dummy-password").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!("password hashing failed: {e}")
        })?
        .to_string();
    Ok(hash)
}

/// Returns `Ok(false)` on mismatch; a stored hash that does not parse is an error.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!("stored password hash is malformed: {e}")
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Burns one verification and always reports a mismatch.
pub fn verify_dummy(plain: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
    false
}

/// `hash_password` on the blocking pool; argon2 is CPU-bound.
pub async fn hash_password_blocking(plain: &str) -> anyhow::Result<String> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("password hashing task")?
}

/// `verify_password` on the blocking pool.
pub async fn verify_password_blocking(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let (plain, hash) = (plain.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .context("password verification task")?
}

/// `verify_dummy` on the blocking pool.
pub async fn verify_dummy_blocking(plain: &str) {
    let plain = plain.to_owned();
    if let Err(e) = tokio::task::spawn_blocking(move || verify_dummy(&plain)).await {
        error!(error = %e, "dummy verification task failed");
    }
}
