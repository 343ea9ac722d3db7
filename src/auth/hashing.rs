//! Password hashing with Argon2id.

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::rngs::OsRng;

use crate::errors::{Error, Result};

fn password_hasher() -> Result<Argon2<'static>> {
    // Interactive login latency: modest memory and a single pass.
    const MEMORY_COST_KIB: u32 = 768;
    const ITERATIONS: u32 = 1;
    const PARALLELISM: u32 = 1;
    let params = Params::new(MEMORY_COST_KIB, ITERATIONS, PARALLELISM, Some(32))
        .map_err(|e| Error::internal(format!("invalid Argon2 parameters: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash `password` into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    password_hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::internal(format!("failed to hash password: {}", e)))
}

/// Check `password` against a stored PHC string. Malformed hashes never verify.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    match password_hasher() {
        Ok(hasher) => hasher.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
