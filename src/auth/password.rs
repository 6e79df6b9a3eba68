use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Argon2,
};
use tracing::{error, warn};

/// One-way credential hashing.
///
/// `verify` is a plain boolean: a mismatch (or an unparsable stored hash) is
/// `false`, never an error. The hash output embeds its own salt and parameters,
/// so verification needs no side-channel state.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> anyhow::Result<String>;
    fn verify(&self, hash: &str, plain: &str) -> bool;
}

/// Argon2 with default parameters; the salt comes from the OS entropy source,
/// which is the only way `hash` can fail.
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, hash: &str, plain: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "stored password hash is not parsable");
                return false;
            }
        };
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }
}
