//! Password hashing (Argon2id, PHC string format) and temporary password generation.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use rand::{Rng, rngs::OsRng};

const DEFAULT_PASSWORD_LENGTH: usize = 12;
const DEFAULT_PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("password hashing failed: {e}"))
}

/// Verify a plaintext password against a stored PHC hash.
///
/// A malformed stored hash is reported as an error rather than a mismatch.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed = PasswordHash::new(hash).map_err(|e| format!("invalid hash format: {e}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(format!("verify error: {e}")),
    }
}

/// Temporary password handed out by administrators (account creation, resets).
pub fn generate_default_password() -> String {
    let mut rng = rand::thread_rng();
    (0..DEFAULT_PASSWORD_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..DEFAULT_PASSWORD_CHARSET.len());
            DEFAULT_PASSWORD_CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_matches() {
        let hash = hash_password("hunter2-campus").unwrap();
        assert!(verify_password("hunter2-campus", &hash).unwrap());
    }

    #[test]
    fn wrong_password_does_not_match() {
        let hash = hash_password("hunter2-campus").unwrap();
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_returns_error() {
        assert!(verify_password("pw", "not-a-hash").is_err());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_passwords_use_the_charset() {
        let password = generate_default_password();
        assert_eq!(password.len(), DEFAULT_PASSWORD_LENGTH);
        assert!(password.bytes().all(|b| DEFAULT_PASSWORD_CHARSET.contains(&b)));
    }
}
