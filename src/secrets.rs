//! Secret strength validation, generation and log masking.
//!
//! The configuration loader runs every secret it reads through
//! [`validate_strength`] before the process starts serving, so a weak JWT
//! key or database password is a startup failure instead of a silent
//! liability.  Secrets are never written to logs verbatim; use [`mask`] or
//! [`sanitize_log_message`] when a log line has to mention one.

use rand::{
    distr::Alphanumeric,
    seq::{IndexedRandom, SliceRandom},
    Rng,
};
use thiserror::Error;

/// Minimum accepted secret length, in bytes.
pub const SECRET_MIN_LENGTH: usize = 32;

/// Maximum accepted secret length, in bytes.
pub const SECRET_MAX_LENGTH: usize = 128;

/// Replacement text for masked secrets.
pub const MASKED_SECRET: &str = "***REDACTED***";

/// The special characters a database password must draw from.
const PASSWORD_SPECIALS: &[u8] = b"@$!%*?&";

/// What a secret is used for.  Determines which strength rules apply on top
/// of the common length bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Signing key for JWTs: must have high entropy.
    JwtKey,
    /// Database password: must mix character classes.
    DbPassword,
    /// Anything else.
    General,
}

/// A secret failed strength validation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret cannot be empty")]
    Empty,
    #[error("secret too short: minimum length is 32")]
    TooShort,
    #[error("secret too long: maximum length is 128")]
    TooLong,
    #[error("secret has insufficient entropy")]
    LowEntropy,
    #[error("password must mix uppercase, lowercase, digits and special characters")]
    NotComplex,
}

fn unique_chars(secret: &str) -> usize {
    let mut chars: Vec<char> = secret.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    chars.len()
}

/// Validate a secret against the strength rules for its kind.
pub fn validate_strength(secret: &str, kind: SecretKind) -> Result<(), SecretError> {
    if secret.is_empty() {
        return Err(SecretError::Empty);
    }
    if secret.len() < SECRET_MIN_LENGTH {
        return Err(SecretError::TooShort);
    }
    if secret.len() > SECRET_MAX_LENGTH {
        return Err(SecretError::TooLong);
    }

    match kind {
        SecretKind::JwtKey => {
            if unique_chars(secret) < 16 {
                return Err(SecretError::LowEntropy);
            }
        }
        SecretKind::DbPassword => {
            let allowed =
                |c: char| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(&(c as u8));
            let has = |f: fn(char) -> bool| secret.chars().any(f);
            if !secret.chars().all(allowed)
                || !has(|c| c.is_ascii_lowercase())
                || !has(|c| c.is_ascii_uppercase())
                || !has(|c| c.is_ascii_digit())
                || !secret.chars().any(|c| PASSWORD_SPECIALS.contains(&(c as u8)))
            {
                return Err(SecretError::NotComplex);
            }
        }
        SecretKind::General => {
            if unique_chars(secret) < 8 {
                return Err(SecretError::LowEntropy);
            }
        }
    }

    Ok(())
}

/// Generate a cryptographically random secret of the given kind.
///
/// The result always passes [`validate_strength`] for that kind, provided
/// `length` is within the accepted bounds.
pub fn generate(length: usize, kind: SecretKind) -> String {
    match kind {
        SecretKind::DbPassword => generate_complex_password(length.max(12)),
        SecretKind::JwtKey | SecretKind::General => rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect(),
    }
}

/// Generate a password guaranteed to contain one of each required character
/// class, shuffled so the class positions are not predictable.
fn generate_complex_password(length: usize) -> String {
    let mut rng = rand::rng();

    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"0123456789";

    let mut password = vec![
        *LOWER.choose(&mut rng).unwrap(),
        *UPPER.choose(&mut rng).unwrap(),
        *DIGITS.choose(&mut rng).unwrap(),
        *PASSWORD_SPECIALS.choose(&mut rng).unwrap(),
    ];

    let all: Vec<u8> = [LOWER, UPPER, DIGITS, PASSWORD_SPECIALS].concat();
    for _ in password.len()..length {
        password.push(*all.choose(&mut rng).unwrap());
    }
    password.shuffle(&mut rng);

    String::from_utf8(password).unwrap()
}

/// Mask a secret for logging, keeping only the last four characters.
/// Secrets at or below four characters are masked entirely.
pub fn mask(secret: &str) -> String {
    const SHOW_CHARS: usize = 4;

    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= SHOW_CHARS {
        return MASKED_SECRET.to_owned();
    }
    let tail: String = chars[chars.len() - SHOW_CHARS..].iter().collect();
    format!("{MASKED_SECRET}{tail}")
}

/// Replace every occurrence of the given secrets in a log message with its
/// masked form.
pub fn sanitize_log_message(message: &str, secrets_to_mask: &[&str]) -> String {
    let mut sanitized = message.to_owned();
    for secret in secrets_to_mask {
        if !secret.is_empty() && sanitized.contains(secret) {
            sanitized = sanitized.replace(secret, &mask(secret));
        }
    }
    sanitized
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    const STRONG_JWT_KEY: &str = "kJ8mN2pQ4rS6tU9vW1xY3zA5bC7dE0fGhI";

    #[test]
    fn test_length_bounds() {
        assert_eq!(
            validate_strength("", SecretKind::General),
            Err(SecretError::Empty)
        );
        assert_eq!(
            validate_strength("short", SecretKind::General),
            Err(SecretError::TooShort)
        );
        let too_long = "a1b2c3d4".repeat(17);
        assert_eq!(
            validate_strength(&too_long, SecretKind::General),
            Err(SecretError::TooLong)
        );
    }

    #[test]
    fn test_jwt_key_entropy() {
        assert_eq!(validate_strength(STRONG_JWT_KEY, SecretKind::JwtKey), Ok(()));

        // long enough but nowhere near 16 distinct characters
        let repetitive = "abcd".repeat(10);
        assert_eq!(
            validate_strength(&repetitive, SecretKind::JwtKey),
            Err(SecretError::LowEntropy)
        );
    }

    #[test]
    fn test_db_password_complexity() {
        let complex = "aB3$dE6%gH9?jK2&mN5*pQ8!sT1@vW4x";
        assert_eq!(validate_strength(complex, SecretKind::DbPassword), Ok(()));

        // missing special characters
        let plain = "aB3dE6gH9jK2mN5pQ8sT1vW4xY7zA0bC";
        assert_eq!(
            validate_strength(plain, SecretKind::DbPassword),
            Err(SecretError::NotComplex)
        );

        // character outside the allowed alphabet
        let spaced = "aB3$dE6%gH9?jK2&mN5*pQ8!sT1 vW4x";
        assert_eq!(
            validate_strength(spaced, SecretKind::DbPassword),
            Err(SecretError::NotComplex)
        );
    }

    #[test]
    fn test_generated_secrets_validate() {
        for kind in [SecretKind::JwtKey, SecretKind::DbPassword, SecretKind::General] {
            let secret = generate(48, kind);
            assert_eq!(validate_strength(&secret, kind), Ok(()), "{kind:?}");
        }
    }

    #[test]
    fn test_generated_secrets_differ() {
        assert_ne!(
            generate(48, SecretKind::General),
            generate(48, SecretKind::General)
        );
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(""), MASKED_SECRET);
        assert_eq!(mask("abc"), MASKED_SECRET);
        assert_eq!(mask("supersecretvalue"), format!("{MASKED_SECRET}alue"));
    }

    #[test]
    fn test_sanitize_log_message() {
        let message = format!("connecting with key {STRONG_JWT_KEY} to db");
        let sanitized = sanitize_log_message(&message, &[STRONG_JWT_KEY]);
        assert!(!sanitized.contains(STRONG_JWT_KEY));
        assert!(sanitized.contains(MASKED_SECRET));

        // untouched when no secret appears
        assert_eq!(sanitize_log_message("hello", &[STRONG_JWT_KEY]), "hello");
    }
}
