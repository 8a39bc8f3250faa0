// Cryptographic utilities

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Entropy of a freshly issued setup token.
pub const TOKEN_BYTES: usize = 32;

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compute a safe fingerprint for a secret (hash only; never store the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_hex(input.as_bytes())
}

/// `TOKEN_BYTES` of OS randomness, URL-safe base64 without padding (43 characters).
pub fn generate_url_safe_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate setup token"))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Compare two digests without leaking how many leading bytes matched.
#[allow(deprecated)]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn generated_tokens_are_url_safe_and_long() {
        let a = generate_url_safe_token().expect("token");
        let b = generate_url_safe_token().expect("token");
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn constant_time_eq_matches_only_identical_input() {
        let h = secret_fingerprint("token");
        assert!(constant_time_eq(&h, &secret_fingerprint("token")));
        assert!(!constant_time_eq(&h, &secret_fingerprint("token2")));
        assert!(!constant_time_eq(&h, ""));
    }
}
