//! Invitation tokens.
//!
//! A token is 32 bytes from the OS RNG, URL-safe base64 encoded. Only its
//! SHA-256 (lowercase hex) is stored.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

pub fn generate() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash(token: &str) -> String { hex::encode(Sha256::digest(token.trim().as_bytes())) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tokens_are_unique_and_url_safe() {
    let a = generate();
    let b = generate();
    assert_ne!(a, b);
    assert_eq!(a.len(), 43);
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
  }

  #[test]
  fn hash_is_stable_hex() {
    let h = hash("token");
    assert_eq!(h.len(), 64);
    assert_eq!(h, hash(" token\n"));
    assert_ne!(h, hash("other"));
  }
}
