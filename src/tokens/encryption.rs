//! AES-256-GCM sealing for stored tokens.
//!
//! Every value is sealed with its own random nonce. The stored form is
//! `base64(nonce || ciphertext)` so a single column holds everything needed to
//! open it again. The process-wide key is supplied at startup as base64.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Decodes a base64 master key and checks it is exactly 32 bytes.
pub fn decode_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Holds the initialized cipher for the lifetime of the token store.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    pub fn from_base64(key_base64: &str) -> Result<Self> {
        Self::new(&decode_key(key_base64)?)
    }

    /// Seals `plaintext` and returns `base64(nonce || ciphertext)`.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        // Never reuse a nonce under the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(sealed))
    }

    /// Opens a value produced by [`TokenCipher::seal`].
    ///
    /// Fails on a wrong key, truncated input or any tampering.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64
            .decode(sealed)
            .context("Failed to decode sealed token")?;

        if bytes.len() <= NONCE_SIZE {
            return Err(anyhow!(
                "Sealed token too short: {} bytes",
                bytes.len()
            ));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted token is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_key() {
        assert!(decode_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(decode_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(decode_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(decode_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_open() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let sealed = cipher.seal("eyJhbGciOi.payload.sig").unwrap();

        assert!(!sealed.contains("payload"));
        assert_eq!(cipher.open(&sealed).unwrap(), "eyJhbGciOi.payload.sig");
    }

    #[test]
    fn test_same_plaintext_seals_differently() {
        let cipher = TokenCipher::new(&[0u8; 32]).unwrap();
        let a = cipher.seal("refresh-token").unwrap();
        let b = cipher.seal("refresh-token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = TokenCipher::new(&[0u8; 32]).unwrap().seal("secret").unwrap();
        let other = TokenCipher::new(&[1u8; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_and_truncated_fail() {
        let cipher = TokenCipher::new(&[0u8; 32]).unwrap();
        let sealed = cipher.seal("secret").unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(cipher.open(&BASE64.encode(&bytes)).is_err());

        assert!(cipher.open(&BASE64.encode([0u8; 8])).is_err());
    }
}
