/// Claim encryption
///
/// ChaCha20-Poly1305 with a random 96-bit nonce prepended to the ciphertext,
/// encoded as URL-safe base64 without padding so the result drops straight
/// into a JWT claim.
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{aead::Aead, aead::KeyInit, ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::{AuthError, AuthResult};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Accept a 32-byte key as 64 hex digits, base64 (URL-safe or standard), or
/// 32 raw bytes.
pub fn parse_key_material(raw: &str) -> Option<[u8; 32]> {
    let trimmed = raw.trim();

    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).ok()?;
        return bytes.as_slice().try_into().ok();
    }

    for engine in [&general_purpose::URL_SAFE_NO_PAD, &general_purpose::STANDARD] {
        if let Ok(bytes) = engine.decode(trimmed) {
            if bytes.len() == 32 {
                return bytes.as_slice().try_into().ok();
            }
        }
    }

    trimmed.as_bytes().try_into().ok()
}

/// Symmetric cipher for token claims
#[derive(Clone)]
pub struct ClaimCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for ClaimCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCipher").finish_non_exhaustive()
    }
}

impl ClaimCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build from configured key material, see [`parse_key_material`]
    pub fn from_key_material(raw: &str) -> AuthResult<Self> {
        parse_key_material(raw).map(Self::new).ok_or_else(|| {
            AuthError::Config(
                "encryption key must be 32 bytes (64 hex digits, base64, or raw)".to_string(),
            )
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> AuthResult<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| AuthError::Unknown("claim encryption failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(payload))
    }

    /// Any failure (encoding, length, authentication, utf-8) is
    /// [`AuthError::DecryptionFailed`]
    pub fn decrypt(&self, encoded: &str) -> AuthResult<String> {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AuthError::DecryptionFailed)?;

        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(AuthError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AuthError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| AuthError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_key_material_formats() {
        let from_hex = parse_key_material(KEY_HEX).unwrap();
        assert_eq!(from_hex[31], 0x1f);

        let b64 = general_purpose::STANDARD.encode(from_hex);
        assert_eq!(parse_key_material(&b64), Some(from_hex));

        let raw = "0123456789abcdef0123456789abcdef";
        assert_eq!(parse_key_material(raw), Some(*b"0123456789abcdef0123456789abcdef"));

        assert!(parse_key_material("too short").is_none());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = ClaimCipher::from_key_material(KEY_HEX).unwrap();

        let first = cipher.encrypt("42").unwrap();
        let second = cipher.encrypt("42").unwrap();

        // Fresh nonce per call
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "42");
        assert_eq!(cipher.decrypt(&second).unwrap(), "42");
    }

    #[test]
    fn test_tampered_ciphertext() {
        let cipher = ClaimCipher::from_key_material(KEY_HEX).unwrap();
        let sealed = cipher.encrypt("42").unwrap();

        let mut bytes = general_purpose::URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(cipher.decrypt(&tampered), Err(AuthError::DecryptionFailed)));
        assert!(matches!(cipher.decrypt("%%%"), Err(AuthError::DecryptionFailed)));
        assert!(matches!(cipher.decrypt("AAAA"), Err(AuthError::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_key() {
        let sealed = ClaimCipher::new([7u8; 32]).encrypt("1").unwrap();
        let other = ClaimCipher::new([8u8; 32]);
        assert!(matches!(other.decrypt(&sealed), Err(AuthError::DecryptionFailed)));
    }

    #[test]
    fn test_bad_key_is_config_error() {
        assert!(matches!(
            ClaimCipher::from_key_material("nope"),
            Err(AuthError::Config(_))
        ));
    }
}
