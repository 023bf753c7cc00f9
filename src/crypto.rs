//! AES-256-GCM primitives for channel payloads and relay metadata.
//!
//! Two wire formats share the same cipher:
//!
//! - **Channel payloads** ([`encrypt`] / [`decrypt`]): a JSON object
//!   `{ "iv": "<base64>", "cipherText": "<base64>" }` where `cipherText`
//!   carries the GCM tag appended to the ciphertext. Keyed with the ECDH
//!   [`SharedSecret`] from [`crate::key_agreement`].
//! - **Relay metadata** ([`RelayCipher`]): a lowercase hex string laid out as
//!   `iv (12 bytes) || tag (16 bytes) || ciphertext`, keyed with the relay
//!   session's 32-byte secret.
//!
//! A fresh random 96-bit IV is drawn for every message.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ChannelError;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
const TAG_SIZE: usize = 16;

/// 256-bit symmetric key. Zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(hex: &str) -> Result<Self, ChannelError> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|e| ChannelError::Authentication(format!("invalid secret encoding: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChannelError::Authentication("secret must be 256 bits".to_string()))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Encrypted channel payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    /// Per-message initialization vector.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext with the GCM tag appended.
    #[serde(with = "base64_bytes")]
    pub cipher_text: Vec<u8>,
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    nonce_bytes
}

/// Encrypt `plaintext` under `secret` with a random IV.
pub fn encrypt(secret: &SharedSecret, plaintext: &[u8]) -> Result<EncryptedData, ChannelError> {
    let iv = random_nonce();
    let cipher_text = secret
        .cipher()
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| ChannelError::Internal(format!("encryption failed: {e}")))?;

    Ok(EncryptedData {
        iv: iv.to_vec(),
        cipher_text,
    })
}

/// Decrypt and authenticate an [`EncryptedData`] payload.
///
/// Fails with [`ChannelError::Authentication`] if the key does not match or
/// the ciphertext was modified.
pub fn decrypt(secret: &SharedSecret, encrypted: &EncryptedData) -> Result<Vec<u8>, ChannelError> {
    if encrypted.iv.len() != NONCE_SIZE {
        return Err(ChannelError::Authentication(format!(
            "iv must be {NONCE_SIZE} bytes, got {}",
            encrypted.iv.len()
        )));
    }

    secret
        .cipher()
        .decrypt(Nonce::from_slice(&encrypted.iv), encrypted.cipher_text.as_ref())
        .map_err(|_| ChannelError::Authentication("decryption failed".to_string()))
}

/// Serialize `content` as JSON and encrypt it.
pub fn encrypt_content<T: Serialize>(
    content: &T,
    secret: &SharedSecret,
) -> Result<EncryptedData, ChannelError> {
    let serialized = serde_json::to_vec(content)?;
    encrypt(secret, &serialized)
}

/// Decrypt a payload and parse it as JSON.
pub fn decrypt_content<T: DeserializeOwned>(
    encrypted: &EncryptedData,
    secret: &SharedSecret,
) -> Result<T, ChannelError> {
    let plaintext = decrypt(secret, encrypted)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Hex-framed cipher for relay session metadata and events.
#[derive(Debug, Clone)]
pub struct RelayCipher {
    key: SharedSecret,
}

impl RelayCipher {
    /// Create a cipher from the session's 64-character hex secret.
    pub fn new(secret_hex: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            key: SharedSecret::from_hex(secret_hex)?,
        })
    }

    /// Encrypt UTF-8 text into `hex(iv || tag || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ChannelError> {
        let iv = random_nonce();
        let sealed = self
            .key
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| ChannelError::Internal(format!("encryption failed: {e}")))?;

        // aes-gcm appends the tag; the relay format puts it before the ciphertext
        let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
        let mut framed = Vec::with_capacity(NONCE_SIZE + sealed.len());
        framed.extend_from_slice(&iv);
        framed.extend_from_slice(tag);
        framed.extend_from_slice(body);

        Ok(HEXLOWER.encode(&framed))
    }

    /// Decrypt `hex(iv || tag || ciphertext)` back into UTF-8 text.
    pub fn decrypt(&self, cipher_hex: &str) -> Result<String, ChannelError> {
        let framed = HEXLOWER_PERMISSIVE
            .decode(cipher_hex.as_bytes())
            .map_err(|e| {
                ChannelError::Authentication(format!("invalid ciphertext encoding: {e}"))
            })?;
        if framed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChannelError::Authentication(
                "ciphertext too short".to_string(),
            ));
        }

        let (iv, rest) = framed.split_at(NONCE_SIZE);
        let (tag, body) = rest.split_at(TAG_SIZE);
        let mut sealed = Vec::with_capacity(rest.len());
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(tag);

        let plaintext = self
            .key
            .cipher()
            .decrypt(Nonce::from_slice(iv), sealed.as_ref())
            .map_err(|_| ChannelError::Authentication("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| ChannelError::Authentication(format!("plaintext is not UTF-8: {e}")))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let secret = SharedSecret::from_bytes([42u8; 32]);
        let plaintext = b"Hello, encrypted world!";

        let encrypted = encrypt(&secret, plaintext).unwrap();
        assert_eq!(encrypted.iv.len(), NONCE_SIZE);

        let decrypted = decrypt(&secret, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let secret = SharedSecret::from_bytes([1u8; 32]);
        let wrong = SharedSecret::from_bytes([2u8; 32]);
        let encrypted = encrypt(&secret, b"secret").unwrap();
        assert!(matches!(
            decrypt(&wrong, &encrypted),
            Err(ChannelError::Authentication(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let secret = SharedSecret::from_bytes([3u8; 32]);
        let mut encrypted = encrypt(&secret, b"do not touch").unwrap();
        encrypted.cipher_text[0] ^= 0x01;
        assert!(matches!(
            decrypt(&secret, &encrypted),
            Err(ChannelError::Authentication(_))
        ));
    }

    #[test]
    fn test_iv_is_fresh_per_message() {
        let secret = SharedSecret::from_bytes([4u8; 32]);
        let a = encrypt(&secret, b"same").unwrap();
        let b = encrypt(&secret, b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher_text, b.cipher_text);
    }

    #[test]
    fn test_bad_iv_length_is_rejected() {
        let secret = SharedSecret::from_bytes([5u8; 32]);
        let mut encrypted = encrypt(&secret, b"x").unwrap();
        encrypted.iv.truncate(4);
        assert!(decrypt(&secret, &encrypted).is_err());
    }

    #[test]
    fn test_content_roundtrip_through_json() {
        let secret = SharedSecret::from_bytes([6u8; 32]);
        let content = serde_json::json!({"action": {"method": "eth_chainId"}, "chainId": 1});

        let encrypted = encrypt_content(&content, &secret).unwrap();
        let wire = serde_json::to_string(&encrypted).unwrap();
        assert!(wire.contains("\"cipherText\""));

        let parsed: EncryptedData = serde_json::from_str(&wire).unwrap();
        let decrypted: serde_json::Value = decrypt_content(&parsed, &secret).unwrap();
        assert_eq!(decrypted, content);
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let secret = SharedSecret::from_bytes([0xAB; 32]);
        let printed = format!("{secret:?}");
        assert!(!printed.contains("171"));
        assert!(!printed.to_lowercase().contains("ab"));
    }

    const RELAY_SECRET: &str = "c356b4ae3e2c4ab0a0d4b6bb2d1c9e4b8a6f2d4e1c3b5a7968f0e2d4c6b8a0f1";

    #[test]
    fn test_relay_cipher_roundtrip() {
        let cipher = RelayCipher::new(RELAY_SECRET).unwrap();
        let encrypted = cipher.encrypt("0x1234567890abcdef").unwrap();
        // iv + tag + 18 bytes of plaintext
        assert_eq!(encrypted.len(), 2 * (NONCE_SIZE + TAG_SIZE + 18));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "0x1234567890abcdef");
    }

    #[test]
    fn test_relay_cipher_rejects_short_secret() {
        assert!(RelayCipher::new("abcd").is_err());
        assert!(RelayCipher::new("zz").is_err());
    }

    #[test]
    fn test_relay_cipher_rejects_wrong_secret_and_garbage() {
        let cipher = RelayCipher::new(RELAY_SECRET).unwrap();
        let other = RelayCipher::new(&"11".repeat(32)).unwrap();
        let encrypted = cipher.encrypt("1").unwrap();

        assert!(other.decrypt(&encrypted).is_err());
        assert!(cipher.decrypt("not-hex").is_err());
        assert!(cipher.decrypt("00ff").is_err());
    }
}
