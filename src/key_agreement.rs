//! P-256 ECDH key agreement for the encrypted popup/native channel.
//!
//! [`KeyAgreement`] owns this installation's key pair and the peer's public
//! key, and memoizes the derived [`SharedSecret`]. Keys are persisted (hex
//! PKCS#8 / SPKI DER) through a [`ScopedStorage`] so a fresh instance over the
//! same storage recovers the same identity.
//!
//! Only public keys ever leave this module in serialized form. The shared
//! secret is the raw ECDH x-coordinate, used directly as the AES-256-GCM key.

use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p256::SecretKey;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};

use crate::crypto::SharedSecret;
use crate::error::ChannelError;
use crate::storage::ScopedStorage;

/// Storage module under which key material is persisted.
pub const STORAGE_MODULE: &str = "KeyAgreement";

const OWN_PRIVATE_KEY: &str = "ownPrivateKey";
const OWN_PUBLIC_KEY: &str = "ownPublicKey";
const PEER_PUBLIC_KEY: &str = "peerPublicKey";

/// A P-256 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Hex-encoded SPKI DER, the form exchanged in handshake messages.
    pub fn to_hex(&self) -> Result<String, ChannelError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| ChannelError::Internal(format!("failed to export public key: {e}")))?;
        Ok(HEXLOWER.encode(der.as_bytes()))
    }

    /// Parse a hex-encoded SPKI DER public key.
    pub fn from_hex(hex: &str) -> Result<Self, ChannelError> {
        let der = HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|e| ChannelError::Protocol(format!("invalid public key encoding: {e}")))?;
        let key = p256::PublicKey::from_public_key_der(&der)
            .map_err(|e| ChannelError::Protocol(format!("invalid public key: {e}")))?;
        Ok(Self(key))
    }
}

/// Derive the shared secret between `own` and `peer`.
fn derive_shared_secret(own: &SecretKey, peer: &PublicKey) -> SharedSecret {
    let shared = p256::ecdh::diffie_hellman(own.to_nonzero_scalar(), peer.0.as_affine());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
    SharedSecret::from_bytes(bytes)
}

/// Owner of the local key pair, the peer key, and the derived secret.
pub struct KeyAgreement {
    storage: ScopedStorage,
    own_private_key: Option<SecretKey>,
    own_public_key: Option<PublicKey>,
    peer_public_key: Option<PublicKey>,
    shared_secret: Option<SharedSecret>,
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("has_own_key", &self.own_private_key.is_some())
            .field("has_peer_key", &self.peer_public_key.is_some())
            .field("has_shared_secret", &self.shared_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl KeyAgreement {
    /// Create a key agreement backed by `storage`. Nothing is loaded until first use.
    #[must_use]
    pub fn new(storage: ScopedStorage) -> Self {
        Self {
            storage,
            own_private_key: None,
            own_public_key: None,
            peer_public_key: None,
            shared_secret: None,
        }
    }

    /// This installation's public key, generating and persisting a key pair on first call.
    pub fn get_own_public_key(&mut self) -> Result<PublicKey, ChannelError> {
        self.load_keys_if_needed()?;
        self.own_public_key
            .clone()
            .ok_or_else(|| ChannelError::Internal("own public key missing after load".to_string()))
    }

    /// The derived secret, or `None` until a peer key has been set.
    pub fn get_shared_secret(&mut self) -> Result<Option<SharedSecret>, ChannelError> {
        self.load_keys_if_needed()?;
        Ok(self.shared_secret.clone())
    }

    /// Store the peer's public key and invalidate the cached secret.
    pub fn set_peer_public_key(&mut self, key: PublicKey) -> Result<(), ChannelError> {
        self.shared_secret = None;
        self.storage.set_item(PEER_PUBLIC_KEY, &key.to_hex()?)?;
        self.peer_public_key = Some(key);
        self.load_keys_if_needed()
    }

    /// Drop the peer key and cached secret, and replace the own key pair.
    pub fn clear(&mut self) -> Result<(), ChannelError> {
        self.own_private_key = None;
        self.own_public_key = None;
        self.peer_public_key = None;
        self.shared_secret = None;

        self.storage.remove_item(OWN_PUBLIC_KEY)?;
        self.storage.remove_item(OWN_PRIVATE_KEY)?;
        self.storage.remove_item(PEER_PUBLIC_KEY)?;

        self.generate_key_pair()
    }

    fn generate_key_pair(&mut self) -> Result<(), ChannelError> {
        let private_key = SecretKey::random(&mut OsRng);
        let public_key = PublicKey(private_key.public_key());

        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| ChannelError::Internal(format!("failed to export private key: {e}")))?;
        self.storage
            .set_item(OWN_PRIVATE_KEY, &HEXLOWER.encode(private_der.as_bytes()))?;
        self.storage.set_item(OWN_PUBLIC_KEY, &public_key.to_hex()?)?;

        log::debug!("Generated new ECDH key pair");
        self.own_private_key = Some(private_key);
        self.own_public_key = Some(public_key);
        Ok(())
    }

    fn load_keys_if_needed(&mut self) -> Result<(), ChannelError> {
        if self.own_private_key.is_none() {
            self.own_private_key = self.load_private_key()?;
        }
        if self.own_public_key.is_none() {
            self.own_public_key = self.load_public_key(OWN_PUBLIC_KEY)?;
        }
        if self.own_private_key.is_none() || self.own_public_key.is_none() {
            self.generate_key_pair()?;
        }

        if self.peer_public_key.is_none() {
            self.peer_public_key = self.load_public_key(PEER_PUBLIC_KEY)?;
        }

        if self.shared_secret.is_none() {
            if let (Some(own), Some(peer)) = (&self.own_private_key, &self.peer_public_key) {
                self.shared_secret = Some(derive_shared_secret(own, peer));
            }
        }
        Ok(())
    }

    fn load_private_key(&self) -> Result<Option<SecretKey>, ChannelError> {
        let Some(hex) = self.storage.get_item(OWN_PRIVATE_KEY)? else {
            return Ok(None);
        };
        let der = HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|e| ChannelError::Storage(format!("stored private key is not hex: {e}")))?;
        let key = SecretKey::from_pkcs8_der(&der)
            .map_err(|e| ChannelError::Storage(format!("stored private key is invalid: {e}")))?;
        Ok(Some(key))
    }

    fn load_public_key(&self, item: &str) -> Result<Option<PublicKey>, ChannelError> {
        match self.storage.get_item(item)? {
            Some(hex) => PublicKey::from_hex(&hex)
                .map(Some)
                .map_err(|e| ChannelError::Storage(format!("stored {item} is invalid: {e}"))),
            None => Ok(None),
        }
    }
}
