//! Relay session identity.
//!
//! A session is a random `{id, secret}` pair. The `id` addresses the session
//! on the relay; the `secret` never leaves this machine and keys the
//! [`RelayCipher`](crate::crypto::RelayCipher) for metadata and events. The
//! `key` presented to the relay is derived as
//! `sha256_hex("{id}, {secret} WalletLink")`.
//!
//! # Storage structure
//!
//! ```text
//! -walletlink:session:id       32 hex chars
//! -walletlink:session:secret   64 hex chars
//! -walletlink:session:linked   "1" | "0"
//! ```

use data_encoding::HEXLOWER;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ChannelError;
use crate::storage::ScopedStorage;

/// Storage scope used for relay sessions.
pub const SESSION_SCOPE: &str = "walletlink";

const SESSION_ID: &str = "session:id";
const SESSION_SECRET: &str = "session:secret";
const SESSION_LINKED: &str = "session:linked";

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// A persisted relay session.
#[derive(Clone)]
pub struct RelaySession {
    storage: ScopedStorage,
    id: String,
    secret: String,
    key: String,
    linked: bool,
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("linked", &self.linked)
            .finish_non_exhaustive()
    }
}

impl RelaySession {
    fn from_parts(storage: ScopedStorage, id: String, secret: String, linked: bool) -> Self {
        let key = HEXLOWER.encode(&Sha256::digest(format!("{id}, {secret} WalletLink")));
        Self {
            storage,
            id,
            secret,
            key,
            linked,
        }
    }

    /// Generate a new session and persist it.
    pub fn create(storage: ScopedStorage) -> Result<Self, ChannelError> {
        let session = Self::from_parts(storage, random_hex(16), random_hex(32), false);
        session.save()?;
        log::info!("Created relay session {}", session.id);
        Ok(session)
    }

    /// Load the persisted session, if both id and secret are present.
    pub fn load(storage: ScopedStorage) -> Result<Option<Self>, ChannelError> {
        let id = storage.get_item(SESSION_ID)?;
        let secret = storage.get_item(SESSION_SECRET)?;
        let linked = storage.get_item(SESSION_LINKED)?.as_deref() == Some("1");

        match (id, secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Ok(Some(Self::from_parts(storage, id, secret, linked)))
            }
            _ => Ok(None),
        }
    }

    /// Load the persisted session or create one.
    pub fn load_or_create(storage: ScopedStorage) -> Result<Self, ChannelError> {
        match Self::load(storage.clone())? {
            Some(session) => Ok(session),
            None => Self::create(storage),
        }
    }

    /// Persist id, secret and link state.
    pub fn save(&self) -> Result<(), ChannelError> {
        self.storage.set_item(SESSION_ID, &self.id)?;
        self.storage.set_item(SESSION_SECRET, &self.secret)?;
        self.persist_linked()
    }

    /// Forget the persisted session.
    pub fn clear(&self) -> Result<(), ChannelError> {
        self.storage.clear()
    }

    /// Public session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local secret keying the relay cipher.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Derived key presented to the relay in `HostSession`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a wallet has joined.
    pub fn linked(&self) -> bool {
        self.linked
    }

    /// Update and persist the link state.
    pub fn set_linked(&mut self, linked: bool) -> Result<(), ChannelError> {
        self.linked = linked;
        self.persist_linked()
    }

    fn persist_linked(&self) -> Result<(), ChannelError> {
        self.storage
            .set_item(SESSION_LINKED, if self.linked { "1" } else { "0" })
    }
}
