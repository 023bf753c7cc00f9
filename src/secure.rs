//! Encrypted request/response on top of a [`RequestTransport`].
//!
//! The first request is a cleartext `handshake` whose `sender` carries our
//! public key. The wallet answers with its own public key in `sender` and an
//! encrypted body; from then on every [`RpcRequest`] travels as `encrypted`
//! content under the ECDH-derived secret.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::communicator::RequestTransport;
use crate::crypto::{self, SharedSecret};
use crate::error::ChannelError;
use crate::key_agreement::{KeyAgreement, PublicKey};
use crate::message::{Content, HandshakePayload, Message, RpcRequest, RpcResponse};

type HandshakeFuture = Shared<BoxFuture<'static, Result<serde_json::Value, ChannelError>>>;

/// An encrypted RPC channel to the wallet.
pub struct SecureChannel {
    transport: Arc<dyn RequestTransport>,
    keys: Arc<Mutex<KeyAgreement>>,
    /// The handshake currently on the wire, shared by every concurrent caller.
    in_flight: Mutex<Option<HandshakeFuture>>,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("keys", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Create a channel over `transport` using `keys` for the ECDH identity.
    pub fn new(transport: Arc<dyn RequestTransport>, keys: KeyAgreement) -> Self {
        Self {
            transport,
            keys: Arc::new(Mutex::new(keys)),
            in_flight: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KeyAgreement> {
        lock_keys(&self.keys)
    }

    /// Whether a shared secret has been established.
    pub fn is_established(&self) -> Result<bool, ChannelError> {
        Ok(self.lock().get_shared_secret()?.is_some())
    }

    /// Exchange public keys with the wallet and return the handshake result.
    ///
    /// Only one handshake is ever on the wire. A caller arriving while one is
    /// in flight waits for it and receives the same result, whatever
    /// `method` it asked for.
    pub async fn handshake(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        let handshake = {
            let mut in_flight = self.in_flight.lock().expect("handshake lock poisoned");
            match in_flight.as_ref() {
                Some(existing) => {
                    log::debug!("Joining handshake already in flight");
                    existing.clone()
                }
                None => {
                    let message = Message::new(Content::Handshake(HandshakePayload {
                        method: method.to_string(),
                        params,
                    }));
                    let started =
                        exchange_keys(Arc::clone(&self.transport), Arc::clone(&self.keys), message)
                            .boxed()
                            .shared();
                    *in_flight = Some(started.clone());
                    started
                }
            }
        };

        let result = handshake.clone().await;

        let mut in_flight = self.in_flight.lock().expect("handshake lock poisoned");
        if in_flight
            .as_ref()
            .is_some_and(|current| Shared::ptr_eq(current, &handshake))
        {
            *in_flight = None;
        }
        result
    }

    /// Send an encrypted request and return the decrypted result.
    pub async fn request(&self, request: &RpcRequest) -> Result<serde_json::Value, ChannelError> {
        let (secret, own_key) = {
            let mut keys = self.lock();
            let secret = keys.get_shared_secret()?.ok_or_else(|| {
                ChannelError::Internal("no shared secret, handshake first".to_string())
            })?;
            (secret, keys.get_own_public_key()?.to_hex()?)
        };

        let encrypted = crypto::encrypt_content(request, &secret)?;
        let message = Message::new(Content::Encrypted(encrypted)).with_sender(own_key);

        let response = self
            .transport
            .post_request_and_wait_for_response(message)
            .await?
            .into_result()?;
        decrypt_with(&secret, &response)?.into_value()
    }

    /// Forget all key material and disconnect the transport.
    pub fn reset(&self) -> Result<(), ChannelError> {
        self.lock().clear()?;
        self.transport.disconnect();
        Ok(())
    }
}

fn lock_keys(keys: &Mutex<KeyAgreement>) -> MutexGuard<'_, KeyAgreement> {
    keys.lock().expect("key agreement lock poisoned")
}

async fn exchange_keys(
    transport: Arc<dyn RequestTransport>,
    keys: Arc<Mutex<KeyAgreement>>,
    message: Message,
) -> Result<serde_json::Value, ChannelError> {
    let own_key = lock_keys(&keys).get_own_public_key()?.to_hex()?;
    let response = transport
        .post_request_and_wait_for_response(message.with_sender(own_key))
        .await?
        .into_result()?;

    let peer_key = response
        .sender
        .as_deref()
        .ok_or_else(|| ChannelError::Protocol("handshake response has no sender".to_string()))
        .and_then(PublicKey::from_hex)?;
    let secret = {
        let mut keys = lock_keys(&keys);
        keys.set_peer_public_key(peer_key)?;
        keys.get_shared_secret()?
    }
    .ok_or_else(|| ChannelError::Internal("no shared secret after handshake".to_string()))?;
    log::debug!("Secure channel established");

    decrypt_with(&secret, &response)?.into_value()
}

fn decrypt_with(secret: &SharedSecret, response: &Message) -> Result<RpcResponse, ChannelError> {
    match &response.content {
        Content::Encrypted(data) => crypto::decrypt_content(data, secret),
        other => Err(ChannelError::Protocol(format!(
            "expected encrypted response, got {}",
            other.kind()
        ))),
    }
}
