//! External browser view transport.
//!
//! Each request is encoded into the query string of the wallet URL (every
//! field JSON-encoded on its own, plus `sdkVersion` and `callbackUrl`) and
//! handed to a [`BrowserView`]. The platform later calls
//! [`NativeCommunicator::handle_response`] with the callback URL the wallet
//! redirected to; the response fields are decoded from its query string the
//! same way.
//!
//! There is no persistent channel: cancelling the view rejects every pending
//! request of this communicator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use super::RequestTransport;
use crate::error::ChannelError;
use crate::message::{Content, Message, PROTOCOL_VERSION};

/// How a browser view session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserViewOutcome {
    /// The view was presented and control returned without a user decision.
    Opened,
    /// The user cancelled the view.
    Cancelled,
    /// The view was dismissed programmatically.
    Dismissed,
}

/// Platform primitive that presents a URL in an external browser view.
#[async_trait]
pub trait BrowserView: Send + Sync {
    /// Present `url`, resolving when the view closes.
    async fn open(&self, url: &Url) -> Result<BrowserViewOutcome, ChannelError>;
    /// Close the view if it is showing.
    fn dismiss(&self);
}

type ResponseSender = oneshot::Sender<Result<Message, ChannelError>>;

/// URL-based request/response transport.
pub struct NativeCommunicator {
    url: Url,
    callback_url: Url,
    view: Arc<dyn BrowserView>,
    handlers: Mutex<HashMap<Uuid, ResponseSender>>,
}

impl std::fmt::Debug for NativeCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCommunicator")
            .field("url", &self.url.as_str())
            .field("callback_url", &self.callback_url.as_str())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl NativeCommunicator {
    /// Create a communicator sending to `url` and expecting responses at `callback_url`.
    pub fn new(url: Url, callback_url: Url, view: Arc<dyn BrowserView>) -> Self {
        Self {
            url,
            callback_url,
            view,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// The wallet URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ResponseSender>> {
        self.handlers.lock().expect("native handlers lock poisoned")
    }

    /// The URL a request is sent as.
    pub fn request_url(&self, request: &Message) -> Result<Url, ChannelError> {
        let fields = match serde_json::to_value(request)? {
            serde_json::Value::Object(fields) => fields,
            _ => return Err(ChannelError::Internal("message is not an object".to_string())),
        };

        let mut url = self.url.clone();
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &fields {
                query.append_pair(key, &value.to_string());
            }
            query.append_pair(
                "sdkVersion",
                &serde_json::Value::from(PROTOCOL_VERSION).to_string(),
            );
            query.append_pair(
                "callbackUrl",
                &serde_json::Value::from(self.callback_url.as_str()).to_string(),
            );
        }
        Ok(url)
    }

    /// Send `request` through the browser view and wait for its response.
    pub async fn post_request_and_wait_for_response(
        &self,
        request: Message,
    ) -> Result<Message, ChannelError> {
        let url = self.request_url(&request)?;

        let mut rx = {
            let mut handlers = self.lock();
            if handlers.contains_key(&request.id) {
                return Err(ChannelError::Internal(format!(
                    "request id {} is already pending",
                    request.id
                )));
            }
            let (tx, rx) = oneshot::channel();
            handlers.insert(request.id, tx);
            rx
        };

        let view = self.view.open(&url);
        tokio::pin!(view);
        let mut view_closed = false;

        loop {
            tokio::select! {
                response = &mut rx => {
                    return response.unwrap_or_else(|_| Err(ChannelError::user_rejected()));
                }
                outcome = &mut view, if !view_closed => {
                    view_closed = true;
                    match outcome {
                        Ok(BrowserViewOutcome::Cancelled) => {
                            log::info!("Browser view cancelled by user");
                            self.cancel_all(&ChannelError::user_rejected());
                        }
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("Browser view failed: {err}");
                            self.cancel_all(&err);
                        }
                    }
                }
            }
        }
    }

    /// Deliver a callback URL. Returns whether it answered one of this
    /// communicator's pending requests.
    pub fn handle_response(&self, response_url: &str) -> Result<bool, ChannelError> {
        let url = Url::parse(response_url)
            .map_err(|e| ChannelError::Protocol(format!("invalid response url: {e}")))?;
        if !self.is_callback(&url) {
            return Ok(false);
        }

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let request_id: Uuid = required_param(&params, "requestId")?;
        let response = Message {
            id: required_param(&params, "id")?,
            request_id: Some(request_id),
            sender: optional_param(&params, "sender")?,
            content: required_param::<Content>(&params, "content")?,
            timestamp: required_param::<DateTime<Utc>>(&params, "timestamp")?,
        };

        let handler = self.lock().remove(&request_id);
        match handler {
            Some(handler) => {
                let _ = handler.send(Ok(response));
                self.view.dismiss();
                Ok(true)
            }
            None => {
                log::debug!("No pending request for native response {request_id}");
                Ok(false)
            }
        }
    }

    /// Drop every pending handler, rejecting each with a user rejection.
    pub fn disconnect(&self) {
        self.view.dismiss();
        self.cancel_all(&ChannelError::user_rejected());
    }

    fn cancel_all(&self, err: &ChannelError) {
        let handlers = std::mem::take(&mut *self.lock());
        for (_, handler) in handlers {
            let _ = handler.send(Err(err.clone()));
        }
    }

    fn is_callback(&self, url: &Url) -> bool {
        let mut bare = url.clone();
        bare.set_query(None);
        bare.set_fragment(None);
        bare.as_str().trim_end_matches('/') == self.callback_url.as_str().trim_end_matches('/')
    }
}

fn optional_param<T: DeserializeOwned>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, ChannelError> {
    match params.get(name) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ChannelError::Protocol(format!("invalid `{name}` parameter: {e}"))),
        None => Ok(None),
    }
}

fn required_param<T: DeserializeOwned>(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<T, ChannelError> {
    optional_param(params, name)?
        .ok_or_else(|| ChannelError::Protocol(format!("missing `{name}` parameter")))
}

#[async_trait]
impl RequestTransport for NativeCommunicator {
    async fn post_request_and_wait_for_response(
        &self,
        request: Message,
    ) -> Result<Message, ChannelError> {
        NativeCommunicator::post_request_and_wait_for_response(self, request).await
    }

    fn disconnect(&self) {
        NativeCommunicator::disconnect(self);
    }
}
