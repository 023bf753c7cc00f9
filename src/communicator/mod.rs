//! Request/response transports to the wallet UI.
//!
//! - [`window::WindowCommunicator`]: a popup window reached through a
//!   cross-document messaging primitive, origin-checked.
//! - [`native::NativeCommunicator`]: an external browser view; requests go out
//!   as URL query parameters and responses come back through a callback URL.
//!
//! Both implement [`RequestTransport`], which is all the encrypted layer in
//! [`crate::secure`] needs.

pub mod native;
pub mod registry;
pub mod window;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::Message;

/// A transport that correlates one response with each request.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Send `request` and wait for the message whose `requestId` equals its id.
    async fn post_request_and_wait_for_response(
        &self,
        request: Message,
    ) -> Result<Message, ChannelError>;

    /// Tear down the transport, rejecting every pending request.
    fn disconnect(&self);
}
