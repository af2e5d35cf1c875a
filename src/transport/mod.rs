//! Transport module - the request/reply substrate this client runs on.
//!
//! The transport itself lives outside this crate. It provides:
//! - Client registration, which also routes inbound notifications to a
//!   [`NotificationDispatcher`]
//! - Version-compatible connections to the peer's program
//! - One blocking call-and-reply exchange per [`Endpoint::call_reply`]
//! - Callback IDs for notification handlers, scoped to a registered client
//!
//! Envelopes (request and reply headers) belong to the transport. This
//! crate only reserves room for them in the transmit buffer and skips
//! them in the receive buffer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::handler::{CallbackId, NotificationDispatcher, NotificationHandler};
use crate::protocol::ServiceVersion;

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default request envelope size (ten 32-bit header words).
pub const REQUEST_ENVELOPE_LEN: usize = 40;

/// Default reply envelope size (six 32-bit header words).
pub const REPLY_ENVELOPE_LEN: usize = 24;

/// Who this client is when it registers with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Service name, e.g. `pmapp_usb`.
    pub name: String,
    /// Remote program number.
    pub program: u32,
}

impl ClientIdentity {
    pub fn new(name: impl Into<String>, program: u32) -> Self {
        Self {
            name: name.into(),
            program,
        }
    }
}

/// Opaque handle for a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(u32);

impl ClientHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// A live connection to the peer.
pub trait Endpoint: Send + Sync {
    /// Send `request` (envelope area first, then arguments) as `procedure`
    /// and wait for the reply, written into `response`.
    ///
    /// Returns the number of reply bytes written, envelope included.
    /// The transport fills the envelope area of `request` itself.
    fn call_reply<'a>(
        &'a self,
        procedure: u32,
        request: &'a mut [u8],
        response: &'a mut [u8],
    ) -> BoxFuture<'a, Result<usize>>;

    /// Bytes reserved at the front of each request.
    fn request_envelope_len(&self) -> usize {
        REQUEST_ENVELOPE_LEN
    }

    /// Bytes to skip at the front of each reply.
    fn reply_envelope_len(&self) -> usize {
        REPLY_ENVELOPE_LEN
    }
}

/// The request/reply transport.
pub trait Transport: Send + Sync {
    /// Register as `identity` speaking `version`. Inbound notifications
    /// for this client are handed to `dispatcher`.
    fn register_client<'a>(
        &'a self,
        identity: &'a ClientIdentity,
        version: ServiceVersion,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> BoxFuture<'a, Result<ClientHandle>>;

    /// Undo [`register_client`](Self::register_client).
    fn unregister_client(&self, handle: ClientHandle) -> BoxFuture<'_, ()>;

    /// Open a connection to `program` compatible with `version`.
    fn connect_compatible(
        &self,
        program: u32,
        version: ServiceVersion,
    ) -> BoxFuture<'_, Result<Arc<dyn Endpoint>>>;

    /// Bind `handler` for `handle` and issue its callback ID.
    ///
    /// `None` must yield [`CallbackId::NONE`] and bind nothing.
    fn add_callback(
        &self,
        handle: ClientHandle,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<CallbackId>;

    /// Drop the binding of `handler` for `handle`, if any.
    fn remove_callback(&self, handle: ClientHandle, handler: &Arc<dyn NotificationHandler>);

    /// Handler bound to `id` for `handle`.
    fn get_callback(
        &self,
        handle: ClientHandle,
        id: CallbackId,
    ) -> Option<Arc<dyn NotificationHandler>>;
}
