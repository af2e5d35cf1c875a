//! Handler module - notification registration and dispatch.
//!
//! Provides:
//! - [`CallbackRegistry`] - binds handlers to transport-issued callback IDs
//! - [`NotificationDispatcher`] - decodes inbound calls and invokes handlers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pmapp_rpc::handler::{
//!     AcceptStatus, CallbackRegistry, InboundCall, NotificationDispatcher,
//!     VBUS_SESSION_VALID_PROC,
//! };
//! use pmapp_rpc::mock::MockTransport;
//! use pmapp_rpc::transport::{ClientHandle, Transport};
//!
//! let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
//! let registry = Arc::new(CallbackRegistry::new(&transport));
//! registry.attach(ClientHandle::new(1));
//!
//! let id = registry
//!     .register(Some(Arc::new(|online: bool| {
//!         println!("vbus online: {}", online);
//!     })))
//!     .unwrap();
//!
//! let dispatcher = NotificationDispatcher::new(registry);
//! let mut args = Vec::new();
//! args.extend_from_slice(&id.as_wire().to_be_bytes());
//! args.extend_from_slice(&0u32.to_be_bytes());
//!
//! let reply = dispatcher.dispatch(&InboundCall {
//!     xid: 1,
//!     procedure: VBUS_SESSION_VALID_PROC,
//!     args: args.into(),
//! });
//! assert_eq!(reply.status, AcceptStatus::Success);
//! ```

mod dispatch;
mod registry;

pub use dispatch::{
    AcceptStatus, AcceptedReply, InboundCall, NotificationDispatcher, VBUS_SESSION_VALID_PROC,
};
pub(crate) use registry::same_handler;
pub use registry::{CallbackId, CallbackRegistry, NotificationHandler};
