//! # pmapp-rpc
//!
//! Client for a power-management co-processor reached over a remote
//! procedure call transport.
//!
//! The client negotiates a protocol version, then drives the USB power
//! rail, clock votes and display clock configuration through one shared
//! transaction channel. VBUS session notifications from the peer are
//! routed to registered handlers.
//!
//! ## Architecture
//!
//! ```text
//! PmappClient ─┬─ VersionNegotiator ──► Transport::register_client
//!              ├─ RailSequencer ─┬─► Regulator (boost, usb)
//!              │                 └─► TransactionChannel ──► Endpoint::call_reply
//!              └─ NotificationDispatcher ◄── inbound calls
//! ```
//!
//! The transport and the regulators are supplied by the platform through
//! the [`transport::Transport`] and [`regulator::RegulatorProvider`]
//! traits. [`mock`] has in-process versions of both.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pmapp_rpc::PmappClient;
//!
//! let client = PmappClient::builder(transport, regulators).build()?;
//! client.initialize().await?;
//!
//! client
//!     .register_notification(Some(Arc::new(|online: bool| {
//!         println!("VBUS session {}", if online { "valid" } else { "ended" });
//!     })))
//!     .await?;
//! client.set_usb_rail(true).await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;
pub mod negotiate;
pub mod protocol;
pub mod rail;
pub mod regulator;
pub mod transport;

mod client;

pub use client::{PmappClient, PmappClientBuilder, VOTER_ID_LEN};
pub use config::ClientConfig;
pub use error::{PmappError, Result};
pub use handler::{CallbackId, NotificationHandler};
pub use protocol::{Operation, RemoteErrorKind, ServiceVersion};
pub use rail::RailState;
