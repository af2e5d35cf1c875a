//! Protocol module - wire format, versions, procedure numbers, status codes.
//!
//! This module implements everything the client knows about the peer's protocol:
//! - 32-bit Big Endian word encoding into fixed-capacity buffers
//! - Service versions and the per-version procedure table
//! - Translation of remote status flags into local errors

mod procedures;
mod status;
mod version;
mod wire_format;

pub use procedures::{Operation, ProcedureTable, CLOCK_VOTE_PROC, DISPLAY_CLOCK_CONFIG_PROC};
pub use status::{status_flags, translate, RemoteError, RemoteErrorKind, TRANSLATION};
pub use version::{ServiceVersion, CONNECT_VERSIONS, PMAPP_PROGRAM, USB_CLIENT_VERSIONS};
pub use wire_format::{RxBuffer, TxBuffer, TRANSACTION_BUFFER_SIZE, WORD_SIZE};
