//! Client configuration.
//!
//! Defaults match the shipping firmware. Everything can be overridden from
//! JSON; missing fields keep their defaults.
//!
//! # Example
//!
//! ```
//! use pmapp_rpc::config::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "usb_versions": ["1.2", "1.1"], "call_timeout_ms": 2000 }"#).unwrap();
//! assert_eq!(config.usb_versions.len(), 2);
//! assert_eq!(config.client_name, "pmapp_usb");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PmappError, Result};
use crate::protocol::{
    ProcedureTable, ServiceVersion, CONNECT_VERSIONS, PMAPP_PROGRAM, TRANSACTION_BUFFER_SIZE,
    USB_CLIENT_VERSIONS, WORD_SIZE,
};
use crate::transport::REQUEST_ENVELOPE_LEN;

/// Most argument words any operation sends.
const MAX_ARGS: usize = 4;

/// Default call timeout in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Name the USB client registers under.
    pub client_name: String,
    /// Remote program number.
    pub program: u32,
    /// Registration candidates, tried highest first.
    pub usb_versions: Vec<ServiceVersion>,
    /// Connection candidates for the transaction channel, tried highest first.
    pub connect_versions: Vec<ServiceVersion>,
    pub call_timeout_ms: u64,
    /// Capacity of each transaction buffer in bytes.
    pub buffer_size: usize,
    pub boost_regulator: String,
    pub usb_regulator: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "pmapp_usb".to_string(),
            program: PMAPP_PROGRAM,
            usb_versions: USB_CLIENT_VERSIONS.to_vec(),
            connect_versions: CONNECT_VERSIONS.to_vec(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            buffer_size: TRANSACTION_BUFFER_SIZE,
            boost_regulator: "boost".to_string(),
            usb_regulator: "usb".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.usb_versions.is_empty() {
            return Err(invalid("usb_versions must not be empty"));
        }
        if let Some(v) = self
            .usb_versions
            .iter()
            .find(|v| !ProcedureTable::supports(**v))
        {
            return Err(invalid(&format!("no procedure table for usb version {}", v)));
        }
        if self.connect_versions.is_empty() {
            return Err(invalid("connect_versions must not be empty"));
        }
        if self.call_timeout_ms == 0 {
            return Err(invalid("call_timeout_ms must be positive"));
        }
        let min_buffer = REQUEST_ENVELOPE_LEN + MAX_ARGS * WORD_SIZE;
        if self.buffer_size < min_buffer {
            return Err(invalid(&format!(
                "buffer_size {} below minimum {}",
                self.buffer_size, min_buffer
            )));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> PmappError {
    PmappError::InvalidArgument(format!("config: {}", reason))
}
