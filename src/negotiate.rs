//! Protocol version negotiation.
//!
//! Registration is attempted once per candidate version, highest first.
//! The first version the transport accepts is adopted along with its
//! procedure table. Nothing else is touched until then.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{PmappError, Result};
use crate::handler::NotificationDispatcher;
use crate::protocol::{ProcedureTable, ServiceVersion};
use crate::transport::{ClientHandle, ClientIdentity, Transport};

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub version: ServiceVersion,
    pub handle: ClientHandle,
    pub procedures: ProcedureTable,
}

pub struct VersionNegotiator<'a> {
    transport: &'a dyn Transport,
    identity: &'a ClientIdentity,
    candidates: Vec<ServiceVersion>,
}

impl<'a> VersionNegotiator<'a> {
    /// `candidates` are sorted highest first and de-duplicated.
    pub fn new(
        transport: &'a dyn Transport,
        identity: &'a ClientIdentity,
        candidates: &[ServiceVersion],
    ) -> Self {
        let mut candidates = candidates.to_vec();
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();
        Self {
            transport,
            identity,
            candidates,
        }
    }

    pub async fn negotiate(&self, dispatcher: Arc<NotificationDispatcher>) -> Result<Negotiated> {
        let mut last_error = None;

        for &version in &self.candidates {
            let Some(procedures) = ProcedureTable::for_version(version) else {
                warn!(%version, "no procedure table for version, skipping");
                continue;
            };

            match self
                .transport
                .register_client(self.identity, version, dispatcher.clone())
                .await
            {
                Ok(handle) => {
                    info!(client = %self.identity.name, %version, "registered with power-management service");
                    return Ok(Negotiated {
                        version,
                        handle,
                        procedures,
                    });
                }
                Err(e) => {
                    debug!(%version, wire_version = version.as_wire(), error = %e, "registration attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let tried: Vec<String> = self.candidates.iter().map(|v| v.to_string()).collect();
        let reason = match last_error {
            Some(e) => format!(
                "{} registration failed for versions [{}]: {}",
                self.identity.name,
                tried.join(", "),
                e
            ),
            None => format!("{}: no usable candidate versions", self.identity.name),
        };
        error!(%reason, "version negotiation failed");
        Err(PmappError::TransportUnavailable(reason))
    }
}
