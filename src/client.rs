//! Client builder and lifecycle.
//!
//! The [`PmappClientBuilder`] collects configuration and builds a
//! [`PmappClient`]. The client is the one process-wide context for the
//! power-management service:
//! 1. `initialize` acquires the regulators and negotiates a version
//! 2. Operations run over the shared [`TransactionChannel`]
//! 3. `teardown` unregisters, powers the rail down and releases everything
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pmapp_rpc::mock::{MockRegulators, MockTransport};
//! use pmapp_rpc::PmappClient;
//!
//! # tokio_test_block(async {
//! let client = PmappClient::builder(Arc::new(MockTransport::new()), Arc::new(MockRegulators::new()))
//!     .call_timeout(std::time::Duration::from_secs(2))
//!     .build()
//!     .unwrap();
//!
//! client.initialize().await.unwrap();
//! client.set_usb_rail(true).await.unwrap();
//! client.set_clock_vote(b"USB0", 3, 1).await.unwrap();
//! client.teardown().await;
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::channel::TransactionChannel;
use crate::config::ClientConfig;
use crate::error::{PmappError, Result};
use crate::handler::{CallbackId, CallbackRegistry, NotificationDispatcher, NotificationHandler};
use crate::negotiate::{Negotiated, VersionNegotiator};
use crate::protocol::{Operation, ServiceVersion};
use crate::rail::{RailSequencer, RailState, SourceSelector};
use crate::regulator::{Regulator, RegulatorProvider};
use crate::transport::{ClientIdentity, Transport};

/// Length of a clock voter id.
pub const VOTER_ID_LEN: usize = 4;

/// Builder for a [`PmappClient`].
pub struct PmappClientBuilder {
    transport: Arc<dyn Transport>,
    regulators: Arc<dyn RegulatorProvider>,
    config: ClientConfig,
}

impl PmappClientBuilder {
    pub fn new(transport: Arc<dyn Transport>, regulators: Arc<dyn RegulatorProvider>) -> Self {
        Self {
            transport,
            regulators,
            config: ClientConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    /// Versions to register the USB client with.
    pub fn usb_versions(mut self, versions: &[ServiceVersion]) -> Self {
        self.config.usb_versions = versions.to_vec();
        self
    }

    /// Versions to connect the transaction channel with.
    pub fn connect_versions(mut self, versions: &[ServiceVersion]) -> Self {
        self.config.connect_versions = versions.to_vec();
        self
    }

    /// Bound on one call-and-reply exchange.
    ///
    /// Default: 5 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Size of each transaction buffer.
    ///
    /// Default: 256
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn regulator_names(mut self, boost: impl Into<String>, usb: impl Into<String>) -> Self {
        self.config.boost_regulator = boost.into();
        self.config.usb_regulator = usb.into();
        self
    }

    /// Validate the configuration and build the client. Nothing is
    /// acquired or contacted until [`PmappClient::initialize`].
    pub fn build(self) -> Result<PmappClient> {
        self.config.validate()?;
        Ok(PmappClient::new(self.transport, self.regulators, self.config))
    }
}

/// State that exists between `initialize` and `teardown`.
struct Session {
    negotiated: Negotiated,
    rail: Arc<RailSequencer>,
    boost: Arc<dyn Regulator>,
    usb: Arc<dyn Regulator>,
}

impl Session {
    fn selector(&self, channel: &Arc<TransactionChannel>) -> SourceSelector {
        SourceSelector::new(
            channel.clone(),
            self.negotiated
                .procedures
                .procedure(Operation::VoteUsbPowerSelectSwitch),
        )
    }
}

/// Power-management client.
pub struct PmappClient {
    config: ClientConfig,
    identity: ClientIdentity,
    transport: Arc<dyn Transport>,
    regulators: Arc<dyn RegulatorProvider>,
    channel: Arc<TransactionChannel>,
    callbacks: Arc<CallbackRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    session: RwLock<Option<Session>>,
}

impl PmappClient {
    pub fn builder(
        transport: Arc<dyn Transport>,
        regulators: Arc<dyn RegulatorProvider>,
    ) -> PmappClientBuilder {
        PmappClientBuilder::new(transport, regulators)
    }

    fn new(
        transport: Arc<dyn Transport>,
        regulators: Arc<dyn RegulatorProvider>,
        config: ClientConfig,
    ) -> Self {
        let channel = Arc::new(TransactionChannel::new(
            transport.clone(),
            config.program,
            &config.connect_versions,
            config.buffer_size,
            config.call_timeout(),
        ));
        let callbacks = Arc::new(CallbackRegistry::new(&transport));
        let dispatcher = Arc::new(NotificationDispatcher::new(callbacks.clone()));

        Self {
            identity: ClientIdentity::new(config.client_name.clone(), config.program),
            config,
            transport,
            regulators,
            channel,
            callbacks,
            dispatcher,
            session: RwLock::new(None),
        }
    }

    /// Acquire the regulators and register with the peer.
    ///
    /// Returns the negotiated version. Calling it again while initialized
    /// does nothing. On failure everything acquired so far is released.
    pub async fn initialize(&self) -> Result<ServiceVersion> {
        let mut session = self.session.write().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.negotiated.version);
        }

        let boost = self.regulators.acquire(&self.config.boost_regulator)?;
        let usb = match self.regulators.acquire(&self.config.usb_regulator) {
            Ok(usb) => usb,
            Err(e) => {
                self.regulators.release(boost);
                return Err(e);
            }
        };

        let negotiator = VersionNegotiator::new(
            self.transport.as_ref(),
            &self.identity,
            &self.config.usb_versions,
        );
        let negotiated = match negotiator.negotiate(self.dispatcher.clone()).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                self.regulators.release(usb);
                self.regulators.release(boost);
                return Err(e);
            }
        };

        self.callbacks.attach(negotiated.handle);
        self.channel.resume();
        *session = Some(Session {
            negotiated,
            rail: Arc::new(RailSequencer::new(boost.clone(), usb.clone())),
            boost,
            usb,
        });

        info!(
            version = %negotiated.version,
            client = %self.identity.name,
            handle = negotiated.handle.raw(),
            "power-management client initialized"
        );
        Ok(negotiated.version)
    }

    /// Shut the client down. Errors along the way are logged, not returned.
    ///
    /// Callers waiting on the channel are woken with
    /// [`PmappError::Interrupted`]. The client can be initialized again
    /// afterwards.
    pub async fn teardown(&self) {
        self.channel.interrupt();
        let mut guard = self.session.write().await;
        // Waiters are gone; the rail-off vote below needs the channel.
        self.channel.resume();

        let Some(session) = guard.take() else {
            debug!("teardown without a session");
            return;
        };

        self.transport
            .unregister_client(session.negotiated.handle)
            .await;

        if let Err(e) = session
            .rail
            .clone()
            .run(session.selector(&self.channel), false)
            .await
        {
            warn!(error = %e, "failed to power down USB rail during teardown");
        }

        self.regulators.release(session.usb);
        self.regulators.release(session.boost);
        self.callbacks.detach();
        self.channel.disconnect().await;

        info!(
            client = %self.identity.name,
            handle = session.negotiated.handle.raw(),
            "power-management client torn down"
        );
    }

    async fn session(&self) -> Result<RwLockReadGuard<'_, Session>> {
        let guard = self.session.read().await;
        RwLockReadGuard::try_map(guard, |s| s.as_ref()).map_err(|_| {
            PmappError::TransportUnavailable(format!(
                "{} is not initialized",
                self.identity.name
            ))
        })
    }

    /// Ask the peer to report VBUS session changes to `handler`.
    ///
    /// `None` registers the "no handler" id, which tells the peer to stop
    /// reporting. Registering a handler twice returns the same id.
    pub async fn register_notification(
        &self,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<CallbackId> {
        let session = self.session().await?;
        let procedure = session
            .negotiated
            .procedures
            .resolve(Operation::RegisterVbusSessionNotify)?;

        let existing = handler.as_ref().and_then(|h| self.callbacks.find(h));
        let id = self.callbacks.register(handler.clone())?;

        if let Err(e) = self
            .channel
            .execute(procedure, &[id.as_wire()], |_| Ok(()))
            .await
        {
            if let (None, Some(handler)) = (existing, &handler) {
                self.callbacks.unregister(handler);
            }
            return Err(e);
        }

        debug!(callback = id.as_wire(), "VBUS notification registered");
        Ok(id)
    }

    /// Forget `handler`. The peer is not contacted; deliveries for the old
    /// id are answered as unavailable.
    pub fn unregister_notification(
        &self,
        handler: &Arc<dyn NotificationHandler>,
    ) -> Option<CallbackId> {
        let id = self.callbacks.unregister(handler);
        if let Some(id) = id {
            debug!(callback = id.as_wire(), "VBUS notification unregistered");
        }
        id
    }

    /// Power the USB rail on or off.
    ///
    /// The sequence runs to completion even if this future is dropped, so
    /// an abandoned enable still rolls back on failure.
    pub async fn set_usb_rail(&self, enable: bool) -> Result<()> {
        let session = self.session().await?;
        session
            .rail
            .clone()
            .run(session.selector(&self.channel), enable)
            .await
    }

    /// Vote for a clock on behalf of `voter_id`, which must be exactly four bytes.
    pub async fn set_clock_vote(
        &self,
        voter_id: impl AsRef<[u8]>,
        clock_id: u32,
        vote: u32,
    ) -> Result<()> {
        let voter = voter_token(voter_id.as_ref())?;
        let session = self.session().await?;
        let procedure = session.negotiated.procedures.resolve(Operation::ClockVote)?;
        self.channel
            .set_only(procedure, &[voter, clock_id, vote])
            .await
    }

    pub async fn set_display_clock(&self, enable: bool) -> Result<()> {
        let session = self.session().await?;
        let procedure = session
            .negotiated
            .procedures
            .resolve(Operation::DisplayClockConfig)?;
        self.channel.set_only(procedure, &[u32::from(enable)]).await
    }

    /// Version adopted by `initialize`, if initialized.
    pub async fn negotiated_version(&self) -> Option<ServiceVersion> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.negotiated.version)
    }

    pub async fn rail_state(&self) -> RailState {
        match self.session.read().await.as_ref() {
            Some(session) => session.rail.state().await,
            None => RailState::Off,
        }
    }

    /// Entry point the transport delivers inbound calls to.
    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        self.dispatcher.clone()
    }

    /// Whether the transaction channel holds a live connection.
    pub async fn is_connected(&self) -> bool {
        self.channel.is_connected().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Pack a four-byte voter id into the word the peer expects.
fn voter_token(voter_id: &[u8]) -> Result<u32> {
    let bytes: [u8; VOTER_ID_LEN] = voter_id.try_into().map_err(|_| {
        PmappError::InvalidArgument(format!(
            "voter id must be {} bytes, got {}",
            VOTER_ID_LEN,
            voter_id.len()
        ))
    })?;
    Ok(u32::from_le_bytes(bytes))
}
