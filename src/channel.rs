//! Transaction channel: one request/reply exchange at a time.
//!
//! The channel owns a single pair of transmit/receive buffers and the
//! cached connection to the peer, all behind one async mutex. Every
//! protocol operation in the process goes through [`TransactionChannel::execute`]:
//!
//! 1. Wait for the lock (aborted by [`TransactionChannel::interrupt`])
//! 2. Allocate the buffers on first use
//! 3. Connect if there is no cached connection, highest version first
//! 4. Reserve the request envelope and encode the arguments
//! 5. Call and wait for the reply, bounded by the call timeout
//! 6. Strip the reply envelope and decode the result
//!
//! A failed exchange drops the cached connection so the next call
//! reconnects. So does an exchange whose future is dropped before the
//! reply arrives. The call itself is never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::error::{PmappError, Result};
use crate::protocol::{translate, RxBuffer, ServiceVersion, TxBuffer};
use crate::transport::{Endpoint, Transport};

/// Default bound on one call-and-reply exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

struct Buffers {
    tx: TxBuffer,
    rx: RxBuffer,
}

impl Buffers {
    fn allocate(size: usize) -> Result<Self> {
        let tx = TxBuffer::with_capacity(size)?;
        let rx = RxBuffer::with_capacity(size)?;
        debug!(size, "allocated transaction buffers");
        Ok(Self { tx, rx })
    }
}

#[derive(Default)]
struct ChannelState {
    buffers: Option<Buffers>,
    endpoint: Option<Arc<dyn Endpoint>>,
}

/// Resolves once an interrupt is pending.
async fn interrupted(rx: &mut watch::Receiver<bool>) {
    loop {
        let pending = *rx.borrow_and_update();
        if pending {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone with the channel; nothing can interrupt any more.
            std::future::pending::<()>().await;
        }
    }
}

/// The shared, serialised path to the peer.
pub struct TransactionChannel {
    transport: Arc<dyn Transport>,
    program: u32,
    versions: Vec<ServiceVersion>,
    buffer_size: usize,
    timeout: Duration,
    state: Mutex<ChannelState>,
    interrupt: watch::Sender<bool>,
}

impl TransactionChannel {
    /// Create a channel. Nothing is allocated or connected until first use.
    ///
    /// `versions` are tried highest first whatever order they are given in.
    pub fn new(
        transport: Arc<dyn Transport>,
        program: u32,
        versions: &[ServiceVersion],
        buffer_size: usize,
        timeout: Duration,
    ) -> Self {
        let mut versions = versions.to_vec();
        versions.sort_unstable_by(|a, b| b.cmp(a));
        versions.dedup();

        let (interrupt, _) = watch::channel(false);

        Self {
            transport,
            program,
            versions,
            buffer_size,
            timeout,
            state: Mutex::new(ChannelState::default()),
            interrupt,
        }
    }

    /// Abort current and future lock waits with [`PmappError::Interrupted`]
    /// until [`resume`](Self::resume) is called.
    pub fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }

    pub fn resume(&self) {
        self.interrupt.send_replace(false);
    }

    async fn lock(&self) -> Result<MutexGuard<'_, ChannelState>> {
        let mut interrupt = self.interrupt.subscribe();
        tokio::select! {
            biased;
            _ = interrupted(&mut interrupt) => Err(PmappError::Interrupted),
            guard = self.state.lock() => Ok(guard),
        }
    }

    /// Perform one exchange of `procedure` with `args` and decode the reply.
    pub async fn execute<T, F>(&self, procedure: u32, args: &[u32], decode: F) -> Result<T>
    where
        F: FnOnce(&mut RxBuffer) -> Result<T>,
    {
        let mut guard = self.lock().await?;
        let state = &mut *guard;

        let buffers = match state.buffers.take() {
            Some(buffers) => buffers,
            None => Buffers::allocate(self.buffer_size)?,
        };
        let buffers = state.buffers.insert(buffers);

        // Out of the cache until the exchange completes. A future dropped
        // mid-call must not leave a half-used connection behind.
        let endpoint = match state.endpoint.take() {
            Some(endpoint) => endpoint,
            None => self.connect().await?,
        };

        buffers.tx.reset();
        buffers.rx.reset();
        buffers.tx.reserve_envelope(endpoint.request_envelope_len())?;
        for &word in args {
            buffers.tx.put_u32(word)?;
        }

        let call = endpoint.call_reply(
            procedure,
            buffers.tx.frame_mut(),
            buffers.rx.storage_mut(),
        );
        let failure = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(len)) if len > 0 => {
                buffers.rx.fill(len)?;
                None
            }
            Ok(Ok(_)) => Some("empty reply".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("no reply within {:?}", self.timeout)),
        };

        if let Some(reason) = failure {
            error!(procedure, %reason, "exchange failed, dropping connection");
            return Err(PmappError::TransportFailure { procedure, reason });
        }

        let reply_envelope_len = endpoint.reply_envelope_len();
        state.endpoint = Some(endpoint);
        buffers.rx.strip_envelope(reply_envelope_len)?;
        decode(&mut buffers.rx)
    }

    /// Exchange whose reply is a single status word.
    pub async fn set_only(&self, procedure: u32, args: &[u32]) -> Result<()> {
        let status = self.execute(procedure, args, |rx| rx.get_u32()).await?;
        translate(status)?;
        Ok(())
    }

    async fn connect(&self) -> Result<Arc<dyn Endpoint>> {
        let mut last_error = None;

        for &version in &self.versions {
            match self.transport.connect_compatible(self.program, version).await {
                Ok(endpoint) => {
                    info!(
                        program = self.program,
                        %version,
                        wire_version = version.as_wire(),
                        "connected to power-management service"
                    );
                    return Ok(endpoint);
                }
                Err(e) => {
                    debug!(%version, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(e) => format!("connect to program {:#x} failed: {}", self.program, e),
            None => "no connect versions configured".to_string(),
        };
        error!(%reason, "could not reach power-management service");
        Err(PmappError::TransportUnavailable(reason))
    }

    /// Forget the cached connection.
    pub async fn disconnect(&self) {
        self.state.lock().await.endpoint = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::protocol::{RemoteErrorKind, CONNECT_VERSIONS, PMAPP_PROGRAM};

    fn channel(mock: &MockTransport) -> TransactionChannel {
        TransactionChannel::new(
            Arc::new(mock.clone()),
            PMAPP_PROGRAM,
            &CONNECT_VERSIONS,
            256,
            DEFAULT_CALL_TIMEOUT,
        )
    }

    #[tokio::test]
    async fn test_lazy_connect_and_args() {
        let mock = MockTransport::new();
        let channel = channel(&mock);
        assert!(!channel.is_connected().await);

        channel.set_only(21, &[1]).await.unwrap();
        assert!(channel.is_connected().await);
        assert_eq!(mock.connect_attempts(), vec![ServiceVersion::V3_1]);

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].procedure, 21);
        assert_eq!(calls[0].args, vec![1]);
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_lower_version() {
        let mock = MockTransport::new();
        mock.accept_connections(&[ServiceVersion::V2_1]);
        let channel = channel(&mock);

        channel.set_only(21, &[0]).await.unwrap();
        assert_eq!(
            mock.connect_attempts(),
            vec![ServiceVersion::V3_1, ServiceVersion::V2_1]
        );
        assert_eq!(mock.connected_version(), Some(ServiceVersion::V2_1));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_connection_unset() {
        let mock = MockTransport::new();
        mock.accept_connections(&[]);
        let channel = channel(&mock);

        let err = channel.set_only(21, &[0]).await.unwrap_err();
        assert!(matches!(err, PmappError::TransportUnavailable(_)));
        assert!(!channel.is_connected().await);
        assert!(mock.calls().is_empty());

        mock.accept_connections(&[ServiceVersion::V3_1]);
        channel.set_only(21, &[0]).await.unwrap();
        assert_eq!(mock.connect_attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_exchange_drops_connection() {
        let mock = MockTransport::new();
        let channel = channel(&mock);
        channel.set_only(27, &[1, 2, 3]).await.unwrap();

        mock.fail_procedure(27);
        let err = channel.set_only(27, &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, PmappError::TransportFailure { procedure: 27, .. }));
        assert!(!channel.is_connected().await);

        mock.recover_procedure(27);
        channel.set_only(27, &[1, 2, 3]).await.unwrap();
        assert_eq!(mock.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_status_translated() {
        let mock = MockTransport::new();
        mock.set_status(21, 0x0080);
        let channel = channel(&mock);

        let err = channel.set_only(21, &[1]).await.unwrap_err();
        match err {
            PmappError::Remote(remote) => assert_eq!(remote.kind, RemoteErrorKind::Io),
            other => panic!("unexpected error: {other}"),
        }
        assert!(channel.is_connected().await);
    }

    #[tokio::test]
    async fn test_overflow_is_reported_before_io() {
        let mock = MockTransport::new();
        let channel = TransactionChannel::new(
            Arc::new(mock.clone()),
            PMAPP_PROGRAM,
            &CONNECT_VERSIONS,
            48,
            DEFAULT_CALL_TIMEOUT,
        );

        let err = channel.set_only(27, &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, PmappError::BufferOverflow { .. }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transport_failure() {
        let mock = MockTransport::new();
        let channel = channel(&mock);
        channel.set_only(21, &[1]).await.unwrap();

        mock.hang_procedure(21);
        let err = channel.set_only(21, &[1]).await.unwrap_err();
        match err {
            PmappError::TransportFailure { procedure, reason } => {
                assert_eq!(procedure, 21);
                assert!(reason.contains("no reply"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!channel.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_exchange_drops_connection() {
        let mock = MockTransport::new();
        let channel = channel(&mock);
        channel.set_only(21, &[1]).await.unwrap();
        assert!(channel.is_connected().await);

        mock.hang_procedure(21);
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), channel.set_only(21, &[1])).await;
        assert!(abandoned.is_err());
        assert!(!channel.is_connected().await);

        mock.recover_procedure(21);
        channel.set_only(21, &[0]).await.unwrap();
        assert_eq!(mock.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_interrupt_aborts_lock_wait() {
        let mock = MockTransport::new();
        let channel = Arc::new(channel(&mock));

        let guard = channel.state.lock().await;

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.set_only(21, &[1]).await })
        };
        tokio::task::yield_now().await;

        channel.interrupt();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PmappError::Interrupted)));
        drop(guard);

        assert!(matches!(
            channel.set_only(21, &[1]).await,
            Err(PmappError::Interrupted)
        ));
        channel.resume();
        channel.set_only(21, &[1]).await.unwrap();
        assert_eq!(mock.calls().len(), 1);
    }
}
