//! In-process peer and regulators for tests and bring-up.
//!
//! [`MockTransport`] plays the remote power-management service: it accepts
//! registrations and connections for configurable versions, records every
//! call with its decoded argument words, and answers with a per-procedure
//! status word. [`MockRegulators`] hands out regulators that count their
//! enable/disable calls and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BufMut, Bytes};

use crate::error::{PmappError, Result};
use crate::handler::{
    same_handler, AcceptedReply, CallbackId, InboundCall, NotificationDispatcher,
    NotificationHandler,
};
use crate::protocol::{ServiceVersion, CONNECT_VERSIONS, USB_CLIENT_VERSIONS};
use crate::regulator::{Regulator, RegulatorProvider};
use crate::transport::{
    BoxFuture, ClientHandle, ClientIdentity, Endpoint, Transport, REPLY_ENVELOPE_LEN,
    REQUEST_ENVELOPE_LEN,
};

/// One call as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub procedure: u32,
    pub args: Vec<u32>,
}

#[derive(Default)]
struct PeerState {
    registrable: Vec<ServiceVersion>,
    connectable: Vec<ServiceVersion>,
    register_attempts: Vec<ServiceVersion>,
    connect_attempts: Vec<ServiceVersion>,
    registered: Option<(ClientHandle, ServiceVersion)>,
    connected: Option<ServiceVersion>,
    unregistered: Vec<ClientHandle>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    callbacks: HashMap<ClientHandle, Vec<(CallbackId, Arc<dyn NotificationHandler>)>>,
    calls: Vec<RecordedCall>,
    statuses: HashMap<u32, u32>,
    failing: HashSet<u32>,
    hanging: HashSet<u32>,
    next_handle: u32,
    next_callback_id: u32,
    next_xid: u32,
}

/// Scriptable stand-in for the transport and the remote service.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<PeerState>>,
}

fn lock(state: &Mutex<PeerState>) -> MutexGuard<'_, PeerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// A peer that accepts every known version and answers status 0.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PeerState {
                registrable: USB_CLIENT_VERSIONS.to_vec(),
                connectable: CONNECT_VERSIONS.to_vec(),
                next_handle: 1,
                next_callback_id: 1,
                next_xid: 1,
                ..PeerState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        lock(&self.state)
    }

    /// Only these versions will accept client registration.
    pub fn accept_registration(&self, versions: &[ServiceVersion]) {
        self.state().registrable = versions.to_vec();
    }

    /// Only these versions will accept connections.
    pub fn accept_connections(&self, versions: &[ServiceVersion]) {
        self.state().connectable = versions.to_vec();
    }

    /// Reply to `procedure` with `status` instead of 0.
    pub fn set_status(&self, procedure: u32, status: u32) {
        self.state().statuses.insert(procedure, status);
    }

    /// Make exchanges of `procedure` fail at the transport level.
    pub fn fail_procedure(&self, procedure: u32) {
        self.state().failing.insert(procedure);
    }

    /// Undo [`fail_procedure`](Self::fail_procedure) and [`hang_procedure`](Self::hang_procedure).
    pub fn recover_procedure(&self, procedure: u32) {
        let mut state = self.state();
        state.failing.remove(&procedure);
        state.hanging.remove(&procedure);
    }

    /// Never reply to `procedure`.
    pub fn hang_procedure(&self, procedure: u32) {
        self.state().hanging.insert(procedure);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, procedure: u32) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.procedure == procedure)
            .cloned()
            .collect()
    }

    pub fn register_attempts(&self) -> Vec<ServiceVersion> {
        self.state().register_attempts.clone()
    }

    pub fn connect_attempts(&self) -> Vec<ServiceVersion> {
        self.state().connect_attempts.clone()
    }

    pub fn registered_version(&self) -> Option<ServiceVersion> {
        self.state().registered.map(|(_, v)| v)
    }

    pub fn connected_version(&self) -> Option<ServiceVersion> {
        self.state().connected
    }

    pub fn unregistered(&self) -> Vec<ClientHandle> {
        self.state().unregistered.clone()
    }

    /// Next callback ID the peer issues. IDs count up from there.
    pub fn set_next_callback_id(&self, id: u32) {
        self.state().next_callback_id = id;
    }

    /// Number of handlers bound for `handle`.
    pub fn bound_callbacks(&self, handle: ClientHandle) -> usize {
        self.state().callbacks.get(&handle).map_or(0, Vec::len)
    }

    /// Deliver an inbound call to the registered client, as the peer would.
    ///
    /// Returns `None` when no client is registered.
    pub fn notify(&self, procedure: u32, args: &[u32]) -> Option<AcceptedReply> {
        let (dispatcher, xid) = {
            let mut state = self.state();
            let xid = state.next_xid;
            state.next_xid += 1;
            (state.dispatcher.clone()?, xid)
        };

        let mut payload = Vec::with_capacity(args.len() * 4);
        for &word in args {
            payload.put_u32(word);
        }

        Some(dispatcher.dispatch(&InboundCall {
            xid,
            procedure,
            args: Bytes::from(payload),
        }))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn register_client<'a>(
        &'a self,
        identity: &'a ClientIdentity,
        version: ServiceVersion,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> BoxFuture<'a, Result<ClientHandle>> {
        Box::pin(async move {
            let mut state = self.state();
            state.register_attempts.push(version);
            if !state.registrable.contains(&version) {
                return Err(PmappError::TransportUnavailable(format!(
                    "{} version {} not served",
                    identity.name, version
                )));
            }
            let handle = ClientHandle::new(state.next_handle);
            state.next_handle += 1;
            state.registered = Some((handle, version));
            state.dispatcher = Some(dispatcher);
            Ok(handle)
        })
    }

    fn unregister_client(&self, handle: ClientHandle) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state.unregistered.push(handle);
            state.callbacks.remove(&handle);
            if state.registered.map(|(h, _)| h) == Some(handle) {
                state.registered = None;
                state.dispatcher = None;
            }
        })
    }

    fn connect_compatible(
        &self,
        program: u32,
        version: ServiceVersion,
    ) -> BoxFuture<'_, Result<Arc<dyn Endpoint>>> {
        Box::pin(async move {
            let mut state = self.state();
            state.connect_attempts.push(version);
            if !state.connectable.contains(&version) {
                return Err(PmappError::TransportUnavailable(format!(
                    "program {:#x} version {} not served",
                    program, version
                )));
            }
            state.connected = Some(version);
            let endpoint: Arc<dyn Endpoint> = Arc::new(MockEndpoint {
                state: self.state.clone(),
            });
            Ok(endpoint)
        })
    }

    fn add_callback(
        &self,
        handle: ClientHandle,
        handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<CallbackId> {
        let Some(handler) = handler else {
            return Ok(CallbackId::NONE);
        };

        let mut state = self.state();
        if state.unregistered.contains(&handle) {
            return Err(PmappError::TransportUnavailable(format!(
                "client handle {} is not registered",
                handle.raw()
            )));
        }

        let id = CallbackId::from_wire(state.next_callback_id);
        state.next_callback_id = state.next_callback_id.wrapping_add(1);
        state.callbacks.entry(handle).or_default().push((id, handler));
        Ok(id)
    }

    fn remove_callback(&self, handle: ClientHandle, handler: &Arc<dyn NotificationHandler>) {
        if let Some(bound) = self.state().callbacks.get_mut(&handle) {
            bound.retain(|(_, h)| !same_handler(h, handler));
        }
    }

    fn get_callback(
        &self,
        handle: ClientHandle,
        id: CallbackId,
    ) -> Option<Arc<dyn NotificationHandler>> {
        self.state()
            .callbacks
            .get(&handle)?
            .iter()
            .find(|(bound, _)| *bound == id)
            .map(|(_, h)| h.clone())
    }
}

struct MockEndpoint {
    state: Arc<Mutex<PeerState>>,
}

enum Outcome {
    Reply(u32),
    Fail,
    Hang,
}

impl Endpoint for MockEndpoint {
    fn call_reply<'a>(
        &'a self,
        procedure: u32,
        request: &'a mut [u8],
        response: &'a mut [u8],
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if request.len() < REQUEST_ENVELOPE_LEN {
                return Err(PmappError::TransportFailure {
                    procedure,
                    reason: "request shorter than envelope".to_string(),
                });
            }

            let outcome = {
                let mut state = lock(&self.state);
                let xid = state.next_xid;
                state.next_xid += 1;

                // Fill the envelope: xid first, procedure in the sixth word.
                request[0..4].copy_from_slice(&xid.to_be_bytes());
                request[20..24].copy_from_slice(&procedure.to_be_bytes());

                let mut body = &request[REQUEST_ENVELOPE_LEN..];
                let mut args = Vec::new();
                while body.remaining() >= 4 {
                    args.push(body.get_u32());
                }
                state.calls.push(RecordedCall { procedure, args });

                if state.hanging.contains(&procedure) {
                    Outcome::Hang
                } else if state.failing.contains(&procedure) {
                    Outcome::Fail
                } else {
                    Outcome::Reply(state.statuses.get(&procedure).copied().unwrap_or(0))
                }
            };

            match outcome {
                Outcome::Hang => std::future::pending().await,
                Outcome::Fail => Err(PmappError::TransportFailure {
                    procedure,
                    reason: "peer dropped the call".to_string(),
                }),
                Outcome::Reply(status) => {
                    let len = REPLY_ENVELOPE_LEN + 4;
                    if response.len() < len {
                        return Err(PmappError::TransportFailure {
                            procedure,
                            reason: "response buffer too small".to_string(),
                        });
                    }
                    response[..REPLY_ENVELOPE_LEN].fill(0);
                    response[REPLY_ENVELOPE_LEN..len].copy_from_slice(&status.to_be_bytes());
                    Ok(len)
                }
            }
        })
    }
}

/// Regulator that records what was asked of it.
pub struct MockRegulator {
    name: String,
    enabled: AtomicBool,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl MockRegulator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            fail_disable: AtomicBool::new(false),
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disable(&self, fail: bool) {
        self.fail_disable.store(fail, Ordering::SeqCst);
    }

    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl Regulator for MockRegulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn enable(&self) -> Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(PmappError::Regulator {
                name: self.name.clone(),
                reason: "enable failed".to_string(),
            });
        }
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(PmappError::Regulator {
                name: self.name.clone(),
                reason: "disable failed".to_string(),
            });
        }
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider handing out [`MockRegulator`]s by name.
pub struct MockRegulators {
    regulators: Mutex<HashMap<String, Arc<MockRegulator>>>,
    released: Mutex<Vec<String>>,
}

impl MockRegulators {
    /// Provider with the default `boost` and `usb` regulators.
    pub fn new() -> Self {
        Self::with_names(&["boost", "usb"])
    }

    pub fn with_names(names: &[&str]) -> Self {
        let regulators = names
            .iter()
            .map(|&n| (n.to_string(), Arc::new(MockRegulator::new(n))))
            .collect();
        Self {
            regulators: Mutex::new(regulators),
            released: Mutex::new(Vec::new()),
        }
    }

    /// The regulator called `name`. Panics if there is none.
    pub fn get(&self, name: &str) -> Arc<MockRegulator> {
        self.regulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no mock regulator named {name}"))
    }

    /// Make `name` unavailable to [`acquire`](RegulatorProvider::acquire).
    pub fn remove(&self, name: &str) {
        self.regulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Names released so far, in order.
    pub fn released(&self) -> Vec<String> {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockRegulators {
    fn default() -> Self {
        Self::new()
    }
}

impl RegulatorProvider for MockRegulators {
    fn acquire(&self, name: &str) -> Result<Arc<dyn Regulator>> {
        let regulators = self.regulators.lock().unwrap_or_else(PoisonError::into_inner);
        match regulators.get(name) {
            Some(regulator) => {
                let regulator: Arc<dyn Regulator> = regulator.clone();
                Ok(regulator)
            }
            None => Err(PmappError::Regulator {
                name: name.to_string(),
                reason: "not found".to_string(),
            }),
        }
    }

    fn release(&self, regulator: Arc<dyn Regulator>) {
        self.released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(regulator.name().to_string());
    }
}
