//! Inbound notification dispatch.
//!
//! The transport hands every call the peer makes to this client to
//! [`NotificationDispatcher::dispatch`] and sends back the returned
//! [`AcceptedReply`]. Every inbound call gets a reply, recognised or not,
//! so the peer's request/reply sequence stays in step.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::{CallbackId, CallbackRegistry};
use crate::protocol::RxBuffer;

/// Inbound procedure: VBUS session valid/invalid.
pub const VBUS_SESSION_VALID_PROC: u32 = 1;

/// Accept status of the reply to an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// Handler ran.
    Success,
    /// Procedure number not recognised.
    ProcedureUnavailable,
    /// Arguments could not be decoded.
    GarbageArgs,
    /// No handler bound to the callback ID.
    HandlerUnavailable,
}

impl AcceptStatus {
    /// Wire value (ONC RPC accept status).
    pub fn as_wire(self) -> u32 {
        match self {
            AcceptStatus::Success => 0,
            AcceptStatus::ProcedureUnavailable => 3,
            AcceptStatus::GarbageArgs => 4,
            AcceptStatus::HandlerUnavailable => 5,
        }
    }
}

/// A call from the peer, envelope already parsed by the transport.
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// Transaction id to echo in the reply.
    pub xid: u32,
    pub procedure: u32,
    /// Argument words, Big Endian.
    pub args: Bytes,
}

/// Reply the transport sends back for an [`InboundCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedReply {
    pub xid: u32,
    pub status: AcceptStatus,
}

/// Routes inbound calls to registered handlers.
pub struct NotificationDispatcher {
    callbacks: Arc<CallbackRegistry>,
}

impl NotificationDispatcher {
    pub fn new(callbacks: Arc<CallbackRegistry>) -> Self {
        Self { callbacks }
    }

    /// Handle one inbound call synchronously.
    pub fn dispatch(&self, call: &InboundCall) -> AcceptedReply {
        let status = match call.procedure {
            VBUS_SESSION_VALID_PROC => self.vbus_session(&call.args),
            other => {
                error!(procedure = other, xid = call.xid, "notification procedure not supported");
                AcceptStatus::ProcedureUnavailable
            }
        };

        AcceptedReply {
            xid: call.xid,
            status,
        }
    }

    fn vbus_session(&self, args: &[u8]) -> AcceptStatus {
        let mut rx = RxBuffer::from_payload(args);
        let (cb_id, vbus) = match (rx.get_u32(), rx.get_u32()) {
            (Ok(cb_id), Ok(vbus)) => (CallbackId::from_wire(cb_id), vbus),
            _ => {
                warn!(len = args.len(), "malformed VBUS notification");
                return AcceptStatus::GarbageArgs;
            }
        };

        match self.callbacks.get(cb_id) {
            Some(handler) => {
                // vbus == 0 means VBUS is present
                let online = vbus == 0;
                debug!(cb_id = cb_id.as_wire(), online, "VBUS session notification");
                handler.vbus_session(online);
                AcceptStatus::Success
            }
            None => {
                warn!(cb_id = cb_id.as_wire(), "no handler for VBUS notification");
                AcceptStatus::HandlerUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::{ClientHandle, Transport};
    use bytes::BufMut;
    use std::sync::Mutex;

    fn args(words: &[u32]) -> Bytes {
        let mut buf = Vec::new();
        for &w in words {
            buf.put_u32(w);
        }
        Bytes::from(buf)
    }

    fn call(procedure: u32, words: &[u32]) -> InboundCall {
        InboundCall {
            xid: 77,
            procedure,
            args: args(words),
        }
    }

    type Recording = (
        Arc<dyn Transport>,
        Arc<CallbackRegistry>,
        CallbackId,
        Arc<Mutex<Vec<bool>>>,
    );

    fn recording() -> Recording {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let registry = Arc::new(CallbackRegistry::new(&transport));
        registry.attach(ClientHandle::new(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = registry
            .register(Some(Arc::new(move |online: bool| {
                sink.lock().unwrap().push(online);
            })))
            .unwrap();
        (transport, registry, id, seen)
    }

    #[test]
    fn test_vbus_present_means_online() {
        let (_transport, registry, id, seen) = recording();
        let dispatcher = NotificationDispatcher::new(registry);

        let reply = dispatcher.dispatch(&call(VBUS_SESSION_VALID_PROC, &[id.as_wire(), 0]));
        assert_eq!(reply, AcceptedReply { xid: 77, status: AcceptStatus::Success });

        dispatcher.dispatch(&call(VBUS_SESSION_VALID_PROC, &[id.as_wire(), 1]));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_unknown_id_is_unavailable() {
        let (_transport, registry, _id, seen) = recording();
        let dispatcher = NotificationDispatcher::new(registry);

        let reply = dispatcher.dispatch(&call(VBUS_SESSION_VALID_PROC, &[42, 0]));
        assert_eq!(reply.status, AcceptStatus::HandlerUnavailable);
        assert_eq!(reply.status.as_wire(), 5);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sentinel_id_is_unavailable() {
        let (_transport, registry, _id, seen) = recording();
        let dispatcher = NotificationDispatcher::new(registry);

        let reply = dispatcher.dispatch(&call(
            VBUS_SESSION_VALID_PROC,
            &[CallbackId::NONE.as_wire(), 0],
        ));
        assert_eq!(reply.status, AcceptStatus::HandlerUnavailable);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_procedure_still_replies() {
        let (_transport, registry, id, seen) = recording();
        let dispatcher = NotificationDispatcher::new(registry);

        let reply = dispatcher.dispatch(&call(9, &[id.as_wire(), 0]));
        assert_eq!(reply.xid, 77);
        assert_eq!(reply.status, AcceptStatus::ProcedureUnavailable);
        assert_eq!(reply.status.as_wire(), 3);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_short_args_are_garbage() {
        let (_transport, registry, id, seen) = recording();
        let dispatcher = NotificationDispatcher::new(registry);

        let reply = dispatcher.dispatch(&call(VBUS_SESSION_VALID_PROC, &[id.as_wire()]));
        assert_eq!(reply.status, AcceptStatus::GarbageArgs);
        assert!(seen.lock().unwrap().is_empty());
    }
}
