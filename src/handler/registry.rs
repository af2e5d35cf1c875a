//! Callback registry for dispatching notifications by callback ID.
//!
//! IDs are issued by the transport when a handler is added for the
//! registered client. The ID travels to the peer when the client asks for
//! notifications and comes back in every notification, where it is
//! resolved through the transport again. [`CallbackId::NONE`] (all ones,
//! `-1` as a signed word) means "no callback" and never resolves.
//!
//! The registry keeps a local record of the handlers this client added so
//! re-registration and rollback need no round trip.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::error::{PmappError, Result};
use crate::transport::{ClientHandle, Transport};

/// Receiver of unsolicited notifications.
///
/// Runs on the transport's receive path, so it must return quickly.
pub trait NotificationHandler: Send + Sync + 'static {
    /// VBUS session became valid (`true`) or invalid (`false`).
    fn vbus_session(&self, online: bool);
}

impl<F> NotificationHandler for F
where
    F: Fn(bool) + Send + Sync + 'static,
{
    fn vbus_session(&self, online: bool) {
        self(online)
    }
}

/// Identifier binding a notification to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u32);

impl CallbackId {
    /// "No callback" sentinel.
    pub const NONE: CallbackId = CallbackId(u32::MAX);

    #[inline]
    pub fn as_wire(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_wire(word: u32) -> Self {
        Self(word)
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Whether two handles point at the same handler.
pub(crate) fn same_handler(
    a: &Arc<dyn NotificationHandler>,
    b: &Arc<dyn NotificationHandler>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

struct Binding {
    id: CallbackId,
    handler: Arc<dyn NotificationHandler>,
}

/// Handlers bound through the transport for one registered client.
pub struct CallbackRegistry {
    // Weak: the transport holds the dispatcher, which holds this registry.
    transport: Weak<dyn Transport>,
    handle: Mutex<Option<ClientHandle>>,
    bindings: Mutex<Vec<Binding>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CallbackRegistry {
    /// Create an empty registry backed by `transport`.
    pub fn new(transport: &Arc<dyn Transport>) -> Self {
        Self {
            transport: Arc::downgrade(transport),
            handle: Mutex::new(None),
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Use `handle`, the registered client, for all further bindings.
    pub fn attach(&self, handle: ClientHandle) {
        *lock(&self.handle) = Some(handle);
    }

    /// Forget the client and every local binding. The transport drops its
    /// side when the client is unregistered.
    pub fn detach(&self) -> Option<ClientHandle> {
        lock(&self.bindings).clear();
        lock(&self.handle).take()
    }

    fn target(&self) -> Option<(Arc<dyn Transport>, ClientHandle)> {
        let handle = (*lock(&self.handle))?;
        Some((self.transport.upgrade()?, handle))
    }

    /// Bind `handler` to a transport-issued ID.
    ///
    /// `None` yields [`CallbackId::NONE`]. Registering the same handler
    /// twice returns the ID it already has.
    pub fn register(&self, handler: Option<Arc<dyn NotificationHandler>>) -> Result<CallbackId> {
        let (transport, handle) = self.target().ok_or_else(|| {
            PmappError::TransportUnavailable("no registered client to bind callbacks to".to_string())
        })?;

        let Some(handler) = handler else {
            return transport.add_callback(handle, None);
        };

        let mut bindings = lock(&self.bindings);
        if let Some(binding) = bindings.iter().find(|b| same_handler(&b.handler, &handler)) {
            return Ok(binding.id);
        }

        let id = transport.add_callback(handle, Some(handler.clone()))?;
        debug!(callback = id.as_wire(), handle = handle.raw(), "callback bound");
        bindings.push(Binding { id, handler });
        Ok(id)
    }

    /// Remove the binding for `handler`, returning its ID.
    pub fn unregister(&self, handler: &Arc<dyn NotificationHandler>) -> Option<CallbackId> {
        let binding = {
            let mut bindings = lock(&self.bindings);
            let index = bindings
                .iter()
                .position(|b| same_handler(&b.handler, handler))?;
            bindings.swap_remove(index)
        };

        if let Some((transport, handle)) = self.target() {
            transport.remove_callback(handle, &binding.handler);
        }
        Some(binding.id)
    }

    /// ID currently bound to `handler`.
    pub fn find(&self, handler: &Arc<dyn NotificationHandler>) -> Option<CallbackId> {
        lock(&self.bindings)
            .iter()
            .find(|b| same_handler(&b.handler, handler))
            .map(|b| b.id)
    }

    /// Handler the transport has bound to `id`. The sentinel never resolves.
    pub fn get(&self, id: CallbackId) -> Option<Arc<dyn NotificationHandler>> {
        if id.is_none() {
            return None;
        }
        let (transport, handle) = self.target()?;
        transport.get_callback(handle, id)
    }

    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
