//! Publish/subscribe dispatch of [`Event`]s.
//!
//! Every dispatch runs three stages in a fixed order:
//!
//! 1. pending waits for the event kind are tested and the matching ones are
//!    resolved and removed, inline;
//! 2. the built-in handler for the kind, if any, is awaited;
//! 3. a snapshot of the registered listeners is taken and each one is spawned
//!    as its own task.
//!
//! Listener tasks are detached, so a slow or panicking listener never holds up
//! the receive loop. Order between listeners is unspecified.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(Event) -> BoxFuture + Send + Sync>;

/// Predicate deciding whether an event satisfies a wait.
///
/// Predicates run while the bus registry is locked and must not call back
/// into the bus.
pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A persistent asynchronous event handler.
///
/// Identity is assigned at construction: clones of a `Listener` are the same
/// listener, two calls to [`Listener::new`] never are. Handlers must return a
/// future; a plain callback is rejected by the compiler:
///
/// ```compile_fail
/// use chatline_sdk::bus::Listener;
/// let listener = Listener::new(|_event| {});
/// ```
#[derive(Clone)]
pub struct Listener {
    id: u64,
    handler: Handler,
}

impl Listener {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: next_id(),
            handler: Arc::new(move |event| -> BoxFuture { Box::pin(handler(event)) }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
enum Subscriber {
    /// User listener, spawned per dispatch.
    Task(Listener),
    /// Internal collector fed inline so arrival order is preserved.
    Sink(mpsc::UnboundedSender<Event>),
}

struct PendingWait {
    id: u64,
    predicate: Predicate,
    slot: oneshot::Sender<Event>,
}

#[derive(Default)]
struct Registry {
    waiters: HashMap<EventKind, Vec<PendingWait>>,
    subscribers: HashMap<EventKind, HashMap<u64, Subscriber>>,
    builtins: HashMap<EventKind, Handler>,
    closed: bool,
}

/// Routes events to pending waits, built-in handlers and listeners.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to everything subscribed to its kind.
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();

        let (builtin, subscribers) = {
            let mut reg = self.registry();

            if let Some(waiters) = reg.waiters.get_mut(&kind) {
                let mut kept = Vec::with_capacity(waiters.len());
                for wait in waiters.drain(..) {
                    if wait.slot.is_closed() {
                        continue;
                    }
                    if (wait.predicate)(&event) {
                        let _ = wait.slot.send(event.clone());
                    } else {
                        kept.push(wait);
                    }
                }
                *waiters = kept;
            }

            let subscribers: Vec<Subscriber> = reg
                .subscribers
                .get(&kind)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default();
            (reg.builtins.get(&kind).cloned(), subscribers)
        };

        if let Some(builtin) = builtin {
            builtin(event.clone()).await;
        }

        for subscriber in subscribers {
            match subscriber {
                Subscriber::Task(listener) => {
                    tokio::spawn((listener.handler)(event.clone()));
                }
                Subscriber::Sink(tx) => {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }

    /// Register a listener. Returns `false` if it was already registered for
    /// `kind`, in which case nothing changes.
    pub fn register_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut reg = self.registry();
        let subs = reg.subscribers.entry(kind).or_default();
        if subs.contains_key(&listener.id) {
            return false;
        }
        subs.insert(listener.id, Subscriber::Task(listener.clone()));
        true
    }

    /// Remove a listener. Returns `false` if it was not registered for `kind`;
    /// removing a non-member is a no-op.
    pub fn remove_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        self.remove_subscriber(kind, listener.id)
    }

    /// Install the protocol handler that runs for every event of `kind`,
    /// replacing any previous one.
    pub(crate) fn set_builtin<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| -> BoxFuture { Box::pin(handler(event)) });
        self.registry().builtins.insert(kind, handler);
    }

    /// Number of waits still pending for `kind`.
    pub fn pending_waits(&self, kind: EventKind) -> usize {
        self.registry().waiters.get(&kind).map_or(0, Vec::len)
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.count_subscribers(kind, |s| matches!(s, Subscriber::Task(_)))
    }

    /// Number of in-flight `accumulate` collectors for `kind`.
    pub(crate) fn collector_count(&self, kind: EventKind) -> usize {
        self.count_subscribers(kind, |s| matches!(s, Subscriber::Sink(_)))
    }

    fn count_subscribers(&self, kind: EventKind, pick: impl Fn(&Subscriber) -> bool) -> usize {
        self.registry()
            .subscribers
            .get(&kind)
            .map_or(0, |subs| subs.values().filter(|s| pick(s)).count())
    }

    pub fn is_closed(&self) -> bool {
        self.registry().closed
    }

    /// Fail every outstanding wait and collector and drop all listeners.
    ///
    /// Waits registered afterwards fail immediately with
    /// [`Error::ConnectionClosed`]. Built-in handlers are kept.
    pub fn close(&self) {
        let mut reg = self.registry();
        reg.closed = true;
        // Dropping the senders wakes the waiting side with a closed channel.
        reg.waiters.clear();
        reg.subscribers.clear();
    }

    pub(crate) fn add_waiter(
        &self,
        kind: EventKind,
        predicate: Predicate,
    ) -> Result<(u64, oneshot::Receiver<Event>)> {
        let mut reg = self.registry();
        if reg.closed {
            return Err(Error::ConnectionClosed);
        }
        let (slot, rx) = oneshot::channel();
        let id = next_id();
        reg.waiters.entry(kind).or_default().push(PendingWait {
            id,
            predicate,
            slot,
        });
        Ok((id, rx))
    }

    pub(crate) fn cancel_waiter(&self, kind: EventKind, id: u64) {
        let mut reg = self.registry();
        if let Some(waiters) = reg.waiters.get_mut(&kind) {
            waiters.retain(|w| w.id != id);
            if waiters.is_empty() {
                reg.waiters.remove(&kind);
            }
        }
    }

    pub(crate) fn add_sink(&self, kind: EventKind) -> Result<(u64, mpsc::UnboundedReceiver<Event>)> {
        let mut reg = self.registry();
        if reg.closed {
            return Err(Error::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = next_id();
        reg.subscribers
            .entry(kind)
            .or_default()
            .insert(id, Subscriber::Sink(tx));
        Ok((id, rx))
    }

    pub(crate) fn remove_subscriber(&self, kind: EventKind, id: u64) -> bool {
        let mut reg = self.registry();
        let Some(subs) = reg.subscribers.get_mut(&kind) else {
            return false;
        };
        let removed = subs.remove(&id).is_some();
        if subs.is_empty() {
            reg.subscribers.remove(&kind);
        }
        removed
    }
}
