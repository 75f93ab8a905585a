//! Awaitable views over the event bus.
//!
//! [`EventBus::wait_for`] suspends until one event matches a predicate and
//! [`EventBus::accumulate`] collects a run of events up to a terminator.
//! Both also come in two-phase form ([`EventBus::register_wait`],
//! [`EventBus::subscribe`]) so callers can register interest *before* sending
//! the command whose replies they are after.
//!
//! Registrations are removed when the handle is dropped, so a timed-out or
//! cancelled wait never lingers in the bus.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, timeout_at, Instant};

use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};

/// A pending one-shot wait registered on the bus.
pub struct Wait<'a> {
    bus: &'a EventBus,
    kind: EventKind,
    id: u64,
    rx: oneshot::Receiver<Event>,
}

impl Wait<'_> {
    /// Suspend until the wait is satisfied or `limit` elapses.
    pub async fn wait(mut self, limit: Duration) -> Result<Event> {
        match timeout(limit, &mut self.rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout {
                kind: self.kind,
                timeout: limit,
            }),
        }
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        self.bus.cancel_waiter(self.kind, self.id);
    }
}

/// A transient in-order feed of every event of one kind.
pub struct Subscription<'a> {
    bus: &'a EventBus,
    kind: EventKind,
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription<'_> {
    /// Collect events until `terminal` matches or `limit` elapses.
    ///
    /// Events matching `matches` are kept in arrival order; the terminal event
    /// is appended last. An event satisfying both predicates terminates. Events
    /// matching neither are skipped.
    pub async fn accumulate<M, T>(mut self, matches: M, terminal: T, limit: Duration) -> Result<Vec<Event>>
    where
        M: Fn(&Event) -> bool,
        T: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + limit;
        let mut collected = Vec::new();
        loop {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    if terminal(&event) {
                        collected.push(event);
                        return Ok(collected);
                    }
                    if matches(&event) {
                        collected.push(event);
                    }
                }
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(_) => {
                    tracing::debug!(kind = ?self.kind, collected = collected.len(), "Accumulation timed out");
                    return Err(Error::Timeout {
                        kind: self.kind,
                        timeout: limit,
                    });
                }
            }
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.bus.remove_subscriber(self.kind, self.id);
    }
}

impl EventBus {
    /// Register a pending wait without suspending yet.
    pub fn register_wait<P>(&self, kind: EventKind, predicate: P) -> Result<Wait<'_>>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (id, rx) = self.add_waiter(kind, Box::new(predicate))?;
        Ok(Wait {
            bus: self,
            kind,
            id,
            rx,
        })
    }

    /// Start collecting events of `kind` without suspending yet.
    pub fn subscribe(&self, kind: EventKind) -> Result<Subscription<'_>> {
        let (id, rx) = self.add_sink(kind)?;
        Ok(Subscription {
            bus: self,
            kind,
            id,
            rx,
        })
    }

    /// Wait for the next event of `kind` satisfying `predicate`.
    ///
    /// Fails with [`Error::Timeout`] after `limit`, or
    /// [`Error::ConnectionClosed`] if the bus closes first.
    pub async fn wait_for<P>(&self, kind: EventKind, predicate: P, limit: Duration) -> Result<Event>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.register_wait(kind, predicate)?.wait(limit).await
    }

    /// Wait for the next event of `kind`, whatever it is.
    pub async fn wait_for_any(&self, kind: EventKind, limit: Duration) -> Result<Event> {
        self.wait_for(kind, |_| true, limit).await
    }

    /// Collect events of `kind` until one satisfies `terminal`.
    pub async fn accumulate<M, T>(
        &self,
        kind: EventKind,
        matches: M,
        terminal: T,
        limit: Duration,
    ) -> Result<Vec<Event>>
    where
        M: Fn(&Event) -> bool,
        T: Fn(&Event) -> bool,
    {
        self.subscribe(kind)?.accumulate(matches, terminal, limit).await
    }
}
