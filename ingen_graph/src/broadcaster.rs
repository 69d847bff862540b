//! Broadcaster, spec.md §4.6/§6: fans the observable effect of each event
//! out to every registered client, bundling a bracketed run of events into
//! one atomic delivery (`Mark{BUNDLE_START/BUNDLE_END}`).
//!
//! `knaster_graph` has no client/transport concept at all; grounded on the
//! registry shape spec.md §5 names directly ("Broadcaster client registry
//! (rw-lock; writers = register/unregister, readers = broadcast)"), using
//! the same `parking_lot::RwLock` enrichment as [`crate::store::Store`].

use std::collections::HashMap;

use ingen_core::Status;
use ingen_primitives::{Path, Uri};
use parking_lot::RwLock;

pub type ClientId = u64;

/// One observable effect of an event, the unit the Broadcaster fans out
/// (spec.md §4.7's "Success effect" column, minus the parts only the
/// originating client needs via [`crate::event::EventReply`]).
#[derive(Clone, Debug)]
pub enum BroadcastMessage {
    ObjectCreated { path: Path },
    ObjectDeleted { path: Path },
    Connected { tail: Path, head: Path },
    Disconnected { tail: Path, head: Path },
    PropertyChanged { subject: Path, key: Uri },
    Moved { from: Path, to: Path },
    /// A plugin's `run` panicked mid-cycle; the block was deactivated
    /// rather than let the panic unwind across the rest of the cycle
    /// (spec.md §7 per-block fault isolation).
    Faulted { path: Path },
}

/// Receives broadcasts. One implementation per transport (spec.md §6
/// "Transport/Wire").
pub trait ClientSink: Send + Sync {
    /// `messages` is either a single-element slice (an unbundled event) or
    /// the full contents of a bundle, delivered together.
    fn deliver(&self, messages: &[BroadcastMessage]);
}

struct Registry {
    clients: HashMap<ClientId, Box<dyn ClientSink>>,
}

/// Fans updates out to registered clients, delaying delivery while a bundle
/// is open (spec.md §4.6: "Broadcaster delays flushing outputs until
/// matching END").
pub struct Broadcaster {
    registry: RwLock<Registry>,
    bundle: RwLock<Option<Vec<BroadcastMessage>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
impl Broadcaster {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry { clients: HashMap::new() }),
            bundle: RwLock::new(None),
        }
    }

    pub fn register_client(&self, id: ClientId, sink: Box<dyn ClientSink>) {
        self.registry.write().clients.insert(id, sink);
    }
    pub fn unregister_client(&self, id: ClientId) {
        self.registry.write().clients.remove(&id);
    }

    pub fn bundle_start(&self) {
        *self.bundle.write() = Some(Vec::new());
    }
    /// Flushes whatever accumulated since `bundle_start` to every client in
    /// one delivery.
    pub fn bundle_end(&self) {
        let messages = self.bundle.write().take().unwrap_or_default();
        if !messages.is_empty() {
            self.deliver_to_all(&messages);
        }
    }

    /// Broadcasts one message, or queues it if a bundle is currently open.
    pub fn broadcast(&self, message: BroadcastMessage) {
        let mut bundle = self.bundle.write();
        if let Some(buf) = bundle.as_mut() {
            buf.push(message);
        } else {
            drop(bundle);
            self.deliver_to_all(std::slice::from_ref(&message));
        }
    }

    fn deliver_to_all(&self, messages: &[BroadcastMessage]) {
        for sink in self.registry.read().clients.values() {
            sink.deliver(messages);
        }
    }
}

/// A direct per-client response, bypassing every other registered client
/// (spec.md §4.6 post_process: "delivers the status response to the
/// originating client").
#[derive(Clone, Debug)]
pub struct Response {
    pub sequence: u64,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<usize>>>);
    impl ClientSink for Recorder {
        fn deliver(&self, messages: &[BroadcastMessage]) {
            self.0.lock().unwrap().push(messages.len());
        }
    }

    #[test]
    fn bundle_delivers_once_with_every_queued_message() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let b = Broadcaster::new();
        b.register_client(1, Box::new(Recorder(log.clone())));

        b.bundle_start();
        b.broadcast(BroadcastMessage::ObjectDeleted { path: Path::parse("/g/a").unwrap() });
        b.broadcast(BroadcastMessage::Disconnected {
            tail: Path::parse("/g/a").unwrap(),
            head: Path::parse("/g/b").unwrap(),
        });
        assert!(log.lock().unwrap().is_empty());
        b.bundle_end();
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn unbundled_broadcast_delivers_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let b = Broadcaster::new();
        b.register_client(1, Box::new(Recorder(log.clone())));
        b.broadcast(BroadcastMessage::ObjectCreated { path: Path::root() });
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }
}
