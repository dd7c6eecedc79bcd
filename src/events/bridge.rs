//! Fan-out of typed events to listeners and channel handles.

use crate::types::ListenerId;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback attached to a bridge.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

enum Sink<E> {
    Callback(Listener<E>),
    Channel(Sender<E>),
}

impl<E> Clone for Sink<E> {
    fn clone(&self) -> Self {
        match self {
            Sink::Callback(listener) => Sink::Callback(Arc::clone(listener)),
            Sink::Channel(sender) => Sink::Channel(sender.clone()),
        }
    }
}

/// Observer surface owned by one collection (or one owner object).
///
/// Listeners run synchronously, in registration order, outside of any
/// internal lock, so a listener may attach or detach listeners itself.
pub struct EventBridge<E> {
    sinks: RwLock<Vec<(ListenerId, Sink<E>)>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> EventBridge<E> {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a callback.
    pub fn listen<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.attach(Sink::Callback(Arc::new(callback)))
    }

    /// Attach a bounded channel. A receiver that falls `buffer` events
    /// behind, or is dropped, is detached on the next emit.
    pub fn channel(&self, buffer: usize) -> EventHandle<E> {
        let (sender, receiver) = bounded(buffer);
        let id = self.attach(Sink::Channel(sender));
        EventHandle { id, receiver }
    }

    /// Detach a listener or channel. Returns false if it was not attached.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    /// Number of attached listeners and channels.
    pub fn listener_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Re-emit events onto another bridge, translated by `map`.
    ///
    /// Events for which `map` returns `None` are not forwarded. The target
    /// is held weakly; once it is gone the forwarding listener goes quiet.
    pub fn forward<E2, F>(&self, target: &Arc<EventBridge<E2>>, map: F) -> ListenerId
    where
        E2: Clone + Send + 'static,
        F: Fn(&E) -> Option<E2> + Send + Sync + 'static,
    {
        let target = Arc::downgrade(target);
        self.listen(move |event| {
            if let Some(target) = target.upgrade() {
                if let Some(mapped) = map(event) {
                    target.emit(mapped);
                }
            }
        })
    }

    /// Deliver an event to every attached listener.
    pub fn emit(&self, event: E) {
        let sinks: Vec<(ListenerId, Sink<E>)> = self.sinks.read().clone();

        let mut to_remove = Vec::new();
        for (id, sink) in sinks {
            match sink {
                Sink::Callback(listener) => listener(&event),
                Sink::Channel(sender) => {
                    if sender.try_send(event.clone()).is_err() {
                        to_remove.push(id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            self.sinks
                .write()
                .retain(|(id, _)| !to_remove.contains(id));
        }
    }

    fn attach(&self, sink: Sink<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sinks.write().push((id, sink));
        id
    }
}

impl<E: Clone + Send + 'static> Default for EventBridge<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a channel attached with [`EventBridge::channel`].
pub struct EventHandle<E> {
    pub id: ListenerId,
    pub receiver: Receiver<E>,
}

impl<E> EventHandle<E> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<E, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<E, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<E, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}
