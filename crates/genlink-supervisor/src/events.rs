use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::state::ProcessState;

/// Out-of-band signals exposed to collaborators (status indicators,
/// health checks, persistence pipelines).
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The lifecycle status changed; carries a full state snapshot.
    StateChanged(ProcessState),
    /// A progressive partial result arrived for an in-flight request.
    StreamChunk {
        request_id: u64,
        chunk: String,
        done: bool,
    },
    /// A plain worker notification, never matched to a pending request.
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// The worker process died.
    Crash {
        exit_code: Option<i32>,
        signal: Option<i32>,
        pending_at_crash: usize,
    },
    /// The restart budget is spent; the supervisor is stopped until a
    /// manual `start()`/`restart()`.
    RestartsExhausted,
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Listener = Arc<dyn Fn(&SupervisorEvent) + Send + Sync>;

/// Explicit listener registry — ownership of listeners stays with the
/// supervisor instance rather than a global bus.
#[derive(Default)]
pub(crate) struct EventListeners {
    inner: Mutex<ListenerTable>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

impl EventListeners {
    pub fn subscribe(&self, listener: impl Fn(&SupervisorEvent) + Send + Sync + 'static) -> Subscription {
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.listeners.push((id, Arc::new(listener)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.lock().listeners.retain(|(id, _)| *id != subscription.0);
    }

    /// Invoke every listener. The table lock is released before any
    /// listener runs, so listeners may subscribe, unsubscribe, or call
    /// back into the supervisor.
    pub fn emit(&self, event: &SupervisorEvent) {
        let listeners: Vec<Listener> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn subscribe_emit_unsubscribe() {
        let listeners = EventListeners::default();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&SupervisorEvent::RestartsExhausted);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        listeners.unsubscribe(sub);
        listeners.emit(&SupervisorEvent::RestartsExhausted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_receive_every_event_in_order() {
        let listeners = EventListeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        listeners.subscribe(move |event| {
            if let SupervisorEvent::StreamChunk { chunk, .. } = event {
                sink.lock().unwrap().push(chunk.clone());
            }
        });

        for chunk in ["a", "b", "c"] {
            listeners.emit(&SupervisorEvent::StreamChunk {
                request_id: 1,
                chunk: chunk.to_string(),
                done: false,
            });
        }
        assert_eq!(*seen.lock().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let listeners = Arc::new(EventListeners::default());
        let count = Arc::new(AtomicUsize::new(0));

        let table = Arc::clone(&listeners);
        let counter = Arc::clone(&count);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_inner = Arc::clone(&slot);
        let sub = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_inner.lock().unwrap().take() {
                table.unsubscribe(sub);
            }
        });
        *slot.lock().unwrap() = Some(sub);

        listeners.emit(&SupervisorEvent::RestartsExhausted);
        listeners.emit(&SupervisorEvent::RestartsExhausted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
