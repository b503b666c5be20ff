use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::SendError;
use crate::timer::{TimerHandle, TimerQueue};

pub(crate) type SuccessFn = Box<dyn FnOnce(Value) + Send>;
pub(crate) type FailureFn = Box<dyn FnOnce(SendError) + Send>;

/// Progressive-result callback, shared so it can be invoked outside the
/// supervisor lock.
pub(crate) type ChunkFn = Arc<Mutex<Box<dyn FnMut(&str, bool) + Send>>>;

/// Callbacks and bookkeeping for one dispatched request.
pub(crate) struct PendingRequest {
    pub method: String,
    pub created_at: Instant,
    pub on_success: SuccessFn,
    pub on_failure: FailureFn,
    pub on_chunk: Option<ChunkFn>,
}

/// A resolution ready to be delivered to a caller.
///
/// Returned instead of invoked so the supervisor can run callbacks after
/// releasing its lock.
pub(crate) enum Outcome {
    Success(SuccessFn, Value),
    Failure(FailureFn, SendError),
}

impl Outcome {
    pub fn run(self) {
        match self {
            Outcome::Success(on_success, result) => on_success(result),
            Outcome::Failure(on_failure, error) => on_failure(error),
        }
    }
}

struct Entry {
    request: PendingRequest,
    timer: TimerHandle,
}

/// Tracks in-flight requests by id and arms their timeout deadlines.
///
/// Each entry is destroyed exactly once: by its matching response, by its
/// timeout, or by bulk invalidation on crash/stop. Unknown ids are ignored,
/// which defends against duplicate or late frames from a misbehaving
/// worker.
pub(crate) struct RequestRegistry {
    next_id: u64,
    pending: HashMap<u64, Entry>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next request id: monotonically increasing from 1,
    /// unique for this supervisor's lifetime (ids survive worker
    /// restarts).
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Store a pending entry and arm its timeout on the shared scheduler.
    /// `on_timeout` fires on the scheduler thread iff the entry has not
    /// been resolved, rejected, or invalidated first.
    pub fn register(
        &mut self,
        id: u64,
        request: PendingRequest,
        timers: &TimerQueue,
        timeout: Duration,
        on_timeout: impl FnOnce() + Send + 'static,
    ) {
        let timer = timers.schedule(timeout, on_timeout);
        self.pending.insert(id, Entry { request, timer });
    }

    /// Complete a request successfully. Returns `None` for unknown ids.
    pub fn resolve(&mut self, id: u64, result: Value) -> Option<Outcome> {
        let entry = self.pending.remove(&id)?;
        entry.timer.cancel();
        Some(Outcome::Success(entry.request.on_success, result))
    }

    /// Complete a request with a failure. Returns `None` for unknown ids.
    pub fn reject(&mut self, id: u64, error: SendError) -> Option<Outcome> {
        let entry = self.pending.remove(&id)?;
        entry.timer.cancel();
        Some(Outcome::Failure(entry.request.on_failure, error))
    }

    /// Time a request out, building the Timeout error from its recorded
    /// method and elapsed age. Returns `None` if it was resolved first.
    pub fn expire(&mut self, id: u64) -> Option<Outcome> {
        let entry = self.pending.remove(&id)?;
        entry.timer.cancel();
        let error = SendError::Timeout {
            method: entry.request.method,
            elapsed: entry.request.created_at.elapsed(),
        };
        Some(Outcome::Failure(entry.request.on_failure, error))
    }

    /// Remove an entry without invoking any callback (used when a send is
    /// refused synchronously after registration, e.g. QueueFull).
    pub fn unregister(&mut self, id: u64) {
        if let Some(entry) = self.pending.remove(&id) {
            entry.timer.cancel();
        }
    }

    /// Fail every pending request with the same error, cancelling every
    /// timer. Idempotent: safe on an already-empty registry.
    pub fn reject_all(&mut self, error: &SendError) -> Vec<Outcome> {
        self.pending
            .drain()
            .map(|(_, entry)| {
                entry.timer.cancel();
                Outcome::Failure(entry.request.on_failure, error.clone())
            })
            .collect()
    }

    /// The request's progressive-result callback, if one was supplied.
    pub fn chunk_hook(&self, id: u64) -> Option<ChunkFn> {
        self.pending
            .get(&id)
            .and_then(|entry| entry.request.on_chunk.clone())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use serde_json::json;

    use super::*;

    fn request(
        method: &str,
        tx: mpsc::Sender<Result<Value, SendError>>,
    ) -> PendingRequest {
        let failure_tx = tx.clone();
        PendingRequest {
            method: method.to_string(),
            created_at: Instant::now(),
            on_success: Box::new(move |value| {
                let _ = tx.send(Ok(value));
            }),
            on_failure: Box::new(move |error| {
                let _ = failure_tx.send(Err(error));
            }),
            on_chunk: None,
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut registry = RequestRegistry::new();
        assert_eq!(registry.next_id(), 1);
        assert_eq!(registry.next_id(), 2);
        assert_eq!(registry.next_id(), 3);
    }

    #[test]
    fn resolve_removes_entry_and_delivers_result() {
        let timers = TimerQueue::new();
        let mut registry = RequestRegistry::new();
        let (tx, rx) = mpsc::channel();

        let id = registry.next_id();
        registry.register(
            id,
            request("ping", tx),
            &timers,
            Duration::from_secs(5),
            || {},
        );
        assert_eq!(registry.len(), 1);

        registry.resolve(id, json!("pong")).unwrap().run();
        assert_eq!(registry.len(), 0);
        assert_eq!(rx.recv().unwrap().unwrap(), json!("pong"));

        // A duplicate frame for the same id has nothing to hit.
        assert!(registry.resolve(id, json!("again")).is_none());
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut registry = RequestRegistry::new();
        assert!(registry.resolve(99, json!(null)).is_none());
        assert!(registry.reject(99, SendError::NotRunning).is_none());
        assert!(registry.expire(99).is_none());
    }

    #[test]
    fn expire_reports_method_and_elapsed() {
        let timers = TimerQueue::new();
        let mut registry = RequestRegistry::new();
        let (tx, rx) = mpsc::channel();

        let id = registry.next_id();
        registry.register(
            id,
            request("generate", tx),
            &timers,
            Duration::from_secs(5),
            || {},
        );

        registry.expire(id).unwrap().run();
        match rx.recv().unwrap().unwrap_err() {
            SendError::Timeout { method, .. } => assert_eq!(method, "generate"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn timeout_hook_fires_unless_resolved_first() {
        let timers = TimerQueue::new();
        let (hook_tx, hook_rx) = mpsc::channel();
        let mut registry = RequestRegistry::new();
        let (tx, _rx) = mpsc::channel();

        let id = registry.next_id();
        let fired = hook_tx.clone();
        registry.register(
            id,
            request("slow", tx.clone()),
            &timers,
            Duration::from_millis(20),
            move || {
                let _ = fired.send(id);
            },
        );
        assert_eq!(
            hook_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            id
        );

        // Resolving cancels the armed deadline before it fires.
        let id2 = registry.next_id();
        registry.register(
            id2,
            request("fast", tx),
            &timers,
            Duration::from_millis(50),
            move || {
                let _ = hook_tx.send(id2);
            },
        );
        registry.resolve(id2, json!(1)).unwrap().run();
        assert!(hook_rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn reject_all_fails_everything_and_is_idempotent() {
        let timers = TimerQueue::new();
        let mut registry = RequestRegistry::new();
        let (tx, rx) = mpsc::channel();

        for _ in 0..3 {
            let id = registry.next_id();
            registry.register(
                id,
                request("generate", tx.clone()),
                &timers,
                Duration::from_secs(5),
                || {},
            );
        }

        let outcomes = registry.reject_all(&SendError::ProcessCrashed);
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            outcome.run();
        }
        for _ in 0..3 {
            assert!(matches!(
                rx.recv().unwrap(),
                Err(SendError::ProcessCrashed)
            ));
        }

        assert!(registry.reject_all(&SendError::ProcessCrashed).is_empty());
    }

    #[test]
    fn unregister_drops_entry_without_callback() {
        let timers = TimerQueue::new();
        let mut registry = RequestRegistry::new();
        let (tx, rx) = mpsc::channel();

        let id = registry.next_id();
        registry.register(
            id,
            request("ping", tx),
            &timers,
            Duration::from_secs(5),
            || {},
        );
        registry.unregister(id);

        assert_eq!(registry.len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn chunk_hook_is_cloned_for_out_of_lock_use() {
        let timers = TimerQueue::new();
        let mut registry = RequestRegistry::new();
        let (tx, _rx) = mpsc::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel();

        let id = registry.next_id();
        let mut entry = request("generate", tx);
        entry.on_chunk = Some(Arc::new(Mutex::new(Box::new(move |chunk: &str, done| {
            let _ = chunk_tx.send((chunk.to_string(), done));
        }))));
        registry.register(id, entry, &timers, Duration::from_secs(5), || {});

        let hook = registry.chunk_hook(id).unwrap();
        (hook.lock().unwrap())("partial", false);
        assert_eq!(chunk_rx.recv().unwrap(), ("partial".to_string(), false));

        assert!(registry.chunk_hook(9999).is_none());
    }
}
