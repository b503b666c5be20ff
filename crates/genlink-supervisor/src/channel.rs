use std::io;
use std::sync::Arc;

/// Writability reported by a channel after accepting a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writable {
    /// The payload was flushed; more writes may follow immediately.
    Ready,
    /// The payload was accepted but the sink's buffer is full; hold
    /// further writes until a [`ChannelEvent::Drain`].
    Backpressured,
}

/// How the worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Asynchronous signals from a channel to its supervisor.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Bytes read from the worker's stdout. Arbitrary chunking: zero, one,
    /// or many complete lines per event.
    Data(Vec<u8>),
    /// A previously backpressured sink is writable again.
    Drain,
    /// The worker process exited. Always the channel's last event.
    Exit(ExitStatus),
}

/// Delivery handle a channel uses to push events to its supervisor.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(ChannelEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(deliver: impl Fn(ChannelEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: ChannelEvent) {
        (self.deliver)(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Byte channel to a live worker process.
///
/// Abstracts the process's stdio handles so the supervisor can be tested
/// against a scripted channel without spawning anything. Inbound data,
/// drain, and exit signals arrive through the [`EventSink`] handed to the
/// factory at launch.
pub trait WorkerChannel: Send {
    /// OS pid of the underlying process, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Write one encoded frame. The channel accepts the full payload
    /// (buffering any unflushed tail internally) and reports whether the
    /// sink can take more.
    fn write(&mut self, bytes: &[u8]) -> io::Result<Writable>;

    /// Forcibly terminate the process. Idempotent; the channel still
    /// emits its Exit event through the sink.
    fn kill(&mut self);
}

/// Launches a fresh channel instance per process spawn.
pub trait ChannelFactory: Send + Sync {
    fn launch(&self, sink: EventSink) -> io::Result<Box<dyn WorkerChannel>>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn sink_delivers_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = EventSink::new(move |event| {
            sink_seen.lock().unwrap().push(format!("{event:?}"));
        });

        sink.emit(ChannelEvent::Data(b"abc".to_vec()));
        sink.emit(ChannelEvent::Drain);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("Data"));
        assert_eq!(seen[1], "Drain");
    }

    #[test]
    fn sink_clones_share_the_delivery_fn() {
        let count = Arc::new(Mutex::new(0));
        let sink_count = Arc::clone(&count);
        let sink = EventSink::new(move |_| {
            *sink_count.lock().unwrap() += 1;
        });
        let clone = sink.clone();

        sink.emit(ChannelEvent::Drain);
        clone.emit(ChannelEvent::Drain);
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
