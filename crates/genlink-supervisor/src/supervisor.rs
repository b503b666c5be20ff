use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;

use genlink_protocol::{decode_line, encode_request, Envelope, LineBuffer};

use crate::assembler::StreamAssembler;
use crate::channel::{ChannelEvent, ChannelFactory, EventSink, ExitStatus, Writable, WorkerChannel};
use crate::config::SupervisorConfig;
use crate::error::{SendError, StartError};
use crate::events::{EventListeners, Subscription, SupervisorEvent};
use crate::queue::{FlushStep, OutboundQueue};
use crate::registry::{ChunkFn, Outcome, PendingRequest, RequestRegistry};
use crate::state::{ProcessState, Status};
use crate::timer::{TimerHandle, TimerQueue};

/// Per-request options for [`Supervisor::send_with`].
#[derive(Default)]
pub struct SendOptions {
    /// Overrides the configured default request timeout.
    pub timeout: Option<Duration>,
    /// Invoked once per `stream/chunk` fragment addressed to this request.
    pub on_chunk: Option<Box<dyn FnMut(&str, bool) + Send>>,
}

/// Caller-side completion handle for one dispatched request.
///
/// Each `send` returns an independent handle; no ordering is guaranteed
/// across different requests' completions.
#[derive(Debug)]
pub struct ResponseHandle {
    id: u64,
    rx: mpsc::Receiver<Result<Value, SendError>>,
}

impl ResponseHandle {
    /// The request id assigned by the supervisor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the request resolves or fails.
    pub fn wait(self) -> Result<Value, SendError> {
        self.rx.recv().unwrap_or(Err(SendError::NotRunning))
    }

    /// Block up to `timeout` for the resolution; `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, SendError>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll; `None` while the request is still pending.
    pub fn try_wait(&self) -> Option<Result<Value, SendError>> {
        self.rx.try_recv().ok()
    }
}

/// Work to perform after the supervisor lock is released: request
/// completions, chunk callbacks, and listener events, in dispatch order.
enum Action {
    Outcome(Outcome),
    Chunk(ChunkFn, String, bool),
    Event(SupervisorEvent),
}

struct Inner {
    status: Status,
    /// Bumped on every spawn and teardown; channel events carrying a
    /// stale epoch are dropped.
    epoch: u64,
    channel: Option<Box<dyn WorkerChannel>>,
    pid: Option<u32>,
    lines: LineBuffer,
    registry: RequestRegistry,
    assembler: StreamAssembler,
    queue: OutboundQueue,
    backpressured: bool,
    restart_count: u32,
    last_crash_at: Option<Instant>,
    restart_timer: Option<TimerHandle>,
}

struct Shared {
    config: SupervisorConfig,
    factory: Box<dyn ChannelFactory>,
    timers: TimerQueue,
    listeners: EventListeners,
    inner: Mutex<Inner>,
}

/// Supervises one line-oriented JSON-RPC worker process: owns the process
/// channel, correlates requests to responses, reassembles progressive
/// results, buffers writes under backpressure, and recovers from crashes
/// via the configured backoff policy.
///
/// All mutable state is guarded by one mutex; callbacks and events are
/// always delivered after the lock is released, so listeners and chunk
/// hooks may call back into the supervisor freely.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Supervisor that spawns the configured executable with piped stdio.
    #[cfg(unix)]
    pub fn new(config: SupervisorConfig) -> Self {
        let factory =
            crate::child::ChildChannelFactory::new(config.program.clone(), config.args.clone());
        Self::with_factory(config, factory)
    }

    /// Supervisor over an arbitrary channel implementation. This is the
    /// seam tests use to script worker behavior without a real process.
    pub fn with_factory(config: SupervisorConfig, factory: impl ChannelFactory + 'static) -> Self {
        let max_queue_depth = config.max_queue_depth;
        Self {
            shared: Arc::new(Shared {
                config,
                factory: Box::new(factory),
                timers: TimerQueue::new(),
                listeners: EventListeners::default(),
                inner: Mutex::new(Inner {
                    status: Status::Stopped,
                    epoch: 0,
                    channel: None,
                    pid: None,
                    lines: LineBuffer::new(),
                    registry: RequestRegistry::new(),
                    assembler: StreamAssembler::new(),
                    queue: OutboundQueue::new(max_queue_depth),
                    backpressured: false,
                    restart_count: 0,
                    last_crash_at: None,
                    restart_timer: None,
                }),
            }),
        }
    }

    /// Spawn the worker. Only valid from `Stopped`.
    pub fn start(&self) -> Result<(), StartError> {
        Shared::begin_start(&self.shared, true)
    }

    /// Terminate the worker (if alive), cancel any pending restart, and
    /// fail every pending request. Valid from any state.
    pub fn stop(&self) {
        let mut actions = Vec::new();
        let channel = {
            let mut inner = self.shared.lock_inner();
            if let Some(timer) = inner.restart_timer.take() {
                timer.cancel();
            }
            inner.epoch += 1;
            let channel = inner.channel.take();
            inner.pid = None;
            inner.backpressured = false;
            inner.lines.clear();
            for outcome in inner.registry.reject_all(&SendError::NotRunning) {
                actions.push(Action::Outcome(outcome));
            }
            inner.queue.clear();
            inner.assembler.clear();
            if inner.status != Status::Stopped {
                let event = set_status(&mut inner, Status::Stopped);
                actions.push(Action::Event(event));
            }
            channel
        };
        if let Some(mut channel) = channel {
            channel.kill();
        }
        run_actions(&self.shared, actions);
    }

    /// `stop()`, reset the crash budget, then `start()`.
    pub fn restart(&self) -> Result<(), StartError> {
        self.stop();
        self.shared.lock_inner().restart_count = 0;
        self.start()
    }

    /// Dispatch a request with default options.
    pub fn send(&self, method: &str, params: Option<Value>) -> Result<ResponseHandle, SendError> {
        self.send_with(method, params, SendOptions::default())
    }

    /// Dispatch a request.
    ///
    /// Running and writable: written immediately. Starting, or Running
    /// under backpressure: deferred to the bounded queue. Stopped,
    /// Crashed, or Restarting: refused with `NotRunning` — nothing is
    /// queued across an outage of unknown duration.
    pub fn send_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: SendOptions,
    ) -> Result<ResponseHandle, SendError> {
        let shared = &self.shared;
        let timeout = options.timeout.unwrap_or(shared.config.request_timeout);

        let mut inner = shared.lock_inner();
        match inner.status {
            Status::Stopped | Status::Crashed | Status::Restarting => {
                return Err(SendError::NotRunning)
            }
            Status::Starting | Status::Running => {}
        }

        let id = inner.registry.next_id();
        let line = encode_request(id, method, params.as_ref());

        let (tx, rx) = mpsc::channel();
        let failure_tx = tx.clone();
        let on_chunk: Option<ChunkFn> = options
            .on_chunk
            .map(|hook| Arc::new(Mutex::new(hook)) as ChunkFn);
        let request = PendingRequest {
            method: method.to_string(),
            created_at: Instant::now(),
            on_success: Box::new(move |value| {
                let _ = tx.send(Ok(value));
            }),
            on_failure: Box::new(move |error| {
                let _ = failure_tx.send(Err(error));
            }),
            on_chunk,
        };
        let weak = Arc::downgrade(shared);
        inner
            .registry
            .register(id, request, &shared.timers, timeout, move || {
                if let Some(shared) = weak.upgrade() {
                    Shared::on_request_timeout(&shared, id);
                }
            });

        let deliver_now =
            inner.status == Status::Running && !inner.backpressured && inner.channel.is_some();
        if deliver_now {
            let Inner {
                channel,
                backpressured,
                registry,
                ..
            } = &mut *inner;
            let Some(channel) = channel.as_mut() else {
                registry.unregister(id);
                return Err(SendError::NotRunning);
            };
            match channel.write(line.as_bytes()) {
                Ok(Writable::Ready) => {}
                Ok(Writable::Backpressured) => *backpressured = true,
                Err(err) => {
                    tracing::warn!(id, error = %err, "write to worker failed");
                    registry.unregister(id);
                    return Err(SendError::ProcessCrashed);
                }
            }
        } else {
            if let Err(err) = inner.queue.enqueue(line) {
                inner.registry.unregister(id);
                return Err(err);
            }
            tracing::debug!(id, depth = inner.queue.len(), "write deferred to queue");
        }

        Ok(ResponseHandle { id, rx })
    }

    /// Read-only snapshot of process state, including the count of
    /// requests in flight.
    pub fn state(&self) -> ProcessState {
        snapshot(&self.shared.lock_inner())
    }

    /// Concatenation of the stream fragments received so far for an
    /// in-flight request, if any.
    pub fn partial_result(&self, request_id: u64) -> Option<String> {
        self.shared.lock_inner().assembler.peek(request_id)
    }

    /// Register an event listener; returns the handle for `unsubscribe`.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SupervisorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.shared.listeners.unsubscribe(subscription);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive `Stopped → Starting → Running` (manual) or
    /// `Restarting → Starting → Running` (restart timer). The spawn runs
    /// outside the lock so concurrent sends land in the queue while
    /// Starting.
    fn begin_start(shared: &Arc<Shared>, manual: bool) -> Result<(), StartError> {
        let epoch;
        {
            let mut inner = shared.lock_inner();
            let allowed = match inner.status {
                Status::Stopped => manual,
                Status::Restarting => !manual,
                _ => false,
            };
            if !allowed {
                return if manual {
                    Err(StartError::AlreadyStarted)
                } else {
                    // A stop() won the race against the restart timer.
                    Ok(())
                };
            }
            inner.epoch += 1;
            epoch = inner.epoch;
            inner.restart_timer = None;
            inner.lines.clear();
            inner.backpressured = false;
            let event = set_status(&mut inner, Status::Starting);
            drop(inner);
            shared.listeners.emit(&event);
        }

        let sink_shared = Arc::downgrade(shared);
        let sink = EventSink::new(move |event| {
            if let Some(shared) = sink_shared.upgrade() {
                Shared::on_channel_event(&shared, epoch, event);
            }
        });

        tracing::info!(program = %shared.config.program.display(), "spawning worker");
        match shared.factory.launch(sink) {
            Ok(channel) => {
                let mut inner = shared.lock_inner();
                if inner.epoch != epoch || inner.status != Status::Starting {
                    // Torn down while spawning; discard this instance.
                    drop(inner);
                    let mut channel = channel;
                    channel.kill();
                    return Ok(());
                }
                inner.pid = channel.pid();
                inner.channel = Some(channel);
                let event = set_status(&mut inner, Status::Running);
                flush_queue(&mut inner);
                drop(inner);
                shared.listeners.emit(&event);
                tracing::info!("worker running");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "worker spawn failed");
                let mut actions = Vec::new();
                {
                    let mut inner = shared.lock_inner();
                    if inner.epoch == epoch && inner.status == Status::Starting {
                        for outcome in inner.registry.reject_all(&SendError::NotRunning) {
                            actions.push(Action::Outcome(outcome));
                        }
                        inner.queue.clear();
                        if manual {
                            let event = set_status(&mut inner, Status::Stopped);
                            actions.push(Action::Event(event));
                        } else {
                            inner.last_crash_at = Some(Instant::now());
                            let event = set_status(&mut inner, Status::Crashed);
                            actions.push(Action::Event(event));
                            apply_crash_policy(shared, &mut inner, &mut actions);
                        }
                    }
                }
                run_actions(shared, actions);
                if manual {
                    Err(StartError::Spawn {
                        program: shared.config.program.clone(),
                        source: err,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    fn on_channel_event(shared: &Arc<Shared>, epoch: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Data(bytes) => Self::on_data(shared, epoch, &bytes),
            ChannelEvent::Drain => Self::on_drain(shared, epoch),
            ChannelEvent::Exit(status) => Self::on_exit(shared, epoch, status),
        }
    }

    fn on_data(shared: &Arc<Shared>, epoch: u64, bytes: &[u8]) {
        let mut actions = Vec::new();
        {
            let mut inner = shared.lock_inner();
            if inner.epoch != epoch {
                return;
            }
            inner.lines.extend(bytes);
            while let Some(line) = inner.lines.next_line() {
                match decode_line(&line) {
                    Some(envelope) => dispatch(&mut inner, envelope, &mut actions),
                    None => {
                        tracing::warn!(len = line.len(), "discarding non-protocol line");
                    }
                }
            }
        }
        run_actions(shared, actions);
    }

    fn on_drain(shared: &Arc<Shared>, epoch: u64) {
        let mut inner = shared.lock_inner();
        if inner.epoch != epoch {
            return;
        }
        inner.backpressured = false;
        flush_queue(&mut inner);
    }

    fn on_exit(shared: &Arc<Shared>, epoch: u64, status: ExitStatus) {
        let mut actions = Vec::new();
        {
            let mut inner = shared.lock_inner();
            if inner.epoch != epoch {
                return;
            }
            // Late stragglers from this channel instance are now stale.
            inner.epoch += 1;
            inner.channel = None;
            inner.pid = None;
            inner.backpressured = false;
            inner.lines.clear();
            inner.last_crash_at = Some(Instant::now());

            let pending_at_crash = inner.registry.len();
            tracing::warn!(
                code = ?status.code,
                signal = ?status.signal,
                pending = pending_at_crash,
                "worker exited"
            );
            for outcome in inner.registry.reject_all(&SendError::ProcessCrashed) {
                actions.push(Action::Outcome(outcome));
            }
            // Queued-but-unsent writes are dropped, never carried to the
            // next process instance.
            inner.queue.clear();
            inner.assembler.clear();

            actions.push(Action::Event(SupervisorEvent::Crash {
                exit_code: status.code,
                signal: status.signal,
                pending_at_crash,
            }));
            let event = set_status(&mut inner, Status::Crashed);
            actions.push(Action::Event(event));
            apply_crash_policy(shared, &mut inner, &mut actions);
        }
        run_actions(shared, actions);
    }

    fn on_request_timeout(shared: &Arc<Shared>, id: u64) {
        let outcome = {
            let mut inner = shared.lock_inner();
            let outcome = inner.registry.expire(id);
            if outcome.is_some() {
                inner.assembler.discard(id);
            }
            outcome
        };
        if let Some(outcome) = outcome {
            tracing::debug!(id, "request timed out");
            outcome.run();
        }
    }

    fn on_restart_due(shared: &Arc<Shared>, epoch: u64) {
        {
            let mut inner = shared.lock_inner();
            if inner.epoch != epoch || inner.status != Status::Restarting {
                return;
            }
            inner.restart_timer = None;
        }
        let _ = Self::begin_start(shared, false);
    }
}

fn dispatch(inner: &mut Inner, envelope: Envelope, actions: &mut Vec<Action>) {
    match envelope {
        Envelope::StreamChunk(chunk) => {
            inner
                .assembler
                .append(chunk.request_id, &chunk.chunk, chunk.done);
            if chunk.done {
                // The formal response is authoritative; the assembled text
                // is a progressive affordance whose buffer is freed here.
                if let Some(full) = inner.assembler.take_final(chunk.request_id) {
                    tracing::debug!(
                        request_id = chunk.request_id,
                        total_len = full.len(),
                        "stream complete"
                    );
                }
            }
            if let Some(hook) = inner.registry.chunk_hook(chunk.request_id) {
                actions.push(Action::Chunk(hook, chunk.chunk.clone(), chunk.done));
            }
            actions.push(Action::Event(SupervisorEvent::StreamChunk {
                request_id: chunk.request_id,
                chunk: chunk.chunk,
                done: chunk.done,
            }));
        }
        Envelope::Response { id, result } => {
            inner.assembler.discard(id);
            match inner.registry.resolve(id, result) {
                Some(outcome) => actions.push(Action::Outcome(outcome)),
                None => tracing::debug!(id, "response for unknown request id"),
            }
        }
        Envelope::ErrorResponse { id, error } => {
            inner.assembler.discard(id);
            let error = SendError::from_rpc(error);
            match inner.registry.reject(id, error) {
                Some(outcome) => actions.push(Action::Outcome(outcome)),
                None => tracing::debug!(id, "error response for unknown request id"),
            }
        }
        Envelope::Notification { method, params } => {
            actions.push(Action::Event(SupervisorEvent::Notification {
                method,
                params,
            }));
        }
        Envelope::Request { id, method, .. } => {
            // This protocol has no worker-initiated requests.
            tracing::warn!(id, method = %method, "ignoring request frame from worker");
        }
    }
}

/// Drain the outbound queue while the channel stays writable. Safe to
/// call from any state; it only acts while Running with a live channel.
fn flush_queue(inner: &mut Inner) {
    if inner.status != Status::Running || inner.backpressured {
        return;
    }
    let Inner {
        channel,
        queue,
        backpressured,
        ..
    } = inner;
    let Some(channel) = channel.as_mut() else {
        return;
    };
    queue.flush(|item| match channel.write(item.payload.as_bytes()) {
        Ok(Writable::Ready) => FlushStep::Continue,
        Ok(Writable::Backpressured) => {
            *backpressured = true;
            FlushStep::Backpressure
        }
        Err(err) => {
            tracing::warn!(error = %err, "queued write failed");
            FlushStep::Abort
        }
    });
}

fn apply_crash_policy(shared: &Arc<Shared>, inner: &mut Inner, actions: &mut Vec<Action>) {
    if inner.restart_count < shared.config.max_restarts {
        let delay = shared.config.backoff_delay(inner.restart_count);
        inner.restart_count += 1;
        tracing::info!(
            attempt = inner.restart_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling worker restart"
        );
        let event = set_status(inner, Status::Restarting);
        actions.push(Action::Event(event));
        let weak = Arc::downgrade(shared);
        let epoch = inner.epoch;
        inner.restart_timer = Some(shared.timers.schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                Shared::on_restart_due(&shared, epoch);
            }
        }));
    } else {
        tracing::warn!(
            restarts = inner.restart_count,
            "restart budget exhausted; supervisor stopped"
        );
        let event = set_status(inner, Status::Stopped);
        actions.push(Action::Event(event));
        actions.push(Action::Event(SupervisorEvent::RestartsExhausted));
    }
}

fn set_status(inner: &mut Inner, status: Status) -> SupervisorEvent {
    inner.status = status;
    tracing::debug!(status = status.name(), "state changed");
    SupervisorEvent::StateChanged(snapshot(inner))
}

fn snapshot(inner: &Inner) -> ProcessState {
    ProcessState {
        status: inner.status,
        pid: inner.pid,
        restart_count: inner.restart_count,
        last_crash_at: inner.last_crash_at,
        pending_count: inner.registry.len(),
    }
}

fn run_actions(shared: &Shared, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Outcome(outcome) => outcome.run(),
            Action::Chunk(hook, chunk, done) => {
                let mut hook = hook.lock().unwrap_or_else(PoisonError::into_inner);
                (hook)(&chunk, done);
            }
            Action::Event(event) => shared.listeners.emit(&event),
        }
    }
}
