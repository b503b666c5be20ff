use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

/// One-shot deadline scheduler shared by every timed concern of a
/// supervisor: per-request timeouts and the restart backoff delay.
///
/// A single thread sleeps until the earliest armed deadline. Cancellation
/// is lazy: a cancelled handle drops its task immediately and the stale
/// heap entry is skipped when it surfaces, so cancelling never leaks a
/// timer thread or fires a stale callback.
pub(crate) struct TimerQueue {
    shared: Arc<TimerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cancellation handle for one armed deadline.
pub(crate) struct TimerHandle {
    id: u64,
    shared: Arc<TimerShared>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

struct TimerState {
    next_id: u64,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
    shutdown: bool,
}

impl TimerQueue {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                next_id: 0,
                deadlines: BinaryHeap::new(),
                tasks: HashMap::new(),
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let runner = Arc::clone(&shared);
        let thread = thread::spawn(move || run(&runner));
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Arm a one-shot task to run after `delay` on the scheduler thread.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerHandle {
        let deadline = Instant::now() + delay;
        let mut state = lock(&self.shared.state);
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(id, Box::new(task));
        state.deadlines.push(Reverse((deadline, id)));
        drop(state);
        self.shared.cv.notify_one();
        TimerHandle {
            id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl TimerHandle {
    /// Disarm the deadline. A task that already started running is not
    /// interrupted; one that has not yet run never will.
    pub fn cancel(&self) {
        lock(&self.shared.state).tasks.remove(&self.id);
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.shutdown = true;
            state.tasks.clear();
        }
        self.shared.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn lock(mutex: &Mutex<TimerState>) -> std::sync::MutexGuard<'_, TimerState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run(shared: &TimerShared) {
    let mut state = lock(&shared.state);
    loop {
        if state.shutdown {
            return;
        }
        let Some(&Reverse((deadline, id))) = state.deadlines.peek() else {
            state = shared
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        };
        // Skip entries whose handle was cancelled.
        if !state.tasks.contains_key(&id) {
            state.deadlines.pop();
            continue;
        }
        let now = Instant::now();
        if deadline <= now {
            state.deadlines.pop();
            if let Some(task) = state.tasks.remove(&id) {
                drop(state);
                task();
                state = lock(&shared.state);
            }
        } else {
            state = shared
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
