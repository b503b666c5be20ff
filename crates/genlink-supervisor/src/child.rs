use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{
    ChannelEvent, ChannelFactory, EventSink, ExitStatus, Writable, WorkerChannel,
};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const POLL_INTERVAL_MS: i32 = 100;
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Spawns the worker executable with piped stdio.
#[derive(Debug, Clone)]
pub struct ChildChannelFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl ChildChannelFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl ChannelFactory for ChildChannelFactory {
    fn launch(&self, sink: EventSink) -> io::Result<Box<dyn WorkerChannel>> {
        let channel = ChildChannel::spawn(&self.program, &self.args, sink)?;
        Ok(Box::new(channel))
    }
}

struct WriteShared {
    state: Mutex<WriteState>,
    cv: Condvar,
}

struct WriteState {
    stdin: Option<ChildStdin>,
    /// Bytes accepted by `write` but not yet flushed into the pipe.
    pending: Vec<u8>,
    closed: bool,
}

enum FlushOutcome {
    Drained,
    Blocked,
    Failed,
}

/// Stdio channel to a spawned worker process.
///
/// Three helper threads: a stdout reader (Data events), an exit waiter
/// (joins the reader so Exit is always the channel's last event), and a
/// drain watcher that polls the non-blocking stdin for writability
/// whenever a write left unflushed bytes behind, emitting Drain once they
/// clear.
pub struct ChildChannel {
    pid: u32,
    shared: Arc<WriteShared>,
    exited: Arc<AtomicBool>,
}

impl ChildChannel {
    fn spawn(program: &Path, args: &[String], sink: EventSink) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout not captured"))?;
        let pid = child.id();

        set_nonblocking(stdin.as_raw_fd())?;

        let shared = Arc::new(WriteShared {
            state: Mutex::new(WriteState {
                stdin: Some(stdin),
                pending: Vec::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        });
        let exited = Arc::new(AtomicBool::new(false));

        let reader_sink = sink.clone();
        let reader = thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => reader_sink.emit(ChannelEvent::Data(chunk[..n].to_vec())),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::debug!(pid, error = %err, "worker stdout read failed");
                        break;
                    }
                }
            }
        });

        let drain_sink = sink.clone();
        let drain_shared = Arc::clone(&shared);
        thread::spawn(move || loop {
            let fd = {
                let mut state = lock(&drain_shared.state);
                while state.pending.is_empty() && !state.closed {
                    state = drain_shared
                        .cv
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                if state.closed {
                    return;
                }
                match state.stdin.as_ref() {
                    Some(stdin) => stdin.as_raw_fd(),
                    None => return,
                }
            };
            poll_writable(fd, POLL_INTERVAL_MS);
            let drained = {
                let mut state = lock(&drain_shared.state);
                if state.closed {
                    return;
                }
                match flush_pending(&mut state) {
                    FlushOutcome::Drained => true,
                    FlushOutcome::Blocked => false,
                    FlushOutcome::Failed => {
                        // The pipe is dead; the exit waiter will follow up.
                        state.pending.clear();
                        false
                    }
                }
            };
            if drained {
                drain_sink.emit(ChannelEvent::Drain);
            }
        });

        let waiter_shared = Arc::clone(&shared);
        let waiter_exited = Arc::clone(&exited);
        thread::spawn(move || {
            let status = child.wait();
            waiter_exited.store(true, Ordering::SeqCst);
            {
                let mut state = lock(&waiter_shared.state);
                state.closed = true;
                state.stdin = None;
                state.pending.clear();
            }
            waiter_shared.cv.notify_all();
            // Let the reader deliver everything the pipe still holds so
            // Exit is always the channel's last event.
            let _ = reader.join();
            let status = match status {
                Ok(status) => ExitStatus {
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(err) => {
                    tracing::warn!(pid, error = %err, "wait on worker failed");
                    ExitStatus {
                        code: None,
                        signal: None,
                    }
                }
            };
            sink.emit(ChannelEvent::Exit(status));
        });

        Ok(Self {
            pid,
            shared,
            exited,
        })
    }
}

impl WorkerChannel for ChildChannel {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<Writable> {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(ErrorKind::BrokenPipe.into());
        }
        if !state.pending.is_empty() {
            // Still backpressured; append behind the unflushed tail.
            state.pending.extend_from_slice(bytes);
            return Ok(Writable::Backpressured);
        }
        let Some(stdin) = state.stdin.as_mut() else {
            return Err(ErrorKind::BrokenPipe.into());
        };
        let mut offset = 0;
        while offset < bytes.len() {
            match stdin.write(&bytes[offset..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    state.pending.extend_from_slice(&bytes[offset..]);
                    drop(state);
                    self.shared.cv.notify_all();
                    return Ok(Writable::Backpressured);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Writable::Ready)
    }

    fn kill(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.closed = true;
            // Dropping stdin closes the pipe; a well-behaved worker exits
            // on EOF before the signals land.
            state.stdin = None;
            state.pending.clear();
        }
        self.shared.cv.notify_all();

        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        send_signal(self.pid, libc::SIGTERM);
        let deadline = Instant::now() + KILL_GRACE;
        while Instant::now() < deadline {
            if self.exited.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        if !self.exited.load(Ordering::SeqCst) {
            send_signal(self.pid, libc::SIGKILL);
        }
    }
}

impl Drop for ChildChannel {
    fn drop(&mut self) {
        if !self.exited.load(Ordering::SeqCst) {
            self.kill();
        }
    }
}

fn flush_pending(state: &mut WriteState) -> FlushOutcome {
    let WriteState { stdin, pending, .. } = state;
    let Some(stdin) = stdin.as_mut() else {
        return FlushOutcome::Failed;
    };
    while !pending.is_empty() {
        match stdin.write(pending) {
            Ok(0) => return FlushOutcome::Failed,
            Ok(n) => {
                pending.drain(..n);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return FlushOutcome::Blocked,
            Err(_) => return FlushOutcome::Failed,
        }
    }
    FlushOutcome::Drained
}

fn lock(mutex: &Mutex<WriteState>) -> MutexGuard<'_, WriteState> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until `fd` is writable, up to `timeout_ms`.
fn poll_writable(fd: RawFd, timeout_ms: i32) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    rc > 0 && pollfd.revents & libc::POLLOUT != 0
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn collecting_sink() -> (EventSink, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    #[test]
    fn echoes_data_through_cat() {
        let factory = ChildChannelFactory::new("/bin/cat", Vec::new());
        let (sink, rx) = collecting_sink();
        let mut channel = factory.launch(sink).unwrap();

        assert_eq!(channel.write(b"hello\n").unwrap(), Writable::Ready);
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ChannelEvent::Data(bytes) => assert_eq!(bytes, b"hello\n"),
            other => panic!("expected data, got {other:?}"),
        }

        channel.kill();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ChannelEvent::Exit(_) => break,
                _ => continue,
            }
        }
    }

    #[test]
    fn exit_reports_the_code() {
        let factory =
            ChildChannelFactory::new("/bin/sh", vec!["-c".to_string(), "exit 3".to_string()]);
        let (sink, rx) = collecting_sink();
        let _channel = factory.launch(sink).unwrap();

        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ChannelEvent::Exit(status) => {
                    assert_eq!(status.code, Some(3));
                    assert_eq!(status.signal, None);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[test]
    fn data_arrives_before_exit() {
        let factory = ChildChannelFactory::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo last-words".to_string()],
        );
        let (sink, rx) = collecting_sink();
        let _channel = factory.launch(sink).unwrap();

        let mut bytes = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ChannelEvent::Data(chunk) => bytes.extend_from_slice(&chunk),
                ChannelEvent::Exit(status) => {
                    assert_eq!(status.code, Some(0));
                    break;
                }
                ChannelEvent::Drain => {}
            }
        }
        assert_eq!(bytes, b"last-words\n");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let factory = ChildChannelFactory::new("/nonexistent/worker-binary", Vec::new());
        let (sink, _rx) = collecting_sink();
        assert!(factory.launch(sink).is_err());
    }

    #[test]
    fn write_after_kill_is_rejected() {
        let factory = ChildChannelFactory::new("/bin/cat", Vec::new());
        let (sink, rx) = collecting_sink();
        let mut channel = factory.launch(sink).unwrap();

        channel.kill();
        assert!(channel.write(b"too late\n").is_err());

        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ChannelEvent::Exit(_) => break,
                _ => continue,
            }
        }
    }
}
