//! Lifecycle supervisor for line-oriented JSON-RPC worker processes.
//!
//! The [`Supervisor`] owns one external worker process (an AI-generation
//! backend) reached over its stdio pipes. It frames the line-delimited RPC
//! protocol, correlates asynchronous requests to responses, reassembles
//! progressive partial results, respects OS-level write backpressure,
//! detects process death, and recovers via bounded exponential backoff —
//! while giving callers race-free completion and failure signals.
//!
//! Process I/O sits behind the [`channel::WorkerChannel`] trait, so the
//! supervisor can be exercised against a scripted channel without spawning
//! anything; [`child::ChildChannelFactory`] is the real stdio-pipe
//! implementation (Unix).

pub mod assembler;
pub mod channel;
#[cfg(unix)]
pub mod child;
pub mod config;
pub mod error;
pub mod events;
mod queue;
mod registry;
pub mod state;
pub mod supervisor;
mod timer;

pub use assembler::StreamAssembler;
pub use channel::{ChannelEvent, ChannelFactory, EventSink, ExitStatus, Writable, WorkerChannel};
#[cfg(unix)]
pub use child::ChildChannelFactory;
pub use config::SupervisorConfig;
pub use error::{SendError, StartError};
pub use events::{Subscription, SupervisorEvent};
pub use state::{ProcessState, Status};
pub use supervisor::{ResponseHandle, SendOptions, Supervisor};
