pub mod cluster;
pub mod lamport_mutex;
pub mod process;

pub use lamport_mutex::LamportMutex;
pub use process::{Completion, Process};

use crate::error::Result;
use crate::order::{RequestRecord, Timestamp};

/// Where a process is in its request cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Requesting,
    Waiting,
    InCriticalSection,
    Releasing,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Idle => "IDLE",
            State::Requesting => "REQUESTING",
            State::Waiting => "WAITING",
            State::InCriticalSection => "IN_CRITICAL_SECTION",
            State::Releasing => "RELEASING",
        })
    }
}

/// Starvation Free Mutex over message passing.
///
/// The requirements for that are
/// 1. Mutual Exclusion - at most one process has `wait()` return before its `release()`.
/// 2. No Starvation - assuming reliable FIFO channels and that every holder eventually releases,
///    every `want_lock()` is followed by a `wait()` that returns.
pub trait NoStarveMutex {
    // Announce the request. Returns its place in the total order
    fn want_lock(&mut self) -> Result<RequestRecord>;
    // Block until the request is at the head of the queue
    fn wait(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<Timestamp>;

    // Nothing else runs on this process while `f` runs
    fn request_and_enter<R, F: FnOnce() -> R>(&mut self, f: F) -> Result<R> {
        self.want_lock()?;
        self.wait()?;
        let r = f();
        self.release()?;
        Ok(r)
    }
}
