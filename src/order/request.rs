use super::{Pid, Timestamp};

/// One pending request for the critical section.
///
/// Derived `Ord` compares `timestamp` first, then `pid`. Since pids are unique,
/// two records from different processes never compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestRecord {
    pub timestamp: Timestamp,
    pub pid: Pid,
}

impl RequestRecord {
    pub fn new(timestamp: Timestamp, pid: Pid) -> Self {
        Self { timestamp, pid }
    }
}

impl std::fmt::Display for RequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.pid)
    }
}
