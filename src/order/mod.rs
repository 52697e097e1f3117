pub mod lamport_clock;
pub mod request;

pub use lamport_clock::LamportClock;
pub use request::RequestRecord;

pub type Timestamp = u64;

/// Identity of a process. Unique across the peer set and totally ordered, so it
/// doubles as the tie-breaker between requests stamped with the same time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// Scalar clocks are totally ordered, unlike vector clocks
pub trait LogicalClock {
    // Local event, i.e. a send. Returns the stamp for it
    fn tick(&mut self) -> Timestamp;
    // Receipt of a message stamped `remote`. Must run before stamping any reply
    fn observe(&mut self, remote: Timestamp) -> Timestamp;
    fn now(&self) -> Timestamp;
}
