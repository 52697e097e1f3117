pub mod mpsc;

use crate::error::Result;
use crate::order::{Pid, Timestamp};

pub use mpsc::{mesh, AbortHandle, MpscChannel};

/// Everything a process ever puts on the wire. Each kind carries the sender's
/// clock at the moment of sending and the sender's identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// Broadcast on wanting the critical section; `timestamp` is the request's stamp.
    Request { timestamp: Timestamp, from: Pid },
    /// Reply to a request, stamped with the acker's own clock.
    Ack { timestamp: Timestamp, from: Pid },
    /// Broadcast on leaving the critical section.
    Release { timestamp: Timestamp, from: Pid },
    /// Broadcast once all requests are done. Nothing but acks follows it.
    Done { timestamp: Timestamp, from: Pid },
}

impl Message {
    pub fn timestamp(&self) -> Timestamp {
        match *self {
            Message::Request { timestamp, .. }
            | Message::Ack { timestamp, .. }
            | Message::Release { timestamp, .. }
            | Message::Done { timestamp, .. } => timestamp,
        }
    }
    pub fn sender(&self) -> Pid {
        match *self {
            Message::Request { from, .. }
            | Message::Ack { from, .. }
            | Message::Release { from, .. }
            | Message::Done { from, .. } => from,
        }
    }
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "REQUEST",
            Message::Ack { .. } => "ACK",
            Message::Release { .. } => "RELEASE",
            Message::Done { .. } => "DONE",
        }
    }
}

/// Reliable link from one process to each of its peers.
///
/// Messages from a given sender must be received in the order that sender sent
/// them. Interleaving across senders is unconstrained. The mutex relies on this:
/// once a later message from `p` arrives, no earlier request from `p` is in flight.
pub trait Channel {
    // Must not block
    fn send(&mut self, to: Pid, msg: Message) -> Result<()>;
    // Blocks until the next message arrives
    fn recv(&mut self) -> Result<Message>;

    fn broadcast<'a, I>(&mut self, to: I, msg: Message) -> Result<()>
    where
        I: IntoIterator<Item = &'a Pid>,
    {
        to.into_iter().try_for_each(|&p| self.send(p, msg))
    }
}
