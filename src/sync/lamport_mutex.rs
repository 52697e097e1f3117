use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use super::{NoStarveMutex, State};
use crate::error::{Error, Result};
use crate::net::{Channel, Message};
use crate::order::{LamportClock, LogicalClock, Pid, RequestRecord, Timestamp};

/// Lamport's mutual exclusion for a single process.
///
/// The wait condition is kept incrementally instead of rescanning every message
/// ever received:
/// - `queue` holds, per peer, the request it has outstanding (at most one, since a
///   peer only requests again after its release, and FIFO delivers the release first).
///   "Every request earlier than mine was released" is then "no entry in `queue`
///   precedes mine". A release must clear the entry or the peer blocks us forever.
/// - `acks` holds the peers that sent an ack, or a request, stamped later than our
///   own request. With FIFO links that means any earlier request of theirs has
///   already reached `queue`.
pub struct LamportMutex<C: Channel> {
    pid: Pid,
    peers: BTreeSet<Pid>,
    clock: LamportClock,
    state: State,
    own: Option<RequestRecord>,
    acks: BTreeSet<Pid>,
    queue: BTreeMap<Pid, Option<RequestRecord>>,
    // Latest stamp per sender, to reject anything that isn't strictly later
    last_seen: BTreeMap<Pid, Timestamp>,
    done: BTreeSet<Pid>,
    granted: Vec<RequestRecord>,
    channel: C,
}

pub(crate) fn validate_peers(pid: Pid, peers: &BTreeSet<Pid>) -> Result<()> {
    if peers.is_empty() {
        return Err(Error::Configuration(format!("{pid} has an empty peer set")));
    }
    if peers.contains(&pid) {
        return Err(Error::Configuration(format!(
            "{pid} cannot be its own peer"
        )));
    }
    Ok(())
}

impl<C: Channel> LamportMutex<C> {
    pub fn new(pid: Pid, peers: BTreeSet<Pid>, channel: C) -> Result<Self> {
        validate_peers(pid, &peers)?;
        Ok(Self {
            pid,
            queue: peers.iter().map(|&p| (p, None)).collect(),
            peers,
            clock: LamportClock::new(),
            state: State::Idle,
            own: None,
            acks: BTreeSet::new(),
            last_seen: BTreeMap::new(),
            done: BTreeSet::new(),
            granted: Vec::new(),
            channel,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn clock(&self) -> Timestamp {
        self.clock.now()
    }
    /// Requests that made it into the critical section, in entry order.
    pub fn granted(&self) -> &[RequestRecord] {
        &self.granted
    }
    pub fn all_peers_done(&self) -> bool {
        self.done == self.peers
    }

    /// All peers have acknowledged our request and none holds an earlier one.
    pub fn may_enter(&self) -> bool {
        let Some(own) = self.own else {
            return false;
        };
        self.acks == self.peers && self.queue.values().flatten().all(|r| own < *r)
    }

    /// Blocks for the next message and applies it.
    pub fn step(&mut self) -> Result<()> {
        let msg = self.channel.recv()?;
        self.handle(msg)
    }

    /// Applies one message. A violation is reported before any state changes.
    pub fn handle(&mut self, msg: Message) -> Result<()> {
        self.check(&msg)?;
        let from = msg.sender();
        let ts = msg.timestamp();
        self.last_seen.insert(from, ts);
        self.clock.observe(ts);
        debug!(pid = %self.pid, %from, ts, kind = msg.kind(), clock = self.clock.now(), "recv");

        match msg {
            Message::Request { timestamp, from } => {
                self.queue.insert(from, Some(RequestRecord::new(timestamp, from)));
                if self.own.is_some_and(|own| timestamp > own.timestamp) {
                    self.acks.insert(from);
                }
                // Unconditional: this is not consent, the wait condition does the excluding
                let ack = Message::Ack {
                    timestamp: self.clock.tick(),
                    from: self.pid,
                };
                self.channel.send(from, ack)?;
            }
            Message::Ack { timestamp, from } => match self.own {
                Some(own) if timestamp > own.timestamp => {
                    self.acks.insert(from);
                }
                // Can outlive its request when a later peer request already counted as the ack
                _ => debug!(pid = %self.pid, %from, timestamp, "stale ack"),
            },
            Message::Release { from, .. } => {
                self.queue.insert(from, None);
            }
            Message::Done { from, .. } => {
                self.done.insert(from);
            }
        }
        Ok(())
    }

    fn check(&self, msg: &Message) -> Result<()> {
        let from = msg.sender();
        let ts = msg.timestamp();
        if !self.peers.contains(&from) {
            return Err(Error::violation(
                from,
                format!("{} from outside the peer set", msg.kind()),
            ));
        }
        let last = self.last_seen.get(&from).copied().unwrap_or_default();
        if ts <= last {
            return Err(Error::violation(
                from,
                format!("{} stamped {ts}, not after previous {last}", msg.kind()),
            ));
        }
        let pending = self.queue.get(&from).copied().flatten();
        match *msg {
            Message::Request { timestamp, .. } => {
                if self.done.contains(&from) {
                    return Err(Error::violation(from, "request after done"));
                }
                if let Some(pending) = pending {
                    let r = RequestRecord::new(timestamp, from);
                    return Err(Error::violation(
                        from,
                        format!("request {r} while {pending} is pending"),
                    ));
                }
            }
            Message::Ack { .. } => {}
            Message::Release { .. } => {
                if pending.is_none() {
                    return Err(Error::violation(from, "release without a pending request"));
                }
            }
            Message::Done { .. } => {
                if let Some(pending) = pending {
                    return Err(Error::violation(
                        from,
                        format!("done while {pending} is pending"),
                    ));
                }
                if self.done.contains(&from) {
                    return Err(Error::violation(from, "done twice"));
                }
            }
        }
        Ok(())
    }

    pub fn broadcast_done(&mut self) -> Result<()> {
        self.expect_state("finish", State::Idle)?;
        let done = Message::Done {
            timestamp: self.clock.tick(),
            from: self.pid,
        };
        self.channel.broadcast(&self.peers, done)
    }

    fn expect_state(&self, op: &'static str, expected: State) -> Result<()> {
        if self.state != expected {
            return Err(Error::IllegalState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }
}

impl<C: Channel> NoStarveMutex for LamportMutex<C> {
    fn want_lock(&mut self) -> Result<RequestRecord> {
        self.expect_state("request", State::Idle)?;
        self.state = State::Requesting;
        let own = RequestRecord::new(self.clock.tick(), self.pid);
        self.own = Some(own);
        self.acks.clear();
        debug!(pid = %self.pid, request = %own, "requesting");
        self.channel.broadcast(
            &self.peers,
            Message::Request {
                timestamp: own.timestamp,
                from: self.pid,
            },
        )?;
        self.state = State::Waiting;
        Ok(own)
    }

    fn wait(&mut self) -> Result<()> {
        self.expect_state("wait", State::Waiting)?;
        while !self.may_enter() {
            self.step()?;
        }
        if let Some(own) = self.own {
            self.granted.push(own);
            info!(pid = %self.pid, request = %own, "entering critical section");
        }
        self.state = State::InCriticalSection;
        Ok(())
    }

    fn release(&mut self) -> Result<Timestamp> {
        self.expect_state("release", State::InCriticalSection)?;
        self.state = State::Releasing;
        let ts = self.clock.tick();
        self.own = None;
        self.acks.clear();
        self.channel.broadcast(
            &self.peers,
            Message::Release {
                timestamp: ts,
                from: self.pid,
            },
        )?;
        debug!(pid = %self.pid, ts, "released");
        self.state = State::Idle;
        Ok(ts)
    }
}
