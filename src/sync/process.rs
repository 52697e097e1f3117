use std::collections::BTreeSet;

use tracing::info;

use super::lamport_mutex::{validate_peers, LamportMutex};
use super::NoStarveMutex;
use crate::error::{Error, Result};
use crate::net::Channel;
use crate::order::{Pid, RequestRecord, Timestamp};

/// Handed back once a process has done all its entries and every peer said `Done`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub pid: Pid,
    /// Own requests in the order they entered the critical section.
    pub granted: Vec<RequestRecord>,
    pub clock: Timestamp,
}

/// One peer of the protocol: configured with `setup`, then driven to completion by `run`.
pub struct Process<C: Channel> {
    pid: Pid,
    // Taken by `run`, so `None` means started
    channel: Option<C>,
    config: Option<(BTreeSet<Pid>, usize)>,
}

impl<C: Channel> Process<C> {
    pub fn new(pid: Pid, channel: C) -> Self {
        Self {
            pid,
            channel: Some(channel),
            config: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn setup<I>(&mut self, peers: I, iterations: usize) -> Result<()>
    where
        I: IntoIterator<Item = Pid>,
    {
        if self.channel.is_none() {
            return Err(Error::Configuration(format!("{} already ran", self.pid)));
        }
        if iterations == 0 {
            return Err(Error::Configuration(format!(
                "{} needs at least one request",
                self.pid
            )));
        }
        let peers: BTreeSet<_> = peers.into_iter().collect();
        validate_peers(self.pid, &peers)?;
        self.config = Some((peers, iterations));
        Ok(())
    }

    /// Enters the critical section `iterations` times, running `cs` once per entry,
    /// then waits at the termination barrier.
    pub fn run<F: FnMut()>(&mut self, mut cs: F) -> Result<Completion> {
        if self.channel.is_none() {
            return Err(Error::Configuration(format!("{} ran twice", self.pid)));
        }
        let (peers, iterations) = self
            .config
            .take()
            .ok_or_else(|| Error::Configuration(format!("{} ran before setup", self.pid)))?;
        let channel = self
            .channel
            .take()
            .ok_or_else(|| Error::Configuration(format!("{} ran twice", self.pid)))?;
        let mut mutex = LamportMutex::new(self.pid, peers, channel)?;

        for _ in 0..iterations {
            mutex.request_and_enter(&mut cs)?;
        }

        // Peers may still be contending, keep acking until they're all through
        mutex.broadcast_done()?;
        while !mutex.all_peers_done() {
            mutex.step()?;
        }
        info!(pid = %self.pid, clock = mutex.clock(), "terminating");

        Ok(Completion {
            pid: self.pid,
            granted: mutex.granted().to_vec(),
            clock: mutex.clock(),
        })
    }
}
