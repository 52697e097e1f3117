use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{Channel, Message};
use crate::error::{Error, Result};
use crate::order::Pid;

// How often a blocked `recv` checks for an abort
const ABORT_POLL: Duration = Duration::from_millis(20);

/// Fail-stop switch shared by every channel of one mesh.
///
/// Once tripped, any `recv` that finds its inbox empty fails instead of blocking.
/// Only the first caller is recorded.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<OnceLock<Pid>>);

impl AbortHandle {
    pub fn abort(&self, culprit: Pid) {
        let _ = self.0.set(culprit);
    }
    pub fn culprit(&self) -> Option<Pid> {
        self.0.get().copied()
    }
}

/// One process's end of a fully connected mesh built on `std::sync::mpsc`.
///
/// A single inbox is shared by all senders. mpsc keeps each sender's messages in
/// send order, which is exactly the per-link FIFO the mutex needs.
pub struct MpscChannel {
    pid: Pid,
    inbox: Receiver<Message>,
    links: BTreeMap<Pid, Sender<Message>>,
    abort: AbortHandle,
}

impl MpscChannel {
    pub fn pid(&self) -> Pid {
        self.pid
    }
    pub fn peers(&self) -> impl Iterator<Item = Pid> + '_ {
        self.links.keys().copied()
    }
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl Channel for MpscChannel {
    fn send(&mut self, to: Pid, msg: Message) -> Result<()> {
        let link = self
            .links
            .get(&to)
            .ok_or_else(|| Error::ChannelFailure(format!("{} has no link to {to}", self.pid)))?;
        link.send(msg).map_err(|e| {
            Error::ChannelFailure(format!(
                "{} -> {to}: {} dropped, receiver gone",
                self.pid,
                e.0.kind()
            ))
        })
    }
    fn recv(&mut self) -> Result<Message> {
        loop {
            match self.inbox.recv_timeout(ABORT_POLL) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(culprit) = self.abort.culprit() {
                        return Err(Error::ChannelFailure(format!(
                            "{}: mesh aborted by {culprit}",
                            self.pid
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::ChannelFailure(format!(
                        "{}: every sender disconnected",
                        self.pid
                    )));
                }
            }
        }
    }
}

/// Builds `n_procs` channels, the `i`-th owned by `Pid(i)` and linked to all others.
pub fn mesh(n_procs: usize) -> Vec<MpscChannel> {
    let abort = AbortHandle::default();
    let (txs, rxs): (Vec<_>, Vec<_>) = (0..n_procs).map(|_| channel()).unzip();
    rxs.into_iter()
        .enumerate()
        .map(|(i, inbox)| MpscChannel {
            pid: Pid(i),
            inbox,
            links: txs
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(j, tx)| (Pid(j), tx.clone()))
                .collect(),
            abort: abort.clone(),
        })
        .collect()
}
