use tracing::{info, warn};

use super::{Completion, Process};
use crate::error::{Error, Result};
use crate::net::{mesh, AbortHandle};
use crate::order::Pid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub procs: usize,
    /// Critical section entries per process.
    pub requests: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            procs: 10,
            requests: 1,
        }
    }
}

/// Trips the mesh's abort unless disarmed, so a process that panics or errors
/// takes its peers down with it instead of leaving them blocked.
struct FailStop {
    pid: Pid,
    abort: AbortHandle,
    armed: bool,
}

impl Drop for FailStop {
    fn drop(&mut self) {
        if self.armed {
            self.abort.abort(self.pid);
        }
    }
}

/// Runs `config.procs` processes on their own threads over a FIFO mesh, each
/// entering the critical section `config.requests` times and calling `cs` with
/// its pid while inside. Returns once every process passed the termination barrier.
///
/// If a process panics or fails, the others are aborted. The panic is resumed,
/// otherwise the error of the process that failed first is returned.
pub fn run<F>(config: &ClusterConfig, cs: F) -> Result<Vec<Completion>>
where
    F: Fn(Pid) + Sync,
{
    if config.procs < 2 {
        return Err(Error::Configuration(format!(
            "need at least 2 processes, got {}",
            config.procs
        )));
    }
    let chans = mesh(config.procs);
    let abort = chans[0].abort_handle();
    let procs = chans
        .into_iter()
        .map(|ch| {
            let peers: Vec<_> = ch.peers().collect();
            let mut p = Process::new(ch.pid(), ch);
            p.setup(peers, config.requests)?;
            Ok(p)
        })
        .collect::<Result<Vec<_>>>()?;
    info!(procs = config.procs, requests = config.requests, "starting");

    let cs = &cs;
    let outcomes = std::thread::scope(|s| -> Result<Vec<_>> {
        let ths = procs
            .into_iter()
            .map(|mut p| {
                let pid = p.pid();
                let abort = abort.clone();
                std::thread::Builder::new()
                    .name(pid.to_string())
                    .spawn_scoped(s, move || {
                        let mut guard = FailStop {
                            pid,
                            abort,
                            armed: true,
                        };
                        let r = p.run(|| cs(pid));
                        guard.armed = r.is_err();
                        r
                    })
                    .map(|th| (pid, th))
            })
            .collect::<std::io::Result<Vec<_>>>();
        let ths = match ths {
            Ok(ths) => ths,
            Err(e) => {
                // Unblock whatever did get spawned before the scope joins it
                abort.abort(Pid(config.procs));
                return Err(e.into());
            }
        };
        Ok(ths.into_iter().map(|(pid, th)| (pid, th.join())).collect())
    })?;

    let mut done = Vec::with_capacity(outcomes.len());
    let mut failure = None;
    for (pid, outcome) in outcomes {
        match outcome {
            Ok(Ok(c)) => done.push(c),
            Ok(Err(e)) => {
                warn!(%pid, error = %e, "process failed");
                if failure.is_none() || abort.culprit() == Some(pid) {
                    failure = Some(e);
                }
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(done),
    }
}

#[cfg(test)]
mod tests {
    use super::{run, ClusterConfig};
    use crate::error::Error;
    use crate::order::{Pid, RequestRecord};
    use rand::Rng;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };
    use std::time::{Duration, Instant};

    // Flags a second occupant and logs entries in order
    #[derive(Default)]
    struct Occupancy {
        inside: AtomicBool,
        overlaps: AtomicUsize,
        log: Mutex<Vec<(Pid, Instant, Instant)>>,
    }
    impl Occupancy {
        fn enter<F: FnOnce()>(&self, pid: Pid, work: F) {
            if self.inside.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let entry = Instant::now();
            work();
            let exit = Instant::now();
            self.log.lock().unwrap().push((pid, entry, exit));
            self.inside.store(false, Ordering::SeqCst);
        }
        fn entries(&self) -> Vec<(Pid, Instant, Instant)> {
            self.log.lock().unwrap().clone()
        }
    }

    fn rand_timeout(max_ms: u64) {
        let mut rng = rand::thread_rng();
        let t = rng.gen_range(0..=max_ms);
        std::thread::sleep(Duration::from_millis(t));
    }

    // Every grant across the cluster, sorted by the total order
    fn sorted_grants(done: &[crate::sync::Completion]) -> Vec<RequestRecord> {
        let mut all: Vec<_> = done.iter().flat_map(|c| c.granted.clone()).collect();
        all.sort();
        all
    }

    #[test]
    fn rejects_tiny_clusters() {
        for procs in [0, 1] {
            let config = ClusterConfig { procs, requests: 1 };
            assert!(matches!(run(&config, |_| {}), Err(Error::Configuration(_))));
        }
        let config = ClusterConfig {
            procs: 3,
            requests: 0,
        };
        assert!(matches!(run(&config, |_| {}), Err(Error::Configuration(_))));
    }

    #[test]
    fn three_processes_once_each() {
        let occ = Occupancy::default();
        let config = ClusterConfig {
            procs: 3,
            requests: 1,
        };
        let done = run(&config, |pid| occ.enter(pid, || rand_timeout(20))).unwrap();

        let entries = occ.entries();
        assert_eq!(entries.len(), 3);
        let mut pids: Vec<_> = entries.iter().map(|e| e.0).collect();
        pids.sort();
        assert_eq!(pids, [Pid(0), Pid(1), Pid(2)]);

        // Entry order is the ascending order of requests
        let by_request: Vec<_> = sorted_grants(&done).iter().map(|r| r.pid).collect();
        let by_entry: Vec<_> = entries.iter().map(|e| e.0).collect();
        assert_eq!(by_entry, by_request);
        assert_eq!(occ.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn two_processes_twice_never_interleave() {
        let occ = Occupancy::default();
        let config = ClusterConfig {
            procs: 2,
            requests: 2,
        };
        let done = run(&config, |pid| occ.enter(pid, || rand_timeout(10))).unwrap();

        let entries = occ.entries();
        assert_eq!(entries.len(), 4);
        assert!(done.iter().all(|c| c.granted.len() == 2));
        assert!(entries.iter().zip(&entries[1..]).all(|(s, t)| s.2 <= t.1));
        assert_eq!(occ.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mutual_exclusion() {
        let mut rng = rand::thread_rng();
        let config = ClusterConfig {
            procs: rng.gen_range(2..=8),
            requests: rng.gen_range(1..=5),
        };
        let counter = Mutex::new(0usize);
        let occ = Occupancy::default();
        let done = run(&config, |pid| {
            occ.enter(pid, || {
                // Split read-modify-write, lost updates show up if two run at once
                let c = *counter.lock().unwrap();
                std::thread::yield_now();
                *counter.lock().unwrap() = c + 1;
            })
        })
        .unwrap();

        let total = config.procs * config.requests;
        assert_eq!(*counter.lock().unwrap(), total);
        assert_eq!(occ.overlaps.load(Ordering::SeqCst), 0);

        // Own grants are in program order
        for c in &done {
            assert_eq!(c.granted.len(), config.requests);
            assert!(c.granted.iter().zip(&c.granted[1..]).all(|(s, t)| s < t));
        }
        // No two requests tie, and entries follow the total order
        let grants = sorted_grants(&done);
        assert!(grants.iter().zip(&grants[1..]).all(|(s, t)| s < t));
        let by_entry: Vec<_> = occ.entries().iter().map(|e| e.0).collect();
        let by_request: Vec<_> = grants.iter().map(|r| r.pid).collect();
        assert_eq!(by_entry, by_request);
    }

    #[test]
    fn no_starvation() {
        let config = ClusterConfig {
            procs: 5,
            requests: 3,
        };
        let per_pid: Vec<_> = (0..config.procs).map(|_| AtomicUsize::new(0)).collect();
        let done = run(&config, |pid| {
            per_pid[pid.0].fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(done.len(), config.procs);
        assert!(per_pid
            .iter()
            .all(|n| n.load(Ordering::SeqCst) == config.requests));
    }

    #[test]
    fn panicking_process_stops_the_cluster() {
        let (tx, rx) = std::sync::mpsc::channel();
        let th = std::thread::spawn(move || {
            let config = ClusterConfig {
                procs: 3,
                requests: 2,
            };
            let r = run(&config, |pid| {
                if pid == Pid(1) {
                    panic!("{pid} gave up");
                }
            });
            // Only reached if the panic was swallowed
            let _ = tx.send(r.is_ok());
        });

        // The sender is dropped by the unwinding thread instead of sending
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(10)),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected)
        );
        let panic = th.join().unwrap_err();
        assert_eq!(panic.downcast_ref::<String>().unwrap(), "p1 gave up");
    }
}
