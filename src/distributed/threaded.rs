//! Workers realised as scoped operating-system threads.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use anyhow::{self, format_err, Context};
use log;

use crate::distributed::Communicator;
use crate::error::SpectralError;

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    /// Workers are depositing their contributions.
    Gathering,

    /// The reduced result is available and is being collected by every worker.
    Distributing,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    contributions: Vec<Option<Vec<f64>>>,
    n_arrived: usize,
    n_departed: usize,
    result: Vec<f64>,
    aborted: Option<(usize, String)>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<State>,
    cvar: Condvar,
}

/// A communicator connecting workers that run as threads of the same process.
#[derive(Debug, Clone)]
pub struct ThreadedCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadedCommunicator {
    /// Creates one connected communicator per worker.
    pub fn group(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(State {
                phase: Phase::Gathering,
                contributions: vec![None; size],
                n_arrived: 0,
                n_departed: 0,
                result: vec![],
                aborted: None,
            }),
            cvar: Condvar::new(),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, anyhow::Error> {
        self.shared
            .state
            .lock()
            .map_err(|_| format_err!("Communicator state lock poisoned."))
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> Result<MutexGuard<'a, State>, anyhow::Error> {
        self.shared
            .cvar
            .wait(guard)
            .map_err(|_| format_err!("Communicator state lock poisoned."))
    }

    fn check_aborted(state: &State) -> Result<(), anyhow::Error> {
        match &state.aborted {
            Some((rank, reason)) => Err(format_err!(SpectralError::WorkerAborted(
                *rank,
                reason.clone()
            ))),
            None => Ok(()),
        }
    }

    /// Deposits a contribution, waits for every worker, and returns the rank-ordered sum.
    fn collective(&self, contribution: Vec<f64>) -> Result<Vec<f64>, anyhow::Error> {
        let mut state = self.lock()?;

        // A previous collective may still be handing out its result.
        while state.phase == Phase::Distributing && state.aborted.is_none() {
            state = self.wait(state)?;
        }
        Self::check_aborted(&state)?;

        if let Some(len) = state
            .contributions
            .iter()
            .flatten()
            .map(|other| other.len())
            .next()
        {
            if len != contribution.len() {
                let reason = format!(
                    "collective buffer of length {} on worker {} does not match length {len}",
                    contribution.len(),
                    self.rank
                );
                state.aborted = Some((self.rank, reason.clone()));
                self.shared.cvar.notify_all();
                return Err(format_err!(SpectralError::WorkerAborted(self.rank, reason)));
            }
        }
        state.contributions[self.rank] = Some(contribution);
        state.n_arrived += 1;

        if state.n_arrived == self.shared.size {
            let mut sum = vec![];
            for part in state.contributions.iter_mut() {
                let part = part.take().unwrap_or_default();
                if sum.is_empty() {
                    sum = part;
                } else {
                    sum.iter_mut().zip(part.iter()).for_each(|(s, x)| *s += x);
                }
            }
            state.result = sum;
            state.phase = Phase::Distributing;
            state.n_departed = 0;
            self.shared.cvar.notify_all();
        } else {
            while state.phase == Phase::Gathering && state.aborted.is_none() {
                state = self.wait(state)?;
            }
            Self::check_aborted(&state)?;
        }

        let result = state.result.clone();
        state.n_departed += 1;
        if state.n_departed == self.shared.size {
            state.phase = Phase::Gathering;
            state.n_arrived = 0;
            state.result = vec![];
            self.shared.cvar.notify_all();
        }
        Ok(result)
    }
}

impl Communicator for ThreadedCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), anyhow::Error> {
        self.collective(vec![]).map(|_| ())
    }

    fn all_reduce_sum_f64(&self, buf: &mut [f64]) -> Result<(), anyhow::Error> {
        let result = self.collective(buf.to_vec())?;
        buf.copy_from_slice(&result);
        Ok(())
    }

    fn abort(&self, reason: &str) {
        if let Ok(mut state) = self.shared.state.lock() {
            if state.aborted.is_none() {
                log::debug!("Worker {} aborts the communicator: {reason}", self.rank);
                state.aborted = Some((self.rank, reason.to_string()));
            }
            self.shared.cvar.notify_all();
        }
    }
}

/// Aborts the communicator if the owning worker unwinds.
struct AbortOnPanic<'a>(&'a ThreadedCommunicator);

impl<'a> Drop for AbortOnPanic<'a> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("worker panicked");
        }
    }
}

/// Runs `f` on `n_workers` workers, each on its own scoped thread with a connected
/// [`ThreadedCommunicator`], and returns the per-worker results in rank order.
///
/// A worker whose `f` fails aborts the communicator, so that every other worker's next
/// collective fails as well and no worker is left waiting.
///
/// # Errors
///
/// Errors with [`SpectralError::Configuration`] if `n_workers` is zero. If any worker fails, the
/// error of the worker that failed first is returned, with the failing rank attached as context.
pub fn run_workers<T, F>(n_workers: usize, f: F) -> Result<Vec<T>, anyhow::Error>
where
    T: Send,
    F: Fn(&ThreadedCommunicator) -> Result<T, anyhow::Error> + Sync,
{
    if n_workers == 0 {
        return Err(format_err!(SpectralError::Configuration(
            "at least one worker is required".to_string()
        )));
    }
    let comms = ThreadedCommunicator::group(n_workers);
    let outcomes = thread::scope(|scope| {
        let handles = comms
            .iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || {
                    let _guard = AbortOnPanic(comm);
                    let outcome = f(comm);
                    if let Err(err) = &outcome {
                        comm.abort(&format!("{err:#}"));
                    }
                    outcome
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(format_err!("Worker thread panicked.")))
            })
            .collect::<Vec<_>>()
    });

    // Report the root cause rather than the collective failures it triggered on other workers.
    let root_rank = comms
        .first()
        .and_then(|comm| comm.lock().ok().and_then(|state| state.aborted.clone()))
        .map(|(rank, _)| rank);
    let mut results = Vec::with_capacity(n_workers);
    let mut first_err = None;
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(res) => results.push(res),
            Err(err) => {
                if first_err.is_none() || Some(rank) == root_rank {
                    first_err = Some((rank, err));
                }
            }
        }
    }
    match first_err {
        Some((rank, err)) => {
            Err(err).with_context(|| format!("Distributed sweep failed on worker {rank}"))
        }
        None => Ok(results),
    }
}
