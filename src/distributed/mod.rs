//! Workers, collectives and the static partition of k-points.
//!
//! A sweep over k-points is carried out by a fixed number of workers, each identified by a rank.
//! Workers share no mutable state: they communicate only through the two collectives of the
//! [`Communicator`] trait, a barrier and an element-wise sum all-reduce.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{self, format_err};
use num_complex::Complex;

use crate::error::SpectralError;

mod threaded;

pub use threaded::{run_workers, ThreadedCommunicator};


// ================
// DesignatedWriter
// ================

/// Token held only by the designated worker. Operations with persistent side effects (report
/// files, archive write-back) require it.
#[derive(Debug)]
pub struct DesignatedWriter {
    _private: (),
}

// ============
// Communicator
// ============

/// Trait for the collectives available to the workers of a distributed sweep.
///
/// Collectives block until every worker has entered them. After any worker calls
/// [`Self::abort`], every pending and every later collective fails on every worker.
pub trait Communicator: Sync {
    /// The rank of this worker, in `0..size`.
    fn rank(&self) -> usize;

    /// The number of workers.
    fn size(&self) -> usize;

    /// Blocks until every worker has reached the barrier.
    fn barrier(&self) -> Result<(), anyhow::Error>;

    /// Replaces `buf` on every worker by the element-wise sum of `buf` over all workers. The sum
    /// is accumulated in rank order, so that every worker receives an identical result.
    fn all_reduce_sum_f64(&self, buf: &mut [f64]) -> Result<(), anyhow::Error>;

    /// Abandons all collectives because this worker cannot continue.
    fn abort(&self, reason: &str);

    /// Complex version of [`Self::all_reduce_sum_f64`].
    fn all_reduce_sum_c64(&self, buf: &mut [Complex<f64>]) -> Result<(), anyhow::Error> {
        let mut flat = buf
            .iter()
            .flat_map(|x| [x.re, x.im])
            .collect::<Vec<_>>();
        self.all_reduce_sum_f64(&mut flat)?;
        buf.iter_mut()
            .zip(flat.chunks_exact(2))
            .for_each(|(x, pair)| *x = Complex::new(pair[0], pair[1]));
        Ok(())
    }

    /// Returns `true` if this worker is the designated writer.
    fn is_designated(&self) -> bool {
        self.rank() == 0
    }

    /// Returns the designated-writer token on rank 0 and `None` on every other worker.
    fn designated_writer(&self) -> Option<DesignatedWriter> {
        self.is_designated()
            .then_some(DesignatedWriter { _private: () })
    }
}

// ==================
// SerialCommunicator
// ==================

/// A communicator for a single worker.
#[derive(Debug, Default)]
pub struct SerialCommunicator {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), anyhow::Error> {
        if self.aborted.load(Ordering::SeqCst) {
            let reason = self
                .reason
                .lock()
                .map_err(|_| format_err!("Abort reason lock poisoned."))?
                .clone()
                .unwrap_or_default();
            Err(format_err!(SpectralError::WorkerAborted(0, reason)))
        } else {
            Ok(())
        }
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), anyhow::Error> {
        self.check()
    }

    fn all_reduce_sum_f64(&self, _buf: &mut [f64]) -> Result<(), anyhow::Error> {
        self.check()
    }

    fn abort(&self, reason: &str) {
        if let Ok(mut stored) = self.reason.lock() {
            stored.get_or_insert_with(|| reason.to_string());
        }
        self.aborted.store(true, Ordering::SeqCst);
    }
}

// ==========
// KPartition
// ==========

/// Structure for a static partition of `0..n_k` into contiguous, disjoint slices, one per
/// worker. Slice sizes differ by at most one; the first `n_k % n_workers` workers receive the
/// larger slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KPartition {
    n_k: usize,
    n_workers: usize,
}

impl KPartition {
    /// Creates a partition.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if there are no workers.
    pub fn new(n_k: usize, n_workers: usize) -> Result<Self, SpectralError> {
        if n_workers == 0 {
            return Err(SpectralError::Configuration(
                "at least one worker is required".to_string(),
            ));
        }
        Ok(Self { n_k, n_workers })
    }

    pub fn n_k(&self) -> usize {
        self.n_k
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Returns the k-points owned by a worker. The range is empty for ranks beyond the number of
    /// k-points.
    pub fn slice(&self, rank: usize) -> Range<usize> {
        let base = self.n_k / self.n_workers;
        let extra = self.n_k % self.n_workers;
        let start = rank * base + rank.min(extra);
        let len = base + usize::from(rank < extra);
        start.min(self.n_k)..(start + len).min(self.n_k)
    }

    /// Returns the rank that owns a k-point.
    pub fn owner(&self, ik: usize) -> Option<usize> {
        if ik >= self.n_k {
            return None;
        }
        let base = self.n_k / self.n_workers;
        let extra = self.n_k % self.n_workers;
        let n_large = extra * (base + 1);
        if ik < n_large {
            Some(ik / (base + 1))
        } else {
            Some(extra + (ik - n_large) / base)
        }
    }
}

impl fmt::Display for KPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} k-point(s) over {} worker(s)",
            self.n_k, self.n_workers
        )
    }
}
