//! Error taxonomy for spectral calculations.

use std::error::Error;
use std::fmt;

use itertools::Itertools;

/// An enumerated type for errors that abort a spectral calculation.
///
/// All variants except [`SpectralError::WorkerAborted`] are raised during validation, before any
/// k-point work is distributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpectralError {
    /// Variant for an invalid or backend-mismatched scheme or parameter.
    Configuration(String),

    /// Variant for required archive items that are absent. The first field names the archive
    /// group and the second lists every missing item.
    MissingInput(String, Vec<String>),

    /// Variant for a frequency mesh of the wrong kind for the requested computation. The fields
    /// give the required and the supplied kinds.
    MeshType(String, String),

    /// Variant for a shell index outside `0..n_shells`. The fields give the index and the number
    /// of shells.
    ShellIndex(usize, usize),

    /// Variant for a worker that failed during a distributed sweep. The fields give the rank of
    /// the failing worker and its reason.
    WorkerAborted(usize, String),
}

impl fmt::Display for SpectralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Self::MissingInput(group, items) => write!(
                f,
                "Missing input error: item(s) {} not found in archive group `{group}`",
                items.iter().map(|item| format!("`{item}`")).join(", ")
            ),
            Self::MeshType(required, found) => write!(
                f,
                "Mesh type error: a {required} frequency mesh is required, but a {found} mesh was supplied"
            ),
            Self::ShellIndex(index, n_shells) => write!(
                f,
                "Shell index error: shell index {index} is out of range for {n_shells} shell(s)"
            ),
            Self::WorkerAborted(rank, reason) => {
                write!(f, "Worker {rank} aborted the distributed sweep: {reason}")
            }
        }
    }
}

impl Error for SpectralError {}
