//! Spectral observables extracted from reduced and corrected Green's functions.
//!
//! Extraction is pure: every observable is computed from data that have been fully reduced over
//! k-points (and, for local quantities, corrected), and is immutable once built. Writing
//! observables to files is left to [`crate::report`].

mod charges;
mod dos;
mod spectral;

pub use charges::PartialCharges;
pub use dos::DensityOfStates;
pub use spectral::{SpectralContours, SpectralFunction};

#[cfg(test)]
#[path = "observables_tests.rs"]
mod observables_tests;

/// Integrates tabulated values over the given points with the trapezoidal rule.
pub fn integrate(points: &[f64], values: impl IntoIterator<Item = f64>) -> f64 {
    let values = values.into_iter().collect::<Vec<_>>();
    points
        .windows(2)
        .zip(values.windows(2))
        .map(|(w, v)| 0.5 * (w[1] - w[0]) * (v[0] + v[1]))
        .sum()
}
