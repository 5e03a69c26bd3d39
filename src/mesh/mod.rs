//! Frequency meshes on which Green's functions are tabulated.

use std::f64::consts::PI;
use std::fmt;

use anyhow::format_err;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::SpectralError;


/// An enumerated type for the two kinds of frequency axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshKind {
    /// Variant for real frequencies.
    Real,

    /// Variant for fermionic Matsubara frequencies.
    Imaginary,
}

impl fmt::Display for MeshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshKind::Real => write!(f, "real"),
            MeshKind::Imaginary => write!(f, "imaginary"),
        }
    }
}

/// Structure for an ordered, immutable set of frequency points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyMesh {
    kind: MeshKind,

    /// The real-valued frequencies. For Matsubara meshes these are the $`\omega_n`$ of
    /// $`i\omega_n`$.
    points: Vec<f64>,

    /// Inverse temperature, only present for Matsubara meshes.
    beta: Option<f64>,
}

impl FrequencyMesh {
    /// Constructs an evenly spaced real-frequency mesh including both end points.
    ///
    /// # Errors
    ///
    /// Errors if fewer than two points are requested or if the bounds are not increasing.
    pub fn real(w_min: f64, w_max: f64, n_points: usize) -> Result<Self, anyhow::Error> {
        if n_points < 2 || w_max <= w_min {
            return Err(format_err!(SpectralError::Configuration(format!(
                "a real-frequency mesh needs at least two points and increasing bounds, got \
                [{w_min}, {w_max}] with {n_points} point(s)"
            ))));
        }
        let step = (w_max - w_min) / (n_points - 1) as f64;
        let points = (0..n_points)
            .map(|i| w_min + step * i as f64)
            .collect::<Vec<_>>();
        Ok(Self {
            kind: MeshKind::Real,
            points,
            beta: None,
        })
    }

    /// Constructs a fermionic Matsubara mesh with $`\omega_n = (2n+1)\pi/\beta`$ for
    /// $`n = -n_{i\omega}, \ldots, n_{i\omega} - 1`$.
    pub fn matsubara(beta: f64, n_iw: usize) -> Result<Self, anyhow::Error> {
        if beta <= 0.0 || n_iw == 0 {
            return Err(format_err!(SpectralError::Configuration(format!(
                "a Matsubara mesh needs a positive inverse temperature and at least one \
                frequency, got beta = {beta} and n_iw = {n_iw}"
            ))));
        }
        let n_iw = n_iw as i64;
        let points = (-n_iw..n_iw)
            .map(|n| (2 * n + 1) as f64 * PI / beta)
            .collect::<Vec<_>>();
        Ok(Self {
            kind: MeshKind::Imaginary,
            points,
            beta: Some(beta),
        })
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Returns the inverse temperature of a Matsubara mesh.
    pub fn beta(&self) -> Option<f64> {
        self.beta
    }

    /// Returns the first and last frequencies.
    pub fn bounds(&self) -> (f64, f64) {
        (
            self.points.first().copied().unwrap_or(0.0),
            self.points.last().copied().unwrap_or(0.0),
        )
    }

    /// Returns the complex argument $`z`$ at which a Green's function is evaluated at point `i`:
    /// $`\omega + i\eta`$ on a real mesh and $`i\omega_n`$ on a Matsubara mesh.
    pub fn complex_point(&self, i: usize, broadening: f64) -> Complex<f64> {
        match self.kind {
            MeshKind::Real => Complex::new(self.points[i], broadening),
            MeshKind::Imaginary => Complex::new(0.0, self.points[i]),
        }
    }

    /// Checks that this mesh is of the required kind.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MeshType`] otherwise.
    pub fn require_kind(&self, required: MeshKind) -> Result<(), SpectralError> {
        if self.kind == required {
            Ok(())
        } else {
            Err(SpectralError::MeshType(
                required.to_string(),
                self.kind.to_string(),
            ))
        }
    }

    /// Returns the indices of the points lying strictly inside `(w_min, w_max)`.
    pub fn window_indices(&self, w_min: f64, w_max: f64) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, w)| (*w > w_min && *w < w_max).then_some(i))
            .collect()
    }

    /// Returns the default plotting window, which encloses every mesh point.
    pub fn default_window(&self) -> (f64, f64) {
        let (w_min, w_max) = self.bounds();
        (w_min - 0.001, w_max + 0.001)
    }
}

impl fmt::Display for FrequencyMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w_min, w_max) = self.bounds();
        match self.beta {
            Some(beta) => write!(
                f,
                "{} mesh with {} points in [{w_min:.4}, {w_max:.4}] (beta = {beta:.3})",
                self.kind,
                self.len()
            ),
            None => write!(
                f,
                "{} mesh with {} points in [{w_min:.4}, {w_max:.4}]",
                self.kind,
                self.len()
            ),
        }
    }
}
