//! Rotation of local Green's functions from the global to the local coordinate frame.

use anyhow::{self, format_err};
use ndarray::Array2;
use num_complex::Complex;

use crate::error::SpectralError;
use crate::gf::{dagger, GreenFunction};

/// Structure for the unitary local-frame rotations of a set of shells.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationSet {
    mats: Vec<Array2<Complex<f64>>>,
    time_inv: Vec<bool>,

    /// Boolean indicating if the run includes spin-orbit coupling, in which case time-inverted
    /// rotations act on the transposed Green's function.
    spin_orbit: bool,
}

impl RotationSet {
    /// Creates a rotation set.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if the number of matrices and flags differ,
    /// or if a matrix is not square.
    pub fn new(
        mats: Vec<Array2<Complex<f64>>>,
        time_inv: Vec<bool>,
        spin_orbit: bool,
    ) -> Result<Self, SpectralError> {
        if mats.len() != time_inv.len() {
            return Err(SpectralError::Configuration(format!(
                "{} rotation matrix(ces) given with {} time-reversal flag(s)",
                mats.len(),
                time_inv.len()
            )));
        }
        if let Some(ish) = mats.iter().position(|mat| mat.nrows() != mat.ncols()) {
            return Err(SpectralError::Configuration(format!(
                "the rotation matrix of shell {ish} is not square"
            )));
        }
        Ok(Self {
            mats,
            time_inv,
            spin_orbit,
        })
    }

    pub fn n_shells(&self) -> usize {
        self.mats.len()
    }

    /// Checks that the rotations match shells of the given dimensions.
    pub fn check_shells(&self, dims: &[usize]) -> Result<(), SpectralError> {
        if self.mats.len() < dims.len() {
            return Err(SpectralError::Configuration(format!(
                "{} rotation matrix(ces) given for {} shell(s)",
                self.mats.len(),
                dims.len()
            )));
        }
        match dims
            .iter()
            .zip(self.mats.iter())
            .position(|(dim, mat)| mat.nrows() != *dim)
        {
            Some(ish) => Err(SpectralError::Configuration(format!(
                "the rotation matrix of shell {ish} does not match its dimension {}",
                dims[ish]
            ))),
            None => Ok(()),
        }
    }

    /// Rotates a local Green's function of shell `ish` to the local frame, $`R^\dagger G R`$, or
    /// $`R^* G^{\mathsf{T}} R^{\mathsf{T}}`$ if the shell is time-inverted under spin-orbit
    /// coupling. Both forms preserve the trace.
    pub fn to_local(&self, ish: usize, gf: &GreenFunction) -> Result<GreenFunction, anyhow::Error> {
        let mat = self
            .mats
            .get(ish)
            .ok_or_else(|| format_err!(SpectralError::ShellIndex(ish, self.n_shells())))?;
        if self.spin_orbit && self.time_inv[ish] {
            gf.transpose()
                .sandwich(&mat.mapv(|x| x.conj()).view(), &mat.t())
        } else {
            gf.sandwich(&dagger(&mat.view()).view(), &mat.view())
        }
    }
}
