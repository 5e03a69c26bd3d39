//! Symmetrisation of local Green's functions over symmetry-equivalent shells.

use std::fmt;

use anyhow::{self, ensure, format_err};
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::SpectralError;
use crate::gf::{dagger, BlockGreenFunction};

/// Structure for one crystal symmetry operation as it acts on a set of shells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymmetryOperation {
    /// The shell onto which each shell is mapped.
    pub perm: Vec<usize>,

    /// The representation matrix of the operation on each shell.
    pub mats: Vec<Array2<Complex<f64>>>,

    /// Boolean indicating if the operation includes time reversal.
    pub time_inv: bool,
}

/// Structure for a group of symmetry operations acting on a set of shells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymmetryGroup {
    pub operations: Vec<SymmetryOperation>,
}

impl SymmetryGroup {
    pub fn n_operations(&self) -> usize {
        self.operations.len()
    }

    /// Checks that every operation is consistent with a set of shells of the given dimensions.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if a permutation has the wrong length or
    /// points outside the shell set, if a permutation maps a shell onto one of different
    /// dimension, or if a representation matrix has the wrong shape.
    pub fn check_shells(&self, dims: &[usize]) -> Result<(), SpectralError> {
        let n_shells = dims.len();
        if self.operations.is_empty() {
            return Err(SpectralError::Configuration(
                "a symmetry group must contain at least one operation".to_string(),
            ));
        }
        for (iop, op) in self.operations.iter().enumerate() {
            if op.perm.len() != n_shells || op.mats.len() != n_shells {
                return Err(SpectralError::Configuration(format!(
                    "symmetry operation {iop} acts on {} shell(s) with {} matrix(ces), but there \
                    are {n_shells} shell(s)",
                    op.perm.len(),
                    op.mats.len()
                )));
            }
            for (ish, (&jsh, mat)) in op.perm.iter().zip(op.mats.iter()).enumerate() {
                if jsh >= n_shells || dims[jsh] != dims[ish] {
                    return Err(SpectralError::Configuration(format!(
                        "symmetry operation {iop} maps shell {ish} onto an incompatible shell \
                        {jsh}"
                    )));
                }
                if mat.dim() != (dims[ish], dims[ish]) {
                    return Err(SpectralError::Configuration(format!(
                        "symmetry operation {iop} has a {:?} matrix for shell {ish} of dimension \
                        {}",
                        mat.dim(),
                        dims[ish]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Averages a set of local Green's functions over the group:
    /// ```math
    ///     G'_{\sigma(l)} = \frac{1}{|\mathcal{G}|} \sum_{s \in \mathcal{G}}
    ///         R_s^{(l)}\, X_s(G_l)\, R_s^{(l)\dagger},
    /// ```
    /// where $`X_s`$ is the matrix transpose if $`s`$ includes time reversal and the identity
    /// otherwise.
    pub fn symmetrise(
        &self,
        shells: &[BlockGreenFunction],
    ) -> Result<Vec<BlockGreenFunction>, anyhow::Error> {
        ensure!(
            !self.operations.is_empty(),
            "Cannot symmetrise over an empty symmetry group."
        );
        let mut out = shells.to_vec();
        out.iter_mut().for_each(BlockGreenFunction::zero);
        for op in self.operations.iter() {
            for (ish, shell_gf) in shells.iter().enumerate() {
                let jsh = *op
                    .perm
                    .get(ish)
                    .ok_or_else(|| format_err!("Symmetry permutation does not cover shell {ish}."))?;
                let mat = op
                    .mats
                    .get(ish)
                    .ok_or_else(|| format_err!("No symmetry matrix for shell {ish}."))?;
                let mat_dag = dagger(&mat.view());
                for (block, gf) in shell_gf.iter() {
                    let source = if op.time_inv { gf.transpose() } else { gf.clone() };
                    let image = source.sandwich(&mat.view(), &mat_dag.view())?;
                    let target = out
                        .get_mut(jsh)
                        .and_then(|target| target.get_mut(block))
                        .ok_or_else(|| {
                            format_err!("Shell {jsh} has no spin block `{block}` to symmetrise.")
                        })?;
                    target.add_checked(&image)?;
                }
            }
        }
        let n_ops = self.operations.len() as f64;
        out.iter_mut().for_each(|shell_gf| shell_gf.scale(1.0 / n_ops));
        Ok(out)
    }
}

impl fmt::Display for SymmetryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symmetry group with {} operation(s) ({} with time reversal)",
            self.n_operations(),
            self.operations.iter().filter(|op| op.time_inv).count()
        )
    }
}
