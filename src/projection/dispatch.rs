//! Projection of lattice Green's functions onto local shells.

use anyhow::{self, format_err, Context};
use indexmap::IndexMap;
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex;

use crate::error::SpectralError;
use crate::gf::{dagger, BlockGreenFunction, GreenFunction};
use crate::projection::scheme::{Projection, ProjectorSource};
use crate::spin::SpinStructure;

impl<'a> Projection<'a> {
    /// Projects the lattice Green's function of one spin channel at one k-point onto one shell.
    ///
    /// The result is a fresh value:
    /// * with no projection, the lattice Green's function itself;
    /// * with a single projector $`P`$, the downfolded $`P G P^\dagger`$;
    /// * with partial projectors $`P_r`$, the sum $`\sum_r P_r G P_r^\dagger`$ over all partial
    /// projectors of the shell.
    ///
    /// Projectors are stored with the largest band count of the archive and are truncated to the
    /// dimension of `lattice_gf`.
    ///
    /// # Arguments
    ///
    /// * `lattice_gf` - The lattice Green's function of one spin channel.
    /// * `ish` - The shell index.
    /// * `ik` - The k-point index.
    /// * `isp` - The archive spin index of the channel.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::ShellIndex`] if `ish` is out of range, or if the projector
    /// data do not cover the requested (k-point, spin, shell).
    pub fn project(
        &self,
        lattice_gf: &GreenFunction,
        ish: usize,
        ik: usize,
        isp: usize,
    ) -> Result<GreenFunction, anyhow::Error> {
        if self.is_active() && ish >= self.n_shells() {
            return Err(format_err!(SpectralError::ShellIndex(ish, self.n_shells())));
        }
        let n_bands = lattice_gf.dim();
        let missing = || {
            format_err!(
                "No {} projector for k-point {ik}, spin {isp}, shell {ish}.",
                self.scheme.tag()
            )
        };
        match self.source {
            ProjectorSource::None => Ok(lattice_gf.clone()),
            ProjectorSource::Single(proj_mat) => {
                let proj = proj_mat
                    .get(ik)
                    .and_then(|per_spin| per_spin.get(isp))
                    .and_then(|per_shell| per_shell.get(ish))
                    .ok_or_else(missing)?;
                downfold(lattice_gf, &proj.view(), n_bands)
            }
            ProjectorSource::CoarseGrained(proj_mat_csc) => {
                let proj = proj_mat_csc
                    .get(ik)
                    .and_then(|per_spin| per_spin.get(isp))
                    .ok_or_else(missing)?;
                downfold(lattice_gf, &proj.view(), n_bands)
            }
            ProjectorSource::Partial(n_parproj, proj_mat_all) => {
                let partial = proj_mat_all
                    .get(ik)
                    .and_then(|per_spin| per_spin.get(isp))
                    .and_then(|per_shell| per_shell.get(ish))
                    .ok_or_else(missing)?;
                let n_partial = n_parproj.get(ish).copied().ok_or_else(missing)?;
                if partial.len() < n_partial {
                    return Err(missing());
                }
                let mut scratch = GreenFunction::zeros(lattice_gf.n_freq(), self.dims[ish]);
                for proj in partial.iter().take(n_partial) {
                    scratch.add_checked(&downfold(lattice_gf, &proj.view(), n_bands)?)?;
                }
                Ok(scratch)
            }
        }
    }

    /// Projects every spin block of a lattice Green's function at one k-point onto one shell.
    pub fn project_blocks(
        &self,
        lattice_gf: &BlockGreenFunction,
        ish: usize,
        ik: usize,
        spin: &SpinStructure,
    ) -> Result<BlockGreenFunction, anyhow::Error> {
        let blocks = lattice_gf
            .iter()
            .map(|(block, gf)| {
                self.project(gf, ish, ik, spin.spin_index(*block))
                    .map(|local| (*block, local))
                    .with_context(|| format!("Projection failed for spin block `{block}`"))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;
        Ok(BlockGreenFunction::from_blocks(blocks))
    }
}

/// Computes $`P G P^\dagger`$ with the projector truncated to `n_bands` columns.
fn downfold(
    lattice_gf: &GreenFunction,
    proj: &ArrayView2<Complex<f64>>,
    n_bands: usize,
) -> Result<GreenFunction, anyhow::Error> {
    if proj.ncols() < n_bands {
        return Err(format_err!(
            "Projector with {} column(s) cannot downfold {n_bands} band(s).",
            proj.ncols()
        ));
    }
    let proj_k: ArrayView2<Complex<f64>> = proj.slice(s![.., ..n_bands]);
    let proj_k_dag: Array2<Complex<f64>> = dagger(&proj_k);
    lattice_gf.sandwich(&proj_k, &proj_k_dag.view())
}
