//! Orbitally resolved density matrices of projected shells.

use std::fmt;

use anyhow::{self, ensure, format_err};
use indexmap::IndexMap;
use ndarray::Array2;
use num_complex::Complex;

use crate::correction::{Corrected, LocalGfArena};
use crate::io::format::write_subtitle;
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::spin::{SpinBlock, SpinStructure};

/// Structure for the density matrix of every shell and spin block: the density of the corrected
/// local Green's function within the energy window plus the density below it.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialCharges {
    /// Density matrices indexed by spin block then by shell.
    pub(crate) density: IndexMap<SpinBlock, Vec<Array2<Complex<f64>>>>,
}

impl PartialCharges {
    /// Computes the partial charges.
    ///
    /// # Arguments
    ///
    /// * `local` - The corrected local Green's functions of all shells, on a Matsubara mesh.
    /// * `mesh` - The Matsubara mesh.
    /// * `dens_mat_below` - The density matrices below the energy window, indexed as
    /// `[isp][ish]`.
    /// * `spin` - The spin structure mapping spin blocks to archive spin indices.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::error::SpectralError::MeshType`] if the mesh is not a Matsubara mesh,
    /// or if the below-window density matrices do not match the shells.
    pub fn extract(
        local: &LocalGfArena<Corrected>,
        mesh: &FrequencyMesh,
        dens_mat_below: &[Vec<Array2<Complex<f64>>>],
        spin: SpinStructure,
    ) -> Result<Self, anyhow::Error> {
        mesh.require_kind(MeshKind::Imaginary)?;
        let mut density = spin
            .blocks()
            .into_iter()
            .map(|block| (block, Vec::with_capacity(local.n_shells())))
            .collect::<IndexMap<_, _>>();
        for (ish, shell) in local.shells().iter().enumerate() {
            for (block, gf) in shell.iter() {
                let isp = spin.spin_index(*block);
                let below = dens_mat_below
                    .get(isp)
                    .and_then(|per_shell| per_shell.get(ish))
                    .ok_or_else(|| {
                        format_err!(
                            "No density matrix below the window for spin {isp}, shell {ish}."
                        )
                    })?;
                ensure!(
                    below.dim() == (gf.dim(), gf.dim()),
                    "Density matrix below the window of shape {:?} does not match shell {ish} of \
                    dimension {}.",
                    below.dim(),
                    gf.dim()
                );
                let window = gf.density(mesh)?;
                density
                    .get_mut(block)
                    .ok_or_else(|| format_err!("Unexpected spin block `{block}` in shell {ish}."))?
                    .push(below + &window);
            }
        }
        Ok(Self { density })
    }

    pub fn density(&self) -> &IndexMap<SpinBlock, Vec<Array2<Complex<f64>>>> {
        &self.density
    }

    /// Returns the density matrix of a shell and spin block.
    pub fn get(&self, block: &SpinBlock, ish: usize) -> Option<&Array2<Complex<f64>>> {
        self.density.get(block).and_then(|per_shell| per_shell.get(ish))
    }

    /// Returns the total charge of a shell summed over spin blocks.
    pub fn shell_charge(&self, ish: usize) -> f64 {
        self.density
            .values()
            .filter_map(|per_shell| per_shell.get(ish))
            .map(|dens| dens.diag().iter().map(|x| x.re).sum::<f64>())
            .sum()
    }
}

impl fmt::Display for PartialCharges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Partial charges")?;
        let n_shells = self
            .density
            .values()
            .map(|per_shell| per_shell.len())
            .max()
            .unwrap_or(0);
        for ish in 0..n_shells {
            writeln!(f, "Shell {ish}: total charge {:.6}", self.shell_charge(ish))?;
            for (block, per_shell) in self.density.iter() {
                if let Some(dens) = per_shell.get(ish) {
                    writeln!(f, "  Spin block {block}:")?;
                    for row in dens.rows() {
                        let line = row
                            .iter()
                            .map(|x| format!("{:>10.6}{:+.6}i", x.re, x.im))
                            .collect::<Vec<_>>()
                            .join("  ");
                        writeln!(f, "    {line}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
