//! Total and projected densities of states.

use std::fmt;

use indexmap::IndexMap;
use ndarray::{Array1, Array3};
use num_complex::Complex;

use crate::correction::{Corrected, LocalGfArena};
use crate::io::format::write_subtitle;
use crate::mesh::FrequencyMesh;
use crate::observables::integrate;
use crate::projection::ProjectionScheme;
use crate::spin::SpinBlock;

/// Structure for the total and projected densities of states on a real-frequency mesh.
#[derive(Clone, Debug)]
pub struct DensityOfStates {
    /// The mesh frequencies.
    pub(crate) frequencies: Vec<f64>,

    /// The projection scheme of the projected densities of states.
    pub(crate) scheme: ProjectionScheme,

    /// The total density of states of every spin block.
    pub(crate) total: IndexMap<SpinBlock, Array1<f64>>,

    /// The projected density of states $`-\frac{1}{\pi}\,\mathrm{Im}\,\mathrm{Tr}\,G_{\mathrm{loc}}`$
    /// of every shell and spin block.
    pub(crate) projected: Vec<IndexMap<SpinBlock, Array1<f64>>>,

    /// The orbital-resolved projected density of states $`\frac{i}{2\pi}(G - G^\dagger)`$ of
    /// every shell and spin block, of shape `(n_freq, dim, dim)`.
    pub(crate) projected_matrix: Vec<IndexMap<SpinBlock, Array3<Complex<f64>>>>,
}

impl DensityOfStates {
    /// Extracts the densities of states from a reduced total and corrected local Green's
    /// functions. The two parts come from the same sweep.
    pub fn extract(
        mesh: &FrequencyMesh,
        scheme: ProjectionScheme,
        total: IndexMap<SpinBlock, Array1<f64>>,
        local: &LocalGfArena<Corrected>,
    ) -> Self {
        let projected = local
            .shells()
            .iter()
            .map(|shell| {
                shell
                    .iter()
                    .map(|(block, gf)| (*block, gf.spectral_trace()))
                    .collect::<IndexMap<_, _>>()
            })
            .collect::<Vec<_>>();
        let projected_matrix = local
            .shells()
            .iter()
            .map(|shell| {
                shell
                    .iter()
                    .map(|(block, gf)| (*block, gf.spectral_matrix()))
                    .collect::<IndexMap<_, _>>()
            })
            .collect::<Vec<_>>();
        Self {
            frequencies: mesh.points().to_vec(),
            scheme,
            total,
            projected,
            projected_matrix,
        }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn scheme(&self) -> ProjectionScheme {
        self.scheme
    }

    pub fn total(&self) -> &IndexMap<SpinBlock, Array1<f64>> {
        &self.total
    }

    pub fn projected(&self) -> &[IndexMap<SpinBlock, Array1<f64>>] {
        &self.projected
    }

    pub fn projected_matrix(&self) -> &[IndexMap<SpinBlock, Array3<Complex<f64>>>] {
        &self.projected_matrix
    }

    pub fn n_shells(&self) -> usize {
        self.projected.len()
    }

    /// Returns the total density of states of a spin block integrated over the mesh.
    pub fn integrated_total(&self, block: &SpinBlock) -> Option<f64> {
        self.total
            .get(block)
            .map(|dos| integrate(&self.frequencies, dos.iter().copied()))
    }

    /// Returns the projected density of states of a shell and spin block integrated over the
    /// mesh.
    pub fn integrated_projected(&self, ish: usize, block: &SpinBlock) -> Option<f64> {
        self.projected
            .get(ish)
            .and_then(|shell| shell.get(block))
            .map(|dos| integrate(&self.frequencies, dos.iter().copied()))
    }
}

impl fmt::Display for DensityOfStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Integrated spectral weights")?;
        let blocks = self.total.keys().collect::<Vec<_>>();
        write!(f, "{:<12}", "")?;
        for block in blocks.iter() {
            write!(f, "{:>14}", block.to_string())?;
        }
        writeln!(f)?;
        write!(f, "{:<12}", "Total")?;
        for block in blocks.iter() {
            write!(f, "{:>14.7}", self.integrated_total(block).unwrap_or(0.0))?;
        }
        writeln!(f)?;
        for ish in 0..self.n_shells() {
            write!(f, "{:<12}", format!("Shell {ish}"))?;
            for block in blocks.iter() {
                write!(
                    f,
                    "{:>14.7}",
                    self.integrated_projected(ish, block).unwrap_or(0.0)
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
