//! Lattice Green's functions evaluated at individual k-points.

use std::fmt;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use indexmap::IndexMap;
use nalgebra::DMatrix;
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::archive::{Hopping, ProjectorMatrices};
use crate::error::SpectralError;
use crate::gf::{dagger, BlockGreenFunction, GreenFunction};
use crate::mesh::FrequencyMesh;
use crate::spin::{SpinBlock, SpinStructure};


/// Broadening used on real meshes when none is supplied.
pub const DEFAULT_BROADENING: f64 = 0.001;

// =================
// LatticeGfParams
// =================

/// Structure for the physical parameters with which a lattice Green's function is evaluated.
/// These are passed through the k-point sweep unchanged.
#[derive(Clone, Builder, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeGfParams {
    /// The chemical potential.
    pub mu: f64,

    /// The broadening $`\eta`$ used on real meshes.
    #[builder(default = "DEFAULT_BROADENING")]
    #[serde(default = "default_broadening")]
    pub broadening: f64,

    /// Boolean indicating if the local self-energy is included.
    #[builder(default = "false")]
    #[serde(default)]
    pub with_sigma: bool,

    /// Boolean indicating if the double-counting correction is subtracted from the self-energy.
    #[builder(default = "false")]
    #[serde(default)]
    pub with_dc: bool,
}

fn default_broadening() -> f64 {
    DEFAULT_BROADENING
}

impl LatticeGfParams {
    /// Returns a builder to construct a new [`LatticeGfParams`].
    pub fn builder() -> LatticeGfParamsBuilder {
        LatticeGfParamsBuilder::default()
    }
}

impl fmt::Display for LatticeGfParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chemical potential: {:.7}", self.mu)?;
        writeln!(f, "Broadening: {:.3e}", self.broadening)?;
        writeln!(
            f,
            "Include self-energy: {}",
            if self.with_sigma { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "Subtract double counting: {}",
            if self.with_dc { "yes" } else { "no" }
        )?;
        Ok(())
    }
}

// ===============
// LocalSelfEnergy
// ===============

/// Structure for the local self-energies of the correlated shells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalSelfEnergy {
    /// The mesh on which the self-energies are tabulated.
    pub mesh: FrequencyMesh,

    /// One block self-energy per correlated shell.
    pub sigma: Vec<BlockGreenFunction>,

    /// One block double-counting matrix per correlated shell.
    pub dc: Vec<IndexMap<SpinBlock, Array2<Complex<f64>>>>,
}

// ============================
// LatticeGreenFunctionProvider
// ============================

/// Trait for sources of lattice Green's functions.
pub trait LatticeGreenFunctionProvider: Sync {
    /// The number of k-points.
    fn n_k(&self) -> usize;

    /// The number of bands at a k-point for a spin block.
    fn n_bands(&self, ik: usize, block: SpinBlock) -> usize;

    /// Returns $`G(\mathbf{k}, z)`$ at k-point `ik` for every requested spin block on the given
    /// mesh.
    fn lattice_gf(
        &self,
        ik: usize,
        spin_blocks: &[SpinBlock],
        mesh: &FrequencyMesh,
        params: &LatticeGfParams,
    ) -> Result<BlockGreenFunction, anyhow::Error>;

    /// Returns the mesh of the local self-energy, if one is available.
    fn self_energy_mesh(&self) -> Option<&FrequencyMesh>;
}

// ================
// HoppingLatticeGf
// ================

/// Lattice Green's functions built from band Hamiltonians and an optional upfolded local
/// self-energy:
/// ```math
///     G(\mathbf{k}, z) = \left[(z + \mu)\mathbb{1} - H_{\mathbf{k}}
///         - \Sigma_{\mathrm{up}}(\mathbf{k}, z)\right]^{-1}.
/// ```
pub struct HoppingLatticeGf<'a> {
    hopping: &'a Hopping,
    n_orbitals: &'a Array2<usize>,
    spin: SpinStructure,

    /// The local self-energy together with the projectors used to upfold it.
    self_energy: Option<(&'a LocalSelfEnergy, &'a ProjectorMatrices)>,
}

impl<'a> HoppingLatticeGf<'a> {
    /// Creates a provider without a self-energy.
    ///
    /// # Errors
    ///
    /// Errors if the hopping data and the band counts have different numbers of k-points.
    pub fn new(
        hopping: &'a Hopping,
        n_orbitals: &'a Array2<usize>,
        spin: SpinStructure,
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            hopping.len() == n_orbitals.nrows(),
            "Hopping data for {} k-point(s) but band counts for {} k-point(s).",
            hopping.len(),
            n_orbitals.nrows()
        );
        ensure!(
            spin.blocks()
                .iter()
                .all(|block| spin.spin_index(*block) < n_orbitals.ncols()),
            "Band counts for {} spin channel(s) do not cover the spin blocks of the run.",
            n_orbitals.ncols()
        );
        for (ik, hk_spins) in hopping.iter().enumerate() {
            for (isp, hk) in hk_spins.iter().enumerate().take(n_orbitals.ncols()) {
                check_hamiltonian(hk, n_orbitals[(ik, isp)], ik, isp)?;
            }
        }
        Ok(Self {
            hopping,
            n_orbitals,
            spin,
            self_energy: None,
        })
    }

    /// Attaches a local self-energy and the Wannier projectors that upfold it.
    pub fn with_self_energy(
        mut self,
        self_energy: &'a LocalSelfEnergy,
        proj_mat: &'a ProjectorMatrices,
    ) -> Self {
        self.self_energy = Some((self_energy, proj_mat));
        self
    }

    /// Checks that the attached self-energy, if any, is tabulated on `mesh`.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MeshType`] if the two meshes are of different kinds, and with
    /// [`SpectralError::Configuration`] if they are of the same kind but have different points.
    pub fn check_self_energy_mesh(&self, mesh: &FrequencyMesh) -> Result<(), SpectralError> {
        let Some(sigma_mesh) = self.self_energy_mesh() else {
            return Ok(());
        };
        if sigma_mesh.kind() != mesh.kind() {
            return Err(SpectralError::MeshType(
                mesh.kind().to_string(),
                sigma_mesh.kind().to_string(),
            ));
        }
        if sigma_mesh != mesh {
            return Err(SpectralError::Configuration(format!(
                "the self-energy is tabulated on a {sigma_mesh}, but a {mesh} was requested"
            )));
        }
        Ok(())
    }

    /// Upfolds the local self-energy of every correlated shell to the band basis at one
    /// frequency.
    fn upfolded_sigma(
        &self,
        ik: usize,
        block: SpinBlock,
        iw: usize,
        n_bands: usize,
        with_dc: bool,
    ) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let mut sigma_up = Array2::<Complex<f64>>::zeros((n_bands, n_bands));
        let Some((self_energy, proj_mat)) = self.self_energy else {
            return Ok(sigma_up);
        };
        let isp = self.spin.spin_index(block);
        for (icrsh, sigma_shell) in self_energy.sigma.iter().enumerate() {
            let sigma_block = sigma_shell.get(&block).ok_or_else(|| {
                format_err!("No self-energy for spin block `{block}` of correlated shell {icrsh}.")
            })?;
            let mut local = sigma_block.data().index_axis(Axis(0), iw).to_owned();
            if with_dc {
                if let Some(dc) = self_energy.dc.get(icrsh).and_then(|dc| dc.get(&block)) {
                    if dc.dim() != local.dim() {
                        return Err(format_err!(SpectralError::Configuration(format!(
                            "the double counting of correlated shell {icrsh} is {:?}, but its \
                            self-energy is {:?}",
                            dc.dim(),
                            local.dim()
                        ))));
                    }
                    local = local - dc;
                }
            }
            let proj = proj_mat
                .get(ik)
                .and_then(|p| p.get(isp))
                .and_then(|p| p.get(icrsh))
                .ok_or_else(|| {
                    format_err!("No projector for k-point {ik}, spin {isp}, shell {icrsh}.")
                })?;
            if proj.nrows() != local.nrows() || proj.ncols() < n_bands {
                return Err(format_err!(SpectralError::Configuration(format!(
                    "the projector at k-point {ik}, spin {isp} onto correlated shell {icrsh} is \
                    {:?}, but the shell self-energy is {:?} and {n_bands} band(s) are active",
                    proj.dim(),
                    local.dim()
                ))));
            }
            let proj = proj.slice(s![.., ..n_bands]);
            sigma_up = sigma_up + dagger(&proj).dot(&local).dot(&proj);
        }
        Ok(sigma_up)
    }
}

impl<'a> LatticeGreenFunctionProvider for HoppingLatticeGf<'a> {
    fn n_k(&self) -> usize {
        self.hopping.len()
    }

    fn n_bands(&self, ik: usize, block: SpinBlock) -> usize {
        self.n_orbitals[(ik, self.spin.spin_index(block))]
    }

    fn lattice_gf(
        &self,
        ik: usize,
        spin_blocks: &[SpinBlock],
        mesh: &FrequencyMesh,
        params: &LatticeGfParams,
    ) -> Result<BlockGreenFunction, anyhow::Error> {
        ensure!(
            ik < self.n_k(),
            "k-point index {ik} out of range for {} k-point(s).",
            self.n_k()
        );
        let use_sigma = params.with_sigma && self.self_energy.is_some();
        if use_sigma {
            self.check_self_energy_mesh(mesh)?;
        }

        let blocks = spin_blocks
            .iter()
            .map(|block| -> Result<(SpinBlock, GreenFunction), anyhow::Error> {
                let n_bands = self.n_bands(ik, *block);
                let isp = self.spin.spin_index(*block);
                let hk = self.hopping[ik]
                    .get(isp)
                    .ok_or_else(|| format_err!("No hopping data for spin {isp} at k-point {ik}."))?;
                check_hamiltonian(hk, n_bands, ik, isp)?;
                let hk = hk.slice(s![..n_bands, ..n_bands]);
                let inverses = (0..mesh.len())
                    .into_par_iter()
                    .map(|iw| -> Result<Array2<Complex<f64>>, anyhow::Error> {
                        let z = mesh.complex_point(iw, params.broadening) + params.mu;
                        let mut mat = Array2::<Complex<f64>>::eye(n_bands).mapv(|x| x * z) - hk;
                        if use_sigma {
                            mat = mat
                                - self.upfolded_sigma(ik, *block, iw, n_bands, params.with_dc)?;
                        }
                        invert(&mat.view()).map_err(|err| {
                            err.context(format!(
                                "Unable to invert (z + mu) - H - Sigma at k-point {ik}, spin \
                                block `{block}`, frequency index {iw}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut data = Array3::<Complex<f64>>::zeros((mesh.len(), n_bands, n_bands));
                data.axis_iter_mut(Axis(0))
                    .zip(inverses.iter())
                    .for_each(|(mut gw, inv)| gw.assign(inv));
                Ok((*block, GreenFunction::from_data(data)?))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;
        Ok(BlockGreenFunction::from_blocks(blocks))
    }

    fn self_energy_mesh(&self) -> Option<&FrequencyMesh> {
        self.self_energy.map(|(sigma, _)| &sigma.mesh)
    }
}

/// Checks that a band Hamiltonian holds at least `n_bands` bands.
fn check_hamiltonian(
    hk: &Array2<Complex<f64>>,
    n_bands: usize,
    ik: usize,
    isp: usize,
) -> Result<(), SpectralError> {
    let (nrows, ncols) = hk.dim();
    if nrows < n_bands || ncols < n_bands {
        return Err(SpectralError::Configuration(format!(
            "the Hamiltonian at k-point {ik}, spin {isp} is {nrows} × {ncols}, but {n_bands} \
            band(s) are active"
        )));
    }
    Ok(())
}

/// Inverts a square complex matrix.
///
/// # Errors
///
/// Errors if the matrix is singular.
pub fn invert(mat: &ArrayView2<Complex<f64>>) -> Result<Array2<Complex<f64>>, anyhow::Error> {
    let (nrows, ncols) = mat.dim();
    ensure!(nrows == ncols, "Cannot invert a {nrows} × {ncols} matrix.");
    let na_mat = DMatrix::from_fn(nrows, ncols, |i, j| mat[(i, j)]);
    let na_inv = na_mat
        .try_inverse()
        .ok_or_else(|| format_err!("Matrix is singular."))?;
    Ok(Array2::from_shape_fn((nrows, ncols), |(i, j)| na_inv[(i, j)]))
}
