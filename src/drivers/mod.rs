//! Drivers to carry out `kspectra` calculations.
//!
//! Every driver validates its inputs (projection scheme, mesh kind, archive items) before any
//! k-point work is distributed, then runs its sweep on a group of workers, applies the
//! corrections, extracts its observables and, on the designated worker only, writes its report.

use std::fmt;

use anyhow::{self, format_err};
use derive_builder::Builder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::archive::{
    fetch, ArchiveGroup, BandsInput, ContoursInput, DftArchive, DftInput, DmftOutput, Hopping,
    ProjectorMatrices,
};
use crate::distributed::Communicator;
use crate::error::SpectralError;
use crate::io::format::nice_bool;
use crate::mesh::FrequencyMesh;
use crate::projection::KPointSet;
use crate::provider::{HoppingLatticeGf, LatticeGfParams, DEFAULT_BROADENING};
use crate::spin::SpinStructure;

pub mod band_occupations;
pub mod density_of_states;
pub mod hamiltonian;
pub mod partial_charges;
pub mod spectral_contours;
pub mod spectral_function;

// =================
// Trait definitions
// =================

/// Trait defining behaviours of `kspectra` drivers.
pub trait KSpectraDriver {
    /// The type of the parameter structure controlling the driver.
    type Params;

    /// The type of the successful outcome when executing the driver.
    type Outcome;

    /// Executes the driver and stores the result internally.
    fn run(&mut self) -> Result<(), anyhow::Error>;

    /// Returns the result of the driver execution.
    fn result(&self) -> Result<&Self::Outcome, anyhow::Error>;
}

// ==============
// LatticeOptions
// ==============

pub(crate) fn default_true() -> bool {
    true
}

/// Structure containing the options with which lattice Green's functions are evaluated, shared by
/// every driver.
#[derive(Clone, Builder, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeOptions {
    /// The chemical potential. If `None`, the chemical potential stored in the archive is used.
    #[builder(default = "None")]
    #[serde(default)]
    pub mu: Option<f64>,

    /// The broadening used on real meshes. If `None`, a broadening of `0.001` is used.
    #[builder(default = "None")]
    #[serde(default)]
    pub broadening: Option<f64>,

    /// Boolean indicating if the local self-energy from the archive is included.
    #[builder(default = "false")]
    #[serde(default)]
    pub with_sigma: bool,

    /// Boolean indicating if the double-counting correction is subtracted from the self-energy.
    #[builder(default = "false")]
    #[serde(default)]
    pub with_dc: bool,
}

impl LatticeOptions {
    /// Returns a builder to construct a [`LatticeOptions`] structure.
    pub fn builder() -> LatticeOptionsBuilder {
        LatticeOptionsBuilder::default()
    }

    /// Resolves these options against an archive.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MissingInput`] if no chemical potential is given and the
    /// archive has none.
    pub fn resolve(&self, archive: &DftArchive) -> Result<LatticeGfParams, anyhow::Error> {
        let mu = match self.mu {
            Some(mu) => mu,
            None => {
                let dft_input = archive.dft_input()?;
                *fetch(DftInput::NAME, "chemical_potential", &dft_input.chemical_potential)?
            }
        };
        LatticeGfParams::builder()
            .mu(mu)
            .broadening(self.broadening.unwrap_or(DEFAULT_BROADENING))
            .with_sigma(self.with_sigma)
            .with_dc(self.with_dc)
            .build()
            .map_err(|err| format_err!(err))
    }
}

impl Default for LatticeOptions {
    fn default() -> Self {
        Self {
            mu: None,
            broadening: None,
            with_sigma: false,
            with_dc: false,
        }
    }
}

impl fmt::Display for LatticeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Chemical potential: {}",
            self.mu
                .map(|mu| format!("{mu:.7}"))
                .unwrap_or_else(|| "from archive".to_string())
        )?;
        writeln!(
            f,
            "Broadening: {:.3e}",
            self.broadening.unwrap_or(DEFAULT_BROADENING)
        )?;
        writeln!(f, "Include self-energy: {}", nice_bool(self.with_sigma))?;
        writeln!(f, "Subtract double counting: {}", nice_bool(self.with_dc))?;
        Ok(())
    }
}

// ===========
// LatticeData
// ===========

/// The lattice data of one k-point set.
pub(crate) struct LatticeData<'a> {
    pub(crate) hopping: &'a Hopping,
    pub(crate) n_orbitals: &'a Array2<usize>,

    /// The Wannier projectors of the k-point set, used to upfold the self-energy.
    pub(crate) proj_mat: Option<&'a ProjectorMatrices>,
}

impl<'a> LatticeData<'a> {
    /// Selects the lattice data of a k-point set.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MissingInput`] if the hopping data or band
    /// counts are absent.
    pub(crate) fn select(archive: &'a DftArchive, kset: KPointSet) -> Result<Self, anyhow::Error> {
        match kset {
            KPointSet::Lattice => {
                let group = archive.dft_input()?;
                group.require(&["hopping", "n_orbitals"])?;
                Ok(Self {
                    hopping: fetch(DftInput::NAME, "hopping", &group.hopping)?,
                    n_orbitals: fetch(DftInput::NAME, "n_orbitals", &group.n_orbitals)?,
                    proj_mat: group.proj_mat.as_ref(),
                })
            }
            KPointSet::BandPath => {
                let group = archive.bands()?;
                group.require(&["hopping", "n_orbitals"])?;
                Ok(Self {
                    hopping: fetch(BandsInput::NAME, "hopping", &group.hopping)?,
                    n_orbitals: fetch(BandsInput::NAME, "n_orbitals", &group.n_orbitals)?,
                    proj_mat: group.proj_mat.as_ref(),
                })
            }
            KPointSet::Contours => {
                let group = archive.contours()?;
                group.require(&["hopping", "n_orbitals"])?;
                Ok(Self {
                    hopping: fetch(ContoursInput::NAME, "hopping", &group.hopping)?,
                    n_orbitals: fetch(ContoursInput::NAME, "n_orbitals", &group.n_orbitals)?,
                    proj_mat: group.proj_mat.as_ref(),
                })
            }
        }
    }

    /// Builds the lattice Green's function provider of these data. The self-energy stored in the
    /// archive is attached if `params` requests it, and must be tabulated on `mesh`.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MissingInput`] if the self-energy is requested
    /// but the archive has none, or if the Wannier projectors needed to upfold it are absent.
    /// Errors with [`SpectralError::MeshType`] if the self-energy lives on a mesh of another kind,
    /// and with [`SpectralError::Configuration`] if it lives on other points of the same kind.
    pub(crate) fn provider(
        &self,
        archive: &'a DftArchive,
        spin: SpinStructure,
        params: &LatticeGfParams,
        mesh: &FrequencyMesh,
    ) -> Result<HoppingLatticeGf<'a>, anyhow::Error> {
        let provider = HoppingLatticeGf::new(self.hopping, self.n_orbitals, spin)?;
        if !params.with_sigma {
            return Ok(provider);
        }
        let dmft_output = archive.dmft_output()?;
        let self_energy = fetch(DmftOutput::NAME, "self_energy", &dmft_output.self_energy)?;
        let proj_mat = self.proj_mat.ok_or_else(|| {
            format_err!(SpectralError::MissingInput(
                "lattice data".to_string(),
                vec!["proj_mat".to_string()]
            ))
        })?;
        let provider = provider.with_self_energy(self_energy, proj_mat);
        provider.check_self_energy_mesh(mesh)?;
        Ok(provider)
    }
}

/// Reads the spin structure of an archive. Absent flags are taken as `false`.
pub(crate) fn spin_structure(archive: &DftArchive) -> Result<SpinStructure, anyhow::Error> {
    let dft_input = archive.dft_input()?;
    Ok(SpinStructure {
        spin_orbit: dft_input.spin_orbit.unwrap_or(false),
        spin_polarised: dft_input.spin_polarised.unwrap_or(false),
    })
}

/// Takes the outcome of the designated worker out of the outcomes of a worker group.
pub(crate) fn designated_outcome<T>(outcomes: Vec<T>) -> Result<T, anyhow::Error> {
    outcomes
        .into_iter()
        .next()
        .ok_or_else(|| format_err!("No outcome returned by the designated worker."))
}

/// Blocks until every worker has finished its local post-processing. Files are written by the
/// designated worker only after this point, so that a failure on any worker leaves no files.
pub(crate) fn sync_before_report<C: Communicator + ?Sized>(comm: &C) -> Result<(), anyhow::Error> {
    comm.barrier()
}
