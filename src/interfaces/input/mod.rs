//! YAML input files for the `kspectra` binary.

use std::fmt;
use std::path::PathBuf;

use anyhow::{self, format_err, Context};
use serde::{Deserialize, Serialize};

use crate::archive::DftArchive;
use crate::drivers::band_occupations::{BandOccupationsDriver, BandOccupationsParams};
use crate::drivers::density_of_states::{DensityOfStatesDriver, DensityOfStatesParams};
use crate::drivers::hamiltonian::{HamiltonianDriver, HamiltonianParams};
use crate::drivers::partial_charges::{PartialChargesDriver, PartialChargesParams};
use crate::drivers::spectral_contours::{SpectralContoursDriver, SpectralContoursParams};
use crate::drivers::spectral_function::{SpectralFunctionDriver, SpectralFunctionParams};
use crate::drivers::KSpectraDriver;
use crate::error::SpectralError;
use crate::interfaces::InputHandle;
use crate::io::format::{kspectra_output, kspectra_warn, log_title};
use crate::mesh::FrequencyMesh;

#[cfg(test)]
#[path = "input_tests.rs"]
mod input_tests;

// =============
// Mesh sections
// =============

/// Serialisable/deserialisable structure specifying a uniform real-frequency mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealMeshSpec {
    /// The first frequency of the mesh.
    pub w_min: f64,

    /// The last frequency of the mesh.
    pub w_max: f64,

    /// The number of mesh points.
    pub n_points: usize,
}

impl RealMeshSpec {
    /// Builds the mesh.
    pub fn mesh(&self) -> Result<FrequencyMesh, anyhow::Error> {
        FrequencyMesh::real(self.w_min, self.w_max, self.n_points)
    }
}

/// Serialisable/deserialisable structure specifying a fermionic Matsubara mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatsubaraMeshSpec {
    /// The inverse temperature.
    pub beta: f64,

    /// The number of non-negative Matsubara frequencies. The mesh holds twice as many points.
    pub n_iw: usize,
}

impl MatsubaraMeshSpec {
    /// Builds the mesh.
    pub fn mesh(&self) -> Result<FrequencyMesh, anyhow::Error> {
        FrequencyMesh::matsubara(self.beta, self.n_iw)
    }
}

// =====
// Input
// =====

fn default_n_workers() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// A structure containing `kspectra` input parameters which can be serialised into and
/// deserialised from a YAML input file.
///
/// Every calculation block is optional. Blocks that are present are run in the order band
/// occupations, density of states, spectral function, spectral contours, partial charges and
/// Hamiltonian dump, so that freshly stored occupations are available to an occupied-spectrum
/// density of states.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Input {
    /// The archive directory.
    pub archive: PathBuf,

    /// The real-frequency mesh used by the density of states, the spectral function and the
    /// spectral contours.
    #[serde(default)]
    pub real_mesh: Option<RealMeshSpec>,

    /// The Matsubara mesh used by the band occupations and the partial charges.
    #[serde(default)]
    pub matsubara_mesh: Option<MatsubaraMeshSpec>,

    /// The number of workers sharing every k-point sweep.
    ///
    /// # Default
    ///
    /// If not specified, one worker is used.
    #[serde(default = "default_n_workers")]
    pub n_workers: usize,

    /// The directory for output files.
    ///
    /// # Default
    ///
    /// If not specified, files are written to the working directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub band_occupations: Option<BandOccupationsParams>,

    #[serde(default)]
    pub density_of_states: Option<DensityOfStatesParams>,

    #[serde(default)]
    pub spectral_function: Option<SpectralFunctionParams>,

    #[serde(default)]
    pub spectral_contours: Option<SpectralContoursParams>,

    #[serde(default)]
    pub partial_charges: Option<PartialChargesParams>,

    #[serde(default)]
    pub hamiltonian: Option<HamiltonianParams>,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            archive: PathBuf::from("path/to/archive"),
            real_mesh: Some(RealMeshSpec {
                w_min: -5.0,
                w_max: 5.0,
                n_points: 1001,
            }),
            matsubara_mesh: Some(MatsubaraMeshSpec {
                beta: 40.0,
                n_iw: 1025,
            }),
            n_workers: default_n_workers(),
            output_dir: default_output_dir(),
            band_occupations: None,
            density_of_states: Some(DensityOfStatesParams::default()),
            spectral_function: None,
            spectral_contours: None,
            partial_charges: None,
            hamiltonian: None,
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Archive: {}", self.archive.display())?;
        writeln!(f, "Output directory: {}", self.output_dir.display())?;
        writeln!(f, "Workers: {}", self.n_workers)?;
        let planned = [
            ("band occupations", self.band_occupations.is_some()),
            ("density of states", self.density_of_states.is_some()),
            ("spectral function", self.spectral_function.is_some()),
            ("spectral contours", self.spectral_contours.is_some()),
            ("partial charges", self.partial_charges.is_some()),
            ("Hamiltonian dump", self.hamiltonian.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect::<Vec<_>>();
        writeln!(f, "Calculations: {}", planned.join(", "))?;
        Ok(())
    }
}

impl Input {
    fn real_mesh(&self, calculation: &str) -> Result<FrequencyMesh, anyhow::Error> {
        self.real_mesh
            .as_ref()
            .ok_or_else(|| {
                format_err!(SpectralError::Configuration(format!(
                    "the {calculation} requires a `real_mesh` section"
                )))
            })?
            .mesh()
    }

    fn matsubara_mesh(&self, calculation: &str) -> Result<FrequencyMesh, anyhow::Error> {
        self.matsubara_mesh
            .as_ref()
            .ok_or_else(|| {
                format_err!(SpectralError::Configuration(format!(
                    "the {calculation} requires a `matsubara_mesh` section"
                )))
            })?
            .mesh()
    }
}

impl InputHandle for Input {
    /// Handles the main input structure.
    fn handle(&self) -> Result<(), anyhow::Error> {
        log_title("Input");
        kspectra_output!("");
        for line in self.to_string().lines() {
            kspectra_output!("{line}");
        }
        kspectra_output!("");

        let archive = DftArchive::open(&self.archive)
            .with_context(|| "Unable to open the archive when handling input")?;
        let output_dir = Some(self.output_dir.clone());
        let mut n_calculations = 0;

        if let Some(params) = &self.band_occupations {
            let mesh = self.matsubara_mesh("band-occupation calculation")?;
            let mut driver = BandOccupationsDriver::builder()
                .parameters(params)
                .archive(&archive)
                .mesh(&mesh)
                .n_workers(self.n_workers)
                .build()
                .with_context(|| "Unable to construct a band-occupation driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the band-occupation driver successfully")?;
            n_calculations += 1;
        }

        if let Some(params) = &self.density_of_states {
            let mesh = self.real_mesh("density-of-states calculation")?;
            let mut driver = DensityOfStatesDriver::builder()
                .parameters(params)
                .archive(&archive)
                .mesh(&mesh)
                .n_workers(self.n_workers)
                .output_dir(output_dir.clone())
                .build()
                .with_context(|| "Unable to construct a density-of-states driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the density-of-states driver successfully")?;
            n_calculations += 1;
        }

        if let Some(params) = &self.spectral_function {
            let mesh = self.real_mesh("spectral-function calculation")?;
            let mut driver = SpectralFunctionDriver::builder()
                .parameters(params)
                .archive(&archive)
                .mesh(&mesh)
                .n_workers(self.n_workers)
                .output_dir(output_dir.clone())
                .build()
                .with_context(|| "Unable to construct a spectral-function driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the spectral-function driver successfully")?;
            n_calculations += 1;
        }

        if let Some(params) = &self.spectral_contours {
            let mesh = self.real_mesh("spectral-contour calculation")?;
            let mut driver = SpectralContoursDriver::builder()
                .parameters(params)
                .archive(&archive)
                .mesh(&mesh)
                .n_workers(self.n_workers)
                .output_dir(output_dir.clone())
                .build()
                .with_context(|| "Unable to construct a spectral-contour driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the spectral-contour driver successfully")?;
            n_calculations += 1;
        }

        if let Some(params) = &self.partial_charges {
            let mesh = self.matsubara_mesh("partial-charge calculation")?;
            let mut driver = PartialChargesDriver::builder()
                .parameters(params)
                .archive(&archive)
                .mesh(&mesh)
                .n_workers(self.n_workers)
                .build()
                .with_context(|| "Unable to construct a partial-charge driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the partial-charge driver successfully")?;
            n_calculations += 1;
        }

        if let Some(params) = &self.hamiltonian {
            let mut driver = HamiltonianDriver::builder()
                .parameters(params)
                .archive(&archive)
                .output_dir(self.output_dir.clone())
                .build()
                .with_context(|| "Unable to construct a Hamiltonian driver when handling input")?;
            driver
                .run()
                .with_context(|| "Unable to run the Hamiltonian driver successfully")?;
            n_calculations += 1;
        }

        if n_calculations == 0 {
            kspectra_warn!("No calculation section found in the input. Nothing has been done.");
        }
        Ok(())
    }
}
