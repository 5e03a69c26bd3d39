//! Driver for dumping the diagonal of the band Hamiltonian.

use std::fmt;
use std::path::PathBuf;

use anyhow::{self, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::archive::DftArchive;
use crate::distributed::{Communicator, SerialCommunicator};
use crate::drivers::{spin_structure, KSpectraDriver, LatticeData};
use crate::io::format::{kspectra_output, log_macsec_begin, log_macsec_end, KSpectraOutput};
use crate::projection::KPointSet;
use crate::report::write_hamiltonian;

#[cfg(test)]
#[path = "hamiltonian_tests.rs"]
mod hamiltonian_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_kset() -> HamiltonianKPoints {
    HamiltonianKPoints::Lattice
}

/// An enumerated type for the k-point sets whose Hamiltonians can be dumped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HamiltonianKPoints {
    /// Variant for the Brillouin-zone sampling.
    Lattice,

    /// Variant for the band path.
    BandPath,
}

impl From<HamiltonianKPoints> for KPointSet {
    fn from(kset: HamiltonianKPoints) -> Self {
        match kset {
            HamiltonianKPoints::Lattice => KPointSet::Lattice,
            HamiltonianKPoints::BandPath => KPointSet::BandPath,
        }
    }
}

/// Structure containing control parameters for Hamiltonian dumps.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct HamiltonianParams {
    /// The k-point set whose Hamiltonians are dumped.
    #[builder(default = "HamiltonianKPoints::Lattice")]
    #[serde(default = "default_kset")]
    pub k_points: HamiltonianKPoints,
}

impl HamiltonianParams {
    /// Returns a builder to construct a [`HamiltonianParams`] structure.
    pub fn builder() -> HamiltonianParamsBuilder {
        HamiltonianParamsBuilder::default()
    }
}

impl Default for HamiltonianParams {
    fn default() -> Self {
        Self {
            k_points: default_kset(),
        }
    }
}

impl fmt::Display for HamiltonianParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "k-point set: {}", KPointSet::from(self.k_points))
    }
}

// ------
// Result
// ------

/// Structure to contain the files of a Hamiltonian dump.
#[derive(Clone, Debug)]
pub struct HamiltonianResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a HamiltonianParams,

    /// The files written.
    pub files: Vec<PathBuf>,
}

impl<'a> HamiltonianResult<'a> {
    pub fn parameters(&self) -> &HamiltonianParams {
        self.parameters
    }
}

// ------
// Driver
// ------

/// Driver writing the diagonal of the band Hamiltonian at every k-point. The dump involves no
/// k-point sum and runs on a single worker.
#[derive(Clone, Builder)]
pub struct HamiltonianDriver<'a> {
    /// The control parameters.
    parameters: &'a HamiltonianParams,

    /// The archive holding the lattice data.
    archive: &'a DftArchive,

    /// The directory for output files.
    output_dir: PathBuf,

    /// The result of the dump.
    #[builder(setter(skip), default = "None")]
    result: Option<HamiltonianResult<'a>>,
}

impl<'a> HamiltonianDriver<'a> {
    /// Returns a builder to construct a [`HamiltonianDriver`] structure.
    pub fn builder() -> HamiltonianDriverBuilder<'a> {
        HamiltonianDriverBuilder::default()
    }

    fn dump_hamiltonian(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        log_macsec_begin("Hamiltonian dump");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        let spin = spin_structure(self.archive)?;
        let lattice = LatticeData::select(self.archive, params.k_points.into())?;
        let comm = SerialCommunicator::new();
        let writer = comm
            .designated_writer()
            .ok_or_else(|| format_err!("A serial worker must be the designated writer."))?;
        let files = write_hamiltonian(
            &self.output_dir,
            &writer,
            lattice.hopping,
            lattice.n_orbitals,
            spin,
        )?;
        for path in files.iter() {
            kspectra_output!("Written: {}", path.display());
        }
        kspectra_output!("");
        log_macsec_end("Hamiltonian dump");

        self.result = Some(HamiltonianResult {
            parameters: params,
            files,
        });
        Ok(())
    }
}

impl<'a> KSpectraDriver for HamiltonianDriver<'a> {
    type Params = HamiltonianParams;

    type Outcome = HamiltonianResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No Hamiltonian dump found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.dump_hamiltonian()
    }
}
