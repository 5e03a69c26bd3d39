//! Driver for total and projected densities of states.

use std::fmt;
use std::path::PathBuf;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::archive::{fetch, ArchiveGroup, DftArchive, DftInput};
use crate::correction::CorrectionPipeline;
use crate::distributed::{run_workers, Communicator, KPartition};
use crate::drivers::{
    default_true, designated_outcome, spin_structure, sync_before_report, KSpectraDriver,
    LatticeData, LatticeOptions,
};
use crate::io::format::{
    kspectra_output, log_macsec_begin, log_macsec_end, log_subtitle, nice_bool, KSpectraOutput,
};
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::observables::DensityOfStates;
use crate::projection::{KPointSet, Projection, ProjectionScheme};
use crate::report::write_dos;
use crate::sumk::KSum;

#[cfg(test)]
#[path = "density_of_states_tests.rs"]
mod density_of_states_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_scheme() -> ProjectionScheme {
    ProjectionScheme::None
}

/// Structure containing control parameters for density-of-states calculations.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct DensityOfStatesParams {
    /// The projection scheme of the projected densities of states.
    #[builder(default = "ProjectionScheme::None")]
    #[serde(default = "default_scheme")]
    pub scheme: ProjectionScheme,

    /// Boolean indicating if only the occupied spectrum is computed, by masking every lattice
    /// Green's function with the band occupations stored in the archive.
    #[builder(default = "false")]
    #[serde(default)]
    pub occupied: bool,

    /// The options for evaluating lattice Green's functions.
    #[builder(default)]
    #[serde(default)]
    pub lattice: LatticeOptions,

    /// Boolean indicating if the densities of states are written to files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub save_to_file: bool,
}

impl DensityOfStatesParams {
    /// Returns a builder to construct a [`DensityOfStatesParams`] structure.
    pub fn builder() -> DensityOfStatesParamsBuilder {
        DensityOfStatesParamsBuilder::default()
    }
}

impl Default for DensityOfStatesParams {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            occupied: false,
            lattice: LatticeOptions::default(),
            save_to_file: true,
        }
    }
}

impl fmt::Display for DensityOfStatesParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Projection scheme: {}", self.scheme)?;
        writeln!(f, "Occupied spectrum only: {}", nice_bool(self.occupied))?;
        write!(f, "{}", self.lattice)?;
        writeln!(f, "Save to files: {}", nice_bool(self.save_to_file))?;
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure to contain density-of-states results.
#[derive(Clone, Debug)]
pub struct DensityOfStatesResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a DensityOfStatesParams,

    /// The densities of states.
    pub dos: DensityOfStates,

    /// The files written by the designated worker.
    pub files: Vec<PathBuf>,
}

impl<'a> DensityOfStatesResult<'a> {
    pub fn parameters(&self) -> &DensityOfStatesParams {
        self.parameters
    }
}

// ------
// Driver
// ------

/// Driver for total and projected densities of states on a real-frequency mesh.
#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct DensityOfStatesDriver<'a> {
    /// The control parameters.
    parameters: &'a DensityOfStatesParams,

    /// The archive holding the lattice and projector data.
    archive: &'a DftArchive,

    /// The real-frequency mesh.
    mesh: &'a FrequencyMesh,

    /// The number of workers sharing the k-point sweep.
    #[builder(default = "1")]
    n_workers: usize,

    /// The directory for output files. If `None`, no files are written.
    #[builder(default = "None")]
    output_dir: Option<PathBuf>,

    /// The result of the calculation.
    #[builder(setter(skip), default = "None")]
    result: Option<DensityOfStatesResult<'a>>,
}

impl<'a> DensityOfStatesDriverBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        match self.n_workers {
            Some(0) => Err("At least one worker is required.".to_string()),
            _ => Ok(()),
        }
    }
}

impl<'a> DensityOfStatesDriver<'a> {
    /// Returns a builder to construct a [`DensityOfStatesDriver`] structure.
    pub fn builder() -> DensityOfStatesDriverBuilder<'a> {
        DensityOfStatesDriverBuilder::default()
    }

    /// Computes the densities of states.
    fn compute_dos(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let archive = self.archive;
        let mesh = self.mesh;
        log_macsec_begin("Density of states");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        // Validation happens here, before any k-point is touched.
        mesh.require_kind(MeshKind::Real)?;
        let projection = Projection::select(archive, params.scheme, KPointSet::Lattice)?;
        let pipeline = CorrectionPipeline::from_archive(archive, params.scheme, projection.dims())?;
        let spin = spin_structure(archive)?;
        let gf_params = params.lattice.resolve(archive)?;
        let lattice = LatticeData::select(archive, KPointSet::Lattice)?;
        let provider = lattice.provider(archive, spin, &gf_params, mesh)?;
        let dft_input = archive.dft_input()?;
        let weights = fetch(DftInput::NAME, "bz_weights", &dft_input.bz_weights)?;
        let occupations = if params.occupied {
            Some(archive.band_occupations()?)
        } else {
            None
        };
        ensure!(
            weights.len() == lattice.hopping.len(),
            "{} Brillouin-zone weight(s) given for {} k-point(s).",
            weights.len(),
            lattice.hopping.len()
        );
        let partition = KPartition::new(lattice.hopping.len(), self.n_workers)?;
        kspectra_output!("Projection: {projection}");
        kspectra_output!("Corrections: {pipeline}");
        kspectra_output!("k-point partition: {partition}");
        kspectra_output!("");

        let ksum = KSum::new(&provider, spin, mesh, &gf_params);
        let output_dir = if params.save_to_file {
            self.output_dir.as_deref()
        } else {
            None
        };
        let outcomes = run_workers(self.n_workers, |comm| {
            let sweep = ksum.sum_over_k(
                comm,
                &partition,
                weights,
                &projection,
                occupations.as_ref(),
            )?;
            let local = pipeline.apply(sweep.local)?;
            let dos = DensityOfStates::extract(mesh, params.scheme, sweep.total, &local);
            sync_before_report(comm)?;
            let files = match (comm.designated_writer(), output_dir) {
                (Some(writer), Some(dir)) => write_dos(dir, &writer, &dos)?,
                _ => vec![],
            };
            Ok((dos, files))
        })?;
        let (dos, files) = designated_outcome(outcomes)?;

        dos.log_output_display();
        kspectra_output!("");
        if !files.is_empty() {
            log_subtitle("Output files");
            for path in files.iter() {
                kspectra_output!("  {}", path.display());
            }
            kspectra_output!("");
        }
        log_macsec_end("Density of states");

        self.result = Some(DensityOfStatesResult {
            parameters: params,
            dos,
            files,
        });
        Ok(())
    }
}

impl<'a> KSpectraDriver for DensityOfStatesDriver<'a> {
    type Params = DensityOfStatesParams;

    type Outcome = DensityOfStatesResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No density-of-states results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.compute_dos()
    }
}
