//! Driver for k-resolved spectral functions along a band path.

use std::fmt;
use std::path::PathBuf;

use anyhow::{self, format_err};
use derive_builder::Builder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::archive::DftArchive;
use crate::correction::CorrectionPipeline;
use crate::distributed::{run_workers, Communicator, KPartition};
use crate::drivers::{
    default_true, designated_outcome, spin_structure, sync_before_report, KSpectraDriver,
    LatticeData, LatticeOptions,
};
use crate::error::SpectralError;
use crate::io::format::{
    kspectra_output, log_macsec_begin, log_macsec_end, log_subtitle, nice_bool, KSpectraOutput,
};
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::observables::SpectralFunction;
use crate::projection::{KPointSet, Projection, ProjectionScheme};
use crate::report::write_spectral_function;
use crate::sumk::KSum;

#[cfg(test)]
#[path = "spectral_function_tests.rs"]
mod spectral_function_tests;

/// Returns the indices of the mesh points inside an optional plotting range, or of every point
/// if no range is given.
///
/// # Errors
///
/// Errors with [`SpectralError::Configuration`] if no mesh point lies inside the range.
pub(crate) fn frequency_window(
    mesh: &FrequencyMesh,
    plot_range: Option<(f64, f64)>,
) -> Result<Vec<usize>, anyhow::Error> {
    let (w_min, w_max) = plot_range.unwrap_or_else(|| mesh.default_window());
    let window = mesh.window_indices(w_min, w_max);
    if window.is_empty() {
        Err(format_err!(SpectralError::Configuration(format!(
            "no mesh frequency lies inside the plotting range ({w_min}, {w_max})"
        ))))
    } else {
        Ok(window)
    }
}

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_scheme() -> ProjectionScheme {
    ProjectionScheme::None
}

/// Structure containing control parameters for k-resolved spectral functions.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct SpectralFunctionParams {
    /// The projection scheme of the projected spectral functions.
    #[builder(default = "ProjectionScheme::None")]
    #[serde(default = "default_scheme")]
    pub scheme: ProjectionScheme,

    /// The shells for which projected spectral functions are computed. If `None`, every shell of
    /// the projection is used.
    #[builder(default = "None")]
    #[serde(default)]
    pub shell_list: Option<Vec<usize>>,

    /// The frequency range `(w_min, w_max)`, exclusive, in which spectral functions are kept. If
    /// `None`, the whole mesh is used.
    #[builder(default = "None")]
    #[serde(default)]
    pub plot_range: Option<(f64, f64)>,

    /// The offset added to the spectral functions of k-point `ik`, multiplied by `ik`.
    #[builder(default = "0.0")]
    #[serde(default)]
    pub plot_shift: f64,

    /// The options for evaluating lattice Green's functions.
    #[builder(default)]
    #[serde(default)]
    pub lattice: LatticeOptions,

    /// Boolean indicating if the spectral functions are written to files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub save_to_file: bool,
}

impl SpectralFunctionParams {
    /// Returns a builder to construct a [`SpectralFunctionParams`] structure.
    pub fn builder() -> SpectralFunctionParamsBuilder {
        SpectralFunctionParamsBuilder::default()
    }
}

impl Default for SpectralFunctionParams {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            shell_list: None,
            plot_range: None,
            plot_shift: 0.0,
            lattice: LatticeOptions::default(),
            save_to_file: true,
        }
    }
}

impl fmt::Display for SpectralFunctionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Projection scheme: {}", self.scheme)?;
        writeln!(
            f,
            "Shell list: {}",
            self.shell_list
                .as_ref()
                .map(|shells| format!("[{}]", shells.iter().join(", ")))
                .unwrap_or_else(|| "all shells".to_string())
        )?;
        writeln!(
            f,
            "Plotting range: {}",
            self.plot_range
                .map(|(w_min, w_max)| format!("({w_min:.4}, {w_max:.4})"))
                .unwrap_or_else(|| "whole mesh".to_string())
        )?;
        writeln!(f, "Stacking offset: {:.4}", self.plot_shift)?;
        write!(f, "{}", self.lattice)?;
        writeln!(f, "Save to files: {}", nice_bool(self.save_to_file))?;
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure to contain k-resolved spectral function results.
#[derive(Clone, Debug)]
pub struct SpectralFunctionResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a SpectralFunctionParams,

    /// The spectral functions.
    pub spectral_function: SpectralFunction,

    /// The files written by the designated worker.
    pub files: Vec<PathBuf>,
}

impl<'a> SpectralFunctionResult<'a> {
    pub fn parameters(&self) -> &SpectralFunctionParams {
        self.parameters
    }
}

// ------
// Driver
// ------

/// Driver for k-resolved spectral functions on the k-points of the band path stored in an
/// archive.
#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SpectralFunctionDriver<'a> {
    /// The control parameters.
    parameters: &'a SpectralFunctionParams,

    /// The archive holding the band-path data.
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
    result: Option<SpectralFunctionResult<'a>>,
}

impl<'a> SpectralFunctionDriverBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        match self.n_workers {
            Some(0) => Err("At least one worker is required.".to_string()),
            _ => Ok(()),
        }
    }
}

impl<'a> SpectralFunctionDriver<'a> {
    /// Returns a builder to construct a [`SpectralFunctionDriver`] structure.
    pub fn builder() -> SpectralFunctionDriverBuilder<'a> {
        SpectralFunctionDriverBuilder::default()
    }

    /// Computes the k-resolved spectral functions.
    fn compute_spectral_function(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let archive = self.archive;
        let mesh = self.mesh;
        log_macsec_begin("k-resolved spectral function");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        mesh.require_kind(MeshKind::Real)?;
        let projection = Projection::select(archive, params.scheme, KPointSet::BandPath)?;
        let shell_list = match (&params.shell_list, projection.is_active()) {
            (Some(shell_list), _) => shell_list.clone(),
            (None, true) => (0..projection.n_shells()).collect(),
            (None, false) => vec![],
        };
        projection.check_shells(&shell_list)?;
        let pipeline = CorrectionPipeline::from_archive(archive, params.scheme, projection.dims())?;
        let window = frequency_window(mesh, params.plot_range)?;
        let spin = spin_structure(archive)?;
        let gf_params = params.lattice.resolve(archive)?;
        let lattice = LatticeData::select(archive, KPointSet::BandPath)?;
        let provider = lattice.provider(archive, spin, &gf_params, mesh)?;
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
            let sweep =
                ksum.k_resolved(comm, &partition, &projection, &pipeline, &window, &shell_list)?;
            let akw = SpectralFunction::extract(
                sweep,
                params.scheme,
                shell_list.clone(),
                params.plot_shift,
            );
            sync_before_report(comm)?;
            let files = match (comm.designated_writer(), output_dir) {
                (Some(writer), Some(dir)) => write_spectral_function(dir, &writer, &akw)?,
                _ => vec![],
            };
            Ok((akw, files))
        })?;
        let (spectral_function, files) = designated_outcome(outcomes)?;

        spectral_function.log_output_display();
        kspectra_output!("");
        if !files.is_empty() {
            log_subtitle("Output files");
            kspectra_output!("{} file(s) written to the output directory.", files.len());
            kspectra_output!("");
        }
        log_macsec_end("k-resolved spectral function");

        self.result = Some(SpectralFunctionResult {
            parameters: params,
            spectral_function,
            files,
        });
        Ok(())
    }
}

impl<'a> KSpectraDriver for SpectralFunctionDriver<'a> {
    type Params = SpectralFunctionParams;

    type Outcome = SpectralFunctionResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No k-resolved spectral function results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.compute_spectral_function()
    }
}
