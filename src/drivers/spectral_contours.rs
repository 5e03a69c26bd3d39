//! Driver for spectral-function contours over a full Brillouin-zone plane.

use std::fmt;
use std::path::PathBuf;

use anyhow::{self, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::archive::{fetch, ArchiveGroup, ContoursInput, DftArchive};
use crate::correction::CorrectionPipeline;
use crate::distributed::{run_workers, Communicator, KPartition};
use crate::drivers::spectral_function::frequency_window;
use crate::drivers::{
    default_true, designated_outcome, spin_structure, sync_before_report, KSpectraDriver,
    LatticeData, LatticeOptions,
};
use crate::error::SpectralError;
use crate::io::format::{
    kspectra_output, log_macsec_begin, log_macsec_end, log_subtitle, nice_bool, KSpectraOutput,
};
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::observables::{SpectralContours, SpectralFunction};
use crate::projection::{KPointSet, Projection, ProjectionScheme};
use crate::report::write_contours;
use crate::sumk::KSum;

#[cfg(test)]
#[path = "spectral_contours_tests.rs"]
mod spectral_contours_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

fn default_scheme() -> ProjectionScheme {
    ProjectionScheme::None
}

/// Structure containing control parameters for spectral contours.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct SpectralContoursParams {
    /// The projection scheme of the projected contours. Only [`ProjectionScheme::None`] and
    /// [`ProjectionScheme::Wannier`] are available for contours.
    #[builder(default = "ProjectionScheme::None")]
    #[serde(default = "default_scheme")]
    pub scheme: ProjectionScheme,

    /// Boolean indicating if only the Fermi-surface contour is produced, from the mesh frequency
    /// closest to zero. Otherwise one contour per mesh frequency is produced.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub fermi_surface: bool,

    /// The options for evaluating lattice Green's functions.
    #[builder(default)]
    #[serde(default)]
    pub lattice: LatticeOptions,

    /// Boolean indicating if the contours are written to files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub save_to_file: bool,
}

impl SpectralContoursParams {
    /// Returns a builder to construct a [`SpectralContoursParams`] structure.
    pub fn builder() -> SpectralContoursParamsBuilder {
        SpectralContoursParamsBuilder::default()
    }
}

impl Default for SpectralContoursParams {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            fermi_surface: true,
            lattice: LatticeOptions::default(),
            save_to_file: true,
        }
    }
}

impl fmt::Display for SpectralContoursParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Projection scheme: {}", self.scheme)?;
        writeln!(f, "Fermi surface only: {}", nice_bool(self.fermi_surface))?;
        write!(f, "{}", self.lattice)?;
        writeln!(f, "Save to files: {}", nice_bool(self.save_to_file))?;
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure to contain spectral contour results.
#[derive(Clone, Debug)]
pub struct SpectralContoursResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a SpectralContoursParams,

    /// The contours.
    pub contours: SpectralContours,

    /// The files written by the designated worker.
    pub files: Vec<PathBuf>,
}

impl<'a> SpectralContoursResult<'a> {
    pub fn parameters(&self) -> &SpectralContoursParams {
        self.parameters
    }
}

// ------
// Driver
// ------

/// Driver for spectral contours. Spectral functions are evaluated on the irreducible k-points of
/// the contour set and then mapped onto every full-zone point.
#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SpectralContoursDriver<'a> {
    /// The control parameters.
    parameters: &'a SpectralContoursParams,

    /// The archive holding the contour data.
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
    result: Option<SpectralContoursResult<'a>>,
}

impl<'a> SpectralContoursDriverBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        match self.n_workers {
            Some(0) => Err("At least one worker is required.".to_string()),
            _ => Ok(()),
        }
    }
}

impl<'a> SpectralContoursDriver<'a> {
    /// Returns a builder to construct a [`SpectralContoursDriver`] structure.
    pub fn builder() -> SpectralContoursDriverBuilder<'a> {
        SpectralContoursDriverBuilder::default()
    }

    /// Returns the frequency window of the contours. A Fermi-surface contour only needs the
    /// frequencies within two mesh steps of zero.
    fn window(&self) -> Result<Vec<usize>, anyhow::Error> {
        let points = self.mesh.points();
        if self.parameters.fermi_surface && points.len() > 1 {
            let dw = points[1] - points[0];
            frequency_window(self.mesh, Some((-2.0 * dw, 2.0 * dw)))
        } else {
            frequency_window(self.mesh, None)
        }
    }

    /// Computes the spectral contours.
    fn compute_contours(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let archive = self.archive;
        let mesh = self.mesh;
        log_macsec_begin("Spectral contours");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        mesh.require_kind(MeshKind::Real)?;
        let projection = Projection::select(archive, params.scheme, KPointSet::Contours)?;
        let contours = archive.contours()?;
        contours.require(&["bmat", "bz_n_k", "bz_iknr", "bz_vkl"])?;
        let bmat = fetch(ContoursInput::NAME, "bmat", &contours.bmat)?;
        let bz_n_k = *fetch(ContoursInput::NAME, "bz_n_k", &contours.bz_n_k)?;
        let bz_iknr = fetch(ContoursInput::NAME, "bz_iknr", &contours.bz_iknr)?;
        let bz_vkl = fetch(ContoursInput::NAME, "bz_vkl", &contours.bz_vkl)?;
        if bz_iknr.len() != bz_n_k {
            return Err(format_err!(SpectralError::Configuration(format!(
                "{} irreducible k-point index(es) given for {bz_n_k} contour point(s)",
                bz_iknr.len()
            ))));
        }
        let lattice = LatticeData::select(archive, KPointSet::Contours)?;
        SpectralContours::check_geometry(bmat, bz_iknr, bz_vkl, lattice.hopping.len())?;
        let shell_list = (0..projection.n_shells()).collect::<Vec<_>>();
        let pipeline = CorrectionPipeline::from_archive(archive, params.scheme, projection.dims())?;
        let window = self.window()?;
        let spin = spin_structure(archive)?;
        let gf_params = params.lattice.resolve(archive)?;
        let provider = lattice.provider(archive, spin, &gf_params, mesh)?;
        let partition = KPartition::new(lattice.hopping.len(), self.n_workers)?;
        kspectra_output!("Projection: {projection}");
        kspectra_output!("Corrections: {pipeline}");
        kspectra_output!("Contour points: {bz_n_k}");
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
            let spectral =
                SpectralFunction::extract(sweep, params.scheme, shell_list.clone(), 0.0);
            let contours = SpectralContours::extract(
                &spectral,
                bmat,
                bz_iknr,
                bz_vkl,
                params.fermi_surface,
            )?;
            sync_before_report(comm)?;
            let files = match (comm.designated_writer(), output_dir) {
                (Some(writer), Some(dir)) => write_contours(dir, &writer, &contours)?,
                _ => vec![],
            };
            Ok((contours, files))
        })?;
        let (contours, files) = designated_outcome(outcomes)?;

        contours.log_output_display();
        kspectra_output!("");
        if !files.is_empty() {
            log_subtitle("Output files");
            kspectra_output!("{} file(s) written to the output directory.", files.len());
            kspectra_output!("");
        }
        log_macsec_end("Spectral contours");

        self.result = Some(SpectralContoursResult {
            parameters: params,
            contours,
            files,
        });
        Ok(())
    }
}

impl<'a> KSpectraDriver for SpectralContoursDriver<'a> {
    type Params = SpectralContoursParams;

    type Outcome = SpectralContoursResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No spectral contour results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.compute_contours()
    }
}
