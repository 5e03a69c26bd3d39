//! Driver for orbitally-resolved partial charges.

use std::fmt;

use anyhow::{self, ensure, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::archive::{fetch, ArchiveGroup, DftArchive, DftInput, ParprojInput};
use crate::correction::CorrectionPipeline;
use crate::distributed::{run_workers, KPartition};
use crate::drivers::{designated_outcome, spin_structure, KSpectraDriver, LatticeData, LatticeOptions};
use crate::io::format::{kspectra_output, log_macsec_begin, log_macsec_end, KSpectraOutput};
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::observables::PartialCharges;
use crate::projection::{KPointSet, Projection, ProjectionScheme};
use crate::sumk::KSum;

#[cfg(test)]
#[path = "partial_charges_tests.rs"]
mod partial_charges_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

/// Structure containing control parameters for partial-charge calculations. Partial charges are
/// always computed with the angular-momentum projection.
#[derive(Clone, Builder, Debug, Default, Serialize, Deserialize)]
pub struct PartialChargesParams {
    /// The options for evaluating lattice Green's functions.
    #[builder(default)]
    #[serde(default)]
    pub lattice: LatticeOptions,
}

impl PartialChargesParams {
    /// Returns a builder to construct a [`PartialChargesParams`] structure.
    pub fn builder() -> PartialChargesParamsBuilder {
        PartialChargesParamsBuilder::default()
    }
}

impl fmt::Display for PartialChargesParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Projection scheme: {}", ProjectionScheme::AngularMomentum)?;
        write!(f, "{}", self.lattice)?;
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure to contain partial-charge results.
#[derive(Clone, Debug)]
pub struct PartialChargesResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a PartialChargesParams,

    /// The density matrices of every shell.
    pub charges: PartialCharges,
}

impl<'a> PartialChargesResult<'a> {
    pub fn parameters(&self) -> &PartialChargesParams {
        self.parameters
    }
}

// ------
// Driver
// ------

/// Driver for partial charges on a Matsubara mesh. The density matrix of every shell is the
/// density inside the energy window, from the projected local Green's functions, plus the
/// density below the window stored in the archive.
#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct PartialChargesDriver<'a> {
    /// The control parameters.
    parameters: &'a PartialChargesParams,

    /// The archive holding the lattice and partial-projector data.
    archive: &'a DftArchive,

    /// The Matsubara mesh.
    mesh: &'a FrequencyMesh,

    /// The number of workers sharing the k-point sweep.
    #[builder(default = "1")]
    n_workers: usize,

    /// The result of the calculation.
    #[builder(setter(skip), default = "None")]
    result: Option<PartialChargesResult<'a>>,
}

impl<'a> PartialChargesDriverBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        match self.n_workers {
            Some(0) => Err("At least one worker is required.".to_string()),
            _ => Ok(()),
        }
    }
}

impl<'a> PartialChargesDriver<'a> {
    /// Returns a builder to construct a [`PartialChargesDriver`] structure.
    pub fn builder() -> PartialChargesDriverBuilder<'a> {
        PartialChargesDriverBuilder::default()
    }

    /// Computes the partial charges.
    fn compute_partial_charges(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let archive = self.archive;
        let mesh = self.mesh;
        let scheme = ProjectionScheme::AngularMomentum;
        log_macsec_begin("Partial charges");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        mesh.require_kind(MeshKind::Imaginary)?;
        let projection = Projection::select(archive, scheme, KPointSet::Lattice)?;
        let parproj = archive.parproj()?;
        parproj.require(&["dens_mat_below"])?;
        let dens_mat_below = fetch(ParprojInput::NAME, "dens_mat_below", &parproj.dens_mat_below)?;
        let pipeline = CorrectionPipeline::from_archive(archive, scheme, projection.dims())?;
        let spin = spin_structure(archive)?;
        let gf_params = params.lattice.resolve(archive)?;
        let lattice = LatticeData::select(archive, KPointSet::Lattice)?;
        let provider = lattice.provider(archive, spin, &gf_params, mesh)?;
        let dft_input = archive.dft_input()?;
        let weights = fetch(DftInput::NAME, "bz_weights", &dft_input.bz_weights)?;
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
        let outcomes = run_workers(self.n_workers, |comm| {
            let sweep = ksum.sum_over_k(comm, &partition, weights, &projection, None)?;
            let local = pipeline.apply(sweep.local)?;
            PartialCharges::extract(&local, mesh, dens_mat_below, spin)
        })?;
        let charges = designated_outcome(outcomes)?;

        charges.log_output_display();
        kspectra_output!("");
        log_macsec_end("Partial charges");

        self.result = Some(PartialChargesResult {
            parameters: params,
            charges,
        });
        Ok(())
    }
}

impl<'a> KSpectraDriver for PartialChargesDriver<'a> {
    type Params = PartialChargesParams;

    type Outcome = PartialChargesResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No partial-charge results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.compute_partial_charges()
    }
}
