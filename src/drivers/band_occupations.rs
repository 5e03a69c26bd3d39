//! Driver for band-resolved occupations.

use std::fmt;

use anyhow::{self, format_err};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::archive::{BandOccupations, DftArchive};
use crate::distributed::{run_workers, Communicator, KPartition};
use crate::drivers::{
    designated_outcome, spin_structure, sync_before_report, KSpectraDriver, LatticeData,
    LatticeOptions,
};
use crate::io::format::{
    kspectra_output, log_macsec_begin, log_macsec_end, log_subtitle, nice_bool, KSpectraOutput,
};
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::projection::KPointSet;
use crate::sumk::KSum;

#[cfg(test)]
#[path = "band_occupations_tests.rs"]
mod band_occupations_tests;

// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

/// Structure containing control parameters for band-occupation calculations.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct BandOccupationsParams {
    /// Boolean indicating if the occupations are stored back in the archive, where they can mask
    /// later density-of-states calculations.
    #[builder(default = "true")]
    #[serde(default = "crate::drivers::default_true")]
    pub store: bool,

    /// The options for evaluating lattice Green's functions.
    #[builder(default)]
    #[serde(default)]
    pub lattice: LatticeOptions,
}

impl BandOccupationsParams {
    /// Returns a builder to construct a [`BandOccupationsParams`] structure.
    pub fn builder() -> BandOccupationsParamsBuilder {
        BandOccupationsParamsBuilder::default()
    }
}

impl Default for BandOccupationsParams {
    fn default() -> Self {
        Self {
            store: true,
            lattice: LatticeOptions::default(),
        }
    }
}

impl fmt::Display for BandOccupationsParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store in archive: {}", nice_bool(self.store))?;
        write!(f, "{}", self.lattice)?;
        Ok(())
    }
}

// ------
// Result
// ------

/// Structure to contain band-occupation results.
#[derive(Clone, Debug)]
pub struct BandOccupationsResult<'a> {
    /// The control parameters used to obtain this set of results.
    parameters: &'a BandOccupationsParams,

    /// The band-resolved density matrix of every spin block at every k-point.
    pub occupations: BandOccupations,
}

impl<'a> BandOccupationsResult<'a> {
    pub fn parameters(&self) -> &BandOccupationsParams {
        self.parameters
    }

    /// Returns the sum of the diagonal occupations over k-points and spin blocks, without
    /// Brillouin-zone weights.
    pub fn total_occupation(&self) -> f64 {
        self.occupations
            .values()
            .flat_map(|per_k| per_k.iter())
            .map(|occ| occ.diag().sum())
            .sum()
    }
}

impl<'a> fmt::Display for BandOccupationsResult<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (block, per_k) in self.occupations.iter() {
            writeln!(f, "Spin block {block}:")?;
            for (ik, occ) in per_k.iter().enumerate() {
                let diag = occ
                    .diag()
                    .iter()
                    .map(|x| format!("{x:.5}"))
                    .collect::<Vec<_>>()
                    .join("  ");
                writeln!(f, "  k-point {ik:>4}: {diag}")?;
            }
        }
        Ok(())
    }
}

// ------
// Driver
// ------

/// Driver for the band-resolved occupations of the lattice Green's functions on a Matsubara
/// mesh.
#[derive(Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct BandOccupationsDriver<'a> {
    /// The control parameters.
    parameters: &'a BandOccupationsParams,

    /// The archive holding the lattice data, to which the occupations may be stored.
    archive: &'a DftArchive,

    /// The Matsubara mesh.
    mesh: &'a FrequencyMesh,

    /// The number of workers sharing the k-point sweep.
    #[builder(default = "1")]
    n_workers: usize,

    /// The result of the calculation.
    #[builder(setter(skip), default = "None")]
    result: Option<BandOccupationsResult<'a>>,
}

impl<'a> BandOccupationsDriverBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        match self.n_workers {
            Some(0) => Err("At least one worker is required.".to_string()),
            _ => Ok(()),
        }
    }
}

impl<'a> BandOccupationsDriver<'a> {
    /// Returns a builder to construct a [`BandOccupationsDriver`] structure.
    pub fn builder() -> BandOccupationsDriverBuilder<'a> {
        BandOccupationsDriverBuilder::default()
    }

    /// Computes the band occupations.
    fn compute_band_occupations(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let archive = self.archive;
        let mesh = self.mesh;
        log_macsec_begin("Band occupations");
        kspectra_output!("");
        params.log_output_display();
        kspectra_output!("");

        mesh.require_kind(MeshKind::Imaginary)?;
        let spin = spin_structure(archive)?;
        let gf_params = params.lattice.resolve(archive)?;
        let lattice = LatticeData::select(archive, KPointSet::Lattice)?;
        let provider = lattice.provider(archive, spin, &gf_params, mesh)?;
        let partition = KPartition::new(lattice.hopping.len(), self.n_workers)?;
        kspectra_output!("k-point partition: {partition}");
        kspectra_output!("");

        let ksum = KSum::new(&provider, spin, mesh, &gf_params);
        let outcomes = run_workers(self.n_workers, |comm| {
            let occupations = ksum.band_occupations(comm, &partition)?;
            sync_before_report(comm)?;
            if params.store {
                if let Some(writer) = comm.designated_writer() {
                    archive.store_band_occupations(&writer, occupations.clone())?;
                }
            }
            Ok(occupations)
        })?;
        let occupations = designated_outcome(outcomes)?;

        let result = BandOccupationsResult {
            parameters: params,
            occupations,
        };
        log_subtitle("Diagonal band occupations");
        kspectra_output!("");
        result.log_output_display();
        kspectra_output!("");
        if params.store {
            kspectra_output!("Band occupations stored in the archive.");
            kspectra_output!("");
        }
        log_macsec_end("Band occupations");

        self.result = Some(result);
        Ok(())
    }
}

impl<'a> KSpectraDriver for BandOccupationsDriver<'a> {
    type Params = BandOccupationsParams;

    type Outcome = BandOccupationsResult<'a>;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No band-occupation results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.compute_band_occupations()
    }
}
