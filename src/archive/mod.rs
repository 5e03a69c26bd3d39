//! The persistent archive of lattice and projector data.
//!
//! An archive is a collection of named groups of named items. On disk, it is a directory holding
//! one binary file per group (`<group>.kspectra.grp`). Groups are loaded on first use and cached
//! for the lifetime of the [`DftArchive`] handle, so that the archive is read-only while a sweep
//! is in progress.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use anyhow::{self, format_err, Context};
use indexmap::IndexMap;
use log;
use ndarray::Array2;
use num_complex::Complex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::correction::SymmetryGroup;
use crate::distributed::DesignatedWriter;
use crate::error::SpectralError;
use crate::io::{read_kspectra_binary, write_kspectra_binary, KSpectraFileType};
use crate::provider::LocalSelfEnergy;
use crate::spin::SpinBlock;


/// Hopping matrices, indexed as `[ik][isp]`, each of shape `(n_orb_max, n_orb_max)`.
pub type Hopping = Vec<Vec<Array2<Complex<f64>>>>;

/// Projector matrices, indexed as `[ik][isp][ish]`, each of shape `(dim, n_orb_max)`.
pub type ProjectorMatrices = Vec<Vec<Vec<Array2<Complex<f64>>>>>;

/// Partial projector matrices, indexed as `[ik][isp][ish][ir]`, each of shape
/// `(dim, n_orb_max)`.
pub type PartialProjectorMatrices = Vec<Vec<Vec<Vec<Array2<Complex<f64>>>>>>;

/// Band-resolved density matrices, indexed by spin block then by k-point.
pub type BandOccupations = IndexMap<SpinBlock, Vec<Array2<f64>>>;

// ==================
// Supporting types
// ==================

/// An enumerated type for the electronic-structure codes that can produce an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DftBackend {
    /// Variant for data produced by Wien2k.
    #[serde(rename = "wien2k")]
    Wien2k,

    /// Variant for data produced by VASP.
    #[serde(rename = "vasp")]
    Vasp,

    /// Variant for data produced by a Wannier-function code.
    #[serde(rename = "wannier90")]
    Wannier90,

    /// Variant for data produced by Elk.
    #[serde(rename = "elk")]
    Elk,
}

impl fmt::Display for DftBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DftBackend::Wien2k => write!(f, "wien2k"),
            DftBackend::Vasp => write!(f, "vasp"),
            DftBackend::Wannier90 => write!(f, "wannier90"),
            DftBackend::Elk => write!(f, "elk"),
        }
    }
}

/// Structure describing an atomic shell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    /// Index of the atom carrying the shell.
    pub atom: usize,

    /// Index of the symmetry-inequivalent sort of the atom.
    pub sort: usize,

    /// Angular momentum of the shell.
    pub l: usize,

    /// Number of orbitals in the shell.
    pub dim: usize,
}

impl fmt::Display for ShellInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "atom {}, sort {}, l = {}, dim = {}",
            self.atom, self.sort, self.l, self.dim
        )
    }
}

/// Retrieves an item from an archive group.
///
/// # Errors
///
/// Errors with [`SpectralError::MissingInput`] if the item is absent.
pub fn fetch<'a, T>(
    group: &str,
    item: &str,
    value: &'a Option<T>,
) -> Result<&'a T, SpectralError> {
    value
        .as_ref()
        .ok_or_else(|| SpectralError::MissingInput(group.to_string(), vec![item.to_string()]))
}

// ==============
// ArchiveGroup
// ==============

/// Trait for a named group of optional items stored in an archive.
pub trait ArchiveGroup: Serialize + DeserializeOwned + Default + Send + Sync {
    /// The name of the group in the archive.
    const NAME: &'static str;

    /// Returns `true` if the named item is present.
    fn has_item(&self, item: &str) -> bool;

    /// Checks that every named item is present.
    ///
    /// # Errors
    ///
    /// Errors with a single [`SpectralError::MissingInput`] naming every absent item.
    fn require(&self, items: &[&str]) -> Result<(), SpectralError> {
        let missing = items
            .iter()
            .filter(|item| !self.has_item(item))
            .map(|item| item.to_string())
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SpectralError::MissingInput(Self::NAME.to_string(), missing))
        }
    }
}

macro_rules! archive_group {
    (
        $(#[$meta:meta])*
        $name:ident => $group:literal {
            $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: Option<$ty>, )*
        }

        impl ArchiveGroup for $name {
            const NAME: &'static str = $group;

            fn has_item(&self, item: &str) -> bool {
                match item {
                    $( stringify!($field) => self.$field.is_some(), )*
                    _ => false,
                }
            }
        }
    };
}

archive_group! {
    /// The main lattice input group.
    DftInput => "dft_input" {
        chemical_potential: f64,
        dft_code: DftBackend,
        n_k: usize,
        /// Brillouin-zone weights, one per k-point.
        bz_weights: Vec<f64>,
        /// Numbers of bands, of shape `(n_k, n_spin)`.
        n_orbitals: Array2<usize>,
        hopping: Hopping,
        /// Wannier projectors of the correlated shells.
        proj_mat: ProjectorMatrices,
        corr_shells: Vec<ShellInfo>,
        shells: Vec<ShellInfo>,
        spin_orbit: bool,
        spin_polarised: bool,
        use_rotations: bool,
        /// Local-frame rotations of the correlated shells.
        rot_mat: Vec<Array2<Complex<f64>>>,
        rot_mat_time_inv: Vec<bool>,
        symm_op: bool,
        /// Coarse-grained projectors, indexed as `[ik][isp]`.
        proj_mat_csc: Vec<Vec<Array2<Complex<f64>>>>,
    }
}

archive_group! {
    /// Symmetry operations acting on the correlated shells.
    SymmCorrInput => "dft_symmcorr_input" {
        symmetry: SymmetryGroup,
    }
}

archive_group! {
    /// Symmetry operations acting on all shells.
    SymmParInput => "dft_symmpar_input" {
        symmetry: SymmetryGroup,
    }
}

archive_group! {
    /// Partial projectors onto all shells.
    ParprojInput => "dft_parproj_input" {
        n_parproj: Vec<usize>,
        proj_mat_all: PartialProjectorMatrices,
        rot_mat_all: Vec<Array2<Complex<f64>>>,
        rot_mat_all_time_inv: Vec<bool>,
        /// Density matrices below the energy window, indexed as `[isp][ish]`.
        dens_mat_below: Vec<Vec<Array2<Complex<f64>>>>,
    }
}

archive_group! {
    /// Lattice data along a band path.
    BandsInput => "dft_bands_input" {
        n_k: usize,
        n_orbitals: Array2<usize>,
        hopping: Hopping,
        proj_mat: ProjectorMatrices,
        n_parproj: Vec<usize>,
        proj_mat_all: PartialProjectorMatrices,
    }
}

archive_group! {
    /// Lattice data on the irreducible k-points of a full-zone contour set.
    ContoursInput => "dft_contours_input" {
        n_k: usize,
        n_orbitals: Array2<usize>,
        hopping: Hopping,
        proj_mat: ProjectorMatrices,
        /// Reciprocal lattice vectors as columns.
        bmat: Array2<f64>,
        bz_n_k: usize,
        /// Irreducible k-point index of every full-zone point.
        bz_iknr: Vec<usize>,
        /// Fractional coordinates of the full-zone points, of shape `(bz_n_k, 3)`.
        bz_vkl: Array2<f64>,
    }
}

archive_group! {
    /// Derived data written back by analysis runs.
    MiscInput => "dft_misc_input" {
        occik: BandOccupations,
    }
}

archive_group! {
    /// Results of a previous many-body calculation.
    DmftOutput => "dmft_output" {
        self_energy: LocalSelfEnergy,
    }
}

// ===========
// DftArchive
// ===========

/// Handle to an archive.
#[derive(Debug, Default)]
pub struct DftArchive {
    /// The archive directory. In-memory archives have none.
    location: Option<PathBuf>,

    dft_input: OnceLock<DftInput>,
    symmcorr: OnceLock<SymmCorrInput>,
    symmpar: OnceLock<SymmParInput>,
    parproj: OnceLock<ParprojInput>,
    bands: OnceLock<BandsInput>,
    contours: OnceLock<ContoursInput>,
    dmft_output: OnceLock<DmftOutput>,

    /// The misc group is the only group that can be written back to, so it is guarded rather
    /// than set once.
    misc: RwLock<Option<MiscInput>>,
}

impl DftArchive {
    /// Opens an archive directory. No group is read until it is first requested.
    ///
    /// # Errors
    ///
    /// Errors if the path is not a directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(format_err!(SpectralError::Configuration(format!(
                "archive location `{}` is not a directory",
                path.display()
            ))));
        }
        Ok(Self {
            location: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Creates an empty archive that lives in memory only. Groups that are never set are
    /// treated as empty.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn load<'a, G: ArchiveGroup>(&self, cell: &'a OnceLock<G>) -> Result<&'a G, anyhow::Error> {
        if let Some(group) = cell.get() {
            return Ok(group);
        }
        let group = self.read_group::<G>()?;
        Ok(cell.get_or_init(|| group))
    }

    fn read_group<G: ArchiveGroup>(&self) -> Result<G, anyhow::Error> {
        match &self.location {
            Some(location) => {
                let name = location.join(G::NAME);
                let mut path = name.clone();
                path.set_extension(KSpectraFileType::Grp.ext());
                if path.is_file() {
                    log::debug!("Reading archive group `{}` from {}.", G::NAME, path.display());
                    read_kspectra_binary(&name, KSpectraFileType::Grp).with_context(|| {
                        format!("Unable to read archive group `{}`", G::NAME)
                    })
                } else {
                    log::debug!("Archive group `{}` not present; treating as empty.", G::NAME);
                    Ok(G::default())
                }
            }
            None => Ok(G::default()),
        }
    }

    pub fn dft_input(&self) -> Result<&DftInput, anyhow::Error> {
        self.load(&self.dft_input)
    }

    pub fn symmcorr(&self) -> Result<&SymmCorrInput, anyhow::Error> {
        self.load(&self.symmcorr)
    }

    pub fn symmpar(&self) -> Result<&SymmParInput, anyhow::Error> {
        self.load(&self.symmpar)
    }

    pub fn parproj(&self) -> Result<&ParprojInput, anyhow::Error> {
        self.load(&self.parproj)
    }

    pub fn bands(&self) -> Result<&BandsInput, anyhow::Error> {
        self.load(&self.bands)
    }

    pub fn contours(&self) -> Result<&ContoursInput, anyhow::Error> {
        self.load(&self.contours)
    }

    pub fn dmft_output(&self) -> Result<&DmftOutput, anyhow::Error> {
        self.load(&self.dmft_output)
    }

    /// Returns a copy of the stored band-resolved density matrices.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MissingInput`] if no occupations have been stored.
    pub fn band_occupations(&self) -> Result<BandOccupations, anyhow::Error> {
        {
            let guard = self
                .misc
                .read()
                .map_err(|_| format_err!("Misc group lock poisoned."))?;
            if let Some(misc) = guard.as_ref() {
                return Ok(fetch(MiscInput::NAME, "occik", &misc.occik)?.clone());
            }
        }
        let misc = self.read_group::<MiscInput>()?;
        let occik = fetch(MiscInput::NAME, "occik", &misc.occik).map(Clone::clone);
        *self
            .misc
            .write()
            .map_err(|_| format_err!("Misc group lock poisoned."))? = Some(misc);
        Ok(occik?)
    }

    /// Stores band-resolved density matrices in the misc group, replacing any previous ones.
    /// On-disk archives are updated immediately.
    pub fn store_band_occupations(
        &self,
        _writer: &DesignatedWriter,
        occik: BandOccupations,
    ) -> Result<(), anyhow::Error> {
        let mut guard = self
            .misc
            .write()
            .map_err(|_| format_err!("Misc group lock poisoned."))?;
        let mut misc = match guard.take() {
            Some(misc) => misc,
            None => self.read_group::<MiscInput>()?,
        };
        misc.occik = Some(occik);
        if let Some(location) = &self.location {
            write_kspectra_binary(location.join(MiscInput::NAME), KSpectraFileType::Grp, &misc)
                .with_context(|| format!("Unable to write archive group `{}`", MiscInput::NAME))?;
            log::debug!("Band occupations written to archive group `{}`.", MiscInput::NAME);
        }
        *guard = Some(misc);
        Ok(())
    }

    pub fn with_dft_input(self, group: DftInput) -> Self {
        let _ = self.dft_input.set(group);
        self
    }

    pub fn with_symmcorr(self, group: SymmCorrInput) -> Self {
        let _ = self.symmcorr.set(group);
        self
    }

    pub fn with_symmpar(self, group: SymmParInput) -> Self {
        let _ = self.symmpar.set(group);
        self
    }

    pub fn with_parproj(self, group: ParprojInput) -> Self {
        let _ = self.parproj.set(group);
        self
    }

    pub fn with_bands(self, group: BandsInput) -> Self {
        let _ = self.bands.set(group);
        self
    }

    pub fn with_contours(self, group: ContoursInput) -> Self {
        let _ = self.contours.set(group);
        self
    }

    pub fn with_dmft_output(self, group: DmftOutput) -> Self {
        let _ = self.dmft_output.set(group);
        self
    }

    pub fn with_misc(self, group: MiscInput) -> Self {
        if let Ok(mut guard) = self.misc.write() {
            *guard = Some(group);
        }
        self
    }
}

/// Writes a group into an archive directory, creating the directory if needed.
pub fn write_group<G: ArchiveGroup, P: AsRef<Path>>(
    location: P,
    group: &G,
) -> Result<(), anyhow::Error> {
    let location = location.as_ref();
    fs::create_dir_all(location)
        .with_context(|| format!("Unable to create archive directory {}", location.display()))?;
    write_kspectra_binary(location.join(G::NAME), KSpectraFileType::Grp, group)
        .with_context(|| format!("Unable to write archive group `{}`", G::NAME))
}
