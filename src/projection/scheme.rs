//! Selection of the projection scheme and of the projector data it uses.

use std::fmt;
use std::str::FromStr;

use anyhow::{self, format_err};
use itertools::Itertools;
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::archive::{
    fetch, ArchiveGroup, BandsInput, ContoursInput, DftArchive, DftBackend, DftInput,
    ParprojInput, PartialProjectorMatrices, ProjectorMatrices,
};
use crate::error::SpectralError;

// ================
// ProjectionScheme
// ================

/// An enumerated type for the ways a lattice Green's function can be projected onto local
/// orbitals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectionScheme {
    /// Variant for no projection.
    #[serde(rename = "none")]
    None,

    /// Variant for projection with one Wannier projector per correlated shell.
    #[serde(rename = "wann", alias = "wannier")]
    Wannier,

    /// Variant for projection with a single coarse-grained projector spanning the full orbital
    /// window. Only available for VASP data.
    #[serde(rename = "vasp", alias = "coarse_grained")]
    CoarseGrained,

    /// Variant for projection with a set of partial projectors per shell, summed. Only available
    /// for Wien2k data.
    #[serde(rename = "wien2k", alias = "angular_momentum")]
    AngularMomentum,
}

impl ProjectionScheme {
    /// Returns the tag used in output file names.
    pub fn tag(&self) -> &'static str {
        match self {
            ProjectionScheme::None => "none",
            ProjectionScheme::Wannier => "wann",
            ProjectionScheme::CoarseGrained => "vasp",
            ProjectionScheme::AngularMomentum => "wien2k",
        }
    }

    /// Returns the backend whose data this scheme requires, if any.
    pub fn required_backend(&self) -> Option<DftBackend> {
        match self {
            ProjectionScheme::None | ProjectionScheme::Wannier => None,
            ProjectionScheme::CoarseGrained => Some(DftBackend::Vasp),
            ProjectionScheme::AngularMomentum => Some(DftBackend::Wien2k),
        }
    }

    /// Checks that this scheme can be applied to data produced by `backend`.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if the scheme is specific to another backend.
    pub fn check_backend(&self, backend: DftBackend) -> Result<(), SpectralError> {
        match self.required_backend() {
            Some(required) if required != backend => Err(SpectralError::Configuration(format!(
                "the `{}` projection scheme requires data produced by {required}, but the archive \
                was produced by {backend}",
                self.tag()
            ))),
            _ => Ok(()),
        }
    }
}

impl FromStr for ProjectionScheme {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ProjectionScheme::None),
            "wann" | "wannier" => Ok(ProjectionScheme::Wannier),
            "vasp" | "coarse_grained" => Ok(ProjectionScheme::CoarseGrained),
            "wien2k" | "angular_momentum" => Ok(ProjectionScheme::AngularMomentum),
            _ => Err(SpectralError::Configuration(format!(
                "unknown projection scheme `{s}`; expected one of `none`, `wann`, `vasp`, `wien2k`"
            ))),
        }
    }
}

impl fmt::Display for ProjectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionScheme::None => write!(f, "No projection"),
            ProjectionScheme::Wannier => write!(f, "Wannier projectors (wann)"),
            ProjectionScheme::CoarseGrained => write!(f, "Coarse-grained projector (vasp)"),
            ProjectionScheme::AngularMomentum => {
                write!(f, "Angular-momentum partial projectors (wien2k)")
            }
        }
    }
}

// ==========
// KPointSet
// ==========

/// An enumerated type for the k-point sets an archive can hold data for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KPointSet {
    /// Variant for the weighted Brillouin-zone sampling used for k-sums.
    Lattice,

    /// Variant for the k-points along a band path.
    BandPath,

    /// Variant for the irreducible k-points of a full-zone contour set.
    Contours,
}

impl fmt::Display for KPointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KPointSet::Lattice => write!(f, "Brillouin-zone sampling"),
            KPointSet::BandPath => write!(f, "band path"),
            KPointSet::Contours => write!(f, "spectral contours"),
        }
    }
}

// ================
// ProjectorSource
// ================

/// An enumerated type for the projector data of a selected scheme. Every variant borrows from
/// archive groups that are loaded once and cached by the archive handle.
#[derive(Clone, Copy, Debug)]
pub enum ProjectorSource<'a> {
    /// Variant for no projection.
    None,

    /// Variant for one projector per (k-point, spin, shell).
    Single(&'a ProjectorMatrices),

    /// Variant for one projector per (k-point, spin).
    CoarseGrained(&'a Vec<Vec<Array2<Complex<f64>>>>),

    /// Variant for several partial projectors per (k-point, spin, shell). The first field gives
    /// the number of partial projectors of every shell.
    Partial(&'a [usize], &'a PartialProjectorMatrices),
}

// ==========
// Projection
// ==========

/// Structure for a selected projection scheme together with its shell layout and projector data.
#[derive(Clone, Debug)]
pub struct Projection<'a> {
    pub(crate) scheme: ProjectionScheme,
    pub(crate) dims: Vec<usize>,
    pub(crate) source: ProjectorSource<'a>,
}

impl<'a> Projection<'a> {
    /// Selects the projector data of `scheme` for the k-points in `kset`.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if the scheme is not valid for the backend
    /// that produced the archive or for the requested k-point set, and with
    /// [`SpectralError::MissingInput`] if the archive lacks required items. Either error is
    /// raised before any projector is used.
    pub fn select(
        archive: &'a DftArchive,
        scheme: ProjectionScheme,
        kset: KPointSet,
    ) -> Result<Self, anyhow::Error> {
        let dft_input = archive.dft_input()?;
        if scheme.required_backend().is_some() {
            let backend = *fetch(DftInput::NAME, "dft_code", &dft_input.dft_code)?;
            scheme.check_backend(backend)?;
        }
        let unsupported = || {
            format_err!(SpectralError::Configuration(format!(
                "the `{}` projection scheme is not available for the {kset}",
                scheme.tag()
            )))
        };

        match scheme {
            ProjectionScheme::None => Ok(Self {
                scheme,
                dims: vec![],
                source: ProjectorSource::None,
            }),
            ProjectionScheme::Wannier => {
                dft_input.require(&["corr_shells"])?;
                let dims = fetch(DftInput::NAME, "corr_shells", &dft_input.corr_shells)?
                    .iter()
                    .map(|shell| shell.dim)
                    .collect::<Vec<_>>();
                let proj_mat = match kset {
                    KPointSet::Lattice => {
                        dft_input.require(&["proj_mat"])?;
                        fetch(DftInput::NAME, "proj_mat", &dft_input.proj_mat)?
                    }
                    KPointSet::BandPath => {
                        let bands = archive.bands()?;
                        bands.require(&["proj_mat"])?;
                        fetch(BandsInput::NAME, "proj_mat", &bands.proj_mat)?
                    }
                    KPointSet::Contours => {
                        let contours = archive.contours()?;
                        contours.require(&["proj_mat"])?;
                        fetch(ContoursInput::NAME, "proj_mat", &contours.proj_mat)?
                    }
                };
                Self {
                    scheme,
                    dims,
                    source: ProjectorSource::Single(proj_mat),
                }
                .checked()
            }
            ProjectionScheme::CoarseGrained => {
                if kset != KPointSet::Lattice {
                    return Err(unsupported());
                }
                dft_input.require(&["proj_mat_csc"])?;
                let proj_mat_csc = fetch(DftInput::NAME, "proj_mat_csc", &dft_input.proj_mat_csc)?;
                let dim = proj_mat_csc
                    .first()
                    .and_then(|per_spin| per_spin.first())
                    .map(|proj| proj.nrows())
                    .ok_or_else(|| {
                        format_err!(SpectralError::Configuration(
                            "the coarse-grained projector data are empty".to_string()
                        ))
                    })?;
                Self {
                    scheme,
                    dims: vec![dim],
                    source: ProjectorSource::CoarseGrained(proj_mat_csc),
                }
                .checked()
            }
            ProjectionScheme::AngularMomentum => {
                dft_input.require(&["shells"])?;
                let dims = fetch(DftInput::NAME, "shells", &dft_input.shells)?
                    .iter()
                    .map(|shell| shell.dim)
                    .collect::<Vec<_>>();
                let parproj = archive.parproj()?;
                let (n_parproj, proj_mat_all) = match kset {
                    KPointSet::Lattice => {
                        parproj.require(&[
                            "n_parproj",
                            "proj_mat_all",
                            "rot_mat_all",
                            "rot_mat_all_time_inv",
                        ])?;
                        (
                            fetch(ParprojInput::NAME, "n_parproj", &parproj.n_parproj)?,
                            fetch(ParprojInput::NAME, "proj_mat_all", &parproj.proj_mat_all)?,
                        )
                    }
                    KPointSet::BandPath => {
                        let bands = archive.bands()?;
                        bands.require(&["n_parproj", "proj_mat_all"])?;
                        parproj.require(&["rot_mat_all", "rot_mat_all_time_inv"])?;
                        (
                            fetch(BandsInput::NAME, "n_parproj", &bands.n_parproj)?,
                            fetch(BandsInput::NAME, "proj_mat_all", &bands.proj_mat_all)?,
                        )
                    }
                    KPointSet::Contours => return Err(unsupported()),
                };
                if n_parproj.len() != dims.len() {
                    return Err(format_err!(SpectralError::Configuration(format!(
                        "{} partial-projector count(s) given for {} shell(s)",
                        n_parproj.len(),
                        dims.len()
                    ))));
                }
                Self {
                    scheme,
                    dims,
                    source: ProjectorSource::Partial(n_parproj, proj_mat_all),
                }
                .checked()
            }
        }
    }

    fn checked(self) -> Result<Self, anyhow::Error> {
        self.check_projector_rows()?;
        Ok(self)
    }

    /// Checks that every projector has as many rows as the shell it projects onto has
    /// orbitals.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] at the first projector of the wrong height.
    pub fn check_projector_rows(&self) -> Result<(), SpectralError> {
        let mismatch = |ik: usize, isp: usize, ish: usize, nrows: usize| {
            SpectralError::Configuration(format!(
                "the projector at k-point {ik}, spin {isp} onto shell {ish} has {nrows} row(s), \
                but the shell has {} orbital(s)",
                self.dims.get(ish).copied().unwrap_or(0)
            ))
        };
        match self.source {
            ProjectorSource::None => Ok(()),
            ProjectorSource::Single(proj_mat) => {
                for (ik, per_spin) in proj_mat.iter().enumerate() {
                    for (isp, per_shell) in per_spin.iter().enumerate() {
                        for (ish, proj) in per_shell.iter().enumerate().take(self.dims.len()) {
                            if proj.nrows() != self.dims[ish] {
                                return Err(mismatch(ik, isp, ish, proj.nrows()));
                            }
                        }
                    }
                }
                Ok(())
            }
            ProjectorSource::CoarseGrained(proj_mat_csc) => {
                let dim = self.dims.first().copied().unwrap_or(0);
                for (ik, per_spin) in proj_mat_csc.iter().enumerate() {
                    for (isp, proj) in per_spin.iter().enumerate() {
                        if proj.nrows() != dim {
                            return Err(mismatch(ik, isp, 0, proj.nrows()));
                        }
                    }
                }
                Ok(())
            }
            ProjectorSource::Partial(n_parproj, proj_mat_all) => {
                for (ik, per_spin) in proj_mat_all.iter().enumerate() {
                    for (isp, per_shell) in per_spin.iter().enumerate() {
                        for (ish, partial) in per_shell.iter().enumerate().take(self.dims.len()) {
                            let n_partial = n_parproj.get(ish).copied().unwrap_or(0);
                            if let Some(proj) = partial
                                .iter()
                                .take(n_partial)
                                .find(|proj| proj.nrows() != self.dims[ish])
                            {
                                return Err(mismatch(ik, isp, ish, proj.nrows()));
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Builds a projection directly from projector data, bypassing an archive.
    pub fn from_source(
        scheme: ProjectionScheme,
        dims: Vec<usize>,
        source: ProjectorSource<'a>,
    ) -> Self {
        Self {
            scheme,
            dims,
            source,
        }
    }

    pub fn scheme(&self) -> ProjectionScheme {
        self.scheme
    }

    pub fn n_shells(&self) -> usize {
        self.dims.len()
    }

    /// Returns the orbital dimension of every shell.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn source(&self) -> ProjectorSource<'a> {
        self.source
    }

    /// Returns `true` if a projection is performed.
    pub fn is_active(&self) -> bool {
        self.scheme != ProjectionScheme::None
    }

    /// Checks that every entry of `shell_list` indexes an existing shell.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::ShellIndex`] at the first index out of range.
    pub fn check_shells(&self, shell_list: &[usize]) -> Result<(), SpectralError> {
        match shell_list.iter().find(|ish| **ish >= self.n_shells()) {
            Some(ish) => Err(SpectralError::ShellIndex(*ish, self.n_shells())),
            None => Ok(()),
        }
    }
}

impl<'a> fmt::Display for Projection<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} shell(s) of dimension(s) [{}]",
            self.scheme,
            self.n_shells(),
            self.dims.iter().join(", ")
        )
    }
}
