//! Corrections applied to fully k-reduced local Green's functions.
//!
//! The local Green's functions of all shells are held in a [`LocalGfArena`] whose type parameter
//! records how far along the correction pipeline they are. Symmetrisation only accepts a
//! [`Reduced`] arena and rotation only a [`Symmetrised`] one, so the two corrections cannot be
//! applied out of order or to partially reduced data.

use std::fmt;
use std::marker::PhantomData;

use anyhow;
use indexmap::IndexMap;
use log;

use crate::archive::{fetch, ArchiveGroup, DftArchive, DftInput, ParprojInput};
use crate::error::SpectralError;
use crate::gf::{BlockGreenFunction, GreenFunction};
use crate::projection::ProjectionScheme;
use crate::spin::SpinBlock;

mod rotation;
mod symmetry;

pub use rotation::RotationSet;
pub use symmetry::{SymmetryGroup, SymmetryOperation};

#[cfg(test)]
#[path = "correction_tests.rs"]
mod correction_tests;

// =============
// Stage markers
// =============

/// Marker for local Green's functions that have been fully reduced over k-points.
#[derive(Clone, Debug)]
pub struct Reduced;

/// Marker for local Green's functions that have been symmetrised.
#[derive(Clone, Debug)]
pub struct Symmetrised;

/// Marker for local Green's functions that have been rotated to their local frames and are ready
/// for observable extraction.
#[derive(Clone, Debug)]
pub struct Corrected;

// ============
// LocalGfArena
// ============

/// Structure holding one block local Green's function per shell, at a given correction stage.
#[derive(Clone, Debug)]
pub struct LocalGfArena<S> {
    shells: Vec<BlockGreenFunction>,
    stage: PhantomData<S>,
}

impl LocalGfArena<Reduced> {
    /// Wraps local Green's functions that have been reduced over every k-point.
    pub fn from_reduced(shells: Vec<BlockGreenFunction>) -> Self {
        Self {
            shells,
            stage: PhantomData,
        }
    }
}

impl<S> LocalGfArena<S> {
    fn advance<T>(shells: Vec<BlockGreenFunction>) -> LocalGfArena<T> {
        LocalGfArena {
            shells,
            stage: PhantomData,
        }
    }

    pub fn n_shells(&self) -> usize {
        self.shells.len()
    }

    pub fn shells(&self) -> &[BlockGreenFunction] {
        &self.shells
    }

    /// Returns the local Green's function of one shell and spin block.
    pub fn get(&self, ish: usize, block: &SpinBlock) -> Option<&GreenFunction> {
        self.shells.get(ish).and_then(|shell| shell.get(block))
    }

    pub fn into_shells(self) -> Vec<BlockGreenFunction> {
        self.shells
    }
}

// ==================
// CorrectionPipeline
// ==================

/// Structure for the corrections configured for a projection.
#[derive(Clone, Debug, Default)]
pub struct CorrectionPipeline {
    symmetry: Option<SymmetryGroup>,
    rotations: Option<RotationSet>,
}

impl CorrectionPipeline {
    /// Creates a pipeline that leaves local Green's functions untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(symmetry: Option<SymmetryGroup>, rotations: Option<RotationSet>) -> Self {
        Self {
            symmetry,
            rotations,
        }
    }

    /// Reads the corrections that apply to a projection scheme from an archive.
    ///
    /// Wannier projections use the correlated-shell symmetry group and rotations,
    /// angular-momentum projections the all-shell ones. Coarse-grained projections and runs
    /// without projection are not corrected. Symmetrisation is only configured if the archive
    /// enables symmetry operations, and rotation only if it enables rotations.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::MissingInput`] if enabled corrections lack their data, and
    /// with [`SpectralError::Configuration`] if the data do not match `dims`.
    pub fn from_archive(
        archive: &DftArchive,
        scheme: ProjectionScheme,
        dims: &[usize],
    ) -> Result<Self, anyhow::Error> {
        let dft_input = archive.dft_input()?;
        let symm_op = dft_input.symm_op.unwrap_or(false);
        let use_rotations = dft_input.use_rotations.unwrap_or(false);
        let spin_orbit = dft_input.spin_orbit.unwrap_or(false);

        let (symmetry, rotations) = match scheme {
            ProjectionScheme::None | ProjectionScheme::CoarseGrained => (None, None),
            ProjectionScheme::Wannier => {
                let symmetry = if symm_op {
                    let symmcorr = archive.symmcorr()?;
                    Some(require_symmetry(symmcorr.symmetry.as_ref(), "dft_symmcorr_input")?)
                } else {
                    None
                };
                let rotations = if use_rotations {
                    dft_input.require(&["rot_mat", "rot_mat_time_inv"])?;
                    Some(RotationSet::new(
                        fetch(DftInput::NAME, "rot_mat", &dft_input.rot_mat)?.clone(),
                        fetch(DftInput::NAME, "rot_mat_time_inv", &dft_input.rot_mat_time_inv)?
                            .clone(),
                        spin_orbit,
                    )?)
                } else {
                    None
                };
                (symmetry, rotations)
            }
            ProjectionScheme::AngularMomentum => {
                let symmetry = if symm_op {
                    let symmpar = archive.symmpar()?;
                    Some(require_symmetry(symmpar.symmetry.as_ref(), "dft_symmpar_input")?)
                } else {
                    None
                };
                let rotations = if use_rotations {
                    let parproj = archive.parproj()?;
                    parproj.require(&["rot_mat_all", "rot_mat_all_time_inv"])?;
                    Some(RotationSet::new(
                        fetch(ParprojInput::NAME, "rot_mat_all", &parproj.rot_mat_all)?.clone(),
                        fetch(
                            ParprojInput::NAME,
                            "rot_mat_all_time_inv",
                            &parproj.rot_mat_all_time_inv,
                        )?
                        .clone(),
                        spin_orbit,
                    )?)
                } else {
                    None
                };
                (symmetry, rotations)
            }
        };
        if let Some(symmetry) = symmetry.as_ref() {
            symmetry.check_shells(dims)?;
        }
        if let Some(rotations) = rotations.as_ref() {
            rotations.check_shells(dims)?;
        }
        Ok(Self {
            symmetry,
            rotations,
        })
    }

    pub fn symmetry(&self) -> Option<&SymmetryGroup> {
        self.symmetry.as_ref()
    }

    pub fn rotations(&self) -> Option<&RotationSet> {
        self.rotations.as_ref()
    }

    /// Symmetrises a reduced arena if a symmetry group is configured.
    pub fn symmetrise(
        &self,
        arena: LocalGfArena<Reduced>,
    ) -> Result<LocalGfArena<Symmetrised>, anyhow::Error> {
        match &self.symmetry {
            Some(symmetry) => {
                log::debug!("Symmetrising {} shell(s): {symmetry}.", arena.n_shells());
                let shells = symmetry.symmetrise(arena.shells())?;
                Ok(LocalGfArena::<Reduced>::advance(shells))
            }
            None => Ok(LocalGfArena::<Reduced>::advance(arena.into_shells())),
        }
    }

    /// Rotates every spin block of every shell of a symmetrised arena to its local frame if
    /// rotations are configured.
    pub fn rotate(
        &self,
        arena: LocalGfArena<Symmetrised>,
    ) -> Result<LocalGfArena<Corrected>, anyhow::Error> {
        match &self.rotations {
            Some(_) => {
                log::debug!("Rotating {} shell(s) to their local frames.", arena.n_shells());
                let shells = arena
                    .into_shells()
                    .into_iter()
                    .enumerate()
                    .map(|(ish, shell)| self.rotate_shell(ish, &shell))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(LocalGfArena::<Symmetrised>::advance(shells))
            }
            None => Ok(LocalGfArena::<Symmetrised>::advance(arena.into_shells())),
        }
    }

    /// Applies symmetrisation then rotation.
    pub fn apply(
        &self,
        arena: LocalGfArena<Reduced>,
    ) -> Result<LocalGfArena<Corrected>, anyhow::Error> {
        self.rotate(self.symmetrise(arena)?)
    }

    /// Rotates every spin block of a single shell to its local frame. This is used for k-resolved
    /// quantities, which are never symmetrised.
    pub fn rotate_shell(
        &self,
        ish: usize,
        shell: &BlockGreenFunction,
    ) -> Result<BlockGreenFunction, anyhow::Error> {
        match &self.rotations {
            Some(rotations) => {
                let blocks = shell
                    .iter()
                    .map(|(block, gf)| rotations.to_local(ish, gf).map(|rotated| (*block, rotated)))
                    .collect::<Result<IndexMap<_, _>, _>>()?;
                Ok(BlockGreenFunction::from_blocks(blocks))
            }
            None => Ok(shell.clone()),
        }
    }
}

impl fmt::Display for CorrectionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symmetry {
            Some(symmetry) => writeln!(f, "Symmetrisation: {symmetry}")?,
            None => writeln!(f, "Symmetrisation: none")?,
        }
        match &self.rotations {
            Some(rotations) => writeln!(
                f,
                "Local-frame rotations: {} shell(s)",
                rotations.n_shells()
            )?,
            None => writeln!(f, "Local-frame rotations: none")?,
        }
        Ok(())
    }
}

fn require_symmetry(
    symmetry: Option<&SymmetryGroup>,
    group: &str,
) -> Result<SymmetryGroup, SpectralError> {
    symmetry
        .cloned()
        .ok_or_else(|| SpectralError::MissingInput(group.to_string(), vec!["symmetry".to_string()]))
}
