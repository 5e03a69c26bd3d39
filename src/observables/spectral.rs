//! k-resolved spectral functions along band paths and on Brillouin-zone contours.

use std::fmt;

use anyhow::{self, format_err};
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{s, Array2, Array4, Axis};

use crate::error::SpectralError;
use crate::io::format::write_subtitle;
use crate::projection::ProjectionScheme;
use crate::spin::SpinBlock;
use crate::sumk::KResolvedSweep;

// ================
// SpectralFunction
// ================

/// Structure for the k-resolved spectral function $`A(\mathbf{k}, \omega)`$ on a frequency
/// window, together with its projections onto selected shells.
#[derive(Clone, Debug)]
pub struct SpectralFunction {
    /// The frequencies of the window.
    pub(crate) frequencies: Vec<f64>,

    pub(crate) scheme: ProjectionScheme,

    /// The shells of the projected spectral functions, as indices into the shells of the
    /// projection.
    pub(crate) shell_list: Vec<usize>,

    /// The stacking offset: k-point `ik` is shifted by `ik * plot_shift`.
    pub(crate) plot_shift: f64,

    /// The total spectral function of every spin block, of shape `(n_k, n_window)`.
    pub(crate) total: IndexMap<SpinBlock, Array2<f64>>,

    /// The trace of the projected spectral function of every selected shell, of shape
    /// `(n_k, n_window)`.
    pub(crate) projected: Vec<IndexMap<SpinBlock, Array2<f64>>>,

    /// The element-resolved projected spectral function of every selected shell, of shape
    /// `(n_k, n_window, dim, dim)`. No stacking offset is applied.
    pub(crate) projected_orb: Vec<IndexMap<SpinBlock, Array4<f64>>>,
}

impl SpectralFunction {
    /// Extracts spectral functions from a reduced k-resolved sweep, adding the stacking offset
    /// to the total and traced projected spectral functions.
    pub fn extract(
        sweep: KResolvedSweep,
        scheme: ProjectionScheme,
        shell_list: Vec<usize>,
        plot_shift: f64,
    ) -> Self {
        let KResolvedSweep {
            frequencies,
            mut total,
            projected: projected_orb,
        } = sweep;
        for akw in total.values_mut() {
            shift_rows(akw, plot_shift);
        }
        let projected = projected_orb
            .iter()
            .map(|shell| {
                shell
                    .iter()
                    .map(|(block, akw_orb)| {
                        let (n_k, n_window, dim, _) = akw_orb.dim();
                        let mut akw = Array2::<f64>::zeros((n_k, n_window));
                        for i in 0..dim {
                            akw += &akw_orb.slice(s![.., .., i, i]);
                        }
                        shift_rows(&mut akw, plot_shift);
                        (*block, akw)
                    })
                    .collect::<IndexMap<_, _>>()
            })
            .collect::<Vec<_>>();
        Self {
            frequencies,
            scheme,
            shell_list,
            plot_shift,
            total,
            projected,
            projected_orb,
        }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn scheme(&self) -> ProjectionScheme {
        self.scheme
    }

    pub fn shell_list(&self) -> &[usize] {
        &self.shell_list
    }

    pub fn n_k(&self) -> usize {
        self.total
            .values()
            .next()
            .map(|akw| akw.nrows())
            .unwrap_or(0)
    }

    pub fn total(&self) -> &IndexMap<SpinBlock, Array2<f64>> {
        &self.total
    }

    pub fn projected(&self) -> &[IndexMap<SpinBlock, Array2<f64>>] {
        &self.projected
    }

    pub fn projected_orb(&self) -> &[IndexMap<SpinBlock, Array4<f64>>] {
        &self.projected_orb
    }
}

impl fmt::Display for SpectralFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "k-resolved spectral function")?;
        writeln!(f, "Number of k-points: {}", self.n_k())?;
        let (w_min, w_max) = (
            self.frequencies.first().copied().unwrap_or(0.0),
            self.frequencies.last().copied().unwrap_or(0.0),
        );
        writeln!(
            f,
            "Frequency window: {} point(s) in [{w_min:.4}, {w_max:.4}]",
            self.frequencies.len()
        )?;
        writeln!(f, "Stacking offset: {:.4}", self.plot_shift)?;
        if !self.shell_list.is_empty() {
            writeln!(
                f,
                "Projected shells ({}): [{}]",
                self.scheme.tag(),
                self.shell_list.iter().join(", ")
            )?;
        }
        Ok(())
    }
}

/// Adds `ik * shift` to row `ik`.
fn shift_rows(akw: &mut Array2<f64>, shift: f64) {
    if shift == 0.0 {
        return;
    }
    akw.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(ik, mut row)| row += ik as f64 * shift);
}

// ================
// SpectralContours
// ================

/// Structure for spectral functions evaluated on the points of a full Brillouin-zone contour
/// set, at one or several frequencies.
#[derive(Clone, Debug)]
pub struct SpectralContours {
    /// The frequencies at which the contours are evaluated.
    pub(crate) frequencies: Vec<f64>,

    /// Boolean indicating if only the frequency closest to zero is used.
    pub(crate) fermi_surface: bool,

    pub(crate) scheme: ProjectionScheme,

    /// The Cartesian coordinates of the contour points, of shape `(bz_n_k, 3)`.
    pub(crate) points: Array2<f64>,

    /// The total spectral function of every spin block, of shape `(n_freq, bz_n_k)`.
    pub(crate) total: IndexMap<SpinBlock, Array2<f64>>,

    /// The traced projected spectral function of every shell, of shape `(n_freq, bz_n_k)`.
    pub(crate) projected: Vec<IndexMap<SpinBlock, Array2<f64>>>,

    /// The element-resolved projected spectral function of every shell, of shape
    /// `(n_freq, bz_n_k, dim, dim)`.
    pub(crate) projected_orb: Vec<IndexMap<SpinBlock, Array4<f64>>>,
}

impl SpectralContours {
    /// Checks contour lattice data against a sweep over `n_k` irreducible k-points.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if any of these fail.
    pub fn check_geometry(
        bmat: &Array2<f64>,
        bz_iknr: &[usize],
        bz_vkl: &Array2<f64>,
        n_k: usize,
    ) -> Result<(), SpectralError> {
        if bmat.dim() != (3, 3) || bz_vkl.ncols() != 3 {
            return Err(SpectralError::Configuration(format!(
                "contour lattice data of shapes {:?} and {:?} are not three-dimensional",
                bmat.dim(),
                bz_vkl.dim()
            )));
        }
        if bz_vkl.nrows() != bz_iknr.len() {
            return Err(SpectralError::Configuration(format!(
                "{} contour point coordinate(s) given for {} contour point(s)",
                bz_vkl.nrows(),
                bz_iknr.len()
            )));
        }
        if let Some(ik) = bz_iknr.iter().find(|ik| **ik >= n_k) {
            return Err(SpectralError::Configuration(format!(
                "contour point mapped to irreducible k-point {ik}, but only {n_k} are available"
            )));
        }
        Ok(())
    }

    /// Maps spectral functions on irreducible k-points onto a full Brillouin-zone contour set.
    ///
    /// # Arguments
    ///
    /// * `spectral` - Spectral functions on the irreducible k-points, without stacking offset.
    /// * `bmat` - The reciprocal lattice vectors as columns.
    /// * `bz_iknr` - The irreducible k-point of every contour point.
    /// * `bz_vkl` - The fractional coordinates of every contour point, of shape `(bz_n_k, 3)`.
    /// * `fermi_surface` - If `true`, only the frequency of the window closest to zero is kept.
    ///
    /// # Errors
    ///
    /// Errors with [`SpectralError::Configuration`] if the contour data are inconsistent, or if
    /// the frequency window is empty.
    pub fn extract(
        spectral: &SpectralFunction,
        bmat: &Array2<f64>,
        bz_iknr: &[usize],
        bz_vkl: &Array2<f64>,
        fermi_surface: bool,
    ) -> Result<Self, anyhow::Error> {
        let inconsistent = |msg: String| format_err!(SpectralError::Configuration(msg));
        Self::check_geometry(bmat, bz_iknr, bz_vkl, spectral.n_k())?;

        let selected = if fermi_surface {
            let jw = spectral
                .frequencies
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
                .map(|(jw, _)| jw)
                .ok_or_else(|| {
                    inconsistent(
                        "no mesh frequency lies close enough to zero for a Fermi-surface contour"
                            .to_string(),
                    )
                })?;
            vec![jw]
        } else {
            if spectral.frequencies.is_empty() {
                return Err(inconsistent(
                    "the frequency window of the spectral contours is empty".to_string(),
                ));
            }
            (0..spectral.frequencies.len()).collect::<Vec<_>>()
        };

        let mut points = Array2::<f64>::zeros((bz_iknr.len(), 3));
        points
            .axis_iter_mut(Axis(0))
            .zip(bz_vkl.axis_iter(Axis(0)))
            .for_each(|(mut vkc, vkl)| vkc.assign(&bmat.dot(&vkl)));

        let gather = |akw: &Array2<f64>| {
            Array2::from_shape_fn((selected.len(), bz_iknr.len()), |(iom, j)| {
                akw[(bz_iknr[j], selected[iom])]
            })
        };
        let gather_orb = |akw: &Array4<f64>| {
            let (_, _, dim, _) = akw.dim();
            Array4::from_shape_fn((selected.len(), bz_iknr.len(), dim, dim), |(iom, j, a, b)| {
                akw[(bz_iknr[j], selected[iom], a, b)]
            })
        };
        let total = spectral
            .total
            .iter()
            .map(|(block, akw)| (*block, gather(akw)))
            .collect::<IndexMap<_, _>>();
        let projected = spectral
            .projected
            .iter()
            .map(|shell| {
                shell
                    .iter()
                    .map(|(block, akw)| (*block, gather(akw)))
                    .collect::<IndexMap<_, _>>()
            })
            .collect::<Vec<_>>();
        let projected_orb = spectral
            .projected_orb
            .iter()
            .map(|shell| {
                shell
                    .iter()
                    .map(|(block, akw)| (*block, gather_orb(akw)))
                    .collect::<IndexMap<_, _>>()
            })
            .collect::<Vec<_>>();

        Ok(Self {
            frequencies: selected
                .iter()
                .map(|jw| spectral.frequencies[*jw])
                .collect(),
            fermi_surface,
            scheme: spectral.scheme,
            points,
            total,
            projected,
            projected_orb,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn fermi_surface(&self) -> bool {
        self.fermi_surface
    }

    pub fn scheme(&self) -> ProjectionScheme {
        self.scheme
    }

    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    pub fn total(&self) -> &IndexMap<SpinBlock, Array2<f64>> {
        &self.total
    }

    pub fn projected(&self) -> &[IndexMap<SpinBlock, Array2<f64>>] {
        &self.projected
    }

    pub fn projected_orb(&self) -> &[IndexMap<SpinBlock, Array4<f64>>] {
        &self.projected_orb
    }
}

impl fmt::Display for SpectralContours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_subtitle(f, "Spectral contours")?;
        writeln!(f, "Number of contour points: {}", self.points.nrows())?;
        if self.fermi_surface {
            writeln!(
                f,
                "Fermi-surface frequency: {:.6}",
                self.frequencies.first().copied().unwrap_or(0.0)
            )?;
        } else {
            writeln!(f, "Number of frequencies: {}", self.frequencies.len())?;
        }
        Ok(())
    }
}
