//! Matrix-valued Green's functions tabulated on a frequency mesh.

use std::f64::consts::PI;
use std::fmt;

use anyhow::{ensure, format_err};
use indexmap::IndexMap;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis, Zip};
use num_complex::Complex;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::mesh::{FrequencyMesh, MeshKind};
use crate::spin::SpinBlock;

#[cfg(test)]
#[path = "gf_tests.rs"]
mod gf_tests;

/// Returns the Hermitian conjugate of a complex matrix.
pub fn dagger(mat: &ArrayView2<Complex<f64>>) -> Array2<Complex<f64>> {
    mat.t().mapv(|x| x.conj())
}

// ==============
// GreenFunction
// ==============

/// Structure for a single square block of a Green's function, stored as an array of shape
/// `(n_freq, dim, dim)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GreenFunction {
    data: Array3<Complex<f64>>,
}

impl GreenFunction {
    /// Constructs a zero Green's function.
    pub fn zeros(n_freq: usize, dim: usize) -> Self {
        Self {
            data: Array3::zeros((n_freq, dim, dim)),
        }
    }

    /// Constructs a Green's function from raw data of shape `(n_freq, dim, dim)`.
    ///
    /// # Errors
    ///
    /// Errors if the matrices are not square.
    pub fn from_data(data: Array3<Complex<f64>>) -> Result<Self, anyhow::Error> {
        let (_, nrows, ncols) = data.dim();
        ensure!(
            nrows == ncols,
            "Green's function data must be square at every frequency, got {nrows} × {ncols}."
        );
        Ok(Self { data })
    }

    pub fn data(&self) -> &Array3<Complex<f64>> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<Complex<f64>> {
        &mut self.data
    }

    pub fn n_freq(&self) -> usize {
        self.data.dim().0
    }

    pub fn dim(&self) -> usize {
        self.data.dim().1
    }

    /// Resets every element to zero, keeping the shape.
    pub fn zero(&mut self) {
        self.data.fill(Complex::zero());
    }

    /// Adds another Green's function element-wise.
    ///
    /// # Errors
    ///
    /// Errors if the two Green's functions have different shapes.
    pub fn add_checked(&mut self, rhs: &GreenFunction) -> Result<(), anyhow::Error> {
        ensure!(
            self.data.dim() == rhs.data.dim(),
            "Cannot add a Green's function of shape {:?} to one of shape {:?}.",
            rhs.data.dim(),
            self.data.dim()
        );
        self.data += &rhs.data;
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.mapv_inplace(|x| x * factor);
    }

    /// Multiplies every frequency slice element-wise by a real weight matrix.
    pub fn mask(&mut self, weight: &Array2<f64>) -> Result<(), anyhow::Error> {
        ensure!(
            weight.dim() == (self.dim(), self.dim()),
            "Weight matrix of shape {:?} cannot mask a Green's function of dimension {}.",
            weight.dim(),
            self.dim()
        );
        self.data
            .axis_iter_mut(Axis(0))
            .for_each(|mut gw| gw.zip_mut_with(weight, |g, w| *g = *g * *w));
        Ok(())
    }

    /// Returns the trace at every frequency.
    pub fn trace(&self) -> Array1<Complex<f64>> {
        self.data
            .axis_iter(Axis(0))
            .map(|gw| gw.diag().sum())
            .collect()
    }

    /// Returns $`-\frac{1}{\pi}\,\mathrm{Im}\,\mathrm{Tr}\,G(\omega)`$ at every frequency.
    pub fn spectral_trace(&self) -> Array1<f64> {
        self.trace().mapv(|tr| -tr.im / PI)
    }

    /// Returns the Hermitian spectral matrix $`\frac{i}{2\pi}(G - G^\dagger)`$ at every
    /// frequency.
    pub fn spectral_matrix(&self) -> Array3<Complex<f64>> {
        let mut out = Array3::<Complex<f64>>::zeros(self.data.raw_dim());
        let prefactor = Complex::new(0.0, 1.0 / (2.0 * PI));
        Zip::from(out.axis_iter_mut(Axis(0)))
            .and(self.data.axis_iter(Axis(0)))
            .for_each(|mut aw, gw| {
                aw.assign(&((&gw - &dagger(&gw)).mapv(|x| x * prefactor)));
            });
        out
    }

    /// Returns the element-wise $`-\frac{1}{\pi}\,\mathrm{Im}\,G(\omega)`$ at the selected
    /// frequencies.
    pub fn spectral_elements(&self, indices: &[usize]) -> Array3<f64> {
        let dim = self.dim();
        let mut out = Array3::<f64>::zeros((indices.len(), dim, dim));
        for (iw_out, iw) in indices.iter().enumerate() {
            out.slice_mut(s![iw_out, .., ..])
                .assign(&self.data.slice(s![*iw, .., ..]).mapv(|x| -x.im / PI));
        }
        out
    }

    /// Returns the matrix transpose at every frequency.
    pub fn transpose(&self) -> Self {
        let mut data = self.data.clone();
        data.swap_axes(1, 2);
        Self {
            data: data.as_standard_layout().into_owned(),
        }
    }

    /// Returns $`L\,G(\omega)\,R`$ at every frequency. The result may be non-square if $`L`$ and
    /// $`R`$ are rectangular, which is only valid when $`L`$ has as many rows as $`R`$ has
    /// columns.
    ///
    /// # Errors
    ///
    /// Errors if the matrices are not conformable with the Green's function.
    pub fn sandwich(
        &self,
        left: &ArrayView2<Complex<f64>>,
        right: &ArrayView2<Complex<f64>>,
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            left.ncols() == self.dim() && right.nrows() == self.dim(),
            "Matrices of shapes {:?} and {:?} cannot sandwich a Green's function of dimension {}.",
            left.dim(),
            right.dim(),
            self.dim()
        );
        ensure!(
            left.nrows() == right.ncols(),
            "Sandwiching with matrices of shapes {:?} and {:?} does not give a square result.",
            left.dim(),
            right.dim()
        );
        let mut data = Array3::<Complex<f64>>::zeros((self.n_freq(), left.nrows(), right.ncols()));
        Zip::from(data.axis_iter_mut(Axis(0)))
            .and(self.data.axis_iter(Axis(0)))
            .par_for_each(|mut out, gw| out.assign(&left.dot(&gw).dot(right)));
        Ok(Self { data })
    }

    /// Computes the density matrix $`n = \langle c^\dagger c \rangle`$ from this Green's
    /// function.
    ///
    /// On a Matsubara mesh,
    /// ```math
    ///     n = \frac{1}{\beta} \sum_n \left[ G(i\omega_n) - \frac{M_1}{i\omega_n} \right]
    ///         + \frac{M_1}{2},
    /// ```
    /// where the first moment $`M_1`$ is estimated from the two outermost frequencies. On a
    /// real mesh, the spectral matrix is integrated with the trapezoidal rule over
    /// $`\omega \le 0`$.
    ///
    /// # Errors
    ///
    /// Errors if the mesh and the data have different numbers of frequencies.
    pub fn density(&self, mesh: &FrequencyMesh) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        ensure!(
            mesh.len() == self.n_freq(),
            "Mesh with {} points does not match Green's function with {} frequencies.",
            mesh.len(),
            self.n_freq()
        );
        match mesh.kind() {
            MeshKind::Imaginary => self.density_matsubara(mesh),
            MeshKind::Real => Ok(self.density_real(mesh)),
        }
    }

    fn density_matsubara(&self, mesh: &FrequencyMesh) -> Result<Array2<Complex<f64>>, anyhow::Error> {
        let beta = mesh
            .beta()
            .ok_or_else(|| format_err!("Matsubara mesh without an inverse temperature."))?;
        let points = mesh.points();
        let last = points.len() - 1;
        let iw_first = Complex::new(0.0, points[0]);
        let iw_last = Complex::new(0.0, points[last]);
        let m1 = (self.data.index_axis(Axis(0), last).mapv(|x| x * iw_last)
            + self.data.index_axis(Axis(0), 0).mapv(|x| x * iw_first))
            .mapv(|x| x * 0.5);
        let mut dens = Array2::<Complex<f64>>::zeros((self.dim(), self.dim()));
        for (gw, w) in self.data.axis_iter(Axis(0)).zip(points.iter()) {
            let iw = Complex::new(0.0, *w);
            dens = dens + &gw - &m1.mapv(|x| x / iw);
        }
        Ok(dens.mapv(|x| x / beta) + m1.mapv(|x| x * 0.5))
    }

    fn density_real(&self, mesh: &FrequencyMesh) -> Array2<Complex<f64>> {
        let spectral = self.spectral_matrix();
        let points = mesh.points();
        let mut dens = Array2::<Complex<f64>>::zeros((self.dim(), self.dim()));
        for i in 0..points.len().saturating_sub(1) {
            let (w0, w1) = (points[i], points[i + 1]);
            if w0 > 0.0 {
                break;
            }
            let a0 = spectral.index_axis(Axis(0), i);
            let a1 = spectral.index_axis(Axis(0), i + 1);
            if w1 <= 0.0 {
                dens = dens + (&a0 + &a1).mapv(|x| x * (0.5 * (w1 - w0)));
            } else {
                // Partial segment up to the Fermi level, linearly interpolated.
                let t = -w0 / (w1 - w0);
                let a_zero = &a0 + &(&a1 - &a0).mapv(|x| x * t);
                dens = dens + (&a0 + &a_zero).mapv(|x| x * (0.5 * -w0));
            }
        }
        dens
    }
}


impl fmt::Display for GreenFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Green's function block: {} × {} on {} frequencies",
            self.dim(),
            self.dim(),
            self.n_freq()
        )
    }
}

// ===================
// BlockGreenFunction
// ===================

/// Structure for a Green's function that is block-diagonal in spin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockGreenFunction {
    blocks: IndexMap<SpinBlock, GreenFunction>,
}

impl BlockGreenFunction {
    /// Constructs a zero block Green's function with the same dimension in every spin block.
    pub fn zeros(spin_blocks: &[SpinBlock], n_freq: usize, dim: usize) -> Self {
        Self {
            blocks: spin_blocks
                .iter()
                .map(|block| (*block, GreenFunction::zeros(n_freq, dim)))
                .collect(),
        }
    }

    pub fn from_blocks(blocks: IndexMap<SpinBlock, GreenFunction>) -> Self {
        Self { blocks }
    }

    pub fn get(&self, block: &SpinBlock) -> Option<&GreenFunction> {
        self.blocks.get(block)
    }

    pub fn get_mut(&mut self, block: &SpinBlock) -> Option<&mut GreenFunction> {
        self.blocks.get_mut(block)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, SpinBlock, GreenFunction> {
        self.blocks.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, SpinBlock, GreenFunction> {
        self.blocks.iter_mut()
    }

    pub fn spin_blocks(&self) -> Vec<SpinBlock> {
        self.blocks.keys().copied().collect()
    }

    pub fn zero(&mut self) {
        self.blocks.values_mut().for_each(GreenFunction::zero);
    }

    pub fn scale(&mut self, factor: f64) {
        self.blocks.values_mut().for_each(|gf| gf.scale(factor));
    }

    /// Adds another block Green's function block by block.
    ///
    /// # Errors
    ///
    /// Errors if `rhs` lacks a spin block of `self` or if two matching blocks have different
    /// shapes.
    pub fn add_checked(&mut self, rhs: &BlockGreenFunction) -> Result<(), anyhow::Error> {
        for (block, gf) in self.blocks.iter_mut() {
            let rhs_gf = rhs
                .blocks
                .get(block)
                .ok_or_else(|| format_err!("No spin block `{block}` to add."))?;
            gf.add_checked(rhs_gf)
                .map_err(|err| err.context(format!("Spin block `{block}` cannot be added")))?;
        }
        Ok(())
    }
}

