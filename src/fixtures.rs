//! Small model archives shared by the unit tests.

use std::f64::consts::PI;

use ndarray::{array, Array2};
use num_complex::Complex;

use crate::archive::{
    BandsInput, ContoursInput, DftArchive, DftBackend, DftInput, ParprojInput,
    PartialProjectorMatrices, ShellInfo,
};

pub(crate) const N_BANDS: usize = 3;

pub(crate) fn c(re: f64, im: f64) -> Complex<f64> {
    Complex::new(re, im)
}

/// Hermitian three-band Hamiltonian at k-point `ik` of `n_k`.
pub(crate) fn model_hamiltonian(ik: usize, n_k: usize) -> Array2<Complex<f64>> {
    let phase = 2.0 * PI * ik as f64 / n_k as f64;
    let t = Complex::from_polar(0.15, phase);
    let u = Complex::from_polar(0.05, -0.5 * phase);
    array![
        [c(-1.0 + 0.4 * phase.cos(), 0.0), t, u],
        [t.conj(), c(0.2 - 0.3 * phase.cos(), 0.0), c(0.1, 0.0)],
        [u.conj(), c(0.1, 0.0), c(1.1 + 0.2 * phase.sin(), 0.0)],
    ]
}

/// Band counts: every k-point has three bands except the last, which has two.
pub(crate) fn model_band_counts(n_k: usize) -> Array2<usize> {
    let mut n_orbitals = Array2::<usize>::from_elem((n_k, 1), N_BANDS);
    if n_k > 1 {
        n_orbitals[(n_k - 1, 0)] = N_BANDS - 1;
    }
    n_orbitals
}

/// Normalised, uneven Brillouin-zone weights.
pub(crate) fn model_weights(n_k: usize) -> Vec<f64> {
    let raw = (0..n_k).map(|ik| 1.0 + ik as f64 * 0.5).collect::<Vec<_>>();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Two one-orbital correlated shells built from orthogonal band combinations.
pub(crate) fn model_wannier_projectors(n_k: usize) -> Vec<Vec<Vec<Array2<Complex<f64>>>>> {
    let r = 1.0 / 2.0f64.sqrt();
    (0..n_k)
        .map(|_| {
            vec![vec![
                array![[c(r, 0.0), c(r, 0.0), c(0.0, 0.0)]],
                array![[c(r, 0.0), c(-r, 0.0), c(0.0, 0.0)]],
            ]]
        })
        .collect()
}

/// Partial projectors: shell 0 (one orbital) has two partial projectors, shell 1 (two orbitals)
/// has one.
pub(crate) fn model_partial_projectors(n_k: usize) -> PartialProjectorMatrices {
    (0..n_k)
        .map(|ik| {
            let a = 0.3 + 0.1 * ik as f64;
            vec![vec![
                vec![
                    array![[c(a, 0.0), c(0.2, 0.1), c(0.0, 0.0)]],
                    array![[c(0.0, 0.0), c(0.1, -0.3), c(0.4, 0.0)]],
                ],
                vec![array![
                    [c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)],
                    [c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)],
                ]],
            ]]
        })
        .collect()
}

pub(crate) fn model_dft_input(backend: DftBackend, n_k: usize) -> DftInput {
    let shell = |atom: usize, dim: usize| ShellInfo {
        atom,
        sort: 0,
        l: if dim == 1 { 0 } else { 1 },
        dim,
    };
    DftInput {
        chemical_potential: Some(0.05),
        dft_code: Some(backend),
        n_k: Some(n_k),
        bz_weights: Some(model_weights(n_k)),
        n_orbitals: Some(model_band_counts(n_k)),
        hopping: Some(
            (0..n_k)
                .map(|ik| vec![model_hamiltonian(ik, n_k)])
                .collect(),
        ),
        proj_mat: Some(model_wannier_projectors(n_k)),
        corr_shells: Some(vec![shell(0, 1), shell(1, 1)]),
        shells: Some(vec![shell(0, 1), shell(1, 2)]),
        spin_orbit: Some(false),
        spin_polarised: Some(false),
        use_rotations: Some(false),
        rot_mat: Some(vec![Array2::eye(1), Array2::eye(1)]),
        rot_mat_time_inv: Some(vec![false, false]),
        symm_op: Some(false),
        proj_mat_csc: Some((0..n_k).map(|_| vec![Array2::eye(N_BANDS)]).collect()),
    }
}

pub(crate) fn model_parproj_input(n_k: usize) -> ParprojInput {
    ParprojInput {
        n_parproj: Some(vec![2, 1]),
        proj_mat_all: Some(model_partial_projectors(n_k)),
        rot_mat_all: Some(vec![Array2::eye(1), Array2::eye(2)]),
        rot_mat_all_time_inv: Some(vec![false, false]),
        dens_mat_below: Some(vec![vec![
            array![[c(0.5, 0.0)]],
            array![[c(0.25, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(0.25, 0.0)]],
        ]]),
    }
}

pub(crate) fn model_bands_input(n_k: usize) -> BandsInput {
    let dft_input = model_dft_input(DftBackend::Wien2k, n_k);
    BandsInput {
        n_k: Some(n_k),
        n_orbitals: dft_input.n_orbitals,
        hopping: dft_input.hopping,
        proj_mat: dft_input.proj_mat,
        n_parproj: Some(vec![2, 1]),
        proj_mat_all: Some(model_partial_projectors(n_k)),
    }
}

/// A complete in-memory archive for the given backend.
pub(crate) fn model_archive(backend: DftBackend, n_k: usize) -> DftArchive {
    DftArchive::in_memory()
        .with_dft_input(model_dft_input(backend, n_k))
        .with_parproj(model_parproj_input(n_k))
        .with_bands(model_bands_input(n_k))
}

/// Contour data on `n_k` irreducible k-points unfolded onto a `2 × 2 × 1` full-zone grid.
pub(crate) fn model_contours_input(n_k: usize) -> ContoursInput {
    let dft_input = model_dft_input(DftBackend::Wannier90, n_k);
    let bz_vkl = Array2::from_shape_fn((4, 3), |(j, x)| match x {
        0 => 0.5 * (j % 2) as f64,
        1 => 0.5 * (j / 2) as f64,
        _ => 0.0,
    });
    ContoursInput {
        n_k: Some(n_k),
        n_orbitals: dft_input.n_orbitals,
        hopping: dft_input.hopping,
        proj_mat: dft_input.proj_mat,
        bmat: Some(Array2::eye(3) * 2.0 * PI),
        bz_n_k: Some(4),
        bz_iknr: Some((0..4).map(|j| j % n_k).collect()),
        bz_vkl: Some(bz_vkl),
    }
}
