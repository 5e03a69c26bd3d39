use approx::assert_abs_diff_eq;
use indexmap::IndexMap;
use ndarray::{array, Array2, Array3};
use num_complex::Complex;

use crate::archive::{DftArchive, DftBackend, SymmCorrInput};
use crate::correction::{
    CorrectionPipeline, LocalGfArena, RotationSet, SymmetryGroup, SymmetryOperation,
};
use crate::error::SpectralError;
use crate::fixtures::model_dft_input;
use crate::gf::{BlockGreenFunction, GreenFunction};
use crate::projection::ProjectionScheme;
use crate::spin::SpinBlock;

fn c(re: f64, im: f64) -> Complex<f64> {
    Complex::new(re, im)
}

/// A deterministic, non-symmetric local Green's function.
fn sample_gf(n_freq: usize, dim: usize, seed: f64) -> GreenFunction {
    let data = Array3::from_shape_fn((n_freq, dim, dim), |(iw, i, j)| {
        let x = seed + iw as f64 * 0.3 + i as f64 * 0.7 - j as f64 * 0.2;
        c(x.sin(), (1.3 * x).cos() - 0.1 * j as f64)
    });
    GreenFunction::from_data(data).unwrap()
}

fn sample_shell(n_freq: usize, dim: usize, seed: f64) -> BlockGreenFunction {
    let mut blocks = IndexMap::new();
    blocks.insert(SpinBlock::Up, sample_gf(n_freq, dim, seed));
    blocks.insert(SpinBlock::Down, sample_gf(n_freq, dim, seed + 10.0));
    BlockGreenFunction::from_blocks(blocks)
}

fn swap_group(dim: usize) -> SymmetryGroup {
    SymmetryGroup {
        operations: vec![
            SymmetryOperation {
                perm: vec![0, 1],
                mats: vec![Array2::eye(dim), Array2::eye(dim)],
                time_inv: false,
            },
            SymmetryOperation {
                perm: vec![1, 0],
                mats: vec![Array2::eye(dim), Array2::eye(dim)],
                time_inv: false,
            },
        ],
    }
}

fn unitary() -> Array2<Complex<f64>> {
    let a = c(0.6, 0.0);
    let b = c(0.0, 0.8);
    array![[a, -b.conj()], [b, a.conj()]]
}

#[test]
fn test_symmetrise_swapped_shells_become_identical() {
    let shells = vec![sample_shell(6, 2, 0.1), sample_shell(6, 2, 2.5)];
    let pipeline = CorrectionPipeline::new(Some(swap_group(2)), None);
    let symmetrised = pipeline
        .symmetrise(LocalGfArena::from_reduced(shells.clone()))
        .unwrap();
    for block in [SpinBlock::Up, SpinBlock::Down] {
        let g0 = symmetrised.get(0, &block).unwrap();
        let g1 = symmetrised.get(1, &block).unwrap();
        assert_eq!(g0, g1);

        let mut average = shells[0].get(&block).unwrap().clone();
        average.add_checked(shells[1].get(&block).unwrap()).unwrap();
        average.scale(0.5);
        g0.data()
            .iter()
            .zip(average.data().iter())
            .for_each(|(x, y)| {
                assert_abs_diff_eq!(x.re, y.re, epsilon = 1e-14);
                assert_abs_diff_eq!(x.im, y.im, epsilon = 1e-14);
            });
    }
}

#[test]
fn test_symmetrise_time_reversal_uses_transpose() {
    let shells = vec![sample_shell(3, 2, 0.4)];
    let group = SymmetryGroup {
        operations: vec![SymmetryOperation {
            perm: vec![0],
            mats: vec![Array2::eye(2)],
            time_inv: true,
        }],
    };
    let symmetrised = group.symmetrise(&shells).unwrap();
    let gf = shells[0].get(&SpinBlock::Up).unwrap();
    let transposed = symmetrised[0].get(&SpinBlock::Up).unwrap();
    assert_eq!(transposed.data()[(1, 0, 1)], gf.data()[(1, 1, 0)]);
}

#[test]
fn test_rotate_identity_is_exact() {
    let shells = vec![sample_shell(5, 2, 0.2), sample_shell(5, 1, 1.7)];
    let rotations = RotationSet::new(vec![Array2::eye(2), Array2::eye(1)], vec![true, false], false)
        .unwrap();
    let pipeline = CorrectionPipeline::new(None, Some(rotations));
    let corrected = pipeline
        .apply(LocalGfArena::from_reduced(shells.clone()))
        .unwrap();
    assert_eq!(corrected.shells(), shells.as_slice());
}

#[test]
fn test_rotate_preserves_trace() {
    let shells = vec![sample_shell(7, 2, 0.9)];
    for (time_inv, spin_orbit) in [(false, false), (true, false), (true, true)] {
        let rotations = RotationSet::new(vec![unitary()], vec![time_inv], spin_orbit).unwrap();
        let pipeline = CorrectionPipeline::new(None, Some(rotations));
        let corrected = pipeline
            .apply(LocalGfArena::from_reduced(shells.clone()))
            .unwrap();
        for block in [SpinBlock::Up, SpinBlock::Down] {
            let before = shells[0].get(&block).unwrap().trace();
            let after = corrected.get(0, &block).unwrap().trace();
            before.iter().zip(after.iter()).for_each(|(x, y)| {
                assert_abs_diff_eq!(x.re, y.re, epsilon = 1e-12);
                assert_abs_diff_eq!(x.im, y.im, epsilon = 1e-12);
            });
        }
    }
}

#[test]
fn test_rotate_matches_explicit_formula() {
    let gf = sample_gf(2, 2, 0.3);
    let r = unitary();
    let rotations = RotationSet::new(vec![r.clone()], vec![false], false).unwrap();
    let rotated = rotations.to_local(0, &gf).unwrap();
    let g0 = gf.data().index_axis(ndarray::Axis(0), 0);
    let expected = r.t().mapv(|x| x.conj()).dot(&g0).dot(&r);
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(rotated.data()[(0, i, j)].re, expected[(i, j)].re, epsilon = 1e-14);
            assert_abs_diff_eq!(rotated.data()[(0, i, j)].im, expected[(i, j)].im, epsilon = 1e-14);
        }
    }
    assert!(rotations.to_local(3, &gf).is_err());
}

#[test]
fn test_symmetry_group_shell_checks() {
    let group = swap_group(1);
    assert!(group.check_shells(&[1, 1]).is_ok());
    assert!(matches!(
        group.check_shells(&[1, 2]),
        Err(SpectralError::Configuration(_))
    ));
    assert!(matches!(
        group.check_shells(&[1]),
        Err(SpectralError::Configuration(_))
    ));
    assert!(SymmetryGroup { operations: vec![] }
        .check_shells(&[1])
        .is_err());
    assert!(RotationSet::new(vec![Array2::eye(2)], vec![], false).is_err());
}

#[test]
fn test_pipeline_from_archive() {
    let mut dft_input = model_dft_input(DftBackend::Wannier90, 2);
    dft_input.symm_op = Some(true);
    dft_input.use_rotations = Some(true);
    let archive = DftArchive::in_memory().with_dft_input(dft_input.clone());
    let err = CorrectionPipeline::from_archive(&archive, ProjectionScheme::Wannier, &[1, 1])
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<SpectralError>(),
        Some(&SpectralError::MissingInput(
            "dft_symmcorr_input".to_string(),
            vec!["symmetry".to_string()]
        ))
    );

    let archive = DftArchive::in_memory()
        .with_dft_input(dft_input)
        .with_symmcorr(SymmCorrInput {
            symmetry: Some(swap_group(1)),
        });
    let pipeline =
        CorrectionPipeline::from_archive(&archive, ProjectionScheme::Wannier, &[1, 1]).unwrap();
    assert_eq!(pipeline.symmetry().map(|g| g.n_operations()), Some(2));
    assert_eq!(pipeline.rotations().map(|r| r.n_shells()), Some(2));

    // Coarse-grained projections are never corrected.
    let pipeline =
        CorrectionPipeline::from_archive(&archive, ProjectionScheme::CoarseGrained, &[3]).unwrap();
    assert!(pipeline.symmetry().is_none());
    assert!(pipeline.rotations().is_none());
}
