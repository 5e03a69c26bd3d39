use std::f64::consts::PI;

use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, Array3};
use num_complex::Complex;

use crate::gf::{dagger, BlockGreenFunction, GreenFunction};
use crate::mesh::FrequencyMesh;
use crate::spin::SpinBlock;

fn c(re: f64, im: f64) -> Complex<f64> {
    Complex::new(re, im)
}

/// Diagonal non-interacting Green's function with the given levels.
fn diagonal_gf(mesh: &FrequencyMesh, levels: &[f64], broadening: f64) -> GreenFunction {
    let dim = levels.len();
    let mut data = Array3::<Complex<f64>>::zeros((mesh.len(), dim, dim));
    for iw in 0..mesh.len() {
        let z = mesh.complex_point(iw, broadening);
        for (i, e) in levels.iter().enumerate() {
            data[(iw, i, i)] = (z - *e).inv();
        }
    }
    GreenFunction::from_data(data).unwrap()
}

#[test]
fn test_gf_from_data_rejects_non_square() {
    let data = Array3::<Complex<f64>>::zeros((3, 2, 1));
    assert!(GreenFunction::from_data(data).is_err());
}

#[test]
fn test_gf_spectral_trace_lorentzian() {
    let mesh = FrequencyMesh::real(-1.0, 1.0, 21).unwrap();
    let eta = 0.1;
    let gf = diagonal_gf(&mesh, &[0.0, 0.5], eta);
    let dos = gf.spectral_trace();
    for (iw, w) in mesh.points().iter().enumerate() {
        let expected = eta / PI / (w * w + eta * eta)
            + eta / PI / ((w - 0.5) * (w - 0.5) + eta * eta);
        assert_abs_diff_eq!(dos[iw], expected, epsilon = 1e-12);
    }
}

#[test]
fn test_gf_spectral_matrix_is_hermitian_with_trace_matching_dos() {
    let mesh = FrequencyMesh::real(-1.0, 1.0, 11).unwrap();
    let mut data = Array3::<Complex<f64>>::zeros((mesh.len(), 2, 2));
    for iw in 0..mesh.len() {
        let z = mesh.complex_point(iw, 0.05);
        data[(iw, 0, 0)] = (z - 0.2).inv();
        data[(iw, 1, 1)] = (z + 0.3).inv();
        data[(iw, 0, 1)] = c(0.1, -0.02) * (z - 0.2).inv();
        data[(iw, 1, 0)] = c(0.1, -0.02) * (z - 0.2).inv();
    }
    let gf = GreenFunction::from_data(data).unwrap();
    let spectral = gf.spectral_matrix();
    let dos = gf.spectral_trace();
    for iw in 0..mesh.len() {
        let aw = spectral.index_axis(ndarray::Axis(0), iw);
        let aw_dag = dagger(&aw);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(aw[(i, j)].re, aw_dag[(i, j)].re, epsilon = 1e-14);
                assert_abs_diff_eq!(aw[(i, j)].im, aw_dag[(i, j)].im, epsilon = 1e-14);
            }
        }
        let tr = aw[(0, 0)] + aw[(1, 1)];
        assert_abs_diff_eq!(tr.re, dos[iw], epsilon = 1e-12);
        assert_abs_diff_eq!(tr.im, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_gf_sandwich_identity_and_projection() {
    let mesh = FrequencyMesh::real(-1.0, 1.0, 5).unwrap();
    let gf = diagonal_gf(&mesh, &[0.1, -0.4, 0.3], 0.01);

    let identity = Array2::<Complex<f64>>::eye(3);
    let same = gf.sandwich(&identity.view(), &identity.view()).unwrap();
    assert_eq!(same, gf);

    // Projector onto the second orbital.
    let proj = array![[c(0.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)]];
    let proj_dag = dagger(&proj.view());
    let local = gf.sandwich(&proj.view(), &proj_dag.view()).unwrap();
    assert_eq!(local.dim(), 1);
    for iw in 0..mesh.len() {
        assert_eq!(local.data()[(iw, 0, 0)], gf.data()[(iw, 1, 1)]);
    }

    let wrong = Array2::<Complex<f64>>::eye(2);
    assert!(gf.sandwich(&wrong.view(), &identity.view()).is_err());
}

#[test]
fn test_gf_transpose_and_mask() {
    let mut data = Array3::<Complex<f64>>::zeros((1, 2, 2));
    data[(0, 0, 1)] = c(1.0, 2.0);
    data[(0, 1, 0)] = c(3.0, 4.0);
    data[(0, 1, 1)] = c(5.0, 0.0);
    let gf = GreenFunction::from_data(data).unwrap();
    let gft = gf.transpose();
    assert_eq!(gft.data()[(0, 0, 1)], c(3.0, 4.0));
    assert_eq!(gft.data()[(0, 1, 0)], c(1.0, 2.0));

    let mut masked = gf.clone();
    masked.mask(&array![[1.0, 0.5], [0.0, 2.0]]).unwrap();
    assert_eq!(masked.data()[(0, 0, 1)], c(0.5, 1.0));
    assert_eq!(masked.data()[(0, 1, 0)], c(0.0, 0.0));
    assert_eq!(masked.data()[(0, 1, 1)], c(10.0, 0.0));
    assert!(masked.mask(&Array2::zeros((3, 3))).is_err());
}

#[test]
fn test_gf_density_matsubara_single_level() {
    let beta = 10.0;
    let mesh = FrequencyMesh::matsubara(beta, 4000).unwrap();
    for level in [-0.3, 0.0, 0.2] {
        let gf = diagonal_gf(&mesh, &[level], 0.0);
        let dens = gf.density(&mesh).unwrap();
        let fermi = 1.0 / ((beta * level).exp() + 1.0);
        assert_abs_diff_eq!(dens[(0, 0)].re, fermi, epsilon = 1e-3);
        assert_abs_diff_eq!(dens[(0, 0)].im, 0.0, epsilon = 1e-10);
    }
}

#[test]
fn test_gf_density_real_counts_occupied_weight() {
    let mesh = FrequencyMesh::real(-10.0, 10.0, 20001).unwrap();
    let gf = diagonal_gf(&mesh, &[-2.0, 2.0], 0.01);
    let dens = gf.density(&mesh).unwrap();
    assert_abs_diff_eq!(dens[(0, 0)].re, 1.0, epsilon = 5e-3);
    assert_abs_diff_eq!(dens[(1, 1)].re, 0.0, epsilon = 5e-3);
}

#[test]
fn test_gf_density_mesh_mismatch() {
    let mesh = FrequencyMesh::real(-1.0, 1.0, 5).unwrap();
    let other = FrequencyMesh::real(-1.0, 1.0, 6).unwrap();
    let gf = diagonal_gf(&mesh, &[0.0], 0.1);
    assert!(gf.density(&other).is_err());
}

#[test]
fn test_gf_block_arithmetic() {
    let blocks = [SpinBlock::Up, SpinBlock::Down];
    let mut acc = BlockGreenFunction::zeros(&blocks, 3, 2);
    let mut one = BlockGreenFunction::zeros(&blocks, 3, 2);
    one.iter_mut()
        .for_each(|(_, gf)| gf.data_mut().fill(c(1.0, -1.0)));
    acc.add_checked(&one).unwrap();
    acc.add_checked(&one).unwrap();
    acc.scale(0.25);
    for (_, gf) in acc.iter() {
        assert!(gf.data().iter().all(|x| *x == c(0.5, -0.5)));
    }
    assert_eq!(acc.spin_blocks(), blocks.to_vec());
    acc.zero();
    assert!(acc
        .get(&SpinBlock::Down)
        .unwrap()
        .data()
        .iter()
        .all(|x| *x == c(0.0, 0.0)));
}

#[test]
fn test_gf_add_checked_rejects_shape_mismatch() {
    let mut acc = GreenFunction::zeros(3, 2);
    assert!(acc.add_checked(&GreenFunction::zeros(3, 1)).is_err());
    assert!(acc.add_checked(&GreenFunction::zeros(4, 2)).is_err());
    assert!(acc.data().iter().all(|x| *x == c(0.0, 0.0)));

    let mut blocks = BlockGreenFunction::zeros(&[SpinBlock::Up, SpinBlock::Down], 3, 2);
    let up_only = BlockGreenFunction::zeros(&[SpinBlock::Up], 3, 2);
    assert!(blocks.add_checked(&up_only).is_err());
}
