use approx::assert_abs_diff_eq;
use indexmap::IndexMap;
use ndarray::{array, Array2, Array3, Array4};
use num_complex::Complex;

use crate::correction::{CorrectionPipeline, LocalGfArena};
use crate::distributed::{KPartition, SerialCommunicator};
use crate::error::SpectralError;
use crate::gf::{BlockGreenFunction, GreenFunction};
use crate::mesh::FrequencyMesh;
use crate::observables::{
    integrate, DensityOfStates, PartialCharges, SpectralContours, SpectralFunction,
};
use crate::projection::{Projection, ProjectionScheme, ProjectorSource};
use crate::provider::{HoppingLatticeGf, LatticeGfParams};
use crate::spin::{SpinBlock, SpinStructure};
use crate::sumk::{KResolvedSweep, KSum};

const PARAMAGNETIC: SpinStructure = SpinStructure {
    spin_orbit: false,
    spin_polarised: false,
};

fn c(re: f64, im: f64) -> Complex<f64> {
    Complex::new(re, im)
}

/// Runs a one-k-point sweep with a full-window identity projector and extracts the densities of
/// states.
fn identity_projected_dos(hk: Array2<Complex<f64>>, broadening: f64) -> DensityOfStates {
    let n_bands = hk.nrows();
    let hopping = vec![vec![hk]];
    let n_orbitals = Array2::<usize>::from_elem((1, 1), n_bands);
    let provider = HoppingLatticeGf::new(&hopping, &n_orbitals, PARAMAGNETIC).unwrap();
    let mesh = FrequencyMesh::real(-1.95, 2.05, 81).unwrap();
    let params = LatticeGfParams::builder()
        .mu(0.0)
        .broadening(broadening)
        .build()
        .unwrap();
    let ksum = KSum::new(&provider, PARAMAGNETIC, &mesh, &params);
    let identity = vec![vec![Array2::<Complex<f64>>::eye(n_bands)]];
    let projection = Projection::from_source(
        ProjectionScheme::CoarseGrained,
        vec![n_bands],
        ProjectorSource::CoarseGrained(&identity),
    );
    let sweep = ksum
        .sum_over_k(
            &SerialCommunicator::new(),
            &KPartition::new(1, 1).unwrap(),
            &[1.0],
            &projection,
            None,
        )
        .unwrap();
    let local = CorrectionPipeline::identity().apply(sweep.local).unwrap();
    DensityOfStates::extract(&mesh, projection.scheme(), sweep.total, &local)
}

#[test]
fn test_integrate_trapezoid() {
    let points = [0.0, 0.5, 1.0, 2.0];
    assert_abs_diff_eq!(
        integrate(&points, points.iter().map(|x| 2.0 * x)),
        4.0,
        epsilon = 1e-14
    );
    assert_eq!(integrate(&[1.0], [3.0]), 0.0);
}

#[test]
fn test_identity_projection_reproduces_total_dos() {
    let single = identity_projected_dos(array![[c(0.42, 0.0)]], 0.0);
    for block in PARAMAGNETIC.blocks() {
        assert_eq!(single.projected()[0][&block], single.total()[&block]);
    }

    let hk = array![[c(-0.5, 0.0), c(0.1, 0.2)], [c(0.1, -0.2), c(0.7, 0.0)]];
    let dos = identity_projected_dos(hk, 0.05);
    assert_eq!(dos.n_shells(), 1);
    for block in PARAMAGNETIC.blocks() {
        assert_eq!(dos.projected()[0][&block], dos.total()[&block]);
        assert!(dos.total()[&block].iter().any(|x| *x > 1.0));

        // The orbital-resolved matrix is Hermitian and its trace is the projected DOS.
        let matrix = &dos.projected_matrix()[0][&block];
        for (iw, value) in dos.projected()[0][&block].iter().enumerate() {
            let trace = matrix[(iw, 0, 0)] + matrix[(iw, 1, 1)];
            assert_abs_diff_eq!(trace.re, *value, epsilon = 1e-12);
            assert_abs_diff_eq!(trace.im, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(matrix[(iw, 0, 1)].re, matrix[(iw, 1, 0)].re, epsilon = 1e-12);
            assert_abs_diff_eq!(matrix[(iw, 0, 1)].im, -matrix[(iw, 1, 0)].im, epsilon = 1e-12);
        }
    }
    let total_weight = dos.integrated_total(&SpinBlock::Up).unwrap();
    assert!(total_weight > 1.8 && total_weight < 2.0);
    assert_eq!(
        dos.integrated_projected(0, &SpinBlock::Up),
        Some(total_weight)
    );
    assert!(dos.integrated_projected(1, &SpinBlock::Up).is_none());
}

fn sample_sweep(n_k: usize) -> KResolvedSweep {
    let mut total = IndexMap::new();
    total.insert(
        SpinBlock::Up,
        Array2::from_shape_fn((n_k, 3), |(ik, iw)| (ik * 3 + iw) as f64),
    );
    let mut orb = IndexMap::new();
    orb.insert(
        SpinBlock::Up,
        Array4::from_shape_fn((n_k, 3, 2, 2), |(ik, iw, i, j)| {
            if i == j {
                1.0 + ik as f64 + 0.1 * iw as f64
            } else {
                0.5
            }
        }),
    );
    KResolvedSweep {
        frequencies: vec![-0.2, 0.05, 0.3],
        total,
        projected: vec![orb],
    }
}

#[test]
fn test_spectral_function_stacking_offset() {
    let spectral = SpectralFunction::extract(
        sample_sweep(3),
        ProjectionScheme::Wannier,
        vec![1],
        0.5,
    );
    assert_eq!(spectral.n_k(), 3);
    let total = &spectral.total()[&SpinBlock::Up];
    assert_eq!(total[(0, 2)], 2.0);
    assert_eq!(total[(2, 1)], 7.0 + 1.0);

    let projected = &spectral.projected()[0][&SpinBlock::Up];
    for ik in 0..3 {
        for iw in 0..3 {
            let trace = 2.0 * (1.0 + ik as f64 + 0.1 * iw as f64);
            assert_abs_diff_eq!(
                projected[(ik, iw)],
                trace + 0.5 * ik as f64,
                epsilon = 1e-14
            );
        }
    }
    // Element-resolved spectra are not shifted.
    assert_eq!(spectral.projected_orb()[0][&SpinBlock::Up][(2, 0, 0, 1)], 0.5);
    assert_eq!(spectral.shell_list(), &[1]);
}

#[test]
fn test_spectral_contours() {
    let spectral =
        SpectralFunction::extract(sample_sweep(2), ProjectionScheme::Wannier, vec![0], 0.0);
    let bmat = array![[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let bz_iknr = vec![1, 0, 1];
    let bz_vkl = array![[0.5, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.5, 0.25]];

    let fs = SpectralContours::extract(&spectral, &bmat, &bz_iknr, &bz_vkl, true).unwrap();
    assert!(fs.fermi_surface());
    assert_eq!(fs.frequencies(), &[0.05]);
    assert_eq!(fs.points().row(0).to_vec(), vec![1.0, 0.0, 0.0]);
    assert_eq!(fs.points().row(2).to_vec(), vec![0.0, 0.5, 0.25]);
    let total = &fs.total()[&SpinBlock::Up];
    assert_eq!(total.dim(), (1, 3));
    assert_eq!(total[(0, 0)], 4.0);
    assert_eq!(total[(0, 1)], 1.0);
    assert_eq!(fs.projected_orb()[0][&SpinBlock::Up].dim(), (1, 3, 2, 2));

    let all = SpectralContours::extract(&spectral, &bmat, &bz_iknr, &bz_vkl, false).unwrap();
    assert_eq!(all.frequencies().len(), 3);
    assert_eq!(all.projected()[0][&SpinBlock::Up][(2, 2)], 2.0 * (2.0 + 0.2));

    let err = SpectralContours::extract(&spectral, &bmat, &[0, 2, 1], &bz_vkl, true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SpectralError>(),
        Some(SpectralError::Configuration(_))
    ));
    assert!(SpectralContours::extract(&spectral, &bmat, &[0, 1], &bz_vkl, true).is_err());
}

#[test]
fn test_partial_charges_single_level() {
    let beta = 10.0;
    let level = 0.3;
    let mesh = FrequencyMesh::matsubara(beta, 1024).unwrap();
    let data = Array3::from_shape_fn((mesh.len(), 1, 1), |(iw, _, _)| {
        (c(0.0, mesh.points()[iw]) - level).inv()
    });
    let gf = GreenFunction::from_data(data).unwrap();
    let mut blocks = IndexMap::new();
    blocks.insert(SpinBlock::Up, gf.clone());
    blocks.insert(SpinBlock::Down, gf);
    let shell = BlockGreenFunction::from_blocks(blocks);
    let local = CorrectionPipeline::identity()
        .apply(LocalGfArena::from_reduced(vec![shell]))
        .unwrap();

    let below = vec![vec![array![[c(0.25, 0.0)]]]];
    let charges = PartialCharges::extract(&local, &mesh, &below, PARAMAGNETIC).unwrap();
    let fermi = 1.0 / (1.0 + (beta * level).exp());
    for block in PARAMAGNETIC.blocks() {
        let dens = charges.get(&block, 0).unwrap();
        assert_abs_diff_eq!(dens[(0, 0)].re, 0.25 + fermi, epsilon = 2e-3);
        assert_abs_diff_eq!(dens[(0, 0)].im, 0.0, epsilon = 1e-10);
    }
    assert_abs_diff_eq!(charges.shell_charge(0), 2.0 * (0.25 + fermi), epsilon = 4e-3);

    let real_mesh = FrequencyMesh::real(-1.0, 1.0, 5).unwrap();
    let err = PartialCharges::extract(&local, &real_mesh, &below, PARAMAGNETIC).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SpectralError>(),
        Some(SpectralError::MeshType(_, _))
    ));
    assert!(PartialCharges::extract(&local, &mesh, &[], PARAMAGNETIC).is_err());
}
