use std::fs;
use std::path::PathBuf;

use approx::assert_relative_eq;
use ndarray::{array, Array2};
use num_complex::Complex;

use kspectra::archive::{DftArchive, DftBackend, DftInput, ShellInfo, SymmCorrInput};
use kspectra::correction::{SymmetryGroup, SymmetryOperation};
use kspectra::drivers::density_of_states::{DensityOfStatesDriver, DensityOfStatesParams};
use kspectra::drivers::{KSpectraDriver, LatticeOptions};
use kspectra::error::SpectralError;
use kspectra::mesh::FrequencyMesh;
use kspectra::observables::DensityOfStates;
use kspectra::projection::ProjectionScheme;
use kspectra::spin::SpinBlock;

fn c(re: f64, im: f64) -> Complex<f64> {
    Complex::new(re, im)
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kspectra-it-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn shell(atom: usize) -> ShellInfo {
    ShellInfo {
        atom,
        sort: 0,
        l: 0,
        dim: 1,
    }
}

/// A two-band lattice whose two one-orbital shells project onto the two bands.
fn two_band_input(backend: DftBackend, n_k: usize) -> DftInput {
    let hopping = (0..n_k)
        .map(|ik| {
            let phase = 2.0 * std::f64::consts::PI * ik as f64 / n_k as f64;
            let t = Complex::from_polar(0.2, phase);
            vec![array![
                [c(-0.6 + 0.3 * phase.cos(), 0.0), t],
                [t.conj(), c(0.4 - 0.2 * phase.cos(), 0.0)]
            ]]
        })
        .collect::<Vec<_>>();
    let proj_mat = (0..n_k)
        .map(|_| {
            vec![vec![
                array![[c(1.0, 0.0), c(0.0, 0.0)]],
                array![[c(0.0, 0.0), c(1.0, 0.0)]],
            ]]
        })
        .collect::<Vec<_>>();
    DftInput {
        chemical_potential: Some(0.0),
        dft_code: Some(backend),
        n_k: Some(n_k),
        bz_weights: Some(vec![1.0 / n_k as f64; n_k]),
        n_orbitals: Some(Array2::from_elem((n_k, 1), 2)),
        hopping: Some(hopping),
        proj_mat: Some(proj_mat),
        corr_shells: Some(vec![shell(0), shell(1)]),
        shells: Some(vec![shell(0), shell(1)]),
        spin_orbit: Some(false),
        spin_polarised: Some(false),
        use_rotations: Some(false),
        rot_mat: Some(vec![Array2::eye(1), Array2::eye(1)]),
        rot_mat_time_inv: Some(vec![false, false]),
        symm_op: Some(false),
        proj_mat_csc: None,
    }
}

fn dos_params(scheme: ProjectionScheme, broadening: f64) -> DensityOfStatesParams {
    DensityOfStatesParams::builder()
        .scheme(scheme)
        .lattice(
            LatticeOptions::builder()
                .broadening(Some(broadening))
                .build()
                .unwrap(),
        )
        .save_to_file(false)
        .build()
        .unwrap()
}

fn run_dos(
    archive: &DftArchive,
    params: &DensityOfStatesParams,
    mesh: &FrequencyMesh,
    n_workers: usize,
) -> Result<DensityOfStates, anyhow::Error> {
    let mut driver = DensityOfStatesDriver::builder()
        .parameters(params)
        .archive(archive)
        .mesh(mesh)
        .n_workers(n_workers)
        .build()?;
    driver.run()?;
    Ok(driver.result()?.dos.clone())
}

#[test]
fn test_identity_projection_reproduces_total_dos() {
    let input = DftInput {
        n_k: Some(1),
        bz_weights: Some(vec![1.0]),
        n_orbitals: Some(array![[1]]),
        hopping: Some(vec![vec![array![[c(0.42, 0.0)]]]]),
        proj_mat: Some(vec![vec![vec![array![[c(1.0, 0.0)]]]]]),
        corr_shells: Some(vec![shell(0)]),
        shells: Some(vec![shell(0)]),
        rot_mat: Some(vec![Array2::eye(1)]),
        rot_mat_time_inv: Some(vec![false]),
        ..two_band_input(DftBackend::Wannier90, 1)
    };
    let archive = DftArchive::in_memory().with_dft_input(input);
    let mesh = FrequencyMesh::real(-1.95, 2.05, 81).unwrap();
    let dos = run_dos(&archive, &dos_params(ProjectionScheme::Wannier, 0.05), &mesh, 1).unwrap();
    for block in [SpinBlock::Up, SpinBlock::Down] {
        for (x, y) in dos.projected()[0][&block].iter().zip(dos.total()[&block].iter()) {
            assert_relative_eq!(x, y, max_relative = 1e-12, epsilon = 1e-14);
        }
    }
    let peak = dos.total()[&SpinBlock::Up]
        .iter()
        .copied()
        .fold(f64::MIN, f64::max);
    assert!(peak > 1.0);
}

#[test]
fn test_equivalent_shells_are_identical_after_symmetrisation() {
    let n_k = 6;
    let swap = SymmetryGroup {
        operations: vec![
            SymmetryOperation {
                perm: vec![0, 1],
                mats: vec![Array2::eye(1), Array2::eye(1)],
                time_inv: false,
            },
            SymmetryOperation {
                perm: vec![1, 0],
                mats: vec![Array2::eye(1), Array2::eye(1)],
                time_inv: false,
            },
        ],
    };
    let archive = DftArchive::in_memory()
        .with_dft_input(DftInput {
            symm_op: Some(true),
            ..two_band_input(DftBackend::Wannier90, n_k)
        })
        .with_symmcorr(SymmCorrInput {
            symmetry: Some(swap),
        });
    let mesh = FrequencyMesh::real(-1.5, 1.5, 61).unwrap();
    let dos = run_dos(&archive, &dos_params(ProjectionScheme::Wannier, 0.05), &mesh, 2).unwrap();
    let (p0, p1) = (
        &dos.projected()[0][&SpinBlock::Up],
        &dos.projected()[1][&SpinBlock::Up],
    );
    for (x, y) in p0.iter().zip(p1.iter()) {
        assert_relative_eq!(x, y, max_relative = 1e-12, epsilon = 1e-14);
    }

    // Without symmetrisation the two shells carry different bands.
    let plain = DftArchive::in_memory().with_dft_input(two_band_input(DftBackend::Wannier90, n_k));
    let dos = run_dos(&plain, &dos_params(ProjectionScheme::Wannier, 0.05), &mesh, 2).unwrap();
    assert!(dos.projected()[0][&SpinBlock::Up]
        .iter()
        .zip(dos.projected()[1][&SpinBlock::Up].iter())
        .any(|(x, y)| (x - y).abs() > 1e-3));
}

#[test]
fn test_identity_rotation_leaves_local_spectra_unchanged() {
    let n_k = 3;
    let mesh = FrequencyMesh::real(-1.5, 1.5, 31).unwrap();
    let params = dos_params(ProjectionScheme::Wannier, 0.05);
    let plain = DftArchive::in_memory().with_dft_input(two_band_input(DftBackend::Wannier90, n_k));
    let rotated = DftArchive::in_memory().with_dft_input(DftInput {
        use_rotations: Some(true),
        ..two_band_input(DftBackend::Wannier90, n_k)
    });
    let a = run_dos(&plain, &params, &mesh, 1).unwrap();
    let b = run_dos(&rotated, &params, &mesh, 1).unwrap();
    for ish in 0..2 {
        for (x, y) in a.projected_matrix()[ish][&SpinBlock::Down]
            .iter()
            .zip(b.projected_matrix()[ish][&SpinBlock::Down].iter())
        {
            assert_relative_eq!(x.re, y.re, max_relative = 1e-12, epsilon = 1e-14);
            assert_relative_eq!(x.im, y.im, max_relative = 1e-12, epsilon = 1e-14);
        }
    }
}

#[test]
fn test_backend_mismatch_is_rejected_before_the_sweep() {
    let dir = scratch_dir("mismatch");
    let archive = DftArchive::in_memory().with_dft_input(two_band_input(DftBackend::Wannier90, 4));
    let mesh = FrequencyMesh::real(-1.0, 1.0, 21).unwrap();
    let mut params = dos_params(ProjectionScheme::AngularMomentum, 0.05);
    params.save_to_file = true;
    let mut driver = DensityOfStatesDriver::builder()
        .parameters(&params)
        .archive(&archive)
        .mesh(&mesh)
        .n_workers(3)
        .output_dir(Some(dir.clone()))
        .build()
        .unwrap();
    let err = driver.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SpectralError>(),
        Some(SpectralError::Configuration(_))
    ));
    assert!(!dir.exists());
}

#[test]
fn test_dos_is_independent_of_the_worker_count() {
    let n_k = 7;
    let archive = DftArchive::in_memory().with_dft_input(two_band_input(DftBackend::Wannier90, n_k));
    let mesh = FrequencyMesh::real(-1.5, 1.5, 31).unwrap();
    let params = dos_params(ProjectionScheme::Wannier, 0.05);
    let reference = run_dos(&archive, &params, &mesh, 1).unwrap();
    for n_workers in [2, 3, 7, 9] {
        let dos = run_dos(&archive, &params, &mesh, n_workers).unwrap();
        for (x, y) in reference.total()[&SpinBlock::Up]
            .iter()
            .zip(dos.total()[&SpinBlock::Up].iter())
        {
            assert_relative_eq!(x, y, max_relative = 1e-10, epsilon = 1e-14);
        }
        for (x, y) in reference.projected()[1][&SpinBlock::Down]
            .iter()
            .zip(dos.projected()[1][&SpinBlock::Down].iter())
        {
            assert_relative_eq!(x, y, max_relative = 1e-10, epsilon = 1e-14);
        }
    }
}

#[test]
fn test_failing_worker_leaves_no_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = scratch_dir("failure");
    let n_k = 4;
    let mut input = two_band_input(DftBackend::Wannier90, n_k);
    if let Some(hopping) = input.hopping.as_mut() {
        // The last k-point, owned by the last worker, has no data for its spin channel.
        hopping[n_k - 1].clear();
    }
    let archive = DftArchive::in_memory().with_dft_input(input);
    let mesh = FrequencyMesh::real(-1.0, 1.0, 21).unwrap();
    let mut params = dos_params(ProjectionScheme::Wannier, 0.05);
    params.save_to_file = true;
    let mut driver = DensityOfStatesDriver::builder()
        .parameters(&params)
        .archive(&archive)
        .mesh(&mesh)
        .n_workers(2)
        .output_dir(Some(dir.clone()))
        .build()
        .unwrap();
    assert!(driver.run().is_err());
    assert!(driver.result().is_err());
    assert!(!dir.exists());
}
