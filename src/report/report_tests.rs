use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use ndarray::{array, Array1, Array2, Array3, Array4};
use num_complex::Complex;

use crate::distributed::{Communicator, SerialCommunicator};
use crate::fixtures::{model_band_counts, model_hamiltonian};
use crate::observables::{DensityOfStates, SpectralContours, SpectralFunction};
use crate::projection::ProjectionScheme;
use crate::report::{write_contours, write_dos, write_hamiltonian, write_spectral_function};
use crate::spin::{SpinBlock, SpinStructure};
use crate::sumk::KResolvedSweep;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kspectra-report-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn sample_dos() -> DensityOfStates {
    let blocks = [SpinBlock::Up, SpinBlock::Down];
    let total = blocks
        .iter()
        .map(|block| (*block, array![0.5, 1.0, 0.25]))
        .collect::<IndexMap<_, _>>();
    let projected = vec![blocks
        .iter()
        .map(|block| (*block, array![0.25, 0.5, 0.125]))
        .collect::<IndexMap<_, Array1<f64>>>()];
    let projected_matrix = vec![blocks
        .iter()
        .map(|block| {
            (
                *block,
                Array3::from_shape_fn((3, 2, 2), |(iw, i, j)| {
                    Complex::new(iw as f64, (i as f64) - (j as f64))
                }),
            )
        })
        .collect::<IndexMap<_, _>>()];
    DensityOfStates {
        frequencies: vec![-1.0, 0.0, 1.5],
        scheme: ProjectionScheme::Wannier,
        total,
        projected,
        projected_matrix,
    }
}

#[test]
fn test_write_dos_files() {
    let dir = scratch_dir("dos");
    let writer = SerialCommunicator::new().designated_writer().unwrap();
    let written = write_dos(&dir, &writer, &sample_dos()).unwrap();
    let names = file_names(&written);
    assert_eq!(names.len(), 2 + 2 * (1 + 4));
    assert!(names.contains(&"DOS_up.dat".to_string()));
    assert!(names.contains(&"DOS_wann_down_proj0.dat".to_string()));
    assert!(names.contains(&"DOS_wann_up_proj0_1_0.dat".to_string()));

    let total = fs::read_to_string(dir.join("DOS_up.dat")).unwrap();
    assert_eq!(total, "-1    0.5\n0    1\n1.5    0.25\n");
    let element = fs::read_to_string(dir.join("DOS_wann_up_proj0_0_1.dat")).unwrap();
    assert_eq!(element.lines().nth(2), Some("1.5    2    -1"));
    let _ = fs::remove_dir_all(&dir);
}

fn sample_spectral(shell_list: Vec<usize>) -> SpectralFunction {
    let mut total = IndexMap::new();
    total.insert(
        SpinBlock::UpDown,
        Array2::from_shape_fn((2, 2), |(ik, iw)| (ik + iw) as f64),
    );
    let mut orb = IndexMap::new();
    orb.insert(SpinBlock::UpDown, Array4::<f64>::ones((2, 2, 1, 1)));
    SpectralFunction::extract(
        KResolvedSweep {
            frequencies: vec![-0.5, 0.5],
            total,
            projected: vec![orb],
        },
        ProjectionScheme::AngularMomentum,
        shell_list,
        1.0,
    )
}

#[test]
fn test_write_spectral_function_files() {
    let dir = scratch_dir("akw");
    let writer = SerialCommunicator::new().designated_writer().unwrap();
    let written = write_spectral_function(&dir, &writer, &sample_spectral(vec![3])).unwrap();
    assert_eq!(
        file_names(&written),
        vec![
            "Akw_ud.dat".to_string(),
            "Akw_wien2k_ud_proj3.dat".to_string(),
            "Akw_wien2k_ud_proj3_0_0.dat".to_string(),
        ]
    );
    let total = fs::read_to_string(dir.join("Akw_ud.dat")).unwrap();
    assert_eq!(
        total,
        "0     -0.5      0\n0     0.5      1\n\n1     -0.5      2\n1     0.5      3\n\n"
    );
    let projected = fs::read_to_string(dir.join("Akw_wien2k_ud_proj3.dat")).unwrap();
    assert_eq!(projected.lines().nth(3), Some("1     -0.5      2"));
    let element = fs::read_to_string(dir.join("Akw_wien2k_ud_proj3_0_0.dat")).unwrap();
    assert_eq!(element.lines().nth(3), Some("1     -0.5      1"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_write_contour_files() {
    let dir = scratch_dir("contours");
    let writer = SerialCommunicator::new().designated_writer().unwrap();
    let spectral = sample_spectral(vec![0]);
    let bmat = Array2::<f64>::eye(3);
    let bz_vkl = array![[0.0, 0.0, 0.0], [0.5, 0.5, 0.0]];

    let fs_contours = SpectralContours::extract(&spectral, &bmat, &[1, 0], &bz_vkl, true).unwrap();
    let written = write_contours(&dir, &writer, &fs_contours).unwrap();
    assert_eq!(written.len(), 3);
    let total = fs::read_to_string(dir.join("Akw_FS_ud.dat")).unwrap();
    let lines = total.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "#Spectral function evaluated at frequency = -0.5");
    assert_eq!(lines[1], "0    0    0    2");
    assert_eq!(lines[2], "0.5    0.5    0    0");
    assert!(dir.join("Akw_FS_wien2k_ud_proj0_0_0.dat").exists());

    let all = SpectralContours::extract(&spectral, &bmat, &[1, 0], &bz_vkl, false).unwrap();
    let written = write_contours(&dir, &writer, &all).unwrap();
    assert_eq!(written.len(), 6);
    assert!(dir.join("Akw_omega_1_ud.dat").exists());
    assert!(dir.join("Akw_omega_0_wien2k_ud_proj0.dat").exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_write_hamiltonian_files() {
    let dir = scratch_dir("ham");
    let writer = SerialCommunicator::new().designated_writer().unwrap();
    let n_k = 3;
    let hopping = (0..n_k)
        .map(|ik| vec![model_hamiltonian(ik, n_k), model_hamiltonian(ik, n_k)])
        .collect::<Vec<_>>();
    let mut n_orbitals = Array2::<usize>::zeros((n_k, 2));
    n_orbitals.column_mut(0).assign(&model_band_counts(n_k).column(0));
    n_orbitals.column_mut(1).fill(3);

    let polarised = SpinStructure {
        spin_orbit: false,
        spin_polarised: true,
    };
    let written = write_hamiltonian(&dir, &writer, &hopping, &n_orbitals, polarised).unwrap();
    assert_eq!(
        file_names(&written),
        vec!["hamup.dat".to_string(), "hamdn.dat".to_string()]
    );
    let up = fs::read_to_string(dir.join("hamup.dat")).unwrap();
    let blocks = up.split("\n\n").collect::<Vec<_>>();
    assert_eq!(blocks[0].lines().count(), 3);
    assert_eq!(blocks[2].lines().count(), 2);
    assert_eq!(
        blocks[0].lines().next(),
        Some(format!("0    {}", model_hamiltonian(0, n_k)[(0, 0)].re).as_str())
    );
    let dn = fs::read_to_string(dir.join("hamdn.dat")).unwrap();
    assert_eq!(dn.split("\n\n").nth(2).map(|b| b.lines().count()), Some(3));

    let spin_orbit = SpinStructure {
        spin_orbit: true,
        spin_polarised: true,
    };
    let written = write_hamiltonian(&dir, &writer, &hopping, &n_orbitals, spin_orbit).unwrap();
    assert_eq!(file_names(&written), vec!["ham.dat".to_string()]);
    let _ = fs::remove_dir_all(&dir);
}
