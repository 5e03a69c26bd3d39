use std::fs;
use std::path::PathBuf;

use crate::archive::{write_group, DftBackend};
use crate::drivers::band_occupations::BandOccupationsParams;
use crate::drivers::density_of_states::DensityOfStatesParams;
use crate::drivers::hamiltonian::{HamiltonianKPoints, HamiltonianParams};
use crate::drivers::partial_charges::PartialChargesParams;
use crate::drivers::spectral_function::SpectralFunctionParams;
use crate::drivers::LatticeOptions;
use crate::error::SpectralError;
use crate::fixtures::{model_bands_input, model_dft_input, model_parproj_input};
use crate::interfaces::InputHandle;
use crate::io::read_kspectra_yaml;
use crate::mesh::MeshKind;
use crate::projection::ProjectionScheme;

use super::{Input, MatsubaraMeshSpec, RealMeshSpec};

const ROOT: &str = env!("CARGO_MANIFEST_DIR");

#[test]
fn test_interfaces_input_spectra() {
    let name = format!("{ROOT}/tests/input/kspectra_spectra.yml");
    let inp = read_kspectra_yaml::<Input, _>(&name).unwrap();
    assert_eq!(inp.archive, PathBuf::from("path/to/archive"));
    assert_eq!(inp.n_workers, 4);
    assert_eq!(inp.output_dir, PathBuf::from("spectra"));
    assert!(inp.matsubara_mesh.is_none());
    let mesh = inp.real_mesh.as_ref().unwrap().mesh().unwrap();
    assert_eq!(mesh.kind(), MeshKind::Real);
    assert_eq!(mesh.len(), 601);

    let dos = inp.density_of_states.as_ref().unwrap();
    assert_eq!(dos.scheme, ProjectionScheme::Wannier);
    assert!(!dos.occupied);
    assert!(dos.save_to_file);
    assert_eq!(
        dos.lattice,
        LatticeOptions::builder()
            .mu(Some(0.1))
            .broadening(Some(0.02))
            .build()
            .unwrap()
    );

    let akw = inp.spectral_function.as_ref().unwrap();
    assert_eq!(akw.scheme, ProjectionScheme::AngularMomentum);
    assert_eq!(akw.shell_list, Some(vec![0, 2]));
    assert_eq!(akw.plot_range, Some((-1.0, 1.0)));
    assert_eq!(akw.plot_shift, 0.25);
    assert!(!akw.save_to_file);

    let contours = inp.spectral_contours.as_ref().unwrap();
    assert_eq!(contours.scheme, ProjectionScheme::None);
    assert!(!contours.fermi_surface);
    assert!(inp.band_occupations.is_none());
    assert!(inp.hamiltonian.is_none());
}

#[test]
fn test_interfaces_input_occupations() {
    let name = format!("{ROOT}/tests/input/kspectra_occupations.yml");
    let inp = read_kspectra_yaml::<Input, _>(&name).unwrap();
    assert_eq!(
        inp.matsubara_mesh,
        Some(MatsubaraMeshSpec {
            beta: 40.0,
            n_iw: 1025
        })
    );
    let occ = inp.band_occupations.as_ref().unwrap();
    assert!(!occ.store);
    assert!(occ.lattice.with_sigma);
    assert!(occ.lattice.with_dc);
    assert!(occ.lattice.mu.is_none());
    assert_eq!(
        inp.partial_charges.as_ref().unwrap().lattice,
        LatticeOptions::default()
    );
    assert_eq!(
        inp.hamiltonian.as_ref().unwrap().k_points,
        HamiltonianKPoints::BandPath
    );
    assert!(inp.density_of_states.is_none());
}

#[test]
fn test_interfaces_input_minimal() {
    let name = format!("{ROOT}/tests/input/kspectra_minimal.yml");
    let inp = read_kspectra_yaml::<Input, _>(&name).unwrap();
    assert_eq!(inp.n_workers, 1);
    assert_eq!(inp.output_dir, PathBuf::from("."));
    assert!(inp.real_mesh.is_none());
    assert!(inp.density_of_states.is_none());
    assert!(inp.partial_charges.is_none());
}

#[test]
fn test_interfaces_input_handle() {
    let root = std::env::temp_dir().join(format!("kspectra-input-handle-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    let archive_dir = root.join("archive");
    let n_k = 4;
    write_group(&archive_dir, &model_dft_input(DftBackend::Wien2k, n_k)).unwrap();
    write_group(&archive_dir, &model_parproj_input(n_k)).unwrap();
    write_group(&archive_dir, &model_bands_input(n_k)).unwrap();

    let inp = Input {
        archive: archive_dir.clone(),
        real_mesh: Some(RealMeshSpec {
            w_min: -2.0,
            w_max: 2.0,
            n_points: 41,
        }),
        matsubara_mesh: Some(MatsubaraMeshSpec {
            beta: 20.0,
            n_iw: 64,
        }),
        n_workers: 2,
        output_dir: root.join("out"),
        band_occupations: Some(BandOccupationsParams::default()),
        density_of_states: Some(DensityOfStatesParams {
            scheme: ProjectionScheme::Wannier,
            occupied: true,
            ..DensityOfStatesParams::default()
        }),
        spectral_function: Some(SpectralFunctionParams::default()),
        spectral_contours: None,
        partial_charges: Some(PartialChargesParams::default()),
        hamiltonian: Some(HamiltonianParams::default()),
    };
    inp.handle().unwrap();

    let out = root.join("out");
    assert!(archive_dir.join("dft_misc_input.kspectra.grp").is_file());
    for name in [
        "DOS_up.dat",
        "DOS_wann_down_proj1.dat",
        "DOS_wann_up_proj0_0_0.dat",
        "Akw_up.dat",
        "ham.dat",
    ] {
        assert!(out.join(name).is_file(), "{name} not written");
    }
    assert!(!out.join("Akw_none_up_proj0.dat").exists());
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_interfaces_input_missing_mesh() {
    let root = std::env::temp_dir().join(format!("kspectra-input-mesh-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    let archive_dir = root.join("archive");
    write_group(&archive_dir, &model_dft_input(DftBackend::Wien2k, 2)).unwrap();

    let inp = Input {
        archive: archive_dir,
        real_mesh: None,
        output_dir: root.join("out"),
        ..Input::default()
    };
    let err = inp.handle().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SpectralError>(),
        Some(SpectralError::Configuration(_))
    ));
    assert!(!root.join("out").exists());
    let _ = fs::remove_dir_all(&root);
}
