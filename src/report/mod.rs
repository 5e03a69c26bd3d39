//! Column files for spectral observables.
//!
//! Every writer requires the [`DesignatedWriter`] token, so only the designated worker can
//! produce files. Writers are called after a sweep and its corrections have completed; a failed
//! sweep therefore never leaves partial files behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{self, format_err, Context};
use ndarray::Array2;

use crate::archive::Hopping;
use crate::distributed::DesignatedWriter;
use crate::observables::{DensityOfStates, SpectralContours, SpectralFunction};
use crate::spin::SpinStructure;

#[cfg(test)]
#[path = "report_tests.rs"]
mod report_tests;

/// Opens a buffered file in `dir`, creating `dir` if needed.
fn create(dir: &Path, name: &str) -> Result<(PathBuf, BufWriter<File>), anyhow::Error> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Unable to create output directory {}", dir.display()))?;
    let path = dir.join(name);
    let file = File::create(&path)
        .with_context(|| format!("Unable to create output file {}", path.display()))?;
    Ok((path, BufWriter::new(file)))
}

/// Flushes a finished file and records its path.
fn finish(
    path: PathBuf,
    mut out: BufWriter<File>,
    written: &mut Vec<PathBuf>,
) -> Result<(), anyhow::Error> {
    out.flush()
        .with_context(|| format!("Unable to write output file {}", path.display()))?;
    log::debug!("Written {}.", path.display());
    written.push(path);
    Ok(())
}

// ===================
// Densities of states
// ===================

/// Writes the total, projected and orbital-resolved densities of states.
///
/// Files:
/// * `DOS_<spin>.dat` with rows `ω  DOS`;
/// * `DOS_<tag>_<spin>_proj<ish>.dat` with rows `ω  PDOS`;
/// * `DOS_<tag>_<spin>_proj<ish>_<i>_<j>.dat` with rows `ω  Re  Im`.
///
/// # Returns
///
/// The paths of the written files.
pub fn write_dos(
    dir: &Path,
    _writer: &DesignatedWriter,
    dos: &DensityOfStates,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut written = vec![];
    let frequencies = dos.frequencies();
    for (block, total) in dos.total().iter() {
        let (path, mut out) = create(dir, &format!("DOS_{}.dat", block.label()))?;
        for (w, value) in frequencies.iter().zip(total.iter()) {
            writeln!(out, "{w}    {value}")?;
        }
        finish(path, out, &mut written)?;
    }

    let tag = dos.scheme().tag();
    for (ish, (shell, shell_matrix)) in dos
        .projected()
        .iter()
        .zip(dos.projected_matrix().iter())
        .enumerate()
    {
        for (block, pdos) in shell.iter() {
            let stem = format!("DOS_{tag}_{}_proj{ish}", block.label());
            let (path, mut out) = create(dir, &format!("{stem}.dat"))?;
            for (w, value) in frequencies.iter().zip(pdos.iter()) {
                writeln!(out, "{w}    {value}")?;
            }
            finish(path, out, &mut written)?;

            let matrix = shell_matrix
                .get(block)
                .ok_or_else(|| format_err!("No orbital-resolved DOS for spin block `{block}`."))?;
            let (_, dim, _) = matrix.dim();
            for i in 0..dim {
                for j in 0..dim {
                    let (path, mut out) = create(dir, &format!("{stem}_{i}_{j}.dat"))?;
                    for (iw, w) in frequencies.iter().enumerate() {
                        let value = matrix[(iw, i, j)];
                        writeln!(out, "{w}    {}    {}", value.re, value.im)?;
                    }
                    finish(path, out, &mut written)?;
                }
            }
        }
    }
    Ok(written)
}

// ===========================
// k-resolved spectral function
// ===========================

/// Writes rows `ik  ω  A` with a blank line after every k-point.
fn write_akw_rows<W: Write>(
    out: &mut W,
    frequencies: &[f64],
    value: impl Fn(usize, usize) -> f64,
    n_k: usize,
) -> Result<(), anyhow::Error> {
    for ik in 0..n_k {
        for (iw, w) in frequencies.iter().enumerate() {
            writeln!(out, "{ik}     {w}      {}", value(ik, iw))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Writes the k-resolved spectral functions.
///
/// Files:
/// * `Akw_<spin>.dat`;
/// * `Akw_<tag>_<spin>_proj<jsh>.dat` and `Akw_<tag>_<spin>_proj<jsh>_<i>_<j>.dat`, where `jsh`
/// is the shell index taken from the shell list of the spectral function.
///
/// All files have rows `ik  ω  A` with a blank line after every k-point.
pub fn write_spectral_function(
    dir: &Path,
    _writer: &DesignatedWriter,
    akw: &SpectralFunction,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut written = vec![];
    let frequencies = akw.frequencies();
    let n_k = akw.n_k();
    for (block, total) in akw.total().iter() {
        let (path, mut out) = create(dir, &format!("Akw_{}.dat", block.label()))?;
        write_akw_rows(&mut out, frequencies, |ik, iw| total[(ik, iw)], n_k)?;
        finish(path, out, &mut written)?;
    }

    let tag = akw.scheme().tag();
    for ((shell, shell_orb), jsh) in akw
        .projected()
        .iter()
        .zip(akw.projected_orb().iter())
        .zip(akw.shell_list().iter())
    {
        for (block, pakw) in shell.iter() {
            let stem = format!("Akw_{tag}_{}_proj{jsh}", block.label());
            let (path, mut out) = create(dir, &format!("{stem}.dat"))?;
            write_akw_rows(&mut out, frequencies, |ik, iw| pakw[(ik, iw)], n_k)?;
            finish(path, out, &mut written)?;

            let pakw_orb = shell_orb.get(block).ok_or_else(|| {
                format_err!("No element-resolved spectral function for spin block `{block}`.")
            })?;
            let (_, _, dim, _) = pakw_orb.dim();
            for i in 0..dim {
                for j in 0..dim {
                    let (path, mut out) = create(dir, &format!("{stem}_{i}_{j}.dat"))?;
                    write_akw_rows(&mut out, frequencies, |ik, iw| pakw_orb[(ik, iw, i, j)], n_k)?;
                    finish(path, out, &mut written)?;
                }
            }
        }
    }
    Ok(written)
}

// =================
// Spectral contours
// =================

/// Writes one contour file: a header naming the frequency, then rows `kx  ky  kz  A`.
fn write_contour_file(
    dir: &Path,
    name: &str,
    frequency: f64,
    points: &Array2<f64>,
    value: impl Fn(usize) -> f64,
    written: &mut Vec<PathBuf>,
) -> Result<(), anyhow::Error> {
    let (path, mut out) = create(dir, name)?;
    writeln!(out, "#Spectral function evaluated at frequency = {frequency}")?;
    for (j, vkc) in points.rows().into_iter().enumerate() {
        writeln!(
            out,
            "{}    {}    {}    {}",
            vkc[0],
            vkc[1],
            vkc[2],
            value(j)
        )?;
    }
    finish(path, out, written)
}

/// Writes spectral contours.
///
/// For a Fermi-surface contour, files are named `Akw_FS_<spin>.dat` and
/// `Akw_FS_<tag>_<spin>_proj<ish>[_<i>_<j>].dat`. Otherwise, one set of files is written per
/// frequency, with `FS` replaced by `omega_<iom>`.
pub fn write_contours(
    dir: &Path,
    _writer: &DesignatedWriter,
    contours: &SpectralContours,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut written = vec![];
    let points = contours.points();
    let tag = contours.scheme().tag();
    for (iom, frequency) in contours.frequencies().iter().enumerate() {
        let label = if contours.fermi_surface() {
            "FS".to_string()
        } else {
            format!("omega_{iom}")
        };
        for (block, total) in contours.total().iter() {
            write_contour_file(
                dir,
                &format!("Akw_{label}_{}.dat", block.label()),
                *frequency,
                points,
                |j| total[(iom, j)],
                &mut written,
            )?;
        }
        for (ish, (shell, shell_orb)) in contours
            .projected()
            .iter()
            .zip(contours.projected_orb().iter())
            .enumerate()
        {
            for (block, pakw) in shell.iter() {
                let stem = format!("Akw_{label}_{tag}_{}_proj{ish}", block.label());
                write_contour_file(
                    dir,
                    &format!("{stem}.dat"),
                    *frequency,
                    points,
                    |j| pakw[(iom, j)],
                    &mut written,
                )?;
                let pakw_orb = shell_orb.get(block).ok_or_else(|| {
                    format_err!("No element-resolved contour for spin block `{block}`.")
                })?;
                let (_, _, dim, _) = pakw_orb.dim();
                for i in 0..dim {
                    for j in 0..dim {
                        write_contour_file(
                            dir,
                            &format!("{stem}_{i}_{j}.dat"),
                            *frequency,
                            points,
                            |jk| pakw_orb[(iom, jk, i, j)],
                            &mut written,
                        )?;
                    }
                }
            }
        }
    }
    Ok(written)
}

// ===========
// Hamiltonian
// ===========

/// Writes the diagonal of the band Hamiltonian at every k-point, as rows `ik  Re H_ii` with a
/// blank line after every k-point.
///
/// Spin-polarised data without spin-orbit coupling go to `hamup.dat` and `hamdn.dat`; all other
/// data go to `ham.dat`.
pub fn write_hamiltonian(
    dir: &Path,
    _writer: &DesignatedWriter,
    hopping: &Hopping,
    n_orbitals: &Array2<usize>,
    spin: SpinStructure,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    let channels: Vec<(usize, &str)> = if spin.spin_polarised && !spin.spin_orbit {
        vec![(0, "hamup.dat"), (1, "hamdn.dat")]
    } else {
        vec![(0, "ham.dat")]
    };
    let mut written = vec![];
    for (isp, name) in channels {
        let (path, mut out) = create(dir, name)?;
        for (ik, per_spin) in hopping.iter().enumerate() {
            let hk = per_spin
                .get(isp)
                .ok_or_else(|| format_err!("No hopping data for spin {isp} at k-point {ik}."))?;
            let n_orb = n_orbitals
                .get((ik, isp))
                .copied()
                .ok_or_else(|| format_err!("No band count for spin {isp} at k-point {ik}."))?;
            for i in 0..n_orb.min(hk.nrows()) {
                writeln!(out, "{ik}    {}", hk[(i, i)].re)?;
            }
            writeln!(out)?;
        }
        finish(path, out, &mut written)?;
    }
    Ok(written)
}
