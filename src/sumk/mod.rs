//! Distributed sums over k-points.
//!
//! Every sweep runs in two phases. In the local phase, a worker visits only the k-points of its
//! slice of a [`KPartition`] and accumulates into buffers it owns exclusively. In the reduction
//! phase, every worker enters the same sequence of collectives, after which all workers hold
//! identical, fully reduced buffers. A worker whose local phase fails aborts the communicator
//! before returning, so that no other worker is left blocked in a collective.

use anyhow::{self, ensure, format_err, Context};
use indexmap::IndexMap;
use log;
use ndarray::{s, Array, Array1, Array2, Array4, Dimension};
use num_complex::Complex;

use crate::archive::BandOccupations;
use crate::correction::{CorrectionPipeline, LocalGfArena, Reduced};
use crate::distributed::{Communicator, KPartition};
use crate::gf::BlockGreenFunction;
use crate::io::format::kspectra_error;
use crate::mesh::{FrequencyMesh, MeshKind};
use crate::projection::Projection;
use crate::provider::{LatticeGfParams, LatticeGreenFunctionProvider};
use crate::spin::{SpinBlock, SpinStructure};


// ============
// Sweep results
// ============

/// Structure for the fully reduced result of a Brillouin-zone sweep.
#[derive(Clone, Debug)]
pub struct ReducedSweep {
    /// The total density of states of every spin block, one value per mesh frequency.
    pub total: IndexMap<SpinBlock, Array1<f64>>,

    /// The k-summed local Green's functions of every shell of the projection.
    pub local: LocalGfArena<Reduced>,
}

/// Structure for the fully reduced result of a k-resolved sweep.
#[derive(Clone, Debug)]
pub struct KResolvedSweep {
    /// The frequencies of the window, one per column of the k-resolved arrays.
    pub frequencies: Vec<f64>,

    /// The trace of the spectral function of every spin block, of shape `(n_k, n_window)`.
    pub total: IndexMap<SpinBlock, Array2<f64>>,

    /// The element-resolved projected spectral functions of every selected shell, in the order
    /// of the shell list, each of shape `(n_k, n_window, dim, dim)`.
    pub projected: Vec<IndexMap<SpinBlock, Array4<f64>>>,
}

// ====
// KSum
// ====

/// Structure for the ingredients shared by every sweep over k-points: the source of lattice
/// Green's functions and the parameters it is evaluated with.
pub struct KSum<'a> {
    provider: &'a dyn LatticeGreenFunctionProvider,
    spin: SpinStructure,
    mesh: &'a FrequencyMesh,
    params: &'a LatticeGfParams,
}

impl<'a> KSum<'a> {
    pub fn new(
        provider: &'a dyn LatticeGreenFunctionProvider,
        spin: SpinStructure,
        mesh: &'a FrequencyMesh,
        params: &'a LatticeGfParams,
    ) -> Self {
        Self {
            provider,
            spin,
            mesh,
            params,
        }
    }

    pub fn mesh(&self) -> &FrequencyMesh {
        self.mesh
    }

    pub fn spin(&self) -> SpinStructure {
        self.spin
    }

    fn check_partition(&self, partition: &KPartition) -> Result<(), anyhow::Error> {
        ensure!(
            partition.n_k() <= self.provider.n_k(),
            "The partition covers {} k-point(s), but lattice Green's functions are only available \
            for {}.",
            partition.n_k(),
            self.provider.n_k()
        );
        Ok(())
    }

    /// Sums BZ-weighted lattice Green's functions and their projections over every k-point.
    ///
    /// For each k-point of this worker's slice, the lattice Green's function is scaled by the
    /// k-point weight and, if band occupations are given, masked element-wise by them. Its
    /// spectral trace is added to the total density of states and, if the projection is active,
    /// its projection onto every shell is added to the local Green's function of that shell.
    ///
    /// # Arguments
    ///
    /// * `comm` - The communicator connecting the workers of the sweep.
    /// * `partition` - The partition of the k-points over the workers.
    /// * `weights` - The Brillouin-zone weight of every k-point.
    /// * `projection` - The projection onto local shells.
    /// * `occupations` - Optional band-resolved occupations masking the lattice Green's
    /// functions.
    ///
    /// # Returns
    ///
    /// The reduced sweep, identical on every worker.
    pub fn sum_over_k<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        partition: &KPartition,
        weights: &[f64],
        projection: &Projection,
        occupations: Option<&BandOccupations>,
    ) -> Result<ReducedSweep, anyhow::Error> {
        let (mut total, mut shells) = abort_on_err(
            comm,
            self.sum_over_k_local(comm.rank(), partition, weights, projection, occupations),
        )?;

        comm.barrier()?;
        for dos in total.values_mut() {
            all_reduce_array(comm, dos)?;
        }
        for shell in shells.iter_mut() {
            for (_, gf) in shell.iter_mut() {
                all_reduce_array_c64(comm, gf.data_mut())?;
            }
        }
        Ok(ReducedSweep {
            total,
            local: LocalGfArena::from_reduced(shells),
        })
    }

    #[allow(clippy::type_complexity)]
    fn sum_over_k_local(
        &self,
        rank: usize,
        partition: &KPartition,
        weights: &[f64],
        projection: &Projection,
        occupations: Option<&BandOccupations>,
    ) -> Result<(IndexMap<SpinBlock, Array1<f64>>, Vec<BlockGreenFunction>), anyhow::Error> {
        self.check_partition(partition)?;
        ensure!(
            weights.len() == partition.n_k(),
            "{} Brillouin-zone weight(s) given for {} k-point(s).",
            weights.len(),
            partition.n_k()
        );
        let spin_blocks = self.spin.blocks();
        let n_freq = self.mesh.len();
        let mut total = spin_blocks
            .iter()
            .map(|block| (*block, Array1::<f64>::zeros(n_freq)))
            .collect::<IndexMap<_, _>>();
        let mut shells = projection
            .dims()
            .iter()
            .map(|dim| BlockGreenFunction::zeros(&spin_blocks, n_freq, *dim))
            .collect::<Vec<_>>();

        let slice = partition.slice(rank);
        log::debug!("Worker {rank} sums over k-points {slice:?}.");
        for ik in slice {
            let mut gk = self
                .provider
                .lattice_gf(ik, &spin_blocks, self.mesh, self.params)
                .with_context(|| format!("Lattice Green's function unavailable at k-point {ik}"))?;
            gk.scale(weights[ik]);
            if let Some(occupations) = occupations {
                for (block, gf) in gk.iter_mut() {
                    let mask = occupations
                        .get(block)
                        .and_then(|per_k| per_k.get(ik))
                        .ok_or_else(|| {
                            format_err!(
                                "No band occupations for spin block `{block}` at k-point {ik}."
                            )
                        })?;
                    gf.mask(mask)
                        .with_context(|| format!("Unable to mask k-point {ik} by its occupations"))?;
                }
            }
            for (block, gf) in gk.iter() {
                if let Some(dos) = total.get_mut(block) {
                    *dos += &gf.spectral_trace();
                }
            }
            if projection.is_active() {
                for (ish, shell) in shells.iter_mut().enumerate() {
                    let local = projection
                        .project_blocks(&gk, ish, ik, &self.spin)
                        .with_context(|| format!("Projection onto shell {ish} failed at k-point {ik}"))?;
                    shell
                        .add_checked(&local)
                        .with_context(|| format!("Unable to accumulate shell {ish} at k-point {ik}"))?;
                }
            }
        }
        Ok((total, shells))
    }

    /// Evaluates k-resolved spectral functions on a frequency window, without summing over
    /// k-points.
    ///
    /// The projected Green's function of every selected shell is rotated to the local frame at
    /// each k-point. It is not symmetrised, since symmetrisation only applies to k-summed
    /// quantities.
    ///
    /// # Arguments
    ///
    /// * `comm` - The communicator connecting the workers of the sweep.
    /// * `partition` - The partition of the k-points over the workers.
    /// * `projection` - The projection onto local shells.
    /// * `pipeline` - The corrections of the projection, of which only the rotations are used.
    /// * `window` - The indices of the mesh frequencies to keep.
    /// * `shell_list` - The shells for which projected spectral functions are evaluated.
    ///
    /// # Returns
    ///
    /// The reduced k-resolved arrays, identical on every worker. Rows are indexed by k-point.
    pub fn k_resolved<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        partition: &KPartition,
        projection: &Projection,
        pipeline: &CorrectionPipeline,
        window: &[usize],
        shell_list: &[usize],
    ) -> Result<KResolvedSweep, anyhow::Error> {
        let (mut total, mut projected) = abort_on_err(
            comm,
            self.k_resolved_local(
                comm.rank(),
                partition,
                projection,
                pipeline,
                window,
                shell_list,
            ),
        )?;

        comm.barrier()?;
        for akw in total.values_mut() {
            all_reduce_array(comm, akw)?;
        }
        for shell in projected.iter_mut() {
            for akw in shell.values_mut() {
                all_reduce_array(comm, akw)?;
            }
        }
        let points = self.mesh.points();
        Ok(KResolvedSweep {
            frequencies: window.iter().map(|iw| points[*iw]).collect(),
            total,
            projected,
        })
    }

    #[allow(clippy::type_complexity)]
    fn k_resolved_local(
        &self,
        rank: usize,
        partition: &KPartition,
        projection: &Projection,
        pipeline: &CorrectionPipeline,
        window: &[usize],
        shell_list: &[usize],
    ) -> Result<
        (
            IndexMap<SpinBlock, Array2<f64>>,
            Vec<IndexMap<SpinBlock, Array4<f64>>>,
        ),
        anyhow::Error,
    > {
        self.check_partition(partition)?;
        projection.check_shells(shell_list)?;
        ensure!(
            window.iter().all(|iw| *iw < self.mesh.len()),
            "The frequency window extends beyond the mesh."
        );
        let spin_blocks = self.spin.blocks();
        let n_k = partition.n_k();
        let n_window = window.len();
        let mut total = spin_blocks
            .iter()
            .map(|block| (*block, Array2::<f64>::zeros((n_k, n_window))))
            .collect::<IndexMap<_, _>>();
        let mut projected = if projection.is_active() {
            shell_list
                .iter()
                .map(|ish| {
                    let dim = projection.dims()[*ish];
                    spin_blocks
                        .iter()
                        .map(|block| (*block, Array4::<f64>::zeros((n_k, n_window, dim, dim))))
                        .collect::<IndexMap<_, _>>()
                })
                .collect::<Vec<_>>()
        } else {
            vec![]
        };

        let slice = partition.slice(rank);
        log::debug!("Worker {rank} evaluates k-resolved spectra for k-points {slice:?}.");
        for ik in slice {
            let gk = self
                .provider
                .lattice_gf(ik, &spin_blocks, self.mesh, self.params)
                .with_context(|| format!("Lattice Green's function unavailable at k-point {ik}"))?;
            for (block, gf) in gk.iter() {
                let trace = gf.spectral_trace();
                if let Some(akw) = total.get_mut(block) {
                    akw.row_mut(ik)
                        .iter_mut()
                        .zip(window.iter())
                        .for_each(|(a, iw)| *a = trace[*iw]);
                }
            }
            for (pos, ish) in shell_list.iter().enumerate() {
                let Some(shell_akw) = projected.get_mut(pos) else {
                    break;
                };
                let local = projection
                    .project_blocks(&gk, *ish, ik, &self.spin)
                    .with_context(|| format!("Projection onto shell {ish} failed at k-point {ik}"))?;
                let local = pipeline.rotate_shell(*ish, &local)?;
                for (block, gf) in local.iter() {
                    if let Some(akw) = shell_akw.get_mut(block) {
                        akw.slice_mut(s![ik, .., .., ..])
                            .assign(&gf.spectral_elements(window));
                    }
                }
            }
        }
        Ok((total, projected))
    }

    /// Computes the band-resolved density matrix of every spin block at every k-point from the
    /// unprojected lattice Green's functions.
    ///
    /// # Errors
    ///
    /// Errors with [`crate::error::SpectralError::MeshType`] if the mesh is not a Matsubara mesh.
    pub fn band_occupations<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        partition: &KPartition,
    ) -> Result<BandOccupations, anyhow::Error> {
        let mut flat = abort_on_err(comm, self.band_occupations_local(comm.rank(), partition))?;

        comm.barrier()?;
        for buf in flat.values_mut() {
            comm.all_reduce_sum_f64(buf)?;
        }
        flat.into_iter()
            .map(|(block, buf)| -> Result<(SpinBlock, Vec<Array2<f64>>), anyhow::Error> {
                let mut offset = 0;
                let per_k = (0..partition.n_k())
                    .map(|ik| -> Result<Array2<f64>, anyhow::Error> {
                        let n_bands = self.provider.n_bands(ik, block);
                        let mat = Array2::from_shape_vec(
                            (n_bands, n_bands),
                            buf[offset..offset + n_bands * n_bands].to_vec(),
                        )?;
                        offset += n_bands * n_bands;
                        Ok(mat)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((block, per_k))
            })
            .collect()
    }

    fn band_occupations_local(
        &self,
        rank: usize,
        partition: &KPartition,
    ) -> Result<IndexMap<SpinBlock, Vec<f64>>, anyhow::Error> {
        self.mesh.require_kind(MeshKind::Imaginary)?;
        self.check_partition(partition)?;
        let spin_blocks = self.spin.blocks();

        // Offsets of every k-point in the flattened buffer of each spin block.
        let offsets = spin_blocks
            .iter()
            .map(|block| {
                let offsets = (0..=partition.n_k())
                    .scan(0, |acc, ik| {
                        let offset = *acc;
                        if ik < partition.n_k() {
                            *acc += self.provider.n_bands(ik, *block).pow(2);
                        }
                        Some(offset)
                    })
                    .collect::<Vec<_>>();
                (*block, offsets)
            })
            .collect::<IndexMap<_, _>>();
        let mut flat = offsets
            .iter()
            .map(|(block, offsets)| (*block, vec![0.0; offsets[partition.n_k()]]))
            .collect::<IndexMap<_, _>>();

        for ik in partition.slice(rank) {
            let gk = self
                .provider
                .lattice_gf(ik, &spin_blocks, self.mesh, self.params)
                .with_context(|| format!("Lattice Green's function unavailable at k-point {ik}"))?;
            for (block, gf) in gk.iter() {
                let density = gf.density(self.mesh)?;
                let start = offsets[block][ik];
                if let Some(buf) = flat.get_mut(block) {
                    buf[start..start + density.len()]
                        .iter_mut()
                        .zip(density.iter())
                        .for_each(|(x, n)| *x = n.re);
                }
            }
        }
        Ok(flat)
    }
}

/// Aborts the communicator if a worker's local phase has failed.
fn abort_on_err<C: Communicator + ?Sized, T>(
    comm: &C,
    result: Result<T, anyhow::Error>,
) -> Result<T, anyhow::Error> {
    result.map_err(|err| {
        kspectra_error!("Worker {} failed: {err:#}", comm.rank());
        comm.abort(&format!("{err:#}"));
        err
    })
}

/// Sums a real array over all workers.
fn all_reduce_array<C: Communicator + ?Sized, D: Dimension>(
    comm: &C,
    arr: &mut Array<f64, D>,
) -> Result<(), anyhow::Error> {
    match arr.as_slice_mut() {
        Some(buf) => comm.all_reduce_sum_f64(buf),
        None => {
            let mut buf = arr.iter().copied().collect::<Vec<_>>();
            comm.all_reduce_sum_f64(&mut buf)?;
            arr.iter_mut().zip(buf).for_each(|(x, y)| *x = y);
            Ok(())
        }
    }
}

/// Sums a complex array over all workers.
fn all_reduce_array_c64<C: Communicator + ?Sized, D: Dimension>(
    comm: &C,
    arr: &mut Array<Complex<f64>, D>,
) -> Result<(), anyhow::Error> {
    match arr.as_slice_mut() {
        Some(buf) => comm.all_reduce_sum_c64(buf),
        None => {
            let mut buf = arr.iter().copied().collect::<Vec<_>>();
            comm.all_reduce_sum_c64(&mut buf)?;
            arr.iter_mut().zip(buf).for_each(|(x, y)| *x = y);
            Ok(())
        }
    }
}
