//! # kspectra: projected spectral functions from lattice Green's functions
//!
//! `kspectra` evaluates spectral observables of a crystalline solid from the lattice Green's
//! functions built out of a band-structure archive:
//! - total and projected densities of states, including orbital-resolved matrices,
//! - k-resolved spectral functions $`A(k, \omega)`$ along a band path,
//! - spectral contours over a full Brillouin-zone plane, such as Fermi surfaces,
//! - orbitally-resolved partial charges, and
//! - band-resolved occupations.
//!
//! Lattice Green's functions can be projected onto local orbitals with Wannier projectors, a
//! coarse-grained projector or angular-momentum partial projectors. The k-point sum is shared
//! between a group of workers whose contributions are combined by a deterministic all-reduce,
//! after which the local Green's functions are symmetrised and rotated into their local frames.
//!
//! ## Layout
//!
//! - [`archive`]: lazily loaded archive groups,
//! - [`provider`]: lattice Green's functions from hopping data and self-energies,
//! - [`projection`]: projection-scheme selection and lattice-to-local projection,
//! - [`distributed`]: communicators, worker groups and k-point partitions,
//! - [`sumk`]: the distributed k-sum,
//! - [`correction`]: symmetrisation and local-frame rotation,
//! - [`observables`]: extraction of the spectral observables,
//! - [`report`]: column files written by the designated worker,
//! - [`drivers`]: one driver per calculation,
//! - [`interfaces`]: the command-line interface and YAML input files.
//!
//! ## Examples and usage
//!
//! Usages of most items are illustrated in test functions.

pub mod archive;
pub mod correction;
pub mod distributed;
pub mod drivers;
pub mod error;
pub mod gf;
pub mod interfaces;
pub mod io;
pub mod mesh;
pub mod observables;
pub mod projection;
pub mod provider;
pub mod report;
pub mod spin;
pub mod sumk;

#[cfg(test)]
pub(crate) mod fixtures;
