//! Projection of lattice Green's functions onto local orbital subspaces.
//!
//! A [`Projection`] is selected once per calculation from a [`ProjectionScheme`] and the archive,
//! and then projects lattice Green's functions k-point by k-point.

pub mod dispatch;
pub mod scheme;

pub use scheme::{KPointSet, Projection, ProjectionScheme, ProjectorSource};
