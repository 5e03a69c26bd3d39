//! Interfaces between `kspectra` and its users.

use anyhow;

pub mod cli;
pub mod input;

/// Trait for handling a parsed input structure.
pub trait InputHandle {
    /// Handles the input section and runs appropriate calculations.
    fn handle(&self) -> Result<(), anyhow::Error>;
}
