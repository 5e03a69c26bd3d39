//! Spin blocks of lattice and local Green's functions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An enumerated type for the spin channels a Green's function is block-diagonal in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpinBlock {
    /// Variant for the spin-up channel.
    #[serde(rename = "up")]
    Up,

    /// Variant for the spin-down channel.
    #[serde(rename = "down")]
    Down,

    /// Variant for the single combined channel used with spin-orbit coupling.
    #[serde(rename = "ud")]
    UpDown,
}

impl SpinBlock {
    /// Returns the label used in output file names.
    pub fn label(&self) -> &'static str {
        match self {
            SpinBlock::Up => "up",
            SpinBlock::Down => "down",
            SpinBlock::UpDown => "ud",
        }
    }
}

impl fmt::Display for SpinBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Structure describing how the spin degree of freedom is treated in the underlying data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinStructure {
    /// Boolean indicating if spin-orbit coupling is included. If so, a single combined block is
    /// used.
    pub spin_orbit: bool,

    /// Boolean indicating if the archive stores separate data for the two spin channels.
    pub spin_polarised: bool,
}

impl SpinStructure {
    /// Returns the active spin blocks for a run, in a fixed order.
    pub fn blocks(&self) -> Vec<SpinBlock> {
        if self.spin_orbit {
            vec![SpinBlock::UpDown]
        } else {
            vec![SpinBlock::Up, SpinBlock::Down]
        }
    }

    /// Returns the index of the archive spin channel holding the data of a spin block.
    pub fn spin_index(&self, block: SpinBlock) -> usize {
        match block {
            SpinBlock::Up | SpinBlock::UpDown => 0,
            SpinBlock::Down => usize::from(self.spin_polarised),
        }
    }
}
