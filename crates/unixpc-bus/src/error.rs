//! Error kinds for machine construction.

use std::fmt;

/// Error constructing a `MachineState`.
#[derive(Debug)]
pub enum MachineError {
    /// Supplied ROM image is larger than the 256 KiB ROM window.
    RomTooLarge { len: usize, max: usize },
    /// RAM size is not a multiple of the 4 KiB page size, or exceeds 2 MiB.
    InvalidRamSize { len: usize },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomTooLarge { len, max } => {
                write!(f, "ROM image of {len} bytes exceeds the {max}-byte ROM window")
            }
            Self::InvalidRamSize { len } => {
                write!(f, "RAM size {len} must be a nonzero multiple of 4096 bytes, up to 2 MiB")
            }
        }
    }
}

impl std::error::Error for MachineError {}
