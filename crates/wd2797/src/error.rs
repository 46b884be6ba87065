//! Error kinds for image attachment.

use std::fmt;

/// Error attaching a disk image to the controller.
#[derive(Debug)]
pub enum ImageError {
    /// The image length does not divide evenly into at least one full track
    /// for the given geometry.
    BadGeometry {
        len: u64,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
    },
    /// The image could not be read (size probe, etc).
    Io(std::io::Error),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadGeometry {
                len,
                sector_size,
                sectors_per_track,
                heads,
            } => write!(
                f,
                "image of {len} bytes does not divide evenly into tracks of \
                 {heads} head(s) x {sectors_per_track} sectors x {sector_size} bytes"
            ),
            Self::Io(e) => write!(f, "image I/O error: {e}"),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<std::io::Error> for ImageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
