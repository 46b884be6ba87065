//! WD2797 floppy disk controller model.
//!
//! A command-driven register interface (STATUS/TRACK/SECTOR/DATA) backed by
//! a flat, randomly-addressable sector image. The controller itself never
//! opens a file; callers attach an [`ImageStore`] (a real [`FileImage`] or,
//! for tests, a [`MemImage`]).

mod error;
mod fdc;
mod image;

pub use error::ImageError;
pub use fdc::{Fdc, REG_DATA, REG_SECTOR, REG_STATUS, REG_TRACK};
pub use image::{FileImage, ImageStore, MemImage};
