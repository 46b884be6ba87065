//! Random-access byte store backing a floppy image.
//!
//! The WD2797 only ever needs to seek, read, write, and flush a flat image
//! file — never anything more specific to `std::fs::File`. Modeling that as
//! a capability trait (rather than threading a concrete file handle through
//! the controller) keeps the controller testable without touching disk, the
//! same way `drive-amiga-floppy` takes a parsed `format_adf::Adf` instead of
//! a raw file handle.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A flat, randomly-addressable byte store.
pub trait ImageStore: Send {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Flush any buffered writes to the backing medium.
    fn flush(&mut self) -> io::Result<()>;
}

/// A disk image backed by an open file.
pub struct FileImage {
    file: File,
    len: u64,
}

impl FileImage {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ImageStore for FileImage {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// An in-memory disk image, for tests and headless use.
pub struct MemImage {
    data: Vec<u8>,
}

impl MemImage {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl ImageStore for MemImage {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of image"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of image"));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
