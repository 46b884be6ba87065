//! WD2797 floppy disk controller command state machine.
//!
//! Four addressable registers (STATUS/COMMAND, TRACK, SECTOR, DATA) drive a
//! command decoder with four command classes. The controller never touches
//! a concrete file: images arrive through the `ImageStore` capability trait
//! so tests can swap in an in-memory image without touching disk.

use emu_core::{Observable, Value};

use crate::error::ImageError;
use crate::image::ImageStore;

/// STATUS register offset (addr bits 1-2 == 0).
pub const REG_STATUS: u8 = 0;
/// TRACK register offset.
pub const REG_TRACK: u8 = 1;
/// SECTOR register offset.
pub const REG_SECTOR: u8 = 2;
/// DATA register offset.
pub const REG_DATA: u8 = 3;

const ST_BUSY: u8 = 0x01;
const ST_DRQ: u8 = 0x02;
const ST_LOST_DATA: u8 = 0x04;
const ST_TRACK0: u8 = 0x04;
const ST_SEEK_ERROR: u8 = 0x10;
const ST_HEAD_LOADED: u8 = 0x20;
const ST_WRITE_PROTECT: u8 = 0x40;
const ST_NOT_READY: u8 = 0x80;

/// Format-track command length, in DATA register writes (emulated geometry
/// is fixed, so the stream of format bytes is consumed and discarded).
const FORMAT_TRACK_LEN: usize = 7170;

/// The WD2797 floppy disk controller.
pub struct Fdc {
    // Geometry (0 tracks == no image attached).
    sector_size: u32,
    sectors_per_track: u32,
    heads: u32,
    tracks: u32,

    // Positioning.
    track: u32,
    head: u32,
    sector: u8,
    track_reg: u8,
    data_reg: u8,
    last_step_dir: i32,

    // Data buffer.
    data: Vec<u8>,
    data_pos: usize,
    data_len: usize,

    // Flags.
    status: u8,
    irq: bool,
    cmd_has_drq: bool,
    formatting: bool,
    writeable: bool,

    // Byte offset in the image for the next buffered write, or `None`.
    write_pos: Option<u64>,

    image: Option<Box<dyn ImageStore>>,
}

impl Fdc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sector_size: 0,
            sectors_per_track: 0,
            heads: 0,
            tracks: 0,
            track: 0,
            head: 0,
            sector: 0,
            track_reg: 0,
            data_reg: 0,
            last_step_dir: 1,
            data: Vec::new(),
            data_pos: 0,
            data_len: 0,
            status: 0,
            irq: false,
            cmd_has_drq: false,
            formatting: false,
            writeable: false,
            write_pos: None,
            image: None,
        }
    }

    /// Attach a flat sector image. Geometry must divide the image size
    /// exactly into at least one track.
    pub fn load_image(
        &mut self,
        image: Box<dyn ImageStore>,
        sector_size: u32,
        sectors_per_track: u32,
        heads: u32,
        writeable: bool,
    ) -> Result<(), ImageError> {
        let track_bytes = u64::from(sector_size) * u64::from(sectors_per_track) * u64::from(heads);
        let len = image.len();
        if track_bytes == 0 || len == 0 || len % track_bytes != 0 {
            return Err(ImageError::BadGeometry {
                len,
                sector_size,
                sectors_per_track,
                heads,
            });
        }
        let tracks = len / track_bytes;
        if tracks == 0 {
            return Err(ImageError::BadGeometry {
                len,
                sector_size,
                sectors_per_track,
                heads,
            });
        }

        self.sector_size = sector_size;
        self.sectors_per_track = sectors_per_track;
        self.heads = heads;
        self.tracks = tracks as u32;
        self.writeable = writeable;
        self.image = Some(image);
        self.reset_positioning();
        Ok(())
    }

    /// Detach the image and clear geometry.
    pub fn unload(&mut self) {
        self.image = None;
        self.sector_size = 0;
        self.sectors_per_track = 0;
        self.heads = 0;
        self.tracks = 0;
        self.writeable = false;
        self.reset();
    }

    /// Reset positioning, IRQ, and the data buffer without freeing it.
    pub fn reset(&mut self) {
        self.reset_positioning();
    }

    fn reset_positioning(&mut self) {
        self.track = 0;
        self.head = 0;
        self.sector = 0;
        self.track_reg = 0;
        self.data_reg = 0;
        self.last_step_dir = 1;
        self.data_pos = 0;
        self.data_len = 0;
        self.status = 0;
        self.irq = false;
        self.cmd_has_drq = false;
        self.formatting = false;
        self.write_pos = None;
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    #[must_use]
    pub fn get_irq(&self) -> bool {
        self.irq
    }

    /// `true` iff `data_pos < data_len`. Pure boolean state, observed freely
    /// by the DMA engine.
    #[must_use]
    pub fn get_drq(&self) -> bool {
        self.data_pos < self.data_len
    }

    #[must_use]
    pub fn track(&self) -> u32 {
        self.track
    }

    #[must_use]
    pub fn track_reg(&self) -> u8 {
        self.track_reg
    }

    // ---- Register-level interface (addr bits 1-2 select the register) ----

    pub fn write_reg(&mut self, reg: u8, val: u8) {
        match reg & 3 {
            REG_STATUS => self.write_command(val),
            REG_TRACK => self.track_reg = val,
            REG_SECTOR => self.sector = val,
            _ => self.write_data(val),
        }
    }

    pub fn read_reg(&mut self, reg: u8) -> u8 {
        match reg & 3 {
            REG_STATUS => self.read_status(),
            REG_TRACK => self.track_reg,
            REG_SECTOR => self.sector,
            _ => self.read_data(),
        }
    }

    fn read_status(&mut self) -> u8 {
        self.irq = false;
        if self.image.is_none() {
            return ST_NOT_READY;
        }
        let pending = self.data_pos < self.data_len;
        let mut s = self.status & !(ST_BUSY | ST_DRQ | ST_NOT_READY);
        if pending {
            s |= ST_BUSY;
            if self.cmd_has_drq {
                s |= ST_DRQ | ST_NOT_READY;
            }
        }
        s
    }

    fn read_data(&mut self) -> u8 {
        if self.data_pos < self.data_len {
            let byte = self.data[self.data_pos];
            self.data_pos += 1;
            if self.data_pos == self.data_len {
                self.irq = true;
            }
            byte
        } else {
            self.data_reg
        }
    }

    fn write_data(&mut self, val: u8) {
        self.data_reg = val;
        let active = self.data_pos < self.data_len && (self.write_pos.is_some() || self.formatting);
        if !active {
            return;
        }
        if !self.formatting {
            self.data[self.data_pos] = val;
        }
        self.data_pos += 1;
        if self.data_pos == self.data_len && !self.formatting {
            if let (Some(image), Some(pos)) = (self.image.as_mut(), self.write_pos) {
                let _ = image.write_at(pos, &self.data[..self.data_len]);
                let _ = image.flush();
            }
            self.irq = true;
            self.write_pos = None;
            self.formatting = false;
        }
    }

    /// Invoked by the DMA engine when it fails to service DRQ in time.
    pub fn dma_miss(&mut self) {
        self.data_pos = self.data_len;
        self.status = ST_LOST_DATA;
        self.write_pos = None;
        self.irq = true;
    }

    // ---- Command decode ----

    fn write_command(&mut self, val: u8) {
        self.irq = false;

        if self.image.is_none() {
            self.status = ST_NOT_READY;
            self.irq = true;
            return;
        }

        match val >> 4 {
            0x0 => self.cmd_restore(),
            0x1 => self.cmd_seek(val),
            0x2 | 0x3 => self.cmd_step(val),
            0x4 | 0x5 => self.cmd_step_in(val),
            0x6 | 0x7 => self.cmd_step_out(val),
            0x8 | 0x9 => self.cmd_read_sector(val),
            0xA | 0xB => self.cmd_write_sector(val),
            0xC => self.cmd_read_address(),
            0xD => self.cmd_force_interrupt(val),
            0xE => self.cmd_read_track(),
            0xF => self.cmd_format_track(),
            _ => unreachable!("4-bit nibble"),
        }
    }

    fn finish_type1(&mut self) {
        self.data_pos = 0;
        self.data_len = 0;
        self.cmd_has_drq = false;
        self.formatting = false;
        self.write_pos = None;
        self.status |= ST_HEAD_LOADED;
        if self.track == 0 {
            self.status |= ST_TRACK0;
        }
        self.irq = true;
    }

    fn cmd_restore(&mut self) {
        self.status = 0;
        self.track = 0;
        self.track_reg = 0;
        self.finish_type1();
    }

    fn cmd_seek(&mut self, _val: u8) {
        self.status = 0;
        if u32::from(self.data_reg) < self.tracks {
            self.track = u32::from(self.data_reg);
            self.track_reg = self.data_reg;
        } else {
            self.status |= ST_SEEK_ERROR;
        }
        self.finish_type1();
    }

    fn step_track(&mut self, dir: i32, update_track_reg: bool) {
        self.status = 0;
        let target = self.track as i32 + dir;
        if target > self.tracks as i32 - 1 {
            self.track = self.tracks.saturating_sub(1);
            self.status |= ST_SEEK_ERROR;
        } else if target < 0 {
            self.track = 0;
        } else {
            self.track = target as u32;
        }
        if update_track_reg {
            self.track_reg = self.track as u8;
        }
        self.finish_type1();
    }

    fn cmd_step(&mut self, val: u8) {
        let dir = self.last_step_dir;
        self.step_track(dir, val & 0x10 != 0);
    }

    fn cmd_step_in(&mut self, val: u8) {
        self.last_step_dir = 1;
        self.step_track(1, val & 0x10 != 0);
    }

    fn cmd_step_out(&mut self, val: u8) {
        self.last_step_dir = -1;
        self.step_track(-1, val & 0x10 != 0);
    }

    fn chs_valid(&self) -> bool {
        self.track <= self.tracks.saturating_sub(1)
            && self.head <= self.heads.saturating_sub(1)
            && self.sector != 0
            && u32::from(self.sector) <= self.sectors_per_track
    }

    fn lba(&self, sector_offset: u32) -> u64 {
        let lba_sectors = self.track * self.heads * self.sectors_per_track
            + self.head * self.sectors_per_track
            + u32::from(self.sector) - 1
            + sector_offset;
        u64::from(lba_sectors) * u64::from(self.sector_size)
    }

    fn cmd_read_sector(&mut self, val: u8) {
        self.head = u32::from((val >> 1) & 1);
        if !self.chs_valid() {
            self.status = ST_SEEK_ERROR;
            self.irq = true;
            return;
        }

        let multi = val >> 4 == 0x9;
        let count = if multi { self.sectors_per_track } else { 1 };
        let sector_size = self.sector_size as usize;
        self.data.resize(count as usize * sector_size, 0);
        for i in 0..count {
            let lba = self.lba(i);
            let start = i as usize * sector_size;
            if let Some(image) = self.image.as_mut() {
                let _ = image.read_at(lba, &mut self.data[start..start + sector_size]);
            }
        }
        self.data_pos = 0;
        self.data_len = count as usize * sector_size;
        self.cmd_has_drq = true;
        self.status = if self.data_len > self.data_pos { ST_DRQ } else { 0 };
    }

    fn cmd_write_sector(&mut self, val: u8) {
        if !self.writeable {
            self.status = ST_WRITE_PROTECT;
            self.irq = true;
            return;
        }
        self.head = u32::from((val >> 1) & 1);

        let multi = val >> 4 == 0xB;
        let count = if multi { self.sectors_per_track } else { 1 };
        let sector_size = self.sector_size as usize;

        self.write_pos = Some(self.lba(0));
        self.data.resize(count as usize * sector_size, 0);
        self.data_len = count as usize * sector_size;
        self.data_pos = 0;
        self.cmd_has_drq = true;
        self.status = ST_DRQ;
    }

    fn cmd_read_address(&mut self) {
        let size_code = match self.sector_size {
            128 => 0,
            256 => 1,
            512 => 2,
            1024 => 3,
            _ => 0xFF,
        };
        self.data = vec![self.track as u8, self.head as u8, self.sector, size_code, 0, 0];
        self.data_pos = 0;
        self.data_len = self.data.len();
        self.cmd_has_drq = true;
        self.status = ST_DRQ;
    }

    fn cmd_force_interrupt(&mut self, val: u8) {
        self.data_pos = 0;
        self.data_len = 0;
        self.cmd_has_drq = false;
        self.formatting = false;
        self.write_pos = None;
        self.status = ST_HEAD_LOADED;
        if !self.writeable {
            self.status |= ST_WRITE_PROTECT;
        }
        if self.track == 0 {
            self.status |= ST_TRACK0;
        }
        if val & 0x08 != 0 {
            self.irq = true;
        }
    }

    fn cmd_read_track(&mut self) {
        self.status = ST_SEEK_ERROR;
        self.cmd_has_drq = false;
        self.irq = true;
    }

    fn cmd_format_track(&mut self) {
        if !self.writeable {
            self.status = ST_WRITE_PROTECT;
            self.irq = true;
            return;
        }
        self.data_len = FORMAT_TRACK_LEN;
        self.data_pos = 0;
        self.formatting = true;
        self.write_pos = None;
        self.cmd_has_drq = true;
        self.status = ST_DRQ;
    }
}

impl Default for Fdc {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for Fdc {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "status" => Some(Value::U8(self.status)),
            "track" => Some(Value::U32(self.track)),
            "track_reg" => Some(Value::U8(self.track_reg)),
            "sector" => Some(Value::U8(self.sector)),
            "head" => Some(Value::U32(self.head)),
            "data_reg" => Some(Value::U8(self.data_reg)),
            "irq" => Some(Value::Bool(self.irq)),
            "drq" => Some(Value::Bool(self.get_drq())),
            "has_image" => Some(Value::Bool(self.has_image())),
            "tracks" => Some(Value::U32(self.tracks)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "status", "track", "track_reg", "sector", "head", "data_reg", "irq", "drq",
            "has_image", "tracks",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemImage;

    const SECTOR_SIZE: u32 = 512;
    const SECTORS_PER_TRACK: u32 = 10;
    const HEADS: u32 = 1;
    const TRACKS: u32 = 40;

    fn blank_image() -> MemImage {
        MemImage::new(vec![0u8; (SECTOR_SIZE * SECTORS_PER_TRACK * HEADS * TRACKS) as usize])
    }

    fn fdc_with_image(writeable: bool) -> Fdc {
        let mut fdc = Fdc::new();
        fdc.load_image(
            Box::new(blank_image()),
            SECTOR_SIZE,
            SECTORS_PER_TRACK,
            HEADS,
            writeable,
        )
        .expect("geometry divides evenly");
        fdc
    }

    #[test]
    fn no_image_sets_not_ready() {
        let mut fdc = Fdc::new();
        fdc.write_reg(REG_STATUS, 0x00); // RESTORE
        assert!(fdc.get_irq());
        assert_eq!(fdc.read_reg(REG_STATUS), ST_NOT_READY);
        assert!(!fdc.get_irq());
    }

    #[test]
    fn restore_sets_track_zero_and_irq() {
        let mut fdc = fdc_with_image(true);
        fdc.track = 5;
        fdc.write_reg(REG_STATUS, 0x00);
        assert_eq!(fdc.track(), 0);
        assert_eq!(fdc.track_reg(), 0);
        assert!(fdc.get_irq());
        let status = fdc.read_reg(REG_STATUS);
        assert_eq!(status & ST_HEAD_LOADED, ST_HEAD_LOADED);
        assert_eq!(status & ST_TRACK0, ST_TRACK0);
        assert!(!fdc.get_irq());
    }

    #[test]
    fn seek_does_not_also_step() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_TRACK, 10);
        fdc.write_reg(REG_DATA, 20); // data_reg = target track
        fdc.write_reg(REG_STATUS, 0x10); // SEEK
        assert_eq!(fdc.track(), 20);
        assert_eq!(fdc.track_reg(), 20);
    }

    #[test]
    fn seek_error_when_target_out_of_range() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_DATA, 50); // only 40 tracks exist
        fdc.write_reg(REG_STATUS, 0x10);
        assert_eq!(fdc.track_reg(), 0);
        let status = fdc.read_reg(REG_STATUS);
        assert_eq!(status & ST_SEEK_ERROR, ST_SEEK_ERROR);
    }

    #[test]
    fn read_sector_round_trips_with_write_sector() {
        let mut fdc = fdc_with_image(true);
        let payload: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i & 0xFF) as u8).collect();

        fdc.write_reg(REG_TRACK, 0);
        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0xA0); // WRITE SECTOR, head 0
        for &b in &payload {
            fdc.write_reg(REG_DATA, b);
        }
        assert!(fdc.get_irq());

        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0x80); // READ SECTOR, head 0
        let mut got = Vec::new();
        while fdc.get_drq() {
            got.push(fdc.read_reg(REG_DATA));
        }
        assert_eq!(got, payload);
    }

    #[test]
    fn read_sector_invalid_sector_sets_error() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_SECTOR, 0); // sector 0 invalid
        fdc.write_reg(REG_STATUS, 0x80);
        let status = fdc.read_reg(REG_STATUS);
        assert_eq!(status & ST_SEEK_ERROR, ST_SEEK_ERROR);
    }

    #[test]
    fn write_sector_rejected_when_not_writeable() {
        let mut fdc = fdc_with_image(false);
        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0xA0);
        let status = fdc.read_reg(REG_STATUS);
        assert_eq!(status & ST_WRITE_PROTECT, ST_WRITE_PROTECT);
    }

    #[test]
    fn status_read_clears_irq() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_STATUS, 0x00); // RESTORE raises IRQ
        assert!(fdc.get_irq());
        fdc.read_reg(REG_STATUS);
        assert!(!fdc.get_irq());
    }

    #[test]
    fn drq_matches_pending_data() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0x90); // READ SECTOR MULTI, head 0
        assert!(fdc.get_drq());
        for _ in 0..(SECTOR_SIZE * SECTORS_PER_TRACK) {
            fdc.read_reg(REG_DATA);
        }
        assert!(!fdc.get_drq());
    }

    #[test]
    fn dma_miss_aborts_transfer() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0x80);
        assert!(fdc.get_drq());
        fdc.dma_miss();
        assert!(!fdc.get_drq());
        assert!(fdc.get_irq());
    }

    #[test]
    fn read_address_reports_chs_and_size_code() {
        let mut fdc = fdc_with_image(true);
        fdc.track = 3;
        fdc.head = 1;
        fdc.sector = 4;
        fdc.write_reg(REG_STATUS, 0xC0);
        let bytes: Vec<u8> = (0..6).map(|_| fdc.read_reg(REG_DATA)).collect();
        assert_eq!(bytes, vec![3, 1, 4, 2, 0, 0]);
    }

    #[test]
    fn force_interrupt_clears_in_flight_transfer() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_SECTOR, 1);
        fdc.write_reg(REG_STATUS, 0x88);
        assert!(fdc.get_drq());
        fdc.write_reg(REG_STATUS, 0xD8); // FORCE INTERRUPT, bit 3 set
        assert!(!fdc.get_drq());
        assert!(fdc.get_irq());
    }

    #[test]
    fn format_track_consumes_fixed_length_stream() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_STATUS, 0xF0); // FORMAT TRACK
        assert!(fdc.get_drq());
        for _ in 0..FORMAT_TRACK_LEN {
            fdc.write_reg(REG_DATA, 0x4E);
        }
        assert!(!fdc.get_drq());
    }

    #[test]
    fn read_track_is_unsupported() {
        let mut fdc = fdc_with_image(true);
        fdc.write_reg(REG_STATUS, 0xE0);
        assert!(fdc.get_irq());
        let status = fdc.read_reg(REG_STATUS);
        assert_eq!(status & ST_SEEK_ERROR, ST_SEEK_ERROR);
    }

    #[test]
    fn load_image_rejects_bad_geometry() {
        let mut fdc = Fdc::new();
        let bad = MemImage::new(vec![0u8; 100]); // not a multiple of track size
        let err = fdc.load_image(Box::new(bad), SECTOR_SIZE, SECTORS_PER_TRACK, HEADS, true);
        assert!(err.is_err());
    }
}
