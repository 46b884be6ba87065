//! Plain, hand-constructed machine configuration.
//!
//! ROM/CLI loading is out of scope for this core (see spec Non-goals), so
//! `MachineConfig` is built directly by embedding callers and tests rather
//! than deserialized from a file format.

const PAGE_SIZE: usize = 4096;
const ROM_WINDOW: usize = 256 * 1024;
const MAX_RAM: usize = 2 * 1024 * 1024;

/// Construction-time configuration for a `MachineState`.
pub struct MachineConfig {
    /// Raw ROM image bytes, up to 256 KiB.
    pub rom: Vec<u8>,
    /// Base RAM size in bytes, a multiple of 4 KiB up to 2 MiB.
    pub base_ram_size: usize,
    /// Expansion RAM size in bytes, a multiple of 4 KiB up to 2 MiB.
    pub exp_ram_size: usize,
}

impl MachineConfig {
    #[must_use]
    pub fn new(rom: Vec<u8>, base_ram_size: usize, exp_ram_size: usize) -> Self {
        Self {
            rom,
            base_ram_size,
            exp_ram_size,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::MachineError> {
        if self.rom.len() > ROM_WINDOW {
            return Err(crate::error::MachineError::RomTooLarge {
                len: self.rom.len(),
                max: ROM_WINDOW,
            });
        }
        for &size in &[self.base_ram_size, self.exp_ram_size] {
            // `Region` wraps out-of-range offsets with a bitmask, which only gives
            // the correct hardware wraparound when the buffer length is a power of
            // two (true of every RAM configuration the real 3B1 shipped).
            if size == 0 || size > MAX_RAM || size % PAGE_SIZE != 0 || !size.is_power_of_two() {
                return Err(crate::error::MachineError::InvalidRamSize { len: size });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sized_config_validates() {
        let cfg = MachineConfig::new(vec![0u8; 1024], 2 * 1024 * 1024, 2 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oversized_rom_rejected() {
        let cfg = MachineConfig::new(vec![0u8; ROM_WINDOW + 1], PAGE_SIZE, PAGE_SIZE);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ram_size_must_be_page_multiple() {
        let cfg = MachineConfig::new(vec![], 1000, PAGE_SIZE);
        assert!(cfg.validate().is_err());
    }
}
