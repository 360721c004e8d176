//! The platform board: the branch-31 catch-all that fans out to Citron I/O
//! ports, NVRAM, the boot ROM, the disk controller's block buffer, the
//! platform registers, each CPU's LSIC window, and the reset-magic address.
//!
//! Grounded in the historical reference implementation's `pboard.c`
//! dispatcher, which performs exactly this kind of offset-range `match`
//! inside one device's `read`/`write`. NVRAM and boot-ROM persistence go
//! through the host filesystem; failures there are logged and the device
//! degrades (empty ROM / non-persistent NVRAM) rather than panicking,
//! matching the platform's host-I/O error contract.

use std::fs;
use std::path::Path;

use crate::common::error::BusError;
use crate::common::constants::{BOOTROM_SIZE, DISK_BUFFER_SIZE, NVRAM_SIZE, PLATFORM_VERSION, RESET_MAGIC};
use crate::soc::lsic::Lsic;

const CITRON_BASE: u32 = 0x0000;
const CITRON_LAST: u32 = 0x03FF;
const PLATFORM_REG_BASE: u32 = 0x0800;
const PLATFORM_REG_LAST: u32 = 0x087F;
const POWER_CONTROL_OFFSET: u32 = PLATFORM_REG_BASE + 4;
const NVRAM_BASE: u32 = 0x1000;
const NVRAM_LAST: u32 = NVRAM_BASE + NVRAM_SIZE as u32 - 1;
const DISK_BUF_BASE: u32 = 0x2000_0;
const DISK_BUF_LAST: u32 = DISK_BUF_BASE + DISK_BUFFER_SIZE as u32 - 1;
const LSIC_BASE: u32 = 0x3_0000;
const LSIC_LAST: u32 = LSIC_BASE + 0xFF;
const RESET_MAGIC_ADDR: u32 = 0x80_0000;
const BOOTROM_BASE: u32 = 0x07FE_0000;
const BOOTROM_LAST: u32 = BOOTROM_BASE + BOOTROM_SIZE as u32 - 1;

/// The platform board's register and buffer state.
#[derive(Debug)]
pub struct PBoard {
    citron_ports: [u32; 256],
    nvram: Vec<u8>,
    nvram_dirty: bool,
    nvram_path: Option<String>,
    bootrom: Vec<u8>,
    disk_buffer: Vec<u8>,
    /// Set when a `RESET_MAGIC` write lands; the system builder observes
    /// and clears this to drive a full reset.
    pub reset_requested: bool,
    /// Set by a write to the power-control register; the low byte is the
    /// exit code the host runner should report.
    exit_code: Option<u32>,
}

impl Default for PBoard {
    fn default() -> Self {
        Self {
            citron_ports: [0; 256],
            nvram: vec![0u8; NVRAM_SIZE],
            nvram_dirty: false,
            nvram_path: None,
            bootrom: vec![0u8; BOOTROM_SIZE],
            disk_buffer: vec![0u8; DISK_BUFFER_SIZE],
            reset_requested: false,
            exit_code: None,
        }
    }
}

impl PBoard {
    /// Loads a flat boot ROM image from `path`, truncating/zero-padding to
    /// `BOOTROM_SIZE`. A missing or unreadable file leaves the ROM zeroed
    /// and logs a warning rather than failing construction.
    pub fn load_rom_file(&mut self, path: &Path) {
        match fs::read(path) {
            Ok(bytes) => {
                let n = bytes.len().min(BOOTROM_SIZE);
                self.bootrom[..n].copy_from_slice(&bytes[..n]);
            }
            Err(e) => {
                tracing::warn!("could not load boot ROM from {}: {e}", path.display());
            }
        }
    }

    /// Loads a saved NVRAM image from `path`, remembering the path so
    /// `save_nvram` can write back to it later.
    pub fn load_nvram_file(&mut self, path: &Path) {
        self.nvram_path = Some(path.display().to_string());
        match fs::read(path) {
            Ok(bytes) => {
                let n = bytes.len().min(NVRAM_SIZE);
                self.nvram[..n].copy_from_slice(&bytes[..n]);
            }
            Err(e) => {
                tracing::warn!("no existing NVRAM image at {}: {e}", path.display());
            }
        }
    }

    /// Flushes NVRAM to its backing file if dirty. Called by the host runner
    /// at shutdown, not by guest code.
    pub fn save_nvram(&mut self) {
        if !self.nvram_dirty {
            return;
        }
        if let Some(path) = &self.nvram_path {
            if let Err(e) = fs::write(path, &self.nvram) {
                tracing::warn!("failed to save NVRAM to {path}: {e}");
                return;
            }
        }
        self.nvram_dirty = false;
    }

    /// Takes and clears a pending power-off request, if one landed since the
    /// last call. The host runner treats this as the simulation's exit code.
    pub fn take_exit_code(&mut self) -> Option<u32> {
        self.exit_code.take()
    }

    /// Reads `len` bytes at platform-board-relative `offset`. `cpu_id`
    /// selects whose LSIC window `0x30000..0x30100` resolves to.
    ///
    /// # Errors
    ///
    /// Returns `BusError` for any offset/width this board does not claim.
    pub fn read(&mut self, offset: u32, len: u8, cpu_id: usize, lsics: &mut [Lsic]) -> Result<u32, BusError> {
        match offset {
            CITRON_BASE..=CITRON_LAST => {
                let idx = ((offset - CITRON_BASE) / 4) as usize;
                Ok(self.citron_ports.get(idx).copied().unwrap_or(0))
            }
            PLATFORM_REG_BASE..=PLATFORM_REG_LAST => {
                if offset == PLATFORM_REG_BASE {
                    Ok(PLATFORM_VERSION)
                } else {
                    Ok(0)
                }
            }
            NVRAM_BASE..=NVRAM_LAST => read_bytes(&self.nvram, offset - NVRAM_BASE, len),
            DISK_BUF_BASE..=DISK_BUF_LAST => read_bytes(&self.disk_buffer, offset - DISK_BUF_BASE, len),
            LSIC_BASE..=LSIC_LAST => lsics
                .get_mut(cpu_id)
                .map_or(Ok(0), |l| l.read(offset - LSIC_BASE)),
            BOOTROM_BASE..=BOOTROM_LAST => read_bytes(&self.bootrom, offset - BOOTROM_BASE, len),
            _ => Err(BusError { addr: offset }),
        }
    }

    /// Writes `len` bytes of `val` at platform-board-relative `offset`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` for a write to the boot ROM, an out-of-range LSIC
    /// register, or an offset this board does not claim.
    pub fn write(
        &mut self,
        offset: u32,
        len: u8,
        val: u32,
        cpu_id: usize,
        lsics: &mut [Lsic],
    ) -> Result<Vec<usize>, BusError> {
        match offset {
            CITRON_BASE..=CITRON_LAST => {
                let idx = ((offset - CITRON_BASE) / 4) as usize;
                if let Some(slot) = self.citron_ports.get_mut(idx) {
                    *slot = val;
                }
                Ok(Vec::new())
            }
            POWER_CONTROL_OFFSET => {
                self.exit_code = Some(val & 0xFF);
                Ok(Vec::new())
            }
            PLATFORM_REG_BASE..=PLATFORM_REG_LAST => Ok(Vec::new()),
            NVRAM_BASE..=NVRAM_LAST => {
                write_bytes(&mut self.nvram, offset - NVRAM_BASE, len, val)?;
                self.nvram_dirty = true;
                Ok(Vec::new())
            }
            DISK_BUF_BASE..=DISK_BUF_LAST => {
                write_bytes(&mut self.disk_buffer, offset - DISK_BUF_BASE, len, val)?;
                Ok(Vec::new())
            }
            LSIC_BASE..=LSIC_LAST => {
                let woke = lsics
                    .get_mut(cpu_id)
                    .map(|l| l.write(offset - LSIC_BASE, val))
                    .transpose()?
                    .unwrap_or(false);
                Ok(if woke { vec![cpu_id] } else { Vec::new() })
            }
            BOOTROM_BASE..=BOOTROM_LAST => Err(BusError { addr: offset }),
            RESET_MAGIC_ADDR => {
                if len == 4 && val == RESET_MAGIC {
                    self.reset_requested = true;
                    Ok(Vec::new())
                } else {
                    Err(BusError { addr: offset })
                }
            }
            _ => Err(BusError { addr: offset }),
        }
    }
}

fn read_bytes(buf: &[u8], offset: u32, len: u8) -> Result<u32, BusError> {
    let start = offset as usize;
    let end = start + len as usize;
    if end > buf.len() {
        return Err(BusError { addr: offset });
    }
    let mut bytes = [0u8; 4];
    bytes[..len as usize].copy_from_slice(&buf[start..end]);
    Ok(u32::from_le_bytes(bytes))
}

fn write_bytes(buf: &mut [u8], offset: u32, len: u8, val: u32) -> Result<(), BusError> {
    let start = offset as usize;
    let end = start + len as usize;
    if end > buf.len() {
        return Err(BusError { addr: offset });
    }
    let bytes = val.to_le_bytes();
    buf[start..end].copy_from_slice(&bytes[..len as usize]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> PBoard {
        PBoard::default()
    }

    #[test]
    fn reset_magic_sets_flag_only_on_exact_match() {
        let mut b = board();
        let mut lsics = [Lsic::new()];
        let _ = b.write(RESET_MAGIC_ADDR, 4, 0, 0, &mut lsics).unwrap_err();
        assert!(!b.reset_requested);
        let _ = b.write(RESET_MAGIC_ADDR, 4, RESET_MAGIC, 0, &mut lsics).unwrap();
        assert!(b.reset_requested);
    }

    #[test]
    fn power_control_write_latches_exit_code() {
        let mut b = board();
        let mut lsics = [Lsic::new()];
        assert_eq!(b.take_exit_code(), None);
        let _ = b.write(POWER_CONTROL_OFFSET, 4, 0x1234_0007, 0, &mut lsics).unwrap();
        assert_eq!(b.take_exit_code(), Some(7));
        assert_eq!(b.take_exit_code(), None);
    }

    #[test]
    fn nvram_write_then_read_round_trips() {
        let mut b = board();
        let mut lsics = [Lsic::new()];
        let _ = b.write(NVRAM_BASE, 4, 0xDEAD_BEEF, 0, &mut lsics).unwrap();
        assert_eq!(b.read(NVRAM_BASE, 4, 0, &mut lsics).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn bootrom_write_is_rejected() {
        let mut b = board();
        let mut lsics = [Lsic::new()];
        let _ = b.write(BOOTROM_BASE, 4, 0, 0, &mut lsics).unwrap_err();
    }

    #[test]
    fn unclaimed_offset_errors() {
        let mut b = board();
        let mut lsics = [Lsic::new()];
        let _ = b.read(0x0F00_0000, 4, 0, &mut lsics).unwrap_err();
    }
}
