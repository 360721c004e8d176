//! A flat RAM bank backing one memory-like bus branch.

use crate::common::error::BusError;
use crate::soc::traits::BusDevice;

/// A contiguous, zero-initialized block of RAM occupying one 128 MiB branch.
#[derive(Debug)]
pub struct RamBank {
    data: Vec<u8>,
}

impl RamBank {
    /// Allocates a bank of `size_bytes`, zero-filled.
    #[must_use]
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: vec![0u8; size_bytes],
        }
    }

    /// Raw byte length of this bank.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the bank has zero capacity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies `bytes` into the bank starting at `offset`, truncating at the
    /// bank's end. Used by the boot loader to place a flat image in RAM.
    pub fn load_at(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        if start >= self.data.len() {
            return;
        }
        let end = (start + bytes.len()).min(self.data.len());
        let n = end - start;
        self.data[start..end].copy_from_slice(&bytes[..n]);
    }

    /// Direct read access for the cache hierarchy's line-fill path.
    #[must_use]
    pub fn read_line(&self, offset: u32, len: usize) -> &[u8] {
        let start = offset as usize;
        let end = (start + len).min(self.data.len());
        &self.data[start..end]
    }

    /// Direct write access for the cache hierarchy's writeback path.
    pub fn write_line(&mut self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        if start >= self.data.len() {
            return;
        }
        let end = (start + bytes.len()).min(self.data.len());
        let n = end - start;
        self.data[start..end].copy_from_slice(&bytes[..n]);
    }
}

impl BusDevice for RamBank {
    fn read(&mut self, offset: u32, len: u8) -> Result<u32, BusError> {
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.data.len() {
            return Err(BusError { addr: offset });
        }
        let mut buf = [0u8; 4];
        buf[..len as usize].copy_from_slice(&self.data[start..end]);
        Ok(u32::from_le_bytes(buf))
    }

    fn write(&mut self, offset: u32, len: u8, val: u32) -> Result<(), BusError> {
        let start = offset as usize;
        let end = start + len as usize;
        if end > self.data.len() {
            return Err(BusError { addr: offset });
        }
        let bytes = val.to_le_bytes();
        self.data[start..end].copy_from_slice(&bytes[..len as usize]);
        Ok(())
    }

    fn reset(&mut self) {
        self.data.fill(0);
    }
}
