//! The 32-branch physical address bus.
//!
//! Branches 0-23 are "memory-like": a missing branch raises a bus error.
//! Branches 24-31 are "slot-like": a missing branch reads as zero and
//! silently drops writes. Branch 0 is always main RAM; branch 31 is always
//! the platform board.

use crate::common::addr::PhysAddr;
use crate::common::constants::PBOARD_BRANCH;
use crate::common::error::BusError;
use crate::soc::lsic::Lsic;
use crate::soc::pboard::PBoard;
use crate::soc::ram::RamBank;
use crate::soc::traits::BusDevice;

const NUM_BRANCHES: usize = 32;
const RAM_BRANCH: u32 = 0;

fn is_memory_like(branch: u32) -> bool {
    branch < 24
}

/// The system's address-decoded bus. Branch 0 (RAM) and branch 31 (the
/// platform board) are dedicated fields rather than generic branch slots,
/// since both need interfaces beyond the plain `BusDevice` contract (RAM
/// wants line-granular access for the cache hierarchy; the platform board
/// needs to know which CPU's LSIC window it is serving).
pub struct Bus {
    ram: RamBank,
    branches: [Option<Box<dyn BusDevice>>; NUM_BRANCHES],
    pboard: PBoard,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

impl Bus {
    /// Builds a bus with `ram_size` bytes of main RAM and an empty platform board.
    #[must_use]
    pub fn new(ram_size: usize) -> Self {
        Self {
            ram: RamBank::new(ram_size),
            branches: std::array::from_fn(|_| None),
            pboard: PBoard::default(),
        }
    }

    /// Installs a device at `branch` (1..=30), replacing whatever was there.
    pub fn install(&mut self, branch: u32, device: Box<dyn BusDevice>) {
        self.branches[branch as usize] = Some(device);
    }

    /// Mutable access to the platform board, for the loader and CLI.
    pub fn pboard_mut(&mut self) -> &mut PBoard {
        &mut self.pboard
    }

    /// Direct RAM access for the cache hierarchy's line fill/writeback path.
    pub fn ram_mut(&mut self) -> &mut RamBank {
        &mut self.ram
    }

    /// Reads `len` bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` when `addr` falls in a missing memory-like branch,
    /// or any present device rejects the access.
    pub fn read(&mut self, addr: PhysAddr, len: u8, cpu_id: usize, lsics: &mut [Lsic]) -> Result<u32, BusError> {
        let branch = addr.branch();
        let offset = addr.branch_offset();
        if branch == RAM_BRANCH {
            return self.ram.read(offset, len);
        }
        if branch == PBOARD_BRANCH {
            return self.pboard.read(offset, len, cpu_id, lsics);
        }
        match &mut self.branches[branch as usize] {
            Some(dev) => dev.read(offset, len),
            None if is_memory_like(branch) => Err(BusError { addr: addr.val() }),
            None => Ok(0),
        }
    }

    /// Writes `len` bytes of `val` at `addr`. Returns the indices of CPUs
    /// whose LSIC transitioned to pending as a side effect (only possible
    /// for branch-31 LSIC-window writes).
    ///
    /// # Errors
    ///
    /// Returns `BusError` when `addr` falls in a missing memory-like branch,
    /// or any present device rejects the access.
    pub fn write(
        &mut self,
        addr: PhysAddr,
        len: u8,
        val: u32,
        cpu_id: usize,
        lsics: &mut [Lsic],
    ) -> Result<Vec<usize>, BusError> {
        let branch = addr.branch();
        let offset = addr.branch_offset();
        if branch == RAM_BRANCH {
            return self.ram.write(offset, len, val).map(|()| Vec::new());
        }
        if branch == PBOARD_BRANCH {
            return self.pboard.write(offset, len, val, cpu_id, lsics);
        }
        match &mut self.branches[branch as usize] {
            Some(dev) => dev.write(offset, len, val).map(|()| Vec::new()),
            None if is_memory_like(branch) => Err(BusError { addr: addr.val() }),
            None => Ok(Vec::new()),
        }
    }

    /// Resets RAM, every present branch, and the platform board.
    pub fn reset(&mut self) {
        self.ram.reset();
        for dev in self.branches.iter_mut().flatten() {
            dev.reset();
        }
        self.pboard = PBoard::default();
    }
}
