//! The device trait every bus branch implements.

use crate::common::error::BusError;

/// A component attached to one of the bus's 32 address branches.
///
/// `offset` is relative to the branch's 128 MiB window (the low 27 bits of
/// the physical address). `len` is the access width in bytes (1, 2, or 4).
/// Implementors never panic on a malformed access; they return `BusError`
/// instead, per the bus's "no panics on bad addresses" contract.
pub trait BusDevice: Send {
    /// Reads `len` bytes at `offset`, little-endian, zero-extended into a `u32`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if `offset`/`len` fall outside the device's range.
    fn read(&mut self, offset: u32, len: u8) -> Result<u32, BusError>;

    /// Writes the low `len` bytes of `val` at `offset`, little-endian.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if `offset`/`len` fall outside the device's range.
    fn write(&mut self, offset: u32, len: u8, val: u32) -> Result<(), BusError>;

    /// Restores the device to its power-on state. Default: no-op.
    fn reset(&mut self) {}
}
