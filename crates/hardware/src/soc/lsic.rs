//! The per-CPU local interrupt controller.
//!
//! Each processor has its own `Lsic` instance; all of a system's LSICs live
//! in `System::lsics` so that `broadcast` can reach across processors to
//! implement interprocessor interrupts. Register offsets within the
//! platform board's LSIC window (see [`crate::soc::pboard`]):
//!
//! | offset | register |
//! |---|---|
//! | 0x00 | MASK0 (lines 0-31) |
//! | 0x04 | MASK1 (lines 32-63) |
//! | 0x08 | PENDING0 |
//! | 0x0C | PENDING1 |
//! | 0x10 | IPL |
//! | 0x14 | CLAIM / COMPLETE |

use crate::common::error::BusError;

/// One processor's local interrupt controller state.
#[derive(Debug, Default)]
pub struct Lsic {
    mask0: u32,
    mask1: u32,
    pending0: u32,
    pending1: u32,
    ipl: u32,
    low_ipl_mask: u32,
    high_ipl_mask: u32,
    /// Whether this LSIC belongs to a processor that actually exists.
    pub enabled: bool,
}

const LSIC_MASK0: u32 = 0x00;
const LSIC_MASK1: u32 = 0x04;
const LSIC_PENDING0: u32 = 0x08;
const LSIC_PENDING1: u32 = 0x0C;
const LSIC_IPL: u32 = 0x10;
const LSIC_CLAIM: u32 = 0x14;

impl Lsic {
    /// Builds an enabled LSIC with no lines masked in and nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    fn recompute_masks(&mut self) {
        // IPL 0 masks everything; IPL 63 admits everything. Lines < 32 are
        // gated by low_ipl_mask, lines >= 32 by high_ipl_mask — a real
        // implementation would split priority bands across both words, but
        // this controller treats IPL as a single global admit threshold.
        let admit = self.ipl > 0;
        self.low_ipl_mask = if admit { u32::MAX } else { 0 };
        self.high_ipl_mask = if self.ipl >= 63 { u32::MAX } else { self.low_ipl_mask };
    }

    /// Recomputes and returns whether an unmasked, admitted line is pending.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        let lo = (!self.mask0 & self.pending0 & self.low_ipl_mask) != 0;
        let hi = (!self.mask1 & self.pending1 & self.high_ipl_mask) != 0;
        lo || hi
    }

    /// Handles a register write. Returns `true` if `interrupt_pending()`
    /// transitioned from false to true as a result (the CPU should be woken).
    ///
    /// # Errors
    ///
    /// Returns `BusError` for an out-of-range `IPL` write or a bad offset.
    pub fn write(&mut self, offset: u32, val: u32) -> Result<bool, BusError> {
        let was_pending = self.interrupt_pending();
        match offset {
            LSIC_MASK0 => self.mask0 = val,
            LSIC_MASK1 => self.mask1 = val,
            LSIC_PENDING0 => {
                self.pending0 = if val == 0 { 0 } else { self.pending0 | (val & !1) };
            }
            LSIC_PENDING1 => {
                self.pending1 = if val == 0 { 0 } else { self.pending1 | val };
            }
            LSIC_IPL => {
                if val >= 64 {
                    return Err(BusError { addr: offset });
                }
                self.ipl = val;
                self.recompute_masks();
            }
            LSIC_CLAIM => {
                if val < 64 {
                    self.clear_line(val);
                }
            }
            _ => return Err(BusError { addr: offset }),
        }
        Ok(!was_pending && self.interrupt_pending())
    }

    /// Handles a register read.
    ///
    /// # Errors
    ///
    /// Returns `BusError` for an unmapped offset.
    pub fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        match offset {
            LSIC_MASK0 => Ok(self.mask0),
            LSIC_MASK1 => Ok(self.mask1),
            LSIC_PENDING0 => Ok(self.pending0),
            LSIC_PENDING1 => Ok(self.pending1),
            LSIC_IPL => Ok(self.ipl),
            LSIC_CLAIM => Ok(self.claim()),
            _ => Err(BusError { addr: offset }),
        }
    }

    fn claim(&mut self) -> u32 {
        for line in 0..64u32 {
            if self.line_admitted(line) {
                return line;
            }
        }
        0
    }

    fn line_admitted(&self, line: u32) -> bool {
        let (mask, pending, ipl_mask) = if line < 32 {
            (self.mask0, self.pending0, self.low_ipl_mask)
        } else {
            (self.mask1, self.pending1, self.high_ipl_mask)
        };
        let bit = 1u32 << (line % 32);
        (mask & bit) == 0 && (pending & bit) != 0 && (ipl_mask & bit) != 0
    }

    fn clear_line(&mut self, line: u32) {
        let bit = 1u32 << (line % 32);
        if line < 32 {
            self.pending0 &= !bit;
        } else {
            self.pending1 &= !bit;
        }
    }

    /// Asserts interrupt line `n` (OR'd into the pending bitmap). Bit 0 of
    /// `PENDING0` can never be asserted this way (reserved so interrupt 0
    /// is only ever cleared, never delivered, matching the write-path rule).
    /// Returns `true` if this transitioned `interrupt_pending()` to true.
    pub fn assert_line(&mut self, line: u32) -> bool {
        if !self.enabled {
            return false;
        }
        let was_pending = self.interrupt_pending();
        let bit = 1u32 << (line % 32);
        if line == 0 {
            return false;
        }
        if line < 32 {
            self.pending0 |= bit;
        } else {
            self.pending1 |= bit;
        }
        !was_pending && self.interrupt_pending()
    }
}

/// Broadcasts an assertion of interrupt line `n` to every enabled LSIC in
/// `lsics` except (optionally) `skip_cpu` — the documented exception for the
/// CPU that itself generates the RTC tick, which is not self-poked.
/// Returns the indices of CPUs whose `interrupt_pending()` transitioned to
/// true, so the scheduler can wake exactly those timeslices.
pub fn broadcast(lsics: &mut [Lsic], line: u32, skip_cpu: Option<usize>) -> Vec<usize> {
    let mut woken = Vec::new();
    for (i, lsic) in lsics.iter_mut().enumerate() {
        if Some(i) == skip_cpu {
            continue;
        }
        if lsic.assert_line(line) {
            woken.push(i);
        }
    }
    woken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipl_zero_masks_everything() {
        let mut l = Lsic::new();
        assert_eq!(l.write(LSIC_IPL, 0).unwrap(), false);
        assert_eq!(l.write(LSIC_MASK0, 0).unwrap(), false);
        assert!(!l.assert_line(5));
        assert!(!l.interrupt_pending());
    }

    #[test]
    fn ipl_63_admits_all_and_claim_clears() {
        let mut l = Lsic::new();
        let _ = l.write(LSIC_IPL, 63).unwrap();
        assert!(l.assert_line(47));
        assert!(l.interrupt_pending());
        let claimed = l.read(LSIC_CLAIM).unwrap();
        assert_eq!(claimed, 47);
        let _ = l.write(LSIC_CLAIM, 47).unwrap();
        assert!(!l.interrupt_pending());
    }

    #[test]
    fn ipl_out_of_range_is_bus_error() {
        let mut l = Lsic::new();
        assert!(l.write(LSIC_IPL, 64).is_err());
    }

    #[test]
    fn line_zero_never_asserts() {
        let mut l = Lsic::new();
        let _ = l.write(LSIC_IPL, 63).unwrap();
        assert!(!l.assert_line(0));
        assert!(!l.interrupt_pending());
    }

    #[test]
    fn broadcast_skips_self_and_reports_transitions() {
        let mut lsics = vec![Lsic::new(), Lsic::new(), Lsic::new()];
        for l in &mut lsics {
            let _ = l.write(LSIC_IPL, 63).unwrap();
        }
        let woken = broadcast(&mut lsics, 10, Some(0));
        assert_eq!(woken, vec![1, 2]);
        assert!(!lsics[0].interrupt_pending());
        assert!(lsics[1].interrupt_pending());
    }
}
