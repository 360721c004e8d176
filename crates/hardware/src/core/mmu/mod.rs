//! Software-managed address translation: the I-TB and D-TB pair.
//!
//! A miss here never walks a page table in hardware — it raises a TB-miss
//! exception and lets software refill the TB via `MTCR` and `RFE`, as
//! described for `translate` below.

pub mod tlb;

use crate::common::addr::{PhysAddr, VirtAddr};
use crate::common::data::AccessType;
use crate::common::error::{ExceptionCause, TranslationOutcome};
use tlb::Tlb;

/// The pair of translation buffers a processor owns.
#[derive(Debug)]
pub struct Mmu {
    pub itb: Tlb,
    pub dtb: Tlb,
}

impl Mmu {
    /// Builds an MMU with the given I-TB/D-TB capacities.
    #[must_use]
    pub fn new(itb_size: usize, dtb_size: usize) -> Self {
        Self {
            itb: Tlb::new(itb_size),
            dtb: Tlb::new(dtb_size),
        }
    }

    /// Resolves `vaddr` for `access` under `asid`/`kernel_mode`.
    ///
    /// On a TB miss this returns a fault carrying [`ExceptionCause::ItbMiss`]
    /// or [`ExceptionCause::DtbMiss`]; the caller is responsible for saving
    /// `TBMISSADDR`/`TBPC` and vectoring before this function is called
    /// again to retry. On a present-but-forbidden entry this returns the
    /// appropriate page-fault cause instead.
    pub fn translate(&mut self, vaddr: VirtAddr, access: AccessType, asid: u32, kernel_mode: bool) -> TranslationOutcome {
        let vpn = vaddr.vpn();
        let tlb = if access.is_fetch() { &mut self.itb } else { &mut self.dtb };
        let Some(hit) = tlb.lookup(vpn, asid) else {
            let cause = if access.is_fetch() {
                ExceptionCause::ItbMiss
            } else {
                ExceptionCause::DtbMiss
            };
            return TranslationOutcome::fault(cause);
        };

        if hit.kernel && !kernel_mode {
            let cause = match access {
                AccessType::Fetch | AccessType::Read => ExceptionCause::PageFaultRead,
                AccessType::Write => ExceptionCause::PageFaultWrite,
            };
            return TranslationOutcome::fault(cause);
        }
        if access.is_write() && !hit.writable {
            return TranslationOutcome::fault(ExceptionCause::PageFaultWrite);
        }

        let paddr = PhysAddr::new((hit.pfn << crate::common::constants::PAGE_SHIFT) | vaddr.page_offset());
        TranslationOutcome::success(paddr.val(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlb::TbEntry;

    fn kernel_rw_entry(vpn: u32) -> TbEntry {
        TbEntry {
            asid: 1,
            vpn,
            pfn: vpn,
            global: false,
            noncached: false,
            kernel: true,
            writable: true,
            valid: true,
        }
    }

    #[test]
    fn miss_raises_dtb_miss_for_data_access() {
        let mut mmu = Mmu::new(32, 64);
        let outcome = mmu.translate(VirtAddr::new(0x1000_0000), AccessType::Read, 1, true);
        assert_eq!(outcome.fault, Some(ExceptionCause::DtbMiss));
    }

    #[test]
    fn miss_raises_itb_miss_for_fetch() {
        let mut mmu = Mmu::new(32, 64);
        let outcome = mmu.translate(VirtAddr::new(0x1000_0000), AccessType::Fetch, 1, true);
        assert_eq!(outcome.fault, Some(ExceptionCause::ItbMiss));
    }

    #[test]
    fn user_mode_faults_on_kernel_page() {
        let mut mmu = Mmu::new(32, 64);
        mmu.dtb.refill_at(4, kernel_rw_entry(0x10));
        let outcome = mmu.translate(VirtAddr::new(0x10000), AccessType::Read, 1, false);
        assert_eq!(outcome.fault, Some(ExceptionCause::PageFaultRead));
    }

    #[test]
    fn successful_translation_preserves_page_offset() {
        let mut mmu = Mmu::new(32, 64);
        mmu.dtb.refill_at(4, kernel_rw_entry(0x10));
        let outcome = mmu.translate(VirtAddr::new(0x10_0AB), AccessType::Read, 1, true);
        assert!(outcome.is_hit());
        assert_eq!(outcome.paddr, 0x10_0AB);
    }
}
