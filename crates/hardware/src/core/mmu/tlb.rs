//! A fully associative, software-managed translation buffer.
//!
//! Unlike a hash-indexed TLB with a hardware page-table walker, the XR/17032
//! TB is a flat array matched by linear scan on miss-refill and exact-match
//! on lookup; misses are vectored to software rather than walked in
//! hardware. Grounded in the historical reference implementation's
//! `XrLookupItb`/`XrLookupDtb`.

use crate::common::constants::TB_INVALID_ASID;

/// One TB entry: an ASID-tagged VPN mapped to a physical frame plus flags.
#[derive(Debug, Clone, Copy)]
pub struct TbEntry {
    pub asid: u32,
    pub vpn: u32,
    pub pfn: u32,
    pub global: bool,
    pub noncached: bool,
    pub kernel: bool,
    pub writable: bool,
    pub valid: bool,
}

impl TbEntry {
    const fn canonical_invalid() -> Self {
        Self {
            asid: TB_INVALID_ASID,
            vpn: 0,
            pfn: 0,
            global: false,
            noncached: false,
            kernel: false,
            writable: false,
            valid: false,
        }
    }

    fn matches(&self, vpn: u32, asid: u32) -> bool {
        self.valid && self.vpn == vpn && (self.global || self.asid == asid)
    }
}

/// The result of a successful TB match: the frame plus the permission bits
/// the caller must still check against the access being made.
#[derive(Debug, Clone, Copy)]
pub struct TbHit {
    pub pfn: u32,
    pub noncached: bool,
    pub kernel: bool,
    pub writable: bool,
}

/// A fully associative TB of `capacity` entries plus a one-entry
/// "last result" fast path, separately cached per caller (I or D each keep
/// their own `Tlb`).
#[derive(Debug)]
pub struct Tlb {
    entries: Vec<TbEntry>,
    next_refill_index: usize,
    last_result: Option<(u32, u32, TbHit)>,
}

impl Tlb {
    /// Builds a TB of `capacity` entries, all canonical-invalid.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![TbEntry::canonical_invalid(); capacity.max(4)],
            next_refill_index: crate::common::constants::TB_RESERVED_ENTRIES,
            last_result: None,
        }
    }

    /// Looks up `(vpn, asid)`, consulting the one-entry fast path first.
    pub fn lookup(&mut self, vpn: u32, asid: u32) -> Option<TbHit> {
        if let Some((lvpn, lasid, hit)) = self.last_result {
            if lvpn == vpn && lasid == asid {
                return Some(hit);
            }
        }
        for entry in &self.entries {
            if entry.matches(vpn, asid) {
                let hit = TbHit {
                    pfn: entry.pfn,
                    noncached: entry.noncached,
                    kernel: entry.kernel,
                    writable: entry.writable,
                };
                self.last_result = Some((vpn, asid, hit));
                return Some(hit);
            }
        }
        None
    }

    /// Refills the entry at `index` (wrapping into the non-reserved range),
    /// auto-incrementing the internal round-robin cursor. Used by `MTCR`
    /// writes to the PTE control register.
    pub fn refill_at(&mut self, index: usize, entry: TbEntry) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = entry;
        }
        self.invalidate_fast_path();
    }

    /// Returns and advances the round-robin refill index (wrapping back to
    /// the first non-reserved entry), matching `ITBINDEX`/`DTBINDEX`
    /// auto-increment semantics.
    pub fn next_refill_index(&mut self) -> usize {
        let idx = self.next_refill_index;
        self.next_refill_index += 1;
        if self.next_refill_index >= self.entries.len() {
            self.next_refill_index = crate::common::constants::TB_RESERVED_ENTRIES;
        }
        idx
    }

    fn invalidate_fast_path(&mut self) {
        self.last_result = None;
    }

    /// Invalidates the single entry whose VPN matches `vpn`, regardless of ASID.
    pub fn invalidate_one(&mut self, vpn: u32) {
        for entry in &mut self.entries {
            if entry.valid && entry.vpn == vpn {
                *entry = TbEntry::canonical_invalid();
            }
        }
        self.invalidate_fast_path();
    }

    /// Invalidates every non-reserved, non-global entry.
    pub fn invalidate_all_but_reserved(&mut self) {
        let reserved = crate::common::constants::TB_RESERVED_ENTRIES;
        for entry in self.entries.iter_mut().skip(reserved) {
            *entry = TbEntry::canonical_invalid();
        }
        self.invalidate_fast_path();
    }

    /// Invalidates every non-reserved entry except global ones.
    pub fn invalidate_all_but_reserved_and_global(&mut self) {
        let reserved = crate::common::constants::TB_RESERVED_ENTRIES;
        for entry in self.entries.iter_mut().skip(reserved) {
            if !entry.global {
                *entry = TbEntry::canonical_invalid();
            }
        }
        self.invalidate_fast_path();
    }

    /// Invalidates every entry, including reserved ones.
    pub fn invalidate_all(&mut self) {
        for entry in &mut self.entries {
            *entry = TbEntry::canonical_invalid();
        }
        self.invalidate_fast_path();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(vpn: u32, asid: u32) -> TbEntry {
        TbEntry {
            asid,
            vpn,
            pfn: vpn + 1,
            global: false,
            noncached: false,
            kernel: true,
            writable: true,
            valid: true,
        }
    }

    #[test]
    fn lookup_miss_on_empty_tlb() {
        let mut tlb = Tlb::new(32);
        assert!(tlb.lookup(0x1234, 0).is_none());
    }

    #[test]
    fn refill_then_lookup_hits() {
        let mut tlb = Tlb::new(32);
        tlb.refill_at(4, sample_entry(0x10, 3));
        let hit = tlb.lookup(0x10, 3).unwrap();
        assert_eq!(hit.pfn, 0x11);
    }

    #[test]
    fn asid_mismatch_misses_unless_global() {
        let mut tlb = Tlb::new(32);
        tlb.refill_at(4, sample_entry(0x10, 3));
        assert!(tlb.lookup(0x10, 4).is_none());

        let mut global_entry = sample_entry(0x20, 3);
        global_entry.global = true;
        tlb.refill_at(5, global_entry);
        assert!(tlb.lookup(0x20, 9).is_some());
    }

    #[test]
    fn invalidate_one_clears_matching_vpn_any_asid() {
        let mut tlb = Tlb::new(32);
        tlb.refill_at(4, sample_entry(0x10, 3));
        tlb.invalidate_one(0x10);
        assert!(tlb.lookup(0x10, 3).is_none());
    }

    #[test]
    fn invalidate_all_but_reserved_spares_low_indices() {
        let mut tlb = Tlb::new(32);
        tlb.refill_at(0, sample_entry(0x5, 1));
        tlb.refill_at(4, sample_entry(0x6, 1));
        tlb.invalidate_all_but_reserved();
        assert!(tlb.lookup(0x5, 1).is_some());
        assert!(tlb.lookup(0x6, 1).is_none());
    }

    #[test]
    fn refill_index_wraps_past_reserved_range() {
        let mut tlb = Tlb::new(6);
        let first = tlb.next_refill_index();
        assert_eq!(first, 4);
        let second = tlb.next_refill_index();
        assert_eq!(second, 5);
        let third = tlb.next_refill_index();
        assert_eq!(third, 4);
    }
}
