//! Aggregate run statistics: per-cycle and per-event counters the host
//! runner prints on a clean shutdown or a fatal trap.
//!
//! Counters are plain `pub` fields rather than private-with-accessors,
//! since every caller (the dispatch loop, the cache hierarchy, the CLI) is
//! inside this crate and the struct's whole purpose is to be summed into.

use std::time::Instant;

use crate::common::error::ExceptionCause;

const EXCEPTION_CAUSE_COUNT: usize = 13;

/// Section names accepted by [`SimStats::print_sections`].
pub const STATS_SECTIONS: &[&str] = &["summary", "core", "memory", "exceptions"];

/// Accumulated counters for one simulation run, summed across every CPU.
#[derive(Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Cycle budget consumed across every processor's timeslices. An upper
    /// bound on cycles actually retired, since a timeslice that halts or
    /// yields early still counts its full budget here; see `DESIGN.md`.
    pub cycles: u64,
    /// Total instructions retired across every processor.
    pub instructions_retired: u64,
    /// Iblocks decoded (cache-miss path) versus found resident.
    pub iblocks_built: u64,
    pub iblock_hits: u64,
    /// LRU-tail batches reclaimed to free Iblock arena slots.
    pub iblock_reclaims: u64,
    /// I-TB and D-TB miss counts (before the refill handler runs).
    pub itb_misses: u64,
    pub dtb_misses: u64,
    /// Shared-cache outcomes for D-cache fills.
    pub scache_hits: u64,
    pub scache_misses: u64,
    /// Sharer invalidations issued to satisfy exclusive-ownership requests.
    pub scache_invalidations: u64,
    /// Write-buffer entries drained, and cycles stalled waiting for a slot.
    pub write_buffer_drains: u64,
    pub write_buffer_stall_cycles: u64,
    /// Interrupts actually delivered (sampled pending and taken).
    pub interrupts_taken: u64,
    /// Exceptions raised, indexed by [`ExceptionCause::code`].
    pub exceptions_by_cause: [u64; EXCEPTION_CAUSE_COUNT],
    pub ll_sc_successes: u64,
    pub ll_sc_failures: u64,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            instructions_retired: 0,
            iblocks_built: 0,
            iblock_hits: 0,
            iblock_reclaims: 0,
            itb_misses: 0,
            dtb_misses: 0,
            scache_hits: 0,
            scache_misses: 0,
            scache_invalidations: 0,
            write_buffer_drains: 0,
            write_buffer_stall_cycles: 0,
            interrupts_taken: 0,
            exceptions_by_cause: [0; EXCEPTION_CAUSE_COUNT],
            ll_sc_successes: 0,
            ll_sc_failures: 0,
        }
    }
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl SimStats {
    /// Builds a snapshot with only the cycle and instruction counters set;
    /// used by [`crate::sim::Simulator::stats`], which tracks those two
    /// live and leaves the rest at their default zero.
    #[must_use]
    pub fn with_counts(cycles: u64, instructions_retired: u64) -> Self {
        Self { cycles, instructions_retired, ..Self::default() }
    }

    /// Records one exception of `cause`.
    pub fn record_exception(&mut self, cause: ExceptionCause) {
        let idx = cause.code() as usize;
        if let Some(slot) = self.exceptions_by_cause.get_mut(idx) {
            *slot += 1;
        }
    }

    /// Prints every section in [`STATS_SECTIONS`], in order.
    pub fn print(&self) {
        self.print_sections(STATS_SECTIONS);
    }

    /// Prints only the named sections, skipping any name it doesn't
    /// recognize rather than erroring, so a typo in a CLI flag just omits
    /// output instead of aborting a run that already finished.
    pub fn print_sections(&self, sections: &[&str]) {
        for section in sections {
            match *section {
                "summary" => self.print_summary(),
                "core" => self.print_core(),
                "memory" => self.print_memory(),
                "exceptions" => self.print_exceptions(),
                _ => {}
            }
        }
    }

    fn print_summary(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        println!("--- summary ---");
        println!("wall time:       {elapsed:.3}s");
        println!("cycles:          {}", self.cycles);
        println!("instructions:    {}", self.instructions_retired);
        println!("MIPS:            {:.2}", self.instructions_retired as f64 / elapsed / 1e6);
    }

    fn print_core(&self) {
        println!("--- core ---");
        println!(
            "iblock hit rate: {:.1}% ({} hits, {} built)",
            pct(self.iblock_hits, self.iblock_hits + self.iblocks_built),
            self.iblock_hits,
            self.iblocks_built
        );
        println!("iblock reclaims: {}", self.iblock_reclaims);
        println!("interrupts taken: {}", self.interrupts_taken);
        println!("LL/SC successes: {} failures: {}", self.ll_sc_successes, self.ll_sc_failures);
    }

    fn print_memory(&self) {
        println!("--- memory ---");
        println!("I-TB misses:     {}", self.itb_misses);
        println!("D-TB misses:     {}", self.dtb_misses);
        println!(
            "Scache hit rate: {:.1}% ({} hits, {} misses)",
            pct(self.scache_hits, self.scache_hits + self.scache_misses),
            self.scache_hits,
            self.scache_misses
        );
        println!("Scache invalidations: {}", self.scache_invalidations);
        println!(
            "write-buffer drains: {} (stalled {} cycles)",
            self.write_buffer_drains, self.write_buffer_stall_cycles
        );
    }

    fn print_exceptions(&self) {
        println!("--- exceptions ---");
        let total: u64 = self.exceptions_by_cause.iter().sum();
        for (code, count) in self.exceptions_by_cause.iter().enumerate() {
            if *count > 0 {
                println!("  cause {code:>2}: {count} ({:.1}%)", pct(*count, total));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_exception_indexes_by_cause_code() {
        let mut stats = SimStats::default();
        stats.record_exception(ExceptionCause::ItbMiss);
        stats.record_exception(ExceptionCause::ItbMiss);
        stats.record_exception(ExceptionCause::Syscall);
        assert_eq!(stats.exceptions_by_cause[ExceptionCause::ItbMiss.code() as usize], 2);
        assert_eq!(stats.exceptions_by_cause[ExceptionCause::Syscall.code() as usize], 1);
    }

    #[test]
    fn pct_of_zero_whole_is_zero_not_nan() {
        assert_eq!(pct(0, 0), 0.0);
    }

    #[test]
    fn default_counters_start_at_zero() {
        let stats = SimStats::default();
        assert_eq!(stats.cycles, 0);
        assert_eq!(stats.instructions_retired, 0);
    }
}
