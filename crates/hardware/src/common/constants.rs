//! Architectural and platform constants.
//!
//! Values named here are either fixed by the XR/17032 architecture (page
//! size, reserved TB entry count) or are defaults the `Config` tree may
//! override (cache geometry, Iblock capacity).

/// Bytes per page.
pub const PAGE_SIZE: u32 = 4096;
/// Bits to shift a physical/virtual address right to get a page number.
pub const PAGE_SHIFT: u32 = 12;
/// Mask selecting the page offset from a 32-bit address.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;
/// Mask selecting the VPN field once shifted into place.
pub const VPN_MASK: u32 = 0x000F_FFFF;

/// Maximum number of processors a system may contain.
pub const XR_PROC_MAX: usize = 8;

/// Default I-TB entry count.
pub const DEFAULT_ITB_SIZE: usize = 32;
/// Default D-TB entry count.
pub const DEFAULT_DTB_SIZE: usize = 64;
/// TB index at which non-reserved entries begin; indices below this are
/// never evicted by a "flush all but reserved" invalidation.
pub const TB_RESERVED_ENTRIES: usize = 4;
/// The ASID value used by canonical-invalid TB entries.
pub const TB_INVALID_ASID: u32 = 0xFFF;

/// Default D-cache size in bytes.
pub const DEFAULT_DCACHE_SIZE: usize = 16 * 1024;
/// Default D-cache associativity.
pub const DEFAULT_DCACHE_WAYS: usize = 2;
/// Default cache line size in bytes (shared by I-cache, D-cache, Scache).
pub const DEFAULT_LINE_BYTES: usize = 16;
/// Default I-cache size in bytes.
pub const DEFAULT_ICACHE_SIZE: usize = 16 * 1024;
/// Default I-cache associativity.
pub const DEFAULT_ICACHE_WAYS: usize = 2;
/// Default Scache size in bytes.
pub const DEFAULT_SCACHE_SIZE: usize = 256 * 1024;
/// Default Scache associativity.
pub const DEFAULT_SCACHE_WAYS: usize = 4;

/// Default write-buffer depth (entries) per processor.
pub const DEFAULT_WRITE_BUFFER_DEPTH: usize = 4;
/// Cycles a dirty write-buffer entry waits before an automatic drain.
pub const DEFAULT_WRITE_BUFFER_DRAIN_CYCLES: u64 = 64;
/// Stall cycles charged for an uncached bus access.
pub const UNCACHED_STALL_CYCLES: u64 = 16;

/// Maximum instruction slots in an Iblock, not counting the synthetic
/// linkage slot appended at construction time.
pub const IBLOCK_MAX_INSTRUCTIONS: usize = 32;
/// Number of hash buckets the per-processor Iblock cache uses.
pub const IBLOCK_HASH_BUCKETS: usize = 128;
/// Number of LRU-tail blocks reclaimed in one batch when the free list runs dry.
pub const IBLOCK_RECLAIM_BATCH: usize = 4;
/// Number of `*block` slots an Iblock remembers having been cached into.
pub const IBLOCK_BACKPOINTER_SLOTS: usize = 4;

/// Cycles the NMI mask holds after any exception entry.
pub const DEFAULT_NMI_MASK_CYCLES: u32 = 64;
/// Per-tick progress budget before a CPU is made to yield its timeslice.
pub const DEFAULT_PROGRESS_BUDGET: i32 = 100_000;
/// Number of PAUSE instructions tolerated before yielding the timeslice.
pub const PAUSE_YIELD_THRESHOLD: u32 = 64;

/// Program counter at reset.
pub const RESET_PC: u32 = 0xFFFE_1000;
/// Value that must be written to the reset-magic address to reset the system.
pub const RESET_MAGIC: u32 = 0xAABB_CCDD;
/// Addresses at or above this value are always treated as noncached.
pub const NONCACHED_THRESHOLD: u32 = 0xC000_0000;

/// Platform board branch index (top 5 address bits).
pub const PBOARD_BRANCH: u32 = 31;
/// Platform version register value.
pub const PLATFORM_VERSION: u32 = 0x0003_0001;
/// NVRAM size in bytes.
pub const NVRAM_SIZE: usize = 64 * 1024;
/// Boot ROM size in bytes.
pub const BOOTROM_SIZE: usize = 128 * 1024;
/// Disk controller block buffer size in bytes.
pub const DISK_BUFFER_SIZE: usize = 4096;
