//! System configuration.
//!
//! `Config` is deserializable from JSON so a run can be parameterized
//! without recompiling. Every field has a named default in the private
//! [`defaults`] module; `#[serde(default = "...")]` wires those defaults
//! into deserialization so a partial config document only needs to name the
//! fields it overrides.
//!
//! ```
//! use xr17032_core::config::Config;
//!
//! let cfg = Config::default();
//! assert_eq!(cfg.system.num_cpus, 1);
//! assert_eq!(cfg.memory.itb_size, 32);
//!
//! let json = r#"{"system": {"num_cpus": 4}}"#;
//! let cfg: Config = serde_json::from_str(json).unwrap();
//! assert_eq!(cfg.system.num_cpus, 4);
//! assert_eq!(cfg.memory.itb_size, 32, "unspecified fields keep their default");
//! ```

use serde::Deserialize;

use crate::common::constants;

mod defaults {
    use crate::common::constants;

    pub const fn trace_instructions() -> bool {
        false
    }
    pub const fn reset_pc() -> u32 {
        constants::RESET_PC
    }
    pub const fn nmi_mask_cycles() -> u32 {
        constants::DEFAULT_NMI_MASK_CYCLES
    }
    pub const fn num_cpus() -> usize {
        1
    }
    pub const fn ram_size() -> usize {
        128 * 1024 * 1024
    }
    pub const fn itb_size() -> usize {
        constants::DEFAULT_ITB_SIZE
    }
    pub const fn dtb_size() -> usize {
        constants::DEFAULT_DTB_SIZE
    }
    pub const fn write_buffer_depth() -> usize {
        constants::DEFAULT_WRITE_BUFFER_DEPTH
    }
    pub const fn write_buffer_drain_cycles() -> u64 {
        constants::DEFAULT_WRITE_BUFFER_DRAIN_CYCLES
    }
    pub const fn icache_size() -> usize {
        constants::DEFAULT_ICACHE_SIZE
    }
    pub const fn icache_ways() -> usize {
        constants::DEFAULT_ICACHE_WAYS
    }
    pub const fn dcache_size() -> usize {
        constants::DEFAULT_DCACHE_SIZE
    }
    pub const fn dcache_ways() -> usize {
        constants::DEFAULT_DCACHE_WAYS
    }
    pub const fn scache_size() -> usize {
        constants::DEFAULT_SCACHE_SIZE
    }
    pub const fn scache_ways() -> usize {
        constants::DEFAULT_SCACHE_WAYS
    }
    pub const fn line_bytes() -> usize {
        constants::DEFAULT_LINE_BYTES
    }
    pub const fn iblock_capacity() -> usize {
        constants::IBLOCK_MAX_INSTRUCTIONS
    }
    pub const fn iblock_hash_buckets() -> usize {
        constants::IBLOCK_HASH_BUCKETS
    }
    pub const fn iblock_reclaim_batch() -> usize {
        constants::IBLOCK_RECLAIM_BATCH
    }
    pub const fn scheduler_workers() -> usize {
        1
    }
    pub const fn progress_budget() -> i32 {
        constants::DEFAULT_PROGRESS_BUDGET
    }
}

/// Top-level configuration tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General/global run behavior.
    pub general: GeneralConfig,
    /// System topology (CPU count, RAM size).
    pub system: SystemConfig,
    /// TB and write-buffer sizing.
    pub memory: MemoryConfig,
    /// Cache hierarchy geometry.
    pub cache: CacheConfig,
    /// Iblock cache sizing.
    pub iblock: IblockConfig,
    /// Host scheduler thread pool sizing.
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            system: SystemConfig::default(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            iblock: IblockConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// General run-level behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Emit a trace line per retired instruction via `tracing`.
    #[serde(default = "defaults::trace_instructions")]
    pub trace_instructions: bool,
    /// Program counter every processor starts at.
    #[serde(default = "defaults::reset_pc")]
    pub reset_pc: u32,
    /// Cycles the NMI mask holds after any exception entry.
    #[serde(default = "defaults::nmi_mask_cycles")]
    pub nmi_mask_cycles: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            trace_instructions: defaults::trace_instructions(),
            reset_pc: defaults::reset_pc(),
            nmi_mask_cycles: defaults::nmi_mask_cycles(),
        }
    }
}

/// System topology.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Number of processors, 1..=8.
    #[serde(default = "defaults::num_cpus")]
    pub num_cpus: usize,
    /// Bytes of main RAM, mapped starting at branch 0.
    #[serde(default = "defaults::ram_size")]
    pub ram_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_cpus: defaults::num_cpus(),
            ram_size: defaults::ram_size(),
        }
    }
}

/// TB and write-buffer sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of I-TB entries.
    #[serde(default = "defaults::itb_size")]
    pub itb_size: usize,
    /// Number of D-TB entries.
    #[serde(default = "defaults::dtb_size")]
    pub dtb_size: usize,
    /// Per-processor write-buffer depth.
    #[serde(default = "defaults::write_buffer_depth")]
    pub write_buffer_depth: usize,
    /// Cycles before an idle dirty write-buffer entry auto-drains.
    #[serde(default = "defaults::write_buffer_drain_cycles")]
    pub write_buffer_drain_cycles: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            itb_size: defaults::itb_size(),
            dtb_size: defaults::dtb_size(),
            write_buffer_depth: defaults::write_buffer_depth(),
            write_buffer_drain_cycles: defaults::write_buffer_drain_cycles(),
        }
    }
}

/// One cache's geometry: total size, associativity, derived set count.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheGeometry {
    /// Total cache size in bytes.
    pub size_bytes: usize,
    /// Associativity (ways per set).
    pub ways: usize,
}

impl CacheGeometry {
    /// Number of sets, derived from size/ways/line width.
    #[must_use]
    pub const fn sets(&self, line_bytes: usize) -> usize {
        self.size_bytes / (self.ways * line_bytes)
    }
}

/// Cache hierarchy geometry: per-CPU I-cache and D-cache, plus the shared Scache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Line size shared by every level.
    #[serde(default = "defaults::line_bytes")]
    pub line_bytes: usize,
    /// Per-CPU instruction cache.
    pub icache: CacheGeometry,
    /// Per-CPU data cache.
    pub dcache: CacheGeometry,
    /// Shared coherence-directory second-level cache.
    pub scache: CacheGeometry,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            line_bytes: defaults::line_bytes(),
            icache: CacheGeometry {
                size_bytes: defaults::icache_size(),
                ways: defaults::icache_ways(),
            },
            dcache: CacheGeometry {
                size_bytes: defaults::dcache_size(),
                ways: defaults::dcache_ways(),
            },
            scache: CacheGeometry {
                size_bytes: defaults::scache_size(),
                ways: defaults::scache_ways(),
            },
        }
    }
}

/// Iblock cache sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IblockConfig {
    /// Maximum free-list capacity (total Iblocks a processor may hold).
    #[serde(default = "defaults::iblock_capacity")]
    pub capacity: usize,
    /// Hash bucket count for PC-keyed lookup.
    #[serde(default = "defaults::iblock_hash_buckets")]
    pub hash_buckets: usize,
    /// Number of LRU-tail blocks reclaimed per batch.
    #[serde(default = "defaults::iblock_reclaim_batch")]
    pub reclaim_batch: usize,
}

impl Default for IblockConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::iblock_capacity(),
            hash_buckets: defaults::iblock_hash_buckets(),
            reclaim_batch: defaults::iblock_reclaim_batch(),
        }
    }
}

/// Host scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of host worker threads (capped at `XR_PROC_MAX`).
    #[serde(default = "defaults::scheduler_workers")]
    pub workers: usize,
    /// Per-tick progress budget before a CPU yields its timeslice.
    #[serde(default = "defaults::progress_budget")]
    pub progress_budget: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::scheduler_workers(),
            progress_budget: defaults::progress_budget(),
        }
    }
}

impl Config {
    /// Validates cross-field invariants not expressible through serde
    /// defaults alone (CPU count bound, nonzero cache geometry).
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.system.num_cpus == 0 || self.system.num_cpus > constants::XR_PROC_MAX {
            return Err(format!(
                "num_cpus must be in 1..={}, got {}",
                constants::XR_PROC_MAX,
                self.system.num_cpus
            ));
        }
        if self.cache.dcache.ways == 0 || self.cache.icache.ways == 0 || self.cache.scache.ways == 0
        {
            return Err("cache associativity must be nonzero".to_string());
        }
        if self.memory.write_buffer_depth == 0 {
            return Err("write_buffer_depth must be nonzero".to_string());
        }
        Ok(())
    }
}
