//! The CPU execution engine: translation, caches, Iblocks, exceptions, and
//! the processor that ties them together.

pub mod cache;
pub mod exception;
pub mod iblock;
pub mod mmu;
pub mod processor;

pub use mmu::Mmu;
pub use processor::Processor;
