//! Small, widely shared types: addresses, constants, access kinds, errors,
//! and the register file.

pub mod addr;
pub mod constants;
pub mod data;
pub mod error;
pub mod reg;

pub use addr::{PhysAddr, VirtAddr};
pub use constants::{PAGE_SHIFT, VPN_MASK};
pub use data::AccessType;
pub use error::{BusError, ExceptionCause, TranslationOutcome};
pub use reg::Gpr;
