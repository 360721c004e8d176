//! Exception causes, bus errors, and the result type for address translation.
//!
//! `ExceptionCause` is hand-rolled rather than `thiserror`-derived, matching
//! the way a tightly packed architectural cause code (it doubles as the
//! ECAUSE field value, see [`ExceptionCause::code`]) is usually expressed:
//! the `Display` impl is simple enough that the derive macro buys nothing.

use std::fmt;

/// One of the architecturally defined exception causes. The discriminant
/// order matches the ECAUSE encoding (bits 28-31 of the mode/status register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCause {
    /// An external or interprocessor interrupt was taken.
    Interrupt,
    /// The `SYS` instruction executed.
    Syscall,
    /// A firmware-call trap.
    FirmwareCall,
    /// A bus access outside any present branch's memory-like window failed.
    BusError,
    /// A non-maskable interrupt was taken.
    Nmi,
    /// The `BRK` instruction executed.
    Breakpoint,
    /// The decoder could not assign a handler to the instruction word.
    InvalidInstruction,
    /// A privileged operation was attempted outside kernel mode.
    InvalidPrivilege,
    /// A memory access was not aligned to its operand size.
    Unaligned,
    /// A data read missed the D-TB and is invalid (not a miss needing refill).
    PageFaultRead,
    /// A data write missed the D-TB and is invalid, or hit a non-writable page.
    PageFaultWrite,
    /// An instruction fetch missed the I-TB; software must refill it.
    ItbMiss,
    /// A data access missed the D-TB; software must refill it.
    DtbMiss,
}

impl ExceptionCause {
    /// Returns the 4-bit ECAUSE encoding for this cause.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Interrupt => 0,
            Self::Syscall => 1,
            Self::FirmwareCall => 2,
            Self::BusError => 3,
            Self::Nmi => 4,
            Self::Breakpoint => 5,
            Self::InvalidInstruction => 6,
            Self::InvalidPrivilege => 7,
            Self::Unaligned => 8,
            Self::PageFaultRead => 9,
            Self::PageFaultWrite => 10,
            Self::ItbMiss => 11,
            Self::DtbMiss => 12,
        }
    }

    /// Returns `true` for the two TB-miss causes, which vector through the
    /// TB-miss entry point and set the TBMISS mode bit rather than taking
    /// the normal exception path.
    #[must_use]
    pub const fn is_tb_miss(self) -> bool {
        matches!(self, Self::ItbMiss | Self::DtbMiss)
    }
}

impl fmt::Display for ExceptionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "interrupt",
            Self::Syscall => "syscall",
            Self::FirmwareCall => "firmware-call",
            Self::BusError => "bus-error",
            Self::Nmi => "nmi",
            Self::Breakpoint => "breakpoint",
            Self::InvalidInstruction => "invalid-instruction",
            Self::InvalidPrivilege => "invalid-privilege",
            Self::Unaligned => "unaligned",
            Self::PageFaultRead => "page-fault-read",
            Self::PageFaultWrite => "page-fault-write",
            Self::ItbMiss => "itb-miss",
            Self::DtbMiss => "dtb-miss",
        };
        write!(f, "{name} (ecause={})", self.code())
    }
}

impl std::error::Error for ExceptionCause {}

/// A bus access outside any present branch, or a malformed access to a
/// present one (for example, a wrong-width write to the reset-magic register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError {
    /// The physical address that could not be serviced.
    pub addr: u32,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus error at {:#010x}", self.addr)
    }
}

impl std::error::Error for BusError {}

/// The outcome of resolving a virtual address through a TB/MMU lookup.
#[derive(Debug, Clone, Copy)]
pub struct TranslationOutcome {
    /// The resolved physical address. Meaningless when `fault` is `Some`.
    pub paddr: u32,
    /// Extra cycles the lookup itself cost (0 on a TB hit).
    pub cycles: u64,
    /// The exception to raise, if translation failed.
    pub fault: Option<ExceptionCause>,
}

impl TranslationOutcome {
    /// Builds a successful outcome.
    #[must_use]
    pub const fn success(paddr: u32, cycles: u64) -> Self {
        Self {
            paddr,
            cycles,
            fault: None,
        }
    }

    /// Builds a faulting outcome.
    #[must_use]
    pub const fn fault(cause: ExceptionCause) -> Self {
        Self {
            paddr: 0,
            cycles: 0,
            fault: Some(cause),
        }
    }

    /// Returns `true` if translation succeeded.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        self.fault.is_none()
    }
}
