//! Small shared enums used across the translation and cache layers.

/// The kind of access being made to a virtual address, which determines
/// which TB (I or D) is consulted and which permission bit is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// Instruction fetch: consults the I-TB, checks no permission bit
    /// beyond Valid/Kernel (the architecture has no separate execute bit).
    Fetch,
    /// Data read: consults the D-TB, checks Valid/Kernel.
    Read,
    /// Data write: consults the D-TB, checks Valid/Kernel/Writable.
    Write,
}

impl AccessType {
    /// Returns `true` if this access must additionally pass the writable check.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// Returns `true` if this access consults the I-TB rather than the D-TB.
    #[must_use]
    pub const fn is_fetch(self) -> bool {
        matches!(self, Self::Fetch)
    }
}
