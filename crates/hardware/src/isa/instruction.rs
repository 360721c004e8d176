//! The decoded form of one instruction word.
//!
//! Design Notes call out two ways to model a cached instruction's handler: a
//! tagged variant with a big dispatch switch, or a function-pointer/trait
//! object. This crate takes the enum route — `Opcode` plus a flat operand
//! record is cheap to copy into an Iblock slot and keeps `execute` a plain
//! match rather than an indirect call through a vtable.

/// A shift applied to a register-form ALU operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Left,
    RightLogical,
    RightArithmetic,
    RotateRight,
}

/// Every instruction the decoder can produce a handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Lui,
    AddI,
    SubI,
    SltI,
    SltIU,
    AndI,
    XorI,
    OrI,
    LoadLong,
    LoadInt,
    LoadByte,
    StoreLong,
    StoreInt,
    StoreByte,
    StoreLongImm,
    StoreIntImm,
    StoreByteImm,
    Jalr,
    Bpo,
    Bpe,
    Bge,
    Ble,
    Bgt,
    Blt,
    Bne,
    Beq,
    J,
    Jal,
    Nor,
    Or,
    Xor,
    And,
    SltSReg,
    SltReg,
    SubReg,
    AddReg,
    Sys,
    Brk,
    Wmb,
    Mb,
    Pause,
    Sc,
    Ll,
    Mod,
    DivS,
    Div,
    Mul,
    Rfe,
    Hlt,
    Mtcr,
    Mfcr,
    /// The decoder could not classify this word.
    Illegal,
}

impl Opcode {
    /// `true` for every handler that ends an Iblock (spec 4.4: conditional
    /// branches, J/JAL, JALR, the exceptional transfers, and illegal words).
    #[must_use]
    pub const fn is_block_terminator(self) -> bool {
        matches!(
            self,
            Self::Bpo
                | Self::Bpe
                | Self::Bge
                | Self::Ble
                | Self::Bgt
                | Self::Blt
                | Self::Bne
                | Self::Beq
                | Self::J
                | Self::Jal
                | Self::Jalr
                | Self::Hlt
                | Self::Rfe
                | Self::Sys
                | Self::Brk
                | Self::Illegal
        )
    }

    /// `true` for operations only permitted in kernel mode.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Rfe | Self::Hlt | Self::Mtcr | Self::Mfcr)
    }
}

/// A fully decoded instruction, cached verbatim inside an Iblock slot.
#[derive(Debug, Clone, Copy)]
pub struct CachedInstruction {
    pub op: Opcode,
    pub rd: u8,
    pub ra: u8,
    pub rb: u8,
    /// Sign-extended displacement, scaled literal, or absolute target,
    /// depending on `op`.
    pub imm: i32,
    pub shift: Option<ShiftKind>,
    pub shift_amount: u8,
    /// The raw word this was decoded from, kept for disassembly/tracing.
    pub raw: u32,
}

impl CachedInstruction {
    #[must_use]
    pub const fn illegal(raw: u32) -> Self {
        Self {
            op: Opcode::Illegal,
            rd: 0,
            ra: 0,
            rb: 0,
            imm: 0,
            shift: None,
            shift_amount: 0,
            raw,
        }
    }
}
