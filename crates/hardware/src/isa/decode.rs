//! Word-to-`CachedInstruction` decoding.
//!
//! Bit layout used throughout this decoder (fixed by this implementation,
//! since the architecture's own manual only fixes the low-order opcode
//! bits): bits 0-5 hold the opcode selector, bits 6-10 `rd`, bits 11-15 `ra`,
//! bits 16-31 a 16-bit immediate for the immediate-form instructions. The
//! register-register form (opcode 57) instead treats bits 16-20 as `rb`,
//! 21-22 as a shift kind, 23-27 as a shift amount, and 28-31 as a function
//! selector; opcodes 49 and 41 (the `SYS`-class and privileged instructions)
//! use the same 28-31 function field with `rd`/`ra` as their only operands.

use super::instruction::{CachedInstruction, Opcode, ShiftKind};

const OPCODE_MASK: u32 = 0x3F;
const LOW3_MASK: u32 = 0x07;

fn rd_of(word: u32) -> u8 {
    ((word >> 6) & 0x1F) as u8
}
fn ra_of(word: u32) -> u8 {
    ((word >> 11) & 0x1F) as u8
}
fn rb_of(word: u32) -> u8 {
    ((word >> 16) & 0x1F) as u8
}
/// The XR core zero-extends the 16-bit immediate field for every ALU and
/// memory-displacement use; only a couple of forms (`SltI`, `Jalr`) take the
/// sign-extended value instead, via [`imm16_sext_of`].
fn imm16_of(word: u32) -> i32 {
    (word >> 16) as i32
}

fn imm16_sext_of(word: u32) -> i32 {
    ((word >> 16) as i16) as i32
}
fn funct_of(word: u32) -> u32 {
    (word >> 28) & 0xF
}
fn shift_kind_of(word: u32) -> ShiftKind {
    match (word >> 21) & 0x3 {
        0 => ShiftKind::Left,
        1 => ShiftKind::RightLogical,
        2 => ShiftKind::RightArithmetic,
        _ => ShiftKind::RotateRight,
    }
}
fn shift_amount_of(word: u32) -> u8 {
    ((word >> 23) & 0x1F) as u8
}

fn jump_target(word: u32, pc: u32) -> i32 {
    let field = (word >> 3) & 0x1FFF_FFFF;
    let target = (field << 2) | (pc & 0x8000_0000);
    target as i32
}

fn branch_offset(word: u32) -> i32 {
    let raw = (word >> 11) & 0x1F_FFFF;
    let scaled = raw << 2;
    ((scaled << 9) as i32) >> 9
}

fn simple(op: Opcode, rd: u8, ra: u8, imm: i32, raw: u32) -> CachedInstruction {
    CachedInstruction {
        op,
        rd,
        ra,
        rb: 0,
        imm,
        shift: None,
        shift_amount: 0,
        raw,
    }
}

fn branch(op: Opcode, word: u32) -> CachedInstruction {
    simple(op, rd_of(word), 0, branch_offset(word), word)
}

fn register_alu(op: Opcode, word: u32) -> CachedInstruction {
    CachedInstruction {
        op,
        rd: rd_of(word),
        ra: ra_of(word),
        rb: rb_of(word),
        imm: 0,
        shift: Some(shift_kind_of(word)),
        shift_amount: shift_amount_of(word),
        raw: word,
    }
}

fn sys_class(word: u32) -> CachedInstruction {
    let op = match funct_of(word) {
        0 => Opcode::Sys,
        1 => Opcode::Brk,
        2 => Opcode::Wmb,
        3 => Opcode::Mb,
        4 => Opcode::Pause,
        5 => Opcode::Sc,
        6 => Opcode::Ll,
        7 => Opcode::Mod,
        8 => Opcode::DivS,
        9 => Opcode::Div,
        10 => Opcode::Mul,
        _ => return CachedInstruction::illegal(word),
    };
    simple(op, rd_of(word), ra_of(word), 0, word)
}

fn privileged_class(word: u32) -> CachedInstruction {
    let op = match funct_of(word) {
        0 => Opcode::Rfe,
        1 => Opcode::Hlt,
        2 => Opcode::Mtcr,
        3 => Opcode::Mfcr,
        _ => return CachedInstruction::illegal(word),
    };
    simple(op, rd_of(word), ra_of(word), 0, word)
}

/// Decodes one 32-bit little-endian instruction word. `pc` is the virtual
/// address it was fetched from, needed only to fold in the high bit of a
/// `J`/`JAL` absolute target (same 2 GiB half-space as the current PC).
#[must_use]
pub fn decode(word: u32, pc: u32) -> CachedInstruction {
    let low3 = word & LOW3_MASK;
    if low3 == 6 {
        return simple(Opcode::J, 0, 0, jump_target(word, pc), word);
    }
    if low3 == 7 {
        return simple(Opcode::Jal, 31, 0, jump_target(word, pc), word);
    }

    match word & OPCODE_MASK {
        4 => simple(Opcode::Lui, rd_of(word), ra_of(word), imm16_of(word) << 16, word),
        60 => simple(Opcode::AddI, rd_of(word), ra_of(word), imm16_of(word), word),
        52 => simple(Opcode::SubI, rd_of(word), ra_of(word), imm16_of(word), word),
        // Case 44 is the unsigned compare (zero-extended imm); case 36 is
        // the signed compare (sign-extended imm) — the reverse of what the
        // mnemonics suggest.
        44 => simple(Opcode::SltIU, rd_of(word), ra_of(word), imm16_of(word), word),
        36 => simple(Opcode::SltI, rd_of(word), ra_of(word), imm16_sext_of(word), word),
        28 => simple(Opcode::AndI, rd_of(word), ra_of(word), imm16_of(word), word),
        20 => simple(Opcode::XorI, rd_of(word), ra_of(word), imm16_of(word), word),
        12 => simple(Opcode::OrI, rd_of(word), ra_of(word), imm16_of(word), word),
        43 => simple(Opcode::LoadLong, rd_of(word), ra_of(word), imm16_of(word) * 4, word),
        51 => simple(Opcode::LoadInt, rd_of(word), ra_of(word), imm16_of(word) * 2, word),
        59 => simple(Opcode::LoadByte, rd_of(word), ra_of(word), imm16_of(word), word),
        42 => simple(Opcode::StoreLong, rd_of(word), ra_of(word), imm16_of(word) * 4, word),
        50 => simple(Opcode::StoreInt, rd_of(word), ra_of(word), imm16_of(word) * 2, word),
        58 => simple(Opcode::StoreByte, rd_of(word), ra_of(word), imm16_of(word), word),
        // rd is the base register and the displacement; ra carries the raw
        // 5-bit literal, sign-extended where it's actually used in `execute_one`.
        10 => simple(Opcode::StoreLongImm, rd_of(word), ra_of(word), imm16_of(word) * 4, word),
        18 => simple(Opcode::StoreIntImm, rd_of(word), ra_of(word), imm16_of(word) * 2, word),
        26 => simple(Opcode::StoreByteImm, rd_of(word), ra_of(word), imm16_of(word), word),
        56 => simple(Opcode::Jalr, rd_of(word), ra_of(word), imm16_sext_of(word) * 4, word),
        5 => branch(Opcode::Bpo, word),
        13 => branch(Opcode::Bpe, word),
        21 => branch(Opcode::Bge, word),
        29 => branch(Opcode::Ble, word),
        37 => branch(Opcode::Bgt, word),
        45 => branch(Opcode::Blt, word),
        53 => branch(Opcode::Bne, word),
        61 => branch(Opcode::Beq, word),
        57 => match funct_of(word) {
            0 => register_alu(Opcode::Nor, word),
            1 => register_alu(Opcode::Or, word),
            2 => register_alu(Opcode::Xor, word),
            3 => register_alu(Opcode::And, word),
            4 => register_alu(Opcode::SltSReg, word),
            5 => register_alu(Opcode::SltReg, word),
            6 => register_alu(Opcode::SubReg, word),
            7 => register_alu(Opcode::AddReg, word),
            _ => CachedInstruction::illegal(word),
        },
        49 => sys_class(word),
        41 => privileged_class(word),
        _ => CachedInstruction::illegal(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_addi() {
        let word = 60 | (3 << 6) | (4 << 11) | (7u32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::AddI);
        assert_eq!(ins.rd, 3);
        assert_eq!(ins.ra, 4);
        assert_eq!(ins.imm, 7);
    }

    #[test]
    fn immediate_forms_zero_extend_imm16() {
        let word = 60 | (0xFFFFu32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.imm, 0xFFFF);
    }

    #[test]
    fn slti_signed_sign_extends_its_imm() {
        let word = 36 | (0xFFFFu32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::SltI);
        assert_eq!(ins.imm, -1);
    }

    #[test]
    fn sltiu_zero_extends_its_imm() {
        let word = 44 | (0xFFFFu32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::SltIU);
        assert_eq!(ins.imm, 0xFFFF);
    }

    #[test]
    fn lui_carries_ra_for_the_caller_to_or_in() {
        let word = 4 | (3 << 6) | (9 << 11) | (0x1234u32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::Lui);
        assert_eq!(ins.rd, 3);
        assert_eq!(ins.ra, 9);
        assert_eq!(ins.imm, 0x1234_0000u32 as i32);
    }

    #[test]
    fn branch_offset_is_scaled_by_four() {
        let word = 61 | (1 << 11);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::Beq);
        assert_eq!(ins.imm, 4);
    }

    #[test]
    fn jalr_imm_is_sign_extended_and_scaled_by_four() {
        let word = 56 | (0xFFFFu32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::Jalr);
        assert_eq!(ins.imm, -4);
    }

    #[test]
    fn store_imm_keeps_raw_literal_in_ra_and_scaled_displacement_in_imm() {
        let word = 10 | (3 << 6) | (17 << 11) | (2u32 << 16);
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::StoreLongImm);
        assert_eq!(ins.rd, 3);
        assert_eq!(ins.ra, 17);
        assert_eq!(ins.imm, 8);
    }

    #[test]
    fn j_carries_pc_high_bit() {
        let word = 6 | (0x100u32 << 3);
        let ins = decode(word, 0x8000_0000);
        assert_eq!(ins.op, Opcode::J);
        assert_eq!(ins.imm, 0x8000_0400u32 as i32);
    }

    #[test]
    fn beq_rd_zero_is_canonical_unconditional_branch() {
        let word = 61;
        let ins = decode(word, 0);
        assert_eq!(ins.op, Opcode::Beq);
        assert_eq!(ins.rd, 0);
    }

    #[test]
    fn unknown_opcode_is_illegal() {
        let ins = decode(0, 0);
        assert_eq!(ins.op, Opcode::Illegal);
    }

    #[test]
    fn block_terminator_flags_match_spec_list() {
        assert!(Opcode::Beq.is_block_terminator());
        assert!(Opcode::J.is_block_terminator());
        assert!(!Opcode::AddI.is_block_terminator());
    }
}
