//! A minimal textual disassembler, used by trace logging and diagnostics.

use super::instruction::{CachedInstruction, Opcode};

/// Sign-extends the 5-bit literal the immediate-store forms carry in `ra`.
fn sign_ext5(v: u8) -> i32 {
    (i32::from(v) << 27) >> 27
}

/// Renders `ins` as a short mnemonic line, e.g. `"addi r3, r4, 7"`.
#[must_use]
pub fn format(ins: &CachedInstruction) -> String {
    match ins.op {
        Opcode::Lui => format!("lui r{}, r{}, {:#x}", ins.rd, ins.ra, ins.imm),
        Opcode::AddI => format!("addi r{}, r{}, {}", ins.rd, ins.ra, ins.imm),
        Opcode::SubI => format!("subi r{}, r{}, {}", ins.rd, ins.ra, ins.imm),
        Opcode::SltI => format!("slti r{}, r{}, {}", ins.rd, ins.ra, ins.imm),
        Opcode::SltIU => format!("sltiu r{}, r{}, {}", ins.rd, ins.ra, ins.imm),
        Opcode::AndI => format!("andi r{}, r{}, {:#x}", ins.rd, ins.ra, ins.imm),
        Opcode::XorI => format!("xori r{}, r{}, {:#x}", ins.rd, ins.ra, ins.imm),
        Opcode::OrI => format!("ori r{}, r{}, {:#x}", ins.rd, ins.ra, ins.imm),
        Opcode::LoadLong => format!("mov.l r{}, [r{}+{}]", ins.rd, ins.ra, ins.imm),
        Opcode::LoadInt => format!("mov.i r{}, [r{}+{}]", ins.rd, ins.ra, ins.imm),
        Opcode::LoadByte => format!("mov.b r{}, [r{}+{}]", ins.rd, ins.ra, ins.imm),
        Opcode::StoreLong => format!("mov.l [r{}+{}], r{}", ins.rd, ins.imm, ins.ra),
        Opcode::StoreInt => format!("mov.i [r{}+{}], r{}", ins.rd, ins.imm, ins.ra),
        Opcode::StoreByte => format!("mov.b [r{}+{}], r{}", ins.rd, ins.imm, ins.ra),
        Opcode::StoreLongImm => format!("mov.l [r{}+{}], {}", ins.rd, ins.imm, sign_ext5(ins.ra)),
        Opcode::StoreIntImm => format!("mov.i [r{}+{}], {}", ins.rd, ins.imm, sign_ext5(ins.ra)),
        Opcode::StoreByteImm => format!("mov.b [r{}+{}], {}", ins.rd, ins.imm, sign_ext5(ins.ra)),
        Opcode::Jalr => format!("jalr r{}, r{}, {}", ins.rd, ins.ra, ins.imm),
        Opcode::Bpo => format!("bpo r{}, {:+}", ins.rd, ins.imm),
        Opcode::Bpe => format!("bpe r{}, {:+}", ins.rd, ins.imm),
        Opcode::Bge => format!("bge r{}, {:+}", ins.rd, ins.imm),
        Opcode::Ble => format!("ble r{}, {:+}", ins.rd, ins.imm),
        Opcode::Bgt => format!("bgt r{}, {:+}", ins.rd, ins.imm),
        Opcode::Blt => format!("blt r{}, {:+}", ins.rd, ins.imm),
        Opcode::Bne => format!("bne r{}, {:+}", ins.rd, ins.imm),
        Opcode::Beq if ins.rd == 0 => format!("b {:+}", ins.imm),
        Opcode::Beq => format!("beq r{}, {:+}", ins.rd, ins.imm),
        Opcode::J => format!("j {:#010x}", ins.imm as u32),
        Opcode::Jal => format!("jal {:#010x}", ins.imm as u32),
        Opcode::Nor => format!("nor r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Or => format!("or r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Xor => format!("xor r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::And => format!("and r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::SltSReg => format!("slt.s r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::SltReg => format!("slt r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::SubReg => format!("sub r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::AddReg => format!("add r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Sys => "sys".to_string(),
        Opcode::Brk => "brk".to_string(),
        Opcode::Wmb => "wmb".to_string(),
        Opcode::Mb => "mb".to_string(),
        Opcode::Pause => "pause".to_string(),
        Opcode::Sc => format!("sc r{}, [r{}]", ins.rd, ins.ra),
        Opcode::Ll => format!("ll r{}, [r{}]", ins.rd, ins.ra),
        Opcode::Mod => format!("mod r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::DivS => format!("div.s r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Div => format!("div r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Mul => format!("mul r{}, r{}, r{}", ins.rd, ins.ra, ins.rb),
        Opcode::Rfe => "rfe".to_string(),
        Opcode::Hlt => "hlt".to_string(),
        Opcode::Mtcr => format!("mtcr cr{}, r{}", ins.rd, ins.ra),
        Opcode::Mfcr => format!("mfcr r{}, cr{}", ins.rd, ins.ra),
        Opcode::Illegal => format!("illegal {:#010x}", ins.raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::decode::decode;

    #[test]
    fn formats_addi() {
        let ins = decode(60 | (3 << 6) | (4 << 11) | (7u32 << 16), 0);
        assert_eq!(format(&ins), "addi r3, r4, 7");
    }

    #[test]
    fn beq_zero_formats_as_unconditional_branch() {
        let ins = decode(61, 0);
        assert_eq!(format(&ins), "b +0");
    }

    #[test]
    fn formats_lui_with_ra() {
        let ins = decode(4 | (3 << 6) | (5 << 11) | (0x1234u32 << 16), 0);
        assert_eq!(format(&ins), "lui r3, r5, 0x12340000");
    }

    #[test]
    fn formats_store_long_imm_with_displacement_and_sign_extended_literal() {
        let ins = decode(10 | (3 << 6) | (0x1F << 11) | (1u32 << 16), 0);
        assert_eq!(format(&ins), "mov.l [r3+4], -1");
    }
}
