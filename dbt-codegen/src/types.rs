//! Minimal instruction model for control-flow code generation
//!
//! Only the RV32 control-transfer instructions are modeled. Everything else
//! decodes to `None` and is left to the regular block translator.

use crate::constants::{OPCODE_BRANCH, OPCODE_JAL, OPCODE_JALR};
use serde::{Deserialize, Serialize};

/// RISC-V control-transfer opcode
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Opcode {
    BEQ = 18,
    BNE = 19,
    BLT = 20,
    BGE = 21,
    BLTU = 22,
    BGEU = 23,
    JAL = 24,
    JALR = 25,
}

/// Decoded control-transfer instruction.
///
/// Operands follow the emulator's layout: `op_a` is `rd` (or `rs1` for
/// branches), immediates are stored sign-extended as `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op_a: u32,
    pub op_b: u32,
    pub op_c: u32,
    pub imm_b: bool,
    pub imm_c: bool,
}

impl Instruction {
    pub const fn new(
        opcode: Opcode,
        op_a: u32,
        op_b: u32,
        op_c: u32,
        imm_b: bool,
        imm_c: bool,
    ) -> Self {
        Self {
            opcode,
            op_a,
            op_b,
            op_c,
            imm_b,
            imm_c,
        }
    }

    /// `jal rd, imm`
    pub const fn jal(rd: u32, imm: u32) -> Self {
        Self::new(Opcode::JAL, rd, imm, 0, true, true)
    }

    /// `jalr rd, imm(rs1)`
    pub const fn jalr(rd: u32, rs1: u32, imm: u32) -> Self {
        Self::new(Opcode::JALR, rd, rs1, imm, false, true)
    }

    /// Decode an uncompressed RV32 instruction word.
    pub fn decode(word: u32) -> Option<Self> {
        let rd = (word >> 7) & 0x1f;
        let funct3 = (word >> 12) & 0x7;
        let rs1 = (word >> 15) & 0x1f;
        let rs2 = (word >> 20) & 0x1f;

        match word & 0x7f {
            OPCODE_JAL => {
                let imm = ((word >> 31) & 1) << 20
                    | ((word >> 21) & 0x3ff) << 1
                    | ((word >> 20) & 1) << 11
                    | ((word >> 12) & 0xff) << 12;
                Some(Self::jal(rd, sign_extend(imm, 21)))
            }
            OPCODE_JALR if funct3 == 0 => Some(Self::jalr(rd, rs1, ((word as i32) >> 20) as u32)),
            OPCODE_BRANCH => {
                let opcode = match funct3 {
                    0b000 => Opcode::BEQ,
                    0b001 => Opcode::BNE,
                    0b100 => Opcode::BLT,
                    0b101 => Opcode::BGE,
                    0b110 => Opcode::BLTU,
                    0b111 => Opcode::BGEU,
                    _ => return None,
                };
                let imm = ((word >> 31) & 1) << 12
                    | ((word >> 25) & 0x3f) << 5
                    | ((word >> 8) & 0xf) << 1
                    | ((word >> 7) & 1) << 11;
                Some(Self::new(opcode, rs1, rs2, sign_extend(imm, 13), false, true))
            }
            _ => None,
        }
    }

    /// Decode I-type instruction: (rd, rs1, imm)
    pub fn i_type(&self) -> (u32, u32, u32) {
        (self.op_a, self.op_b, self.op_c)
    }

    /// Decode B-type instruction: (rs1, rs2, imm)
    pub fn b_type(&self) -> (u32, u32, u32) {
        (self.op_a, self.op_b, self.op_c)
    }

    /// Decode J-type instruction: (rd, imm)
    pub fn j_type(&self) -> (u32, u32) {
        (self.op_a, self.op_b)
    }
}

fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    ((value << shift) as i32 >> shift) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_jal() {
        // jal ra, +0x100
        let inst = Instruction::decode(0x1000_00ef).unwrap();
        assert_eq!(inst.opcode, Opcode::JAL);
        assert_eq!(inst.j_type(), (1, 0x100));

        // j -8
        let inst = Instruction::decode(0xff9f_f06f).unwrap();
        assert_eq!(inst.j_type(), (0, (-8i32) as u32));
    }

    #[test]
    fn test_decode_jalr() {
        // ret
        assert_eq!(
            Instruction::decode(0x0000_8067),
            Some(Instruction::jalr(0, 1, 0))
        );
        // jalr ra, -4(a5)
        let inst = Instruction::decode(0xffc7_80e7).unwrap();
        assert_eq!(inst.i_type(), (1, 15, (-4i32) as u32));
    }

    #[test]
    fn test_decode_branch_and_other() {
        // bne a0, a1, -16
        let inst = Instruction::decode(0xfeb5_18e3).unwrap();
        assert_eq!(inst.opcode, Opcode::BNE);
        assert_eq!(inst.b_type(), (10, 11, (-16i32) as u32));

        // addi a0, a0, 1
        assert_eq!(Instruction::decode(0x0015_0513), None);
    }
}
