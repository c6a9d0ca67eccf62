//! Control-transfer classification
//!
//! RISC-V has no dedicated call or return instructions. Calls and returns are
//! recognized by the link-register hints of `JAL`/`JALR`:
//!
//! | instruction              | `rd` link | `rs1` link | class          |
//! |--------------------------|-----------|------------|----------------|
//! | `jal rd, off`            | yes       | -          | `Call`         |
//! | `jal rd, off`            | no        | -          | `DirectJump`   |
//! | `jalr rd, off(rs1)`      | yes       | any        | `IndirectCall` |
//! | `jalr rd, off(rs1)`      | no        | yes        | `Return`       |
//! | `jalr rd, off(rs1)`      | no        | no         | `IndirectJump` |
//!
//! Conditional branches are direct and not classified.

use crate::{
    constants::is_link_register,
    types::{Instruction, Opcode},
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlTransfer {
    /// Direct call: push a shadow entry, jump to a known target
    Call,
    /// Call through a register: push a shadow entry, resolve through the IBTC
    IndirectCall,
    /// Return through a link register: pop the shadow stack
    Return,
    /// Computed jump: resolve through the IBTC
    IndirectJump,
    /// Unconditional jump to a known target
    DirectJump,
}

impl ControlTransfer {
    /// Whether this transfer records a return address on the shadow stack.
    pub fn pushes_shadow_entry(self) -> bool {
        matches!(self, Self::Call | Self::IndirectCall)
    }

    /// Whether the target is only known at run time.
    pub fn is_indirect(self) -> bool {
        matches!(self, Self::IndirectCall | Self::Return | Self::IndirectJump)
    }
}

impl fmt::Display for ControlTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Call => "call",
            Self::IndirectCall => "indirect call",
            Self::Return => "return",
            Self::IndirectJump => "indirect jump",
            Self::DirectJump => "direct jump",
        };
        f.write_str(name)
    }
}

/// Classify `inst`; `None` if it is not an unconditional control transfer.
pub fn classify(inst: &Instruction) -> Option<ControlTransfer> {
    match inst.opcode {
        Opcode::JAL => {
            let (rd, _) = inst.j_type();
            Some(if is_link_register(rd) {
                ControlTransfer::Call
            } else {
                ControlTransfer::DirectJump
            })
        }
        Opcode::JALR => {
            let (rd, rs1, _) = inst.i_type();
            Some(if is_link_register(rd) {
                ControlTransfer::IndirectCall
            } else if is_link_register(rs1) {
                ControlTransfer::Return
            } else {
                ControlTransfer::IndirectJump
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{REG_RA, REG_T0};

    #[test]
    fn test_classify_jal() {
        assert_eq!(
            classify(&Instruction::jal(REG_RA, 0x100)),
            Some(ControlTransfer::Call)
        );
        assert_eq!(
            classify(&Instruction::jal(REG_T0, 0x100)),
            Some(ControlTransfer::Call)
        );
        assert_eq!(
            classify(&Instruction::jal(0, 0x100)),
            Some(ControlTransfer::DirectJump)
        );
        // Link into a scratch register is not a call.
        assert_eq!(
            classify(&Instruction::jal(10, 0x100)),
            Some(ControlTransfer::DirectJump)
        );
    }

    #[test]
    fn test_classify_jalr() {
        assert_eq!(
            classify(&Instruction::jalr(0, REG_RA, 0)),
            Some(ControlTransfer::Return)
        );
        assert_eq!(
            classify(&Instruction::jalr(0, REG_T0, 0)),
            Some(ControlTransfer::Return)
        );
        assert_eq!(
            classify(&Instruction::jalr(REG_RA, 15, 0)),
            Some(ControlTransfer::IndirectCall)
        );
        assert_eq!(
            classify(&Instruction::jalr(0, 6, 0)),
            Some(ControlTransfer::IndirectJump)
        );
    }

    #[test]
    fn test_branches_are_not_classified() {
        let beq = Instruction::new(Opcode::BEQ, 10, 11, 8, false, true);
        assert_eq!(classify(&beq), None);
    }
}
