//! Codegen Constants
//!
//! Register conventions the classifier relies on and the naming scheme shared
//! with the block functions produced by the translator.

// =============================================================================
// Link Registers
// =============================================================================

/// `ra`, the standard return-address register
pub const REG_RA: u32 = 1;

/// `t0`, the alternate link register used by millicode calls
pub const REG_T0: u32 = 5;

/// Registers whose use as `rd` marks a call and as `rs1` marks a return
pub const LINK_REGISTERS: [u32; 2] = [REG_RA, REG_T0];

// =============================================================================
// RV32 Encoding
// =============================================================================

pub const OPCODE_BRANCH: u32 = 0b110_0011;
pub const OPCODE_JALR: u32 = 0b110_0111;
pub const OPCODE_JAL: u32 = 0b110_1111;

/// Width of one uncompressed instruction; also the call/return-address step
pub const INSN_BYTES: u32 = 4;

// =============================================================================
// Naming
// =============================================================================

/// Block functions are named `block_0x{pc:08x}`
pub const BLOCK_NAME_PREFIX: &str = "block_0x";

#[inline]
pub fn is_link_register(reg: u32) -> bool {
    LINK_REGISTERS.contains(&reg)
}
