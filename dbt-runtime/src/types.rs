//! Core runtime types shared by generated code and the dispatcher

use crate::context::ExecContext;
use serde::{Deserialize, Serialize};

/// Instruction address in the guest (RV32) address space.
pub type GuestAddr = u32;

/// Entry point of translated host code, as a 32-bit code-cache handle.
pub type HostAddr = u32;

/// Control flow decision for translated code.
///
/// Represents where execution continues after a block has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Jump straight into translated code at this host address
    Host(HostAddr),
    /// Re-enter the dispatcher for this guest pc (lookup or translate)
    Dispatch(GuestAddr),
    /// Halt execution
    Halt,
}

/// Function pointer type for translated basic blocks.
pub type BlockFn = fn(&mut ExecContext) -> Result<NextStep, String>;

/// Descriptor of one translated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranslatedBlock {
    /// Guest pc the block was translated from
    pub guest_pc: GuestAddr,
    /// Executable entry point of the translation
    pub host_entry: HostAddr,
    /// Number of guest instructions covered
    pub insn_count: u32,
}

impl TranslatedBlock {
    pub const fn new(guest_pc: GuestAddr, host_entry: HostAddr, insn_count: u32) -> Self {
        Self {
            guest_pc,
            host_entry,
            insn_count,
        }
    }
}
