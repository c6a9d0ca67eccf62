//! Control-Flow Fast-Path Emitter
//!
//! Produces the Rust statements that end a translated block on an
//! unconditional control transfer. The statements run against
//! `emu: &mut ExecContext` and finish with `return Ok(crate::NextStep::...)`,
//! the same shape as every other generated block tail.
//!
//! # Emitted Sequences
//!
//! - **Call**: write the link register, `emu.shack_push(return_addr)` (flush
//!   when full, otherwise store the packed entry and advance), then jump to
//!   the target
//! - **Return**: `emu.shack_return(target)`, which jumps straight into host
//!   code on a validated pop and falls back to the IBTC otherwise
//! - **Computed jump**: `emu.ibtc_jump(target)`, hit or dispatcher stub
//!
//! Disabled paths degrade to `crate::NextStep::Dispatch(target)`.

use crate::{
    classify::{classify, ControlTransfer},
    config::EmitConfig,
    constants::INSN_BYTES,
    types::Instruction,
};
use pico_dbt_runtime::BlockLookup;
use proc_macro2::TokenStream;
use quote::quote;

/// Emitted tail of a block ending in a control transfer.
#[derive(Debug, Clone)]
pub struct FastPath {
    pub kind: ControlTransfer,
    /// Statically known target, for direct transfers
    pub target: Option<u32>,
    pub code: TokenStream,
}

/// Emits inline fast paths for calls, returns and computed jumps.
///
/// # Example
///
/// ```ignore
/// let emitter = ControlFlowEmitter::new(EmitConfig::new());
/// let fast_path = emitter.emit(pc, &inst, &code_cache).unwrap();
/// ```
pub struct ControlFlowEmitter {
    config: EmitConfig,
}

impl ControlFlowEmitter {
    pub fn new(config: EmitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmitConfig {
        &self.config
    }

    /// Emit the fast path for `inst` at `pc`.
    ///
    /// `blocks` is consulted for direct targets that are already translated.
    /// Returns `None` when `inst` is not an unconditional control transfer.
    pub fn emit<L>(&self, pc: u32, inst: &Instruction, blocks: &L) -> Option<FastPath>
    where
        L: BlockLookup + ?Sized,
    {
        let kind = classify(inst)?;
        let (code, target) = match kind {
            ControlTransfer::Call => {
                let (code, target) = self.gen_call(pc, inst, blocks);
                (code, Some(target))
            }
            ControlTransfer::DirectJump => {
                let (code, target) = self.gen_direct_jump(pc, inst, blocks);
                (code, Some(target))
            }
            ControlTransfer::IndirectCall => (self.gen_indirect_call(pc, inst), None),
            ControlTransfer::Return => (self.gen_return(pc, inst), None),
            ControlTransfer::IndirectJump => (self.gen_indirect_jump(pc, inst), None),
        };
        log::trace!("emitted {} fast path at {:#x}", kind, pc);
        Some(FastPath { kind, target, code })
    }

    // --- Direct Transfers ---

    /// `jal ra, off`: link, push the return address, jump.
    fn gen_call<L>(&self, pc: u32, inst: &Instruction, blocks: &L) -> (TokenStream, u32)
    where
        L: BlockLookup + ?Sized,
    {
        let (rd, imm) = inst.j_type();
        let rd = rd as usize;
        let return_addr = pc.wrapping_add(INSN_BYTES);
        let target = pc.wrapping_add(imm);
        let push = self.gen_shadow_push(return_addr);
        let next_step = self.gen_direct_step(target, blocks);

        let code = quote! {
            emu.write_reg(#rd, #return_addr);
            #push
            emu.pc = #target;
            return Ok(#next_step);
        };
        (code, target)
    }

    /// `jal rd, off` without a link register.
    fn gen_direct_jump<L>(&self, pc: u32, inst: &Instruction, blocks: &L) -> (TokenStream, u32)
    where
        L: BlockLookup + ?Sized,
    {
        let (rd, imm) = inst.j_type();
        let target = pc.wrapping_add(imm);
        let link = gen_link(rd, pc.wrapping_add(INSN_BYTES));
        let next_step = self.gen_direct_step(target, blocks);

        let code = quote! {
            #link
            emu.pc = #target;
            return Ok(#next_step);
        };
        (code, target)
    }

    fn gen_direct_step<L>(&self, target: u32, blocks: &L) -> TokenStream
    where
        L: BlockLookup + ?Sized,
    {
        match blocks.translated_block_for(target) {
            Some(block) if self.config.allow_direct_jumps => {
                let host = block.host_entry;
                quote! { crate::NextStep::Host(#host) }
            }
            _ => quote! { crate::NextStep::Dispatch(#target) },
        }
    }

    // --- Indirect Transfers ---

    /// `jalr ra, off(rs1)`: link, push, then resolve the target like a
    /// computed jump.
    fn gen_indirect_call(&self, pc: u32, inst: &Instruction) -> TokenStream {
        let (rd, rs1, imm) = inst.i_type();
        let rd = rd as usize;
        let return_addr = pc.wrapping_add(INSN_BYTES);
        let target = gen_target(rs1, imm);
        let push = self.gen_shadow_push(return_addr);
        let resolve = self.gen_ibtc_step();

        quote! {
            #target
            emu.write_reg(#rd, #return_addr);
            #push
            emu.pc = target;
            return Ok(#resolve);
        }
    }

    /// `jalr x0, off(ra)`: pop and validate, then jump.
    fn gen_return(&self, pc: u32, inst: &Instruction) -> TokenStream {
        let (rd, rs1, imm) = inst.i_type();
        let target = gen_target(rs1, imm);
        let link = gen_link(rd, pc.wrapping_add(INSN_BYTES));

        let resolve = match (self.config.enable_shadow_stack, self.config.enable_ibtc) {
            (true, true) => quote! { return Ok(emu.shack_return(target)); },
            (true, false) => quote! {
                return Ok(match emu.shack.pop(target) {
                    Some(host) => crate::NextStep::Host(host),
                    None => crate::NextStep::Dispatch(target),
                });
            },
            (false, _) => {
                let step = self.gen_ibtc_step();
                quote! { return Ok(#step); }
            }
        };

        quote! {
            #target
            #link
            emu.pc = target;
            #resolve
        }
    }

    /// `jalr rd, off(rs1)` through a non-link register.
    fn gen_indirect_jump(&self, pc: u32, inst: &Instruction) -> TokenStream {
        let (rd, rs1, imm) = inst.i_type();
        let target = gen_target(rs1, imm);
        let link = gen_link(rd, pc.wrapping_add(INSN_BYTES));
        let resolve = self.gen_ibtc_step();

        quote! {
            #target
            #link
            emu.pc = target;
            return Ok(#resolve);
        }
    }

    // --- Helpers ---

    fn gen_shadow_push(&self, return_addr: u32) -> TokenStream {
        if self.config.enable_shadow_stack {
            quote! { emu.shack_push(#return_addr); }
        } else {
            TokenStream::new()
        }
    }

    /// Step for a computed `target` bound in scope.
    fn gen_ibtc_step(&self) -> TokenStream {
        if self.config.enable_ibtc {
            quote! { emu.ibtc_jump(target) }
        } else {
            quote! { crate::NextStep::Dispatch(target) }
        }
    }
}

/// Binds `target`; read before the link write since `rd` may equal `rs1`.
fn gen_target(rs1: u32, imm: u32) -> TokenStream {
    let rs1 = rs1 as usize;
    quote! {
        let target = emu.read_reg(#rs1).wrapping_add(#imm) & !1u32;
    }
}

fn gen_link(rd: u32, return_addr: u32) -> TokenStream {
    if rd == 0 {
        return TokenStream::new();
    }
    let rd = rd as usize;
    quote! { emu.write_reg(#rd, #return_addr); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REG_RA;
    use pico_dbt_runtime::{constants::DEFAULT_DISPATCHER_STUB, CodeCache};

    fn emit(config: EmitConfig, inst: Instruction) -> FastPath {
        let cache = CodeCache::new(DEFAULT_DISPATCHER_STUB);
        ControlFlowEmitter::new(config)
            .emit(0x100, &inst, &cache)
            .unwrap()
    }

    #[test]
    fn test_call_pushes_return_address() {
        let fast_path = emit(EmitConfig::new(), Instruction::jal(REG_RA, 0x100));
        assert_eq!(fast_path.kind, ControlTransfer::Call);
        assert_eq!(fast_path.target, Some(0x200));
        let code = fast_path.code.to_string();
        assert!(code.contains("shack_push (260u32)"));
        assert!(code.contains("Dispatch (512u32)"));
    }

    #[test]
    fn test_call_without_shadow_stack() {
        let config = EmitConfig::new().with_shadow_stack(false);
        let code = emit(config, Instruction::jal(REG_RA, 0x100)).code.to_string();
        assert!(!code.contains("shack_push"));
        assert!(code.contains("write_reg (1usize , 260u32)"));
    }

    #[test]
    fn test_return_degrades() {
        let ret = Instruction::jalr(0, REG_RA, 0);
        let code = emit(EmitConfig::new(), ret).code.to_string();
        assert!(code.contains("shack_return (target)"));

        let code = emit(EmitConfig::new().with_ibtc(false), ret).code.to_string();
        assert!(code.contains("shack . pop (target)"));
        assert!(!code.contains("ibtc_jump"));

        let code = emit(EmitConfig::new().with_shadow_stack(false), ret)
            .code
            .to_string();
        assert!(code.contains("ibtc_jump (target)"));

        let code = emit(EmitConfig::dispatch_only(), ret).code.to_string();
        assert!(code.contains("Dispatch (target)"));
        assert!(!code.contains("shack"));
    }

    #[test]
    fn test_not_a_control_transfer() {
        let cache = CodeCache::new(DEFAULT_DISPATCHER_STUB);
        let emitter = ControlFlowEmitter::new(EmitConfig::new());
        let branch = Instruction::decode(0xfeb5_18e3).unwrap();
        assert!(emitter.emit(0x100, &branch, &cache).is_none());
    }
}
