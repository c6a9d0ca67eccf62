//! Execution Context
//!
//! One virtual processor's view of the acceleration layer. Generated block
//! code receives `emu: &mut ExecContext` and calls the helpers below on
//! calls, returns and computed jumps. The store, registry and IBTC shard are
//! owned here and never shared with another context.

use crate::{
    config::AccelConfig,
    error::AccelError,
    ibtc::{Ibtc, IbtcUpdateControl},
    shack::ShadowStack,
    stats::AccelStats,
    types::{GuestAddr, HostAddr, NextStep, TranslatedBlock},
};

/// Number of guest general-purpose registers.
pub const NUM_REGISTERS: usize = 32;

pub struct ExecContext {
    /// 32 general-purpose registers (x0-x31)
    pub registers: [u32; NUM_REGISTERS],
    /// Program counter
    pub pc: GuestAddr,
    /// Shadow return-address stack
    pub shack: ShadowStack,
    /// This context's IBTC shard
    pub ibtc: Ibtc,
    /// Arms IBTC population after a miss
    pub ibtc_update: IbtcUpdateControl,
    pub(crate) blocks_executed: u64,
    pub(crate) dispatches: u64,
    pub(crate) translations: u64,
    pub(crate) stale_handles: u64,
}

impl ExecContext {
    /// Allocate the acceleration structures for a new context.
    pub fn new(config: &AccelConfig) -> Result<Self, AccelError> {
        config.validate()?;
        Ok(Self {
            registers: [0; NUM_REGISTERS],
            pc: 0,
            shack: ShadowStack::new(config)?,
            ibtc: Ibtc::new(config)?,
            ibtc_update: IbtcUpdateControl::new(config.enable_ibtc_update),
            blocks_executed: 0,
            dispatches: 0,
            translations: 0,
            stale_handles: 0,
        })
    }

    /// Same as [`ExecContext::new`] with the pc set to `entry`.
    pub fn with_entry(config: &AccelConfig, entry: GuestAddr) -> Result<Self, AccelError> {
        let mut ctx = Self::new(config)?;
        ctx.pc = entry;
        Ok(ctx)
    }

    // ========================================================================
    // Register Operations
    // ========================================================================

    #[inline(always)]
    pub fn read_reg(&self, reg: usize) -> u32 {
        self.registers[reg]
    }

    /// Write a register; writes to x0 are discarded.
    #[inline(always)]
    pub fn write_reg(&mut self, reg: usize, value: u32) {
        if reg != 0 {
            self.registers[reg] = value;
        }
    }

    // ========================================================================
    // Shadow Stack Helpers
    // ========================================================================

    /// Record a guest call returning to `return_addr`.
    #[inline(always)]
    pub fn shack_push(&mut self, return_addr: GuestAddr) {
        self.shack.push(return_addr);
    }

    /// Resolve a guest return to `target`: straight into translated code when
    /// the shadow stack predicts it, otherwise through the IBTC.
    #[inline(always)]
    pub fn shack_return(&mut self, target: GuestAddr) -> NextStep {
        match self.shack.pop(target) {
            Some(host) => NextStep::Host(host),
            None => NextStep::Host(self.lookup_ibtc(target)),
        }
    }

    /// Publish a fresh translation to the shadow-target registry.
    #[inline]
    pub fn set_shadow(&mut self, guest: GuestAddr, host: HostAddr) {
        self.shack.set_shadow(guest, host);
    }

    /// Drop all return predictions, e.g. when the guest switches stacks.
    pub fn flush_shadow_stack(&mut self) {
        self.shack.flush();
    }

    // ========================================================================
    // IBTC Helpers
    // ========================================================================

    /// Look up a computed jump target. Returns the block entry point, or the
    /// dispatcher stub after arming the update control.
    #[inline(always)]
    pub fn lookup_ibtc(&mut self, target: GuestAddr) -> HostAddr {
        let host = self.ibtc.lookup(target);
        if self.ibtc.is_dispatcher_stub(host) {
            self.ibtc_update.arm(target);
        }
        host
    }

    /// Computed jump helper for generated code.
    #[inline(always)]
    pub fn ibtc_jump(&mut self, target: GuestAddr) -> NextStep {
        NextStep::Host(self.lookup_ibtc(target))
    }

    /// Called by the dispatcher once `block` is known for a missed address.
    /// Populates the IBTC if the miss armed an update and updating is enabled.
    pub fn complete_ibtc_update(&mut self, block: &TranslatedBlock) -> bool {
        if self.ibtc_update.take(block.guest_pc) {
            self.ibtc.update(block.guest_pc, *block);
            true
        } else {
            if self.ibtc_update.take_suppressed(block.guest_pc) {
                self.ibtc.note_suppressed_update();
            }
            false
        }
    }

    /// Generated code jumped to a host handle that no longer names a block
    /// (its translation was flushed). Treat it as an IBTC miss on `target`
    /// so the dispatcher refreshes the cached pair.
    pub fn note_stale_target(&mut self, target: GuestAddr) {
        self.stale_handles += 1;
        self.ibtc_update.arm(target);
    }

    /// Suppress IBTC population (e.g. while single-stepping).
    pub fn set_ibtc_update(&mut self, enabled: bool) {
        self.ibtc_update.set_enabled(enabled);
    }

    #[inline(always)]
    pub fn is_dispatcher_stub(&self, host: HostAddr) -> bool {
        self.ibtc.is_dispatcher_stub(host)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn stats(&self) -> AccelStats {
        AccelStats {
            shack: *self.shack.stats(),
            ibtc: *self.ibtc.stats(),
            blocks_executed: self.blocks_executed,
            dispatches: self.dispatches,
            translations: self.translations,
            stale_handles: self.stale_handles,
        }
    }
}
