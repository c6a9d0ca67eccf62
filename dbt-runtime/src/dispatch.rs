//! Reference Dispatcher and Code Cache
//!
//! The dispatcher loop runs translated blocks and falls back to translation
//! on a miss. Production translators bring their own; this one exists so the
//! shadow stack and IBTC can be driven end to end:
//!
//! - a resolved block is published to the context's shadow-target registry
//!   with [`ExecContext::set_shadow`], resolving every pending return slot
//! - a block resolved after an IBTC miss is written back to the IBTC when the
//!   context's update control was armed
//!
//! Host handles are never reused, so a handle that outlived a flush can only
//! miss the code cache. The dispatcher treats such a jump as a miss on the
//! guest pc the block set before jumping.

use crate::{
    constants::{DEFAULT_MAX_STEPS, FIRST_HOST_HANDLE, HOST_HANDLE_STRIDE},
    context::ExecContext,
    error::DispatchError,
    types::{BlockFn, GuestAddr, HostAddr, NextStep, TranslatedBlock},
};
use hashbrown::HashMap;
use log::debug;

/// Lookup interface the acceleration layer consumes from the translator.
pub trait BlockLookup {
    /// Entry point of the translation of `guest`, or a stub that drives
    /// translation when jumped to.
    fn resolve_or_stub(&self, guest: GuestAddr) -> HostAddr;

    /// Descriptor of the translation of `guest`, if one exists.
    fn translated_block_for(&self, guest: GuestAddr) -> Option<TranslatedBlock>;
}

/// Output of a translator for one guest pc.
#[derive(Debug, Clone, Copy)]
pub struct Translation {
    pub block_fn: BlockFn,
    pub insn_count: u32,
}

/// Produces block functions for guest addresses on demand.
pub trait Translator {
    fn translate(&mut self, guest_pc: GuestAddr) -> Option<Translation>;
}

impl<F> Translator for F
where
    F: FnMut(GuestAddr) -> Option<Translation>,
{
    fn translate(&mut self, guest_pc: GuestAddr) -> Option<Translation> {
        self(guest_pc)
    }
}

/// Translated blocks keyed both by guest pc and by host handle.
pub struct CodeCache {
    by_guest: HashMap<GuestAddr, TranslatedBlock>,
    by_host: HashMap<HostAddr, (BlockFn, TranslatedBlock)>,
    /// `None` once the handle space is used up
    next_handle: Option<HostAddr>,
    dispatcher_stub: HostAddr,
}

impl CodeCache {
    pub fn new(dispatcher_stub: HostAddr) -> Self {
        Self {
            by_guest: HashMap::new(),
            by_host: HashMap::new(),
            next_handle: Some(FIRST_HOST_HANDLE),
            dispatcher_stub,
        }
    }

    /// Install a block for `guest_pc`, replacing any previous translation.
    pub fn insert(
        &mut self,
        guest_pc: GuestAddr,
        block_fn: BlockFn,
        insn_count: u32,
    ) -> Result<TranslatedBlock, DispatchError> {
        let host_entry = self.allocate_handle()?;
        if let Some(old) = self.by_guest.get(&guest_pc) {
            self.by_host.remove(&old.host_entry);
        }
        let block = TranslatedBlock::new(guest_pc, host_entry, insn_count);
        self.by_guest.insert(guest_pc, block);
        self.by_host.insert(host_entry, (block_fn, block));
        Ok(block)
    }

    /// Next unused handle. Handles are not recycled, not even across flushes.
    fn allocate_handle(&mut self) -> Result<HostAddr, DispatchError> {
        loop {
            let handle = self
                .next_handle
                .ok_or(DispatchError::HostHandlesExhausted)?;
            self.next_handle = handle.checked_add(HOST_HANDLE_STRIDE);
            if handle != self.dispatcher_stub {
                return Ok(handle);
            }
        }
    }

    /// Block function and descriptor installed at `host`.
    #[inline]
    pub fn block_at(&self, host: HostAddr) -> Option<(BlockFn, TranslatedBlock)> {
        self.by_host.get(&host).copied()
    }

    /// Discard every translation.
    pub fn flush(&mut self) {
        self.by_guest.clear();
        self.by_host.clear();
    }

    pub fn len(&self) -> usize {
        self.by_guest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_guest.is_empty()
    }
}

impl BlockLookup for CodeCache {
    fn resolve_or_stub(&self, guest: GuestAddr) -> HostAddr {
        self.by_guest
            .get(&guest)
            .map_or(self.dispatcher_stub, |block| block.host_entry)
    }

    fn translated_block_for(&self, guest: GuestAddr) -> Option<TranslatedBlock> {
        self.by_guest.get(&guest).copied()
    }
}

/// Runs translated blocks, translating on demand.
pub struct Dispatcher<T: Translator> {
    cache: CodeCache,
    translator: T,
    max_steps: u64,
}

impl<T: Translator> Dispatcher<T> {
    /// `dispatcher_stub` must match the stub configured for the contexts run
    /// by this dispatcher.
    pub fn new(translator: T, dispatcher_stub: HostAddr) -> Self {
        Self {
            cache: CodeCache::new(dispatcher_stub),
            translator,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Bound the number of blocks a single [`Dispatcher::run`] may execute.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    /// Run from `ctx.pc` until a block halts. Returns the number of blocks run.
    pub fn run(&mut self, ctx: &mut ExecContext) -> Result<u64, DispatchError> {
        let _span = tracing::debug_span!("dispatch_run", entry = ctx.pc).entered();
        let mut next = NextStep::Dispatch(ctx.pc);
        let mut steps = 0u64;

        loop {
            let host = match next {
                NextStep::Halt => {
                    tracing::debug!(steps, pc = ctx.pc, "halted");
                    return Ok(steps);
                }
                NextStep::Dispatch(pc) => {
                    ctx.pc = pc;
                    self.dispatch(ctx, pc)?
                }
                NextStep::Host(host) if ctx.is_dispatcher_stub(host) => {
                    let pc = ctx.pc;
                    self.dispatch(ctx, pc)?
                }
                NextStep::Host(host) => host,
            };

            if steps >= self.max_steps {
                return Err(DispatchError::StepBudgetExhausted(self.max_steps));
            }
            let (block_fn, block) = match self.cache.block_at(host) {
                Some(entry) => entry,
                None => {
                    let pc = ctx.pc;
                    debug!("stale host handle {:#x} for {:#x}", host, pc);
                    ctx.note_stale_target(pc);
                    let host = self.dispatch(ctx, pc)?;
                    self.cache
                        .block_at(host)
                        .ok_or(DispatchError::UnknownHostAddr(host))?
                }
            };
            ctx.pc = block.guest_pc;
            next = block_fn(ctx).map_err(|message| DispatchError::Block {
                pc: block.guest_pc,
                message,
            })?;
            steps += 1;
            ctx.blocks_executed += 1;
        }
    }

    /// Slow path: find or translate the block for `pc`, publish it, and
    /// complete a pending IBTC update.
    fn dispatch(
        &mut self,
        ctx: &mut ExecContext,
        pc: GuestAddr,
    ) -> Result<HostAddr, DispatchError> {
        ctx.dispatches += 1;
        let host = self.cache.resolve_or_stub(pc);
        let block = if ctx.is_dispatcher_stub(host) {
            let translation = self
                .translator
                .translate(pc)
                .ok_or(DispatchError::Untranslatable(pc))?;
            let block = self
                .cache
                .insert(pc, translation.block_fn, translation.insn_count)?;
            debug!(
                "translated {:#x} -> host {:#x} ({} insns)",
                pc, block.host_entry, block.insn_count
            );
            ctx.translations += 1;
            block
        } else {
            self.cache
                .translated_block_for(pc)
                .ok_or(DispatchError::UnknownHostAddr(host))?
        };
        // Other contexts may have translated `pc` since this one last saw it.
        ctx.set_shadow(pc, block.host_entry);
        ctx.complete_ibtc_update(&block);
        Ok(block.host_entry)
    }

    /// Discard every translation and everything in `ctx` that points at one.
    ///
    /// Predictions held by other contexts are left in place. Their handles
    /// no longer resolve and are repaired on first use.
    pub fn flush_code_cache(&mut self, ctx: &mut ExecContext) {
        debug!("flushing code cache ({} blocks)", self.cache.len());
        self.cache.flush();
        ctx.ibtc.invalidate();
        ctx.shack.invalidate_all_shadows();
        ctx.shack.flush();
    }
}
