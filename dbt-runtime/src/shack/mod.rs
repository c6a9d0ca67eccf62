//! Shadow Return-Address Stack
//!
//! Predicts guest returns by mirroring the guest's call discipline. Each call
//! pushes a packed `(return address, slot)` entry; each return pops one and
//! trusts it only if the guest half matches the real return address.
//!
//! # Components
//!
//! - [`ShackStore`]: fixed-size entry buffer with a cursor and end bound
//! - [`ShadowRegistry`]: guest address to host-code slot table; slots are
//!   created before their target is translated and filled in later by
//!   [`ShadowStack::set_shadow`]
//! - [`ShadowStack`]: the controller tying both together
//!
//! A prediction is best effort. Overflow flushes everything, a mismatch
//! discards the top entry, and an unresolved slot yields no prediction. None
//! of these is an error; the caller falls back to the dispatcher.

mod entry;
mod registry;
mod store;

pub use entry::{ShadowEntry, SlotHandle};
pub use registry::{Registered, ShadowRegistry};
pub use store::{ShackStore, StackLayout};

use crate::{
    config::AccelConfig,
    error::AccelError,
    stats::ShackStats,
    types::{GuestAddr, HostAddr},
};
use log::{debug, trace};

/// Shadow stack controller for one execution context.
pub struct ShadowStack {
    store: ShackStore,
    registry: ShadowRegistry,
    stats: ShackStats,
}

impl ShadowStack {
    /// Allocate the store and registry. Fails if the sizing is invalid or a
    /// buffer cannot be reserved.
    pub fn new(config: &AccelConfig) -> Result<Self, AccelError> {
        config.validate()?;
        Ok(Self {
            store: ShackStore::with_capacity(config.shack_entries())?,
            registry: ShadowRegistry::new(config.call_slots, config.max_shadow_pairs)?,
            stats: ShackStats::default(),
        })
    }

    /// Record a call whose guest return address is `return_addr`.
    ///
    /// A full stack is flushed and the entry is dropped; the next push then
    /// starts from an empty stack.
    #[inline]
    pub fn push(&mut self, return_addr: GuestAddr) {
        if self.store.is_full() {
            self.flush();
            return;
        }
        let slot = self.lookup_or_register(return_addr);
        let stored = self.store.store_and_advance(ShadowEntry::pack(return_addr, slot));
        debug_assert!(stored);
        self.stats.pushes += 1;
    }

    /// Predict the host target of a return to `expected`.
    ///
    /// The top entry is consumed whenever the stack is non-empty, even when it
    /// does not match.
    #[inline]
    pub fn pop(&mut self, expected: GuestAddr) -> Option<HostAddr> {
        let Some(entry) = self.store.retreat_and_load() else {
            self.stats.pop_empty += 1;
            return None;
        };
        if !entry.matches(expected) {
            trace!(
                "shadow stack mismatch: top {:#x}, returning to {:#x}",
                entry.guest(),
                expected
            );
            self.stats.pop_mismatch += 1;
            return None;
        }
        match entry
            .slot()
            .and_then(|slot| self.registry.resolved(slot, expected))
        {
            Some(host) => {
                self.stats.pop_hits += 1;
                Some(host)
            }
            None => {
                self.stats.pop_unresolved += 1;
                None
            }
        }
    }

    /// Top entry, without consuming it.
    pub fn peek(&self) -> Option<ShadowEntry> {
        self.store.peek()
    }

    /// Drop every pending return prediction.
    #[inline]
    pub fn flush(&mut self) {
        debug!("shadow stack flush at depth {}", self.store.top());
        self.store.reset();
        self.stats.flushes += 1;
    }

    /// Slot for `guest`, registering an unresolved one on first sight.
    ///
    /// If the registry hits its pair limit it is cleared, and the stack is
    /// flushed with it so no live entry keeps a handle into the old table.
    pub fn lookup_or_register(&mut self, guest: GuestAddr) -> SlotHandle {
        let registered = self.registry.lookup_or_register(guest);
        self.note_registration(registered);
        registered.slot()
    }

    /// Publish that `guest` is translated at `host`. Every stack entry that
    /// already holds the slot for `guest` now resolves to `host`.
    pub fn set_shadow(&mut self, guest: GuestAddr, host: HostAddr) -> SlotHandle {
        let registered = self.registry.set(guest, host);
        self.note_registration(registered);
        registered.slot()
    }

    /// Revert `guest` to unresolved, e.g. after its translation was discarded.
    pub fn invalidate_shadow(&mut self, guest: GuestAddr) -> bool {
        self.registry.invalidate(guest)
    }

    /// Revert every registered target to unresolved.
    pub fn invalidate_all_shadows(&mut self) {
        self.registry.invalidate_all();
    }

    /// Current value of a slot (`UNRESOLVED_HOST_ADDR` while pending).
    pub fn slot_value(&self, slot: SlotHandle) -> Option<HostAddr> {
        self.registry.slot_value(slot)
    }

    pub fn depth(&self) -> usize {
        self.store.top()
    }

    pub fn capacity(&self) -> usize {
        self.store.end()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.store.is_full()
    }

    /// Live entries, bottom first.
    pub fn entries(&self) -> &[ShadowEntry] {
        self.store.entries()
    }

    pub fn layout(&self) -> StackLayout {
        ShackStore::layout()
    }

    pub fn registry(&self) -> &ShadowRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &ShackStats {
        &self.stats
    }

    #[inline(always)]
    fn note_registration(&mut self, registered: Registered) {
        match registered {
            Registered::Existing(_) => {}
            Registered::Created(_) => self.stats.registry_inserts += 1,
            Registered::CreatedAfterReset(_) => {
                self.stats.registry_inserts += 1;
                self.stats.registry_resets += 1;
                self.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::UNRESOLVED_HOST_ADDR;

    fn stack(entries: usize) -> ShadowStack {
        ShadowStack::new(&AccelConfig::test_config().with_shack_entries(entries)).unwrap()
    }

    #[test]
    fn test_unresolved_then_resolved_return() {
        let mut shack = stack(8);
        shack.push(0x1000);
        let slot = shack.lookup_or_register(0x1000);
        assert_eq!(shack.slot_value(slot), Some(UNRESOLVED_HOST_ADDR));

        shack.set_shadow(0x1000, 0xaaaa);
        assert_eq!(shack.slot_value(slot), Some(0xaaaa));
        assert_eq!(shack.pop(0x1000), Some(0xaaaa));
        assert!(shack.is_empty());
    }

    #[test]
    fn test_pop_unresolved_is_unknown() {
        let mut shack = stack(8);
        shack.push(0x2000);
        assert_eq!(shack.pop(0x2000), None);
        assert_eq!(shack.stats().pop_unresolved, 1);
        assert_eq!(shack.depth(), 0);
    }

    #[test]
    fn test_mismatch_consumes_entry() {
        let mut shack = stack(8);
        shack.set_shadow(0x10, 0x100);
        shack.set_shadow(0x20, 0x200);
        shack.push(0x10);
        shack.push(0x20);

        assert_eq!(shack.pop(0x30), None);
        assert_eq!(shack.depth(), 1);
        assert_eq!(shack.pop(0x10), Some(0x100));
        assert_eq!(shack.stats().pop_mismatch, 1);
    }

    #[test]
    fn test_underflow() {
        let mut shack = stack(2);
        assert_eq!(shack.pop(0x10), None);
        assert_eq!(shack.pop(0x10), None);
        assert_eq!(shack.depth(), 0);
        assert_eq!(shack.stats().pop_empty, 2);
    }

    #[test]
    fn test_overflow_flushes() {
        let mut shack = stack(2);
        shack.set_shadow(0x3000, 0x3333);
        shack.push(0x1000);
        shack.push(0x2000);
        assert!(shack.is_full());

        // The overflowing push flushes instead of writing past the end.
        shack.push(0x9000);
        assert_eq!(shack.depth(), 0);
        assert_eq!(shack.stats().flushes, 1);

        shack.push(0x3000);
        assert_eq!(shack.depth(), 1);
        assert_eq!(shack.pop(0x3000), Some(0x3333));
    }

    #[test]
    fn test_registry_reset_flushes_stack() {
        let config = AccelConfig::test_config()
            .with_shack_entries(8)
            .with_max_shadow_pairs(2);
        let mut shack = ShadowStack::new(&config).unwrap();
        shack.push(0x10);
        shack.push(0x20);
        assert_eq!(shack.depth(), 2);

        // Third distinct target clears the registry and the stack.
        shack.push(0x30);
        assert_eq!(shack.depth(), 1);
        assert_eq!(shack.stats().registry_resets, 1);
        assert_eq!(shack.registry().len(), 1);
        assert_eq!(shack.peek().map(|e| e.guest()), Some(0x30));
    }

    #[test]
    fn test_invalidate_shadow() {
        let mut shack = stack(4);
        shack.set_shadow(0x40, 0x4444);
        shack.push(0x40);
        assert!(shack.invalidate_shadow(0x40));
        assert_eq!(shack.pop(0x40), None);
    }

    #[test]
    fn test_construction_failure() {
        let config = AccelConfig::test_config().with_shack_size(4);
        assert!(matches!(
            ShadowStack::new(&config),
            Err(AccelError::ZeroCapacity)
        ));
    }
}
