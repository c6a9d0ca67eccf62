//! Indirect Branch Target Cache
//!
//! A direct-mapped table from guest address to translated block, consulted by
//! generated code on computed jumps and on returns the shadow stack could not
//! predict. Index collisions overwrite silently (last write wins); every
//! lookup compares the full guest address, so aliasing can only cause a miss,
//! never a jump to the wrong block.
//!
//! [`Ibtc`] is the per-context shard used by [`crate::ExecContext`].
//! [`SharedIbtc`] packs each slot into one atomic word for tables consulted
//! from several threads.

mod shared;

pub use shared::SharedIbtc;

use crate::{
    config::AccelConfig,
    constants::MAX_IBTC_BITS,
    error::AccelError,
    stats::IbtcStats,
    types::{GuestAddr, HostAddr, TranslatedBlock},
};
use log::trace;

#[derive(Debug, Clone, Copy)]
struct JumpPair {
    guest: GuestAddr,
    block: TranslatedBlock,
}

/// Per-context indirect branch target cache.
pub struct Ibtc {
    slots: Box<[Option<JumpPair>]>,
    mask: u32,
    dispatcher_stub: HostAddr,
    stats: IbtcStats,
}

impl Ibtc {
    pub fn new(config: &AccelConfig) -> Result<Self, AccelError> {
        config.validate()?;
        Self::with_entries(config.ibtc_entries(), config.dispatcher_stub)
    }

    /// Build a cache with `entries` slots; `entries` must be a power of two.
    pub fn with_entries(entries: usize, dispatcher_stub: HostAddr) -> Result<Self, AccelError> {
        if !entries.is_power_of_two() {
            return Err(AccelError::IbtcSizeNotPowerOfTwo(entries));
        }
        if entries > 1usize << MAX_IBTC_BITS {
            return Err(AccelError::IbtcTooLarge(
                entries.trailing_zeros(),
                MAX_IBTC_BITS,
            ));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(entries)
            .map_err(|_| AccelError::AllocationFailed {
                what: "indirect branch target cache",
                entries,
            })?;
        slots.resize(entries, None);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: (entries - 1) as u32,
            dispatcher_stub,
            stats: IbtcStats::default(),
        })
    }

    #[inline(always)]
    pub fn index_of(&self, guest: GuestAddr) -> usize {
        (guest & self.mask) as usize
    }

    /// Entry point for `guest`, or the dispatcher stub on a miss.
    #[inline]
    pub fn lookup(&mut self, guest: GuestAddr) -> HostAddr {
        match self.peek(guest) {
            Some(block) => {
                self.stats.hits += 1;
                block.host_entry
            }
            None => {
                self.stats.misses += 1;
                self.dispatcher_stub
            }
        }
    }

    /// Cached block for `guest`, without touching the counters.
    #[inline(always)]
    pub fn peek(&self, guest: GuestAddr) -> Option<TranslatedBlock> {
        match self.slots[self.index_of(guest)] {
            Some(pair) if pair.guest == guest => Some(pair.block),
            _ => None,
        }
    }

    /// Overwrite the slot of `guest` with `block`.
    #[inline]
    pub fn update(&mut self, guest: GuestAddr, block: TranslatedBlock) {
        let idx = self.index_of(guest);
        if let Some(old) = self.slots[idx] {
            if old.guest != guest {
                trace!(
                    "ibtc slot {} evicts {:#x} for {:#x}",
                    idx,
                    old.guest,
                    guest
                );
                self.stats.evictions += 1;
            }
        }
        self.slots[idx] = Some(JumpPair { guest, block });
        self.stats.updates += 1;
    }

    /// Drop every cached pair.
    pub fn invalidate(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    #[inline(always)]
    pub fn dispatcher_stub(&self) -> HostAddr {
        self.dispatcher_stub
    }

    #[inline(always)]
    pub fn is_dispatcher_stub(&self, host: HostAddr) -> bool {
        host == self.dispatcher_stub
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn stats(&self) -> &IbtcStats {
        &self.stats
    }

    pub(crate) fn note_suppressed_update(&mut self) {
        self.stats.suppressed_updates += 1;
    }
}

/// Per-context gate for populating the IBTC after a slow-path resolution.
///
/// A miss arms the control with the missed guest address. When the
/// dispatcher later resolves a block for that address it consumes the arm and
/// updates the cache. While updating is suppressed a miss is only remembered,
/// so the skipped update can be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IbtcUpdateControl {
    enabled: bool,
    pending: Option<GuestAddr>,
    suppressed: Option<GuestAddr>,
}

impl IbtcUpdateControl {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending: None,
            suppressed: None,
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Suppress or re-enable updates. Disabling also drops a pending arm.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.suppressed = None;
        } else {
            self.pending = None;
        }
    }

    /// Record a miss on `guest`: arm an update, or remember the suppressed one.
    #[inline(always)]
    pub fn arm(&mut self, guest: GuestAddr) {
        if self.enabled {
            self.pending = Some(guest);
        } else {
            self.suppressed = Some(guest);
        }
    }

    pub fn pending(&self) -> Option<GuestAddr> {
        self.pending
    }

    /// Disarm. Returns true if the arm was for `guest`.
    #[inline(always)]
    pub fn take(&mut self, guest: GuestAddr) -> bool {
        self.pending.take() == Some(guest)
    }

    /// Forget a miss seen while suppressed. Returns true if it was for `guest`.
    #[inline(always)]
    pub fn take_suppressed(&mut self, guest: GuestAddr) -> bool {
        self.suppressed.take() == Some(guest)
    }
}

impl Default for IbtcUpdateControl {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUB: HostAddr = 0xffff_ffff;

    #[test]
    fn test_hit_and_miss() {
        let mut ibtc = Ibtc::with_entries(4, STUB).unwrap();
        let tb = TranslatedBlock::new(0x10, 0x1010, 3);
        assert_eq!(ibtc.lookup(0x10), STUB);

        ibtc.update(0x10, tb);
        assert_eq!(ibtc.lookup(0x10), 0x1010);
        assert_eq!(ibtc.peek(0x10), Some(tb));
        assert_eq!(ibtc.stats().hits, 1);
        assert_eq!(ibtc.stats().misses, 1);
    }

    #[test]
    fn test_aliasing_evicts_never_false_hits() {
        let mut ibtc = Ibtc::with_entries(4, STUB).unwrap();
        assert_eq!(ibtc.mask(), 0b11);
        let tb1 = TranslatedBlock::new(0x10, 0x1010, 1);
        let tb2 = TranslatedBlock::new(0x14, 0x1014, 1);

        ibtc.update(0x10, tb1);
        // Same index, different address: a miss, not tb1.
        assert_eq!(ibtc.lookup(0x14), STUB);

        ibtc.update(0x14, tb2);
        assert_eq!(ibtc.lookup(0x10), STUB);
        assert_eq!(ibtc.lookup(0x14), 0x1014);
        assert_eq!(ibtc.stats().evictions, 1);
        assert_eq!(ibtc.occupancy(), 1);
    }

    #[test]
    fn test_invalidate() {
        let mut ibtc = Ibtc::with_entries(8, STUB).unwrap();
        ibtc.update(0x20, TranslatedBlock::new(0x20, 0x2020, 1));
        ibtc.invalidate();
        assert_eq!(ibtc.peek(0x20), None);
        assert_eq!(ibtc.occupancy(), 0);
    }

    #[test]
    fn test_size_must_be_power_of_two() {
        assert!(matches!(
            Ibtc::with_entries(6, STUB),
            Err(AccelError::IbtcSizeNotPowerOfTwo(6))
        ));
        assert!(matches!(
            Ibtc::with_entries(0, STUB),
            Err(AccelError::IbtcSizeNotPowerOfTwo(0))
        ));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(matches!(
            Ibtc::new(&AccelConfig::new().with_ibtc_bits(64)),
            Err(AccelError::IbtcTooLarge(64, MAX_IBTC_BITS))
        ));
        assert!(matches!(
            Ibtc::new(&AccelConfig::test_config().with_dispatcher_stub(0)),
            Err(AccelError::InvalidDispatcherStub(0))
        ));
    }

    #[test]
    fn test_update_control() {
        let mut control = IbtcUpdateControl::default();
        control.arm(0x40);
        assert!(!control.take(0x44));
        assert_eq!(control.pending(), None);

        control.arm(0x40);
        control.set_enabled(false);
        assert_eq!(control.pending(), None);
        assert!(!control.is_enabled());

        // Misses while suppressed never arm an update.
        control.arm(0x48);
        assert_eq!(control.pending(), None);
        assert!(!control.take(0x48));
        assert!(control.take_suppressed(0x48));
        assert!(!control.take_suppressed(0x48));
    }
}
