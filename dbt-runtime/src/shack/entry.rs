use crate::{constants::SHACK_ENTRY_BYTES, types::GuestAddr};
use static_assertions::const_assert_eq;
use std::{fmt, num::NonZeroU32};

/// Handle of a pair in the shadow-target registry.
///
/// Stored in the low half of a [`ShadowEntry`]. The raw value is the arena
/// index plus one, so zero never names a slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotHandle(NonZeroU32);

impl SlotHandle {
    #[inline(always)]
    pub(crate) fn from_index(index: usize) -> Self {
        let raw = u32::try_from(index + 1).unwrap_or(u32::MAX);
        // index + 1 is never zero
        Self(NonZeroU32::new(raw).unwrap_or(NonZeroU32::MAX))
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Raw 32-bit value as packed into a stack entry.
    #[inline(always)]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    #[inline(always)]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }
}

impl fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// One packed shadow stack entry: guest return address in the high word,
/// registry slot handle in the low word.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct ShadowEntry(u64);

const_assert_eq!(core::mem::size_of::<ShadowEntry>(), SHACK_ENTRY_BYTES);

impl ShadowEntry {
    #[inline(always)]
    pub fn pack(guest: GuestAddr, slot: SlotHandle) -> Self {
        Self(((guest as u64) << 32) | slot.raw() as u64)
    }

    #[inline(always)]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline(always)]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Guest return address half.
    #[inline(always)]
    pub fn guest(self) -> GuestAddr {
        (self.0 >> 32) as u32
    }

    /// Slot handle half, `None` for a zeroed entry.
    #[inline(always)]
    pub fn slot(self) -> Option<SlotHandle> {
        SlotHandle::from_raw(self.0 as u32)
    }

    /// Whether this entry may be used to predict a return to `expected`.
    #[inline(always)]
    pub fn matches(self, expected: GuestAddr) -> bool {
        self.guest() == expected
    }
}

impl fmt::Debug for ShadowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShadowEntry({:#010x} -> {:?})", self.guest(), self.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let slot = SlotHandle::from_index(0x41);
        let entry = ShadowEntry::pack(0xdead_beef, slot);
        assert_eq!(entry.bits(), 0xdead_beef_0000_0042);
        assert_eq!(entry.guest(), 0xdead_beef);
        assert_eq!(entry.slot(), Some(slot));
        assert!(entry.matches(0xdead_beef));
        assert!(!entry.matches(0xdead_bef3));
    }

    #[test]
    fn test_zeroed_entry_has_no_slot() {
        let entry = ShadowEntry::default();
        assert_eq!(entry.slot(), None);
        assert_eq!(SlotHandle::from_raw(0), None);
    }
}
