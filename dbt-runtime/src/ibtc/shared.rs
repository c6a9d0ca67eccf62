use crate::{
    constants::{MAX_IBTC_BITS, UNRESOLVED_HOST_ADDR},
    error::AccelError,
    types::{GuestAddr, HostAddr, TranslatedBlock},
};
use std::sync::atomic::{AtomicU64, Ordering};

/// IBTC safe to consult and update from several threads.
///
/// Each slot is one `AtomicU64` holding `guest << 32 | host_entry`, so a
/// reader sees either the old pair or the new one, never half of each. A slot
/// whose host half is `UNRESOLVED_HOST_ADDR` is empty.
pub struct SharedIbtc {
    slots: Box<[AtomicU64]>,
    mask: u32,
    dispatcher_stub: HostAddr,
}

impl SharedIbtc {
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
                what: "shared indirect branch target cache",
                entries,
            })?;
        slots.extend((0..entries).map(|_| AtomicU64::new(0)));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: (entries - 1) as u32,
            dispatcher_stub,
        })
    }

    #[inline(always)]
    pub fn index_of(&self, guest: GuestAddr) -> usize {
        (guest & self.mask) as usize
    }

    /// Entry point for `guest`, or the dispatcher stub on a miss.
    #[inline]
    pub fn lookup(&self, guest: GuestAddr) -> HostAddr {
        let bits = self.slots[self.index_of(guest)].load(Ordering::Acquire);
        let host = bits as u32;
        if (bits >> 32) as u32 == guest && host != UNRESOLVED_HOST_ADDR {
            host
        } else {
            self.dispatcher_stub
        }
    }

    /// Overwrite the slot of `guest`. A block without an entry point clears it.
    #[inline]
    pub fn update(&self, guest: GuestAddr, block: &TranslatedBlock) {
        let bits = ((guest as u64) << 32) | block.host_entry as u64;
        self.slots[self.index_of(guest)].store(bits, Ordering::Release);
    }

    pub fn invalidate(&self) {
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Release);
        }
    }

    #[inline(always)]
    pub fn dispatcher_stub(&self) -> HostAddr {
        self.dispatcher_stub
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    const STUB: HostAddr = 0xffff_ffff;

    #[test]
    fn test_shared_aliasing() {
        let ibtc = SharedIbtc::with_entries(4, STUB).unwrap();
        ibtc.update(0x10, &TranslatedBlock::new(0x10, 0x1010, 1));
        ibtc.update(0x14, &TranslatedBlock::new(0x14, 0x1014, 1));
        assert_eq!(ibtc.lookup(0x10), STUB);
        assert_eq!(ibtc.lookup(0x14), 0x1014);
        // Guest address zero on an empty table is still a miss.
        assert_eq!(ibtc.lookup(0), STUB);
    }

    #[test]
    fn test_concurrent_updates_never_tear() {
        let ibtc = Arc::new(SharedIbtc::with_entries(4, STUB).unwrap());
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let ibtc = ibtc.clone();
                thread::spawn(move || {
                    // All four threads fight over index 0.
                    let guest = 0x100 * (t + 1);
                    for _ in 0..10_000 {
                        ibtc.update(guest, &TranslatedBlock::new(guest, guest + 1, 1));
                    }
                })
            })
            .collect();

        for _ in 0..10_000 {
            for t in 0..4u32 {
                let guest = 0x100 * (t + 1);
                let host = ibtc.lookup(guest);
                assert!(host == STUB || host == guest + 1);
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }
}
