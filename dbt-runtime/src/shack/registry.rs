use super::entry::SlotHandle;
use crate::{
    constants::UNRESOLVED_HOST_ADDR,
    error::AccelError,
    types::{GuestAddr, HostAddr},
};
use log::{debug, trace};

/// One guest return target and the host-code slot a translation fills in.
#[derive(Debug, Clone, Copy)]
struct ShadowPair {
    guest: GuestAddr,
    /// `UNRESOLVED_HOST_ADDR` until the target is translated
    host: HostAddr,
    /// Next pair in the same bucket chain (arena index)
    next: Option<u32>,
}

/// Outcome of a registry insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// The guest address already had a pair
    Existing(SlotHandle),
    /// A new pair was linked at the head of its bucket
    Created(SlotHandle),
    /// The pair limit was reached; the registry was cleared before inserting
    CreatedAfterReset(SlotHandle),
}

impl Registered {
    #[inline(always)]
    pub fn slot(self) -> SlotHandle {
        match self {
            Registered::Existing(slot)
            | Registered::Created(slot)
            | Registered::CreatedAfterReset(slot) => slot,
        }
    }

    #[inline(always)]
    pub fn did_reset(self) -> bool {
        matches!(self, Registered::CreatedAfterReset(_))
    }
}

/// Chained hash table of forward-reference slots for return targets.
///
/// Pairs live in an arena and are chained per bucket (`guest % call_slots`)
/// through arena indices. A guest address has at most one pair. Pairs are
/// never unlinked individually; the whole table is cleared when it reaches
/// `max_pairs`.
pub struct ShadowRegistry {
    heads: Box<[Option<u32>]>,
    pairs: Vec<ShadowPair>,
    max_pairs: usize,
    generation: u64,
}

impl ShadowRegistry {
    pub fn new(call_slots: usize, max_pairs: usize) -> Result<Self, AccelError> {
        if call_slots == 0 {
            return Err(AccelError::ZeroCallSlots);
        }
        if max_pairs == 0 {
            return Err(AccelError::ZeroShadowPairs);
        }
        let mut heads = Vec::new();
        heads
            .try_reserve_exact(call_slots)
            .map_err(|_| AccelError::AllocationFailed {
                what: "shadow-target registry",
                entries: call_slots,
            })?;
        heads.resize(call_slots, None);
        Ok(Self {
            heads: heads.into_boxed_slice(),
            pairs: Vec::new(),
            max_pairs,
            generation: 0,
        })
    }

    #[inline(always)]
    fn bucket(&self, guest: GuestAddr) -> usize {
        guest as usize % self.heads.len()
    }

    /// Walk the bucket chain for `guest`.
    #[inline]
    pub fn find(&self, guest: GuestAddr) -> Option<SlotHandle> {
        let mut cursor = self.heads[self.bucket(guest)];
        while let Some(idx) = cursor {
            let pair = &self.pairs[idx as usize];
            if pair.guest == guest {
                return Some(SlotHandle::from_index(idx as usize));
            }
            cursor = pair.next;
        }
        None
    }

    /// Return the slot for `guest`, creating an unresolved one if needed.
    pub fn lookup_or_register(&mut self, guest: GuestAddr) -> Registered {
        match self.find(guest) {
            Some(slot) => Registered::Existing(slot),
            None => self.link_new(guest, UNRESOLVED_HOST_ADDR),
        }
    }

    /// Record that `guest` is now translated at `host`, creating the pair if
    /// no return target was registered for it yet.
    pub fn set(&mut self, guest: GuestAddr, host: HostAddr) -> Registered {
        match self.find(guest) {
            Some(slot) => {
                self.pairs[slot.index()].host = host;
                Registered::Existing(slot)
            }
            None => self.link_new(guest, host),
        }
    }

    /// Forget the translation of `guest`, keeping its slot.
    pub fn invalidate(&mut self, guest: GuestAddr) -> bool {
        match self.find(guest) {
            Some(slot) => {
                self.pairs[slot.index()].host = UNRESOLVED_HOST_ADDR;
                true
            }
            None => false,
        }
    }

    /// Forget every translation, keeping all slots.
    pub fn invalidate_all(&mut self) {
        for pair in &mut self.pairs {
            pair.host = UNRESOLVED_HOST_ADDR;
        }
    }

    /// Resolved host address behind `slot`, provided the slot still belongs to `guest`.
    #[inline(always)]
    pub fn resolved(&self, slot: SlotHandle, guest: GuestAddr) -> Option<HostAddr> {
        self.pairs
            .get(slot.index())
            .filter(|pair| pair.guest == guest && pair.host != UNRESOLVED_HOST_ADDR)
            .map(|pair| pair.host)
    }

    /// Raw slot contents, `UNRESOLVED_HOST_ADDR` when still a placeholder.
    pub fn slot_value(&self, slot: SlotHandle) -> Option<HostAddr> {
        self.pairs.get(slot.index()).map(|pair| pair.host)
    }

    /// Drop every pair.
    pub fn clear(&mut self) {
        self.heads.iter_mut().for_each(|head| *head = None);
        self.pairs.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    /// Number of times the registry has been cleared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Length of the chain `guest` hashes into.
    pub fn chain_len(&self, guest: GuestAddr) -> usize {
        let mut len = 0;
        let mut cursor = self.heads[self.bucket(guest)];
        while let Some(idx) = cursor {
            len += 1;
            cursor = self.pairs[idx as usize].next;
        }
        len
    }

    fn link_new(&mut self, guest: GuestAddr, host: HostAddr) -> Registered {
        let reset = self.pairs.len() >= self.max_pairs;
        if reset {
            debug!(
                "shadow registry full ({} pairs), clearing generation {}",
                self.pairs.len(),
                self.generation
            );
            self.clear();
        }

        let bucket = self.bucket(guest);
        let idx = self.pairs.len();
        self.pairs.push(ShadowPair {
            guest,
            host,
            next: self.heads[bucket],
        });
        self.heads[bucket] = Some(idx as u32);
        trace!("shadow pair {:#x} -> {:#x} in bucket {}", guest, host, bucket);

        let slot = SlotHandle::from_index(idx);
        if reset {
            Registered::CreatedAfterReset(slot)
        } else {
            Registered::Created(slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_or_register_is_idempotent() {
        let mut registry = ShadowRegistry::new(4, 16).unwrap();
        let first = registry.lookup_or_register(0x1000);
        let second = registry.lookup_or_register(0x1000);
        assert!(matches!(first, Registered::Created(_)));
        assert_eq!(second, Registered::Existing(first.slot()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.slot_value(first.slot()), Some(UNRESOLVED_HOST_ADDR));
    }

    #[test]
    fn test_set_updates_existing_slot() {
        let mut registry = ShadowRegistry::new(4, 16).unwrap();
        let slot = registry.lookup_or_register(0x1000).slot();
        assert_eq!(registry.resolved(slot, 0x1000), None);

        assert_eq!(registry.set(0x1000, 0xaaaa), Registered::Existing(slot));
        assert_eq!(registry.resolved(slot, 0x1000), Some(0xaaaa));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_colliding_addresses_share_a_chain() {
        let mut registry = ShadowRegistry::new(4, 16).unwrap();
        // 0x10, 0x14, 0x18 all land in bucket 0 with 4 buckets
        let a = registry.lookup_or_register(0x10).slot();
        let b = registry.lookup_or_register(0x14).slot();
        let c = registry.set(0x18, 0x2000).slot();
        assert_eq!(registry.chain_len(0x10), 3);
        assert_eq!(registry.find(0x10), Some(a));
        assert_eq!(registry.find(0x14), Some(b));
        assert_eq!(registry.find(0x18), Some(c));
        assert_eq!(registry.find(0x1c), None);

        // A slot is only honored for the guest address it was created for.
        assert_eq!(registry.resolved(c, 0x18), Some(0x2000));
        assert_eq!(registry.resolved(c, 0x14), None);
    }

    #[test]
    fn test_reset_when_full() {
        let mut registry = ShadowRegistry::new(2, 2).unwrap();
        registry.lookup_or_register(1);
        registry.lookup_or_register(2);
        let third = registry.lookup_or_register(3);
        assert!(third.did_reset());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.generation(), 1);
        assert_eq!(registry.find(1), None);
        assert_eq!(registry.find(3), Some(third.slot()));
    }

    #[test]
    fn test_invalidate_keeps_slot() {
        let mut registry = ShadowRegistry::new(4, 16).unwrap();
        let slot = registry.set(0x40, 0x5000).slot();
        assert!(registry.invalidate(0x40));
        assert!(!registry.invalidate(0x44));
        assert_eq!(registry.find(0x40), Some(slot));
        assert_eq!(registry.resolved(slot, 0x40), None);

        registry.set(0x40, 0x6000);
        registry.invalidate_all();
        assert_eq!(registry.resolved(slot, 0x40), None);
    }
}
