use pico_dbt_runtime::{AccelConfig, Ibtc, SharedIbtc, TranslatedBlock};
use rand::{rngs::StdRng, Rng, SeedableRng};

const STUB: u32 = 0xffff_ffff;

fn block_for(guest: u32) -> TranslatedBlock {
    TranslatedBlock::new(guest, 0x8000_0000 | guest, 1)
}

#[test]
fn test_size_four_collision_scenario() {
    let mut ibtc = Ibtc::new(&AccelConfig::test_config().with_ibtc_bits(2)).unwrap();
    let stub = ibtc.dispatcher_stub();
    let tb1 = block_for(0x10);
    let tb2 = block_for(0x14);

    ibtc.update(0x10, tb1);
    ibtc.update(0x14, tb2);
    assert_eq!(ibtc.index_of(0x10), ibtc.index_of(0x14));
    assert_eq!(ibtc.lookup(0x10), stub);
    assert_eq!(ibtc.lookup(0x14), tb2.host_entry);
}

#[test]
fn test_no_false_hits_under_random_aliasing() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ibtc = Ibtc::with_entries(16, STUB).unwrap();
    let shared = SharedIbtc::with_entries(16, STUB).unwrap();

    // Model: the last guest written to each index.
    let mut last = [None::<u32>; 16];
    for _ in 0..10_000 {
        let guest = rng.gen_range(0..256u32) * 4;
        if rng.gen_bool(0.3) {
            ibtc.update(guest, block_for(guest));
            shared.update(guest, &block_for(guest));
            last[(guest & 15) as usize] = Some(guest);
        } else {
            let expected = match last[(guest & 15) as usize] {
                Some(owner) if owner == guest => block_for(guest).host_entry,
                _ => STUB,
            };
            assert_eq!(ibtc.lookup(guest), expected);
            assert_eq!(shared.lookup(guest), expected);
        }
    }
    assert!(ibtc.stats().evictions > 0);
}

#[test]
fn test_lookup_never_returns_other_block() {
    let mut ibtc = Ibtc::with_entries(4, STUB).unwrap();
    for guest in (0..64u32).map(|i| i * 4) {
        ibtc.update(guest, block_for(guest));
        for addr in (0..64u32).map(|i| i * 4) {
            let host = ibtc.lookup(addr);
            assert!(host == STUB || host == block_for(addr).host_entry);
        }
    }
}
