//! Acceleration Layer Configuration

use crate::{
    constants,
    error::{AccelError, ConfigError},
};
use serde::{Deserialize, Serialize};
use std::env;

const TEST_SHACK_SIZE: usize = 8 * constants::SHACK_ENTRY_BYTES;
const TEST_CALL_SLOTS: usize = 4;
const TEST_MAX_SHADOW_PAIRS: usize = 64;
const TEST_IBTC_BITS: u32 = 2;

/// Sizing and policy for the shadow stack, shadow-target registry and IBTC of
/// one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelConfig {
    /// Shadow stack capacity in bytes. Must be a non-zero multiple of
    /// `constants::SHACK_ENTRY_BYTES`.
    pub shack_size_bytes: usize,

    /// Number of hash buckets in the shadow-target registry.
    pub call_slots: usize,

    /// Maximum live shadow pairs before the registry is reset.
    pub max_shadow_pairs: usize,

    /// log2 of the IBTC entry count.
    pub ibtc_bits: u32,

    /// Host address returned by the IBTC on a miss.
    pub dispatcher_stub: u32,

    /// Whether slow-path resolutions populate the IBTC.
    /// Turned off while single-stepping.
    pub enable_ibtc_update: bool,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            shack_size_bytes: env::var(constants::ENV_SHACK_SIZE).map_or_else(
                |_| constants::DEFAULT_SHACK_SIZE,
                |s| s.parse::<usize>().unwrap_or(constants::DEFAULT_SHACK_SIZE),
            ),
            call_slots: env::var(constants::ENV_CALL_SLOTS).map_or_else(
                |_| constants::DEFAULT_CALL_SLOTS,
                |s| s.parse::<usize>().unwrap_or(constants::DEFAULT_CALL_SLOTS),
            ),
            max_shadow_pairs: constants::DEFAULT_MAX_SHADOW_PAIRS,
            ibtc_bits: env::var(constants::ENV_IBTC_BITS).map_or_else(
                |_| constants::DEFAULT_IBTC_BITS,
                |s| s.parse::<u32>().unwrap_or(constants::DEFAULT_IBTC_BITS),
            ),
            dispatcher_stub: constants::DEFAULT_DISPATCHER_STUB,
            enable_ibtc_update: true,
        }
    }
}

impl AccelConfig {
    /// Configuration built from compiled-in constants only.
    pub fn new() -> Self {
        Self {
            shack_size_bytes: constants::DEFAULT_SHACK_SIZE,
            call_slots: constants::DEFAULT_CALL_SLOTS,
            max_shadow_pairs: constants::DEFAULT_MAX_SHADOW_PAIRS,
            ibtc_bits: constants::DEFAULT_IBTC_BITS,
            dispatcher_stub: constants::DEFAULT_DISPATCHER_STUB,
            enable_ibtc_update: true,
        }
    }

    /// Like [`Default::default`], but rejects malformed overrides instead of
    /// silently falling back.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        if let Some(bytes) = parse_env::<usize>(constants::ENV_SHACK_SIZE)? {
            config.shack_size_bytes = bytes;
        }
        if let Some(slots) = parse_env::<usize>(constants::ENV_CALL_SLOTS)? {
            config.call_slots = slots;
        }
        if let Some(bits) = parse_env::<u32>(constants::ENV_IBTC_BITS)? {
            config.ibtc_bits = bits;
        }
        config.validate()?;
        Ok(config)
    }

    /// Tiny sizes that make overflow and aliasing easy to reach in tests.
    pub fn test_config() -> Self {
        Self {
            shack_size_bytes: TEST_SHACK_SIZE,
            call_slots: TEST_CALL_SLOTS,
            max_shadow_pairs: TEST_MAX_SHADOW_PAIRS,
            ibtc_bits: TEST_IBTC_BITS,
            dispatcher_stub: constants::DEFAULT_DISPATCHER_STUB,
            enable_ibtc_update: true,
        }
    }

    /// Number of entries the shadow stack can hold.
    pub fn shack_entries(&self) -> usize {
        self.shack_size_bytes / constants::SHACK_ENTRY_BYTES
    }

    /// Number of IBTC entries, 0 if `ibtc_bits` does not fit a `usize`.
    pub fn ibtc_entries(&self) -> usize {
        1usize.checked_shl(self.ibtc_bits).unwrap_or(0)
    }

    /// Check every sizing constraint without allocating anything.
    pub fn validate(&self) -> Result<(), AccelError> {
        if self.shack_size_bytes < constants::SHACK_ENTRY_BYTES {
            return Err(AccelError::ZeroCapacity);
        }
        if self.shack_size_bytes % constants::SHACK_ENTRY_BYTES != 0 {
            return Err(AccelError::UnalignedCapacity {
                bytes: self.shack_size_bytes,
                entry_bytes: constants::SHACK_ENTRY_BYTES,
            });
        }
        if self.call_slots == 0 {
            return Err(AccelError::ZeroCallSlots);
        }
        if self.max_shadow_pairs == 0 {
            return Err(AccelError::ZeroShadowPairs);
        }
        if self.ibtc_bits > constants::MAX_IBTC_BITS {
            return Err(AccelError::IbtcTooLarge(
                self.ibtc_bits,
                constants::MAX_IBTC_BITS,
            ));
        }
        if self.dispatcher_stub == constants::UNRESOLVED_HOST_ADDR
            || constants::is_host_handle(self.dispatcher_stub)
        {
            return Err(AccelError::InvalidDispatcherStub(self.dispatcher_stub));
        }
        Ok(())
    }

    /// Set the shadow stack capacity in bytes.
    pub fn with_shack_size(mut self, bytes: usize) -> Self {
        self.shack_size_bytes = bytes;
        self
    }

    /// Set the shadow stack capacity in entries.
    pub fn with_shack_entries(mut self, entries: usize) -> Self {
        self.shack_size_bytes = entries.saturating_mul(constants::SHACK_ENTRY_BYTES);
        self
    }

    /// Set the registry bucket count.
    pub fn with_call_slots(mut self, call_slots: usize) -> Self {
        self.call_slots = call_slots;
        self
    }

    /// Set the registry pair limit.
    pub fn with_max_shadow_pairs(mut self, max_shadow_pairs: usize) -> Self {
        self.max_shadow_pairs = max_shadow_pairs;
        self
    }

    /// Set log2 of the IBTC size.
    pub fn with_ibtc_bits(mut self, ibtc_bits: u32) -> Self {
        self.ibtc_bits = ibtc_bits;
        self
    }

    /// Set the dispatcher stub address returned on IBTC misses.
    pub fn with_dispatcher_stub(mut self, stub: u32) -> Self {
        self.dispatcher_stub = stub;
        self
    }

    /// Enable or disable IBTC population after slow-path resolutions.
    pub fn with_ibtc_update(mut self, enable: bool) -> Self {
        self.enable_ibtc_update = enable;
        self
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnvValue { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AccelConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.shack_entries(), 2048);
        assert_eq!(config.ibtc_entries(), 1 << 16);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert_eq!(
            AccelConfig::new().with_shack_size(0).validate(),
            Err(AccelError::ZeroCapacity)
        );
        assert_eq!(
            AccelConfig::new().with_shack_size(12).validate(),
            Err(AccelError::UnalignedCapacity {
                bytes: 12,
                entry_bytes: 8
            })
        );
        assert_eq!(
            AccelConfig::new().with_call_slots(0).validate(),
            Err(AccelError::ZeroCallSlots)
        );
        assert_eq!(
            AccelConfig::new().with_max_shadow_pairs(0).validate(),
            Err(AccelError::ZeroShadowPairs)
        );
        assert_eq!(
            AccelConfig::new().with_ibtc_bits(40).validate(),
            Err(AccelError::IbtcTooLarge(40, constants::MAX_IBTC_BITS))
        );
    }

    #[test]
    fn test_out_of_range_sizes_do_not_panic() {
        let config = AccelConfig::new().with_ibtc_bits(64);
        assert_eq!(config.ibtc_entries(), 0);
        assert_eq!(
            config.validate(),
            Err(AccelError::IbtcTooLarge(64, constants::MAX_IBTC_BITS))
        );

        let config = AccelConfig::new().with_shack_entries(usize::MAX);
        assert_eq!(config.shack_size_bytes, usize::MAX);
        assert!(matches!(
            config.validate(),
            Err(AccelError::UnalignedCapacity { .. })
        ));
    }

    #[test]
    fn test_rejects_ambiguous_dispatcher_stub() {
        for stub in [
            constants::UNRESOLVED_HOST_ADDR,
            constants::FIRST_HOST_HANDLE,
            constants::FIRST_HOST_HANDLE + 4 * constants::HOST_HANDLE_STRIDE,
        ] {
            assert_eq!(
                AccelConfig::new().with_dispatcher_stub(stub).validate(),
                Err(AccelError::InvalidDispatcherStub(stub))
            );
        }
        assert!(AccelConfig::new()
            .with_dispatcher_stub(0xfff)
            .validate()
            .is_ok());
        assert!(AccelConfig::new()
            .with_dispatcher_stub(constants::FIRST_HOST_HANDLE + 1)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = AccelConfig::test_config()
            .with_shack_entries(3)
            .with_ibtc_bits(4)
            .with_ibtc_update(false);
        assert_eq!(config.shack_size_bytes, 24);
        assert_eq!(config.ibtc_entries(), 16);
        assert!(!config.enable_ibtc_update);
    }
}
