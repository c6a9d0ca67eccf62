//! Control-Flow Acceleration Sizing Constants
//!
//! All sizing parameters for the shadow stack, the shadow-target registry and
//! the indirect branch target cache are centralized here. They are the
//! defaults picked up by [`crate::AccelConfig`]; none of them is tunable once
//! an execution context has been built.

// =============================================================================
// Shadow Stack Constants
// =============================================================================

/// Width of one packed shadow stack entry in bytes.
/// High 32 bits hold the guest return address, low 32 bits the slot handle.
pub const SHACK_ENTRY_BYTES: usize = core::mem::size_of::<u64>();

/// Default shadow stack capacity in bytes (2048 entries).
/// Deep recursion beyond this flushes the stack instead of growing it.
pub const DEFAULT_SHACK_SIZE: usize = 16 * 1024;

// =============================================================================
// Shadow-Target Registry Constants
// =============================================================================

/// Default number of hash buckets in the shadow-target registry.
/// Buckets are selected with `guest_pc % call_slots`.
pub const DEFAULT_CALL_SLOTS: usize = 16 * 1024;

/// Default upper bound on live shadow pairs.
/// Reaching it clears the registry and flushes the owning shadow stack.
pub const DEFAULT_MAX_SHADOW_PAIRS: usize = 64 * 1024;

/// Host address meaning "not translated yet".
/// Translated code never lives at host address zero.
pub const UNRESOLVED_HOST_ADDR: u32 = 0;

// =============================================================================
// Indirect Branch Target Cache Constants
// =============================================================================

/// Default log2 of the IBTC entry count (65536 entries).
pub const DEFAULT_IBTC_BITS: u32 = 16;

/// Largest accepted `ibtc_bits`; keeps the table below 256 MiB.
pub const MAX_IBTC_BITS: u32 = 24;

/// Default host address of the back-to-dispatcher stub returned on IBTC misses.
pub const DEFAULT_DISPATCHER_STUB: u32 = u32::MAX;

// =============================================================================
// Reference Dispatcher Constants
// =============================================================================

/// Default step budget for [`crate::Dispatcher::run`].
pub const DEFAULT_MAX_STEPS: u64 = 1 << 32;

/// Host handles handed out by the code cache start here so that
/// [`UNRESOLVED_HOST_ADDR`] is never a valid entry point.
pub const FIRST_HOST_HANDLE: u32 = 0x1000;

/// Spacing between consecutive host handles in the code cache.
pub const HOST_HANDLE_STRIDE: u32 = 0x10;

/// Whether the code cache could ever hand out `addr` as a block entry.
/// Handles are issued once, in increasing order, and never reused.
#[inline]
pub const fn is_host_handle(addr: u32) -> bool {
    addr >= FIRST_HOST_HANDLE && (addr - FIRST_HOST_HANDLE) % HOST_HANDLE_STRIDE == 0
}

// =============================================================================
// Environment Overrides
// =============================================================================

pub const ENV_SHACK_SIZE: &str = "PICO_DBT_SHACK_SIZE";
pub const ENV_CALL_SLOTS: &str = "PICO_DBT_CALL_SLOTS";
pub const ENV_IBTC_BITS: &str = "PICO_DBT_IBTC_BITS";
