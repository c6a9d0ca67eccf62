use thiserror::Error;

/// Errors raised while building the acceleration structures of an execution context.
///
/// Steady-state misses (full stack, empty stack, mismatch, cache miss) are not
/// errors; only sizing mistakes and allocation failure are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccelError {
    /// The shadow stack was configured with no room for a single entry.
    #[error("shadow stack capacity must hold at least one entry")]
    ZeroCapacity,

    /// The shadow stack size is not a whole number of entries.
    #[error("shadow stack size {bytes} is not a multiple of the entry width {entry_bytes}")]
    UnalignedCapacity { bytes: usize, entry_bytes: usize },

    /// The registry was configured with no hash buckets.
    #[error("shadow-target registry needs at least one bucket")]
    ZeroCallSlots,

    /// The registry pair limit is smaller than one.
    #[error("shadow-target registry needs room for at least one pair")]
    ZeroShadowPairs,

    /// The IBTC size must be a power of two for mask indexing.
    #[error("ibtc size {0} is not a power of two")]
    IbtcSizeNotPowerOfTwo(usize),

    /// The IBTC index width is out of range.
    #[error("ibtc_bits {0} exceeds the supported maximum of {1}")]
    IbtcTooLarge(u32, u32),

    /// The dispatcher stub collides with the unresolved marker or a block handle.
    #[error("dispatcher stub {0:#x} is not distinguishable from a block entry")]
    InvalidDispatcherStub(u32),

    /// A backing buffer could not be reserved.
    #[error("failed to allocate {entries} entries for the {what}")]
    AllocationFailed { what: &'static str, entries: usize },
}

/// Errors raised while reading configuration overrides from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnvValue { var: &'static str, value: String },

    #[error(transparent)]
    Accel(#[from] AccelError),
}

/// Errors raised by the reference dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The translator could not produce a block for this guest pc.
    #[error("no translation available for guest pc {0:#x}")]
    Untranslatable(u32),

    /// Generated code jumped to a host address the code cache does not know.
    #[error("host address {0:#x} is not a translated block entry")]
    UnknownHostAddr(u32),

    /// Every host handle has been issued; the code cache cannot grow further.
    #[error("code cache host handles exhausted")]
    HostHandlesExhausted,

    /// The run loop hit its step budget.
    #[error("step budget of {0} blocks exhausted")]
    StepBudgetExhausted(u64),

    /// A translated block reported a failure.
    #[error("block at guest pc {pc:#x} failed: {message}")]
    Block { pc: u32, message: String },
}
