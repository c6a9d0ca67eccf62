//! DBT Control-Flow Acceleration Runtime
//!
//! Runtime data structures that let translated RISC-V guest code resolve
//! calls, returns and computed jumps without re-entering the dispatcher on
//! every control transfer.
//!
//! # Architecture
//!
//! The runtime is organized around these core concepts:
//!
//! - **`ShadowStack`**: shadow return-address stack plus the registry of
//!   return-target slots that translations fill in later
//! - **`Ibtc`**: direct-mapped indirect branch target cache (per context;
//!   `SharedIbtc` for cross-thread use)
//! - **`ExecContext`**: per-virtual-processor state reached by generated code
//! - **`NextStep`**: control flow decision (Host/Dispatch/Halt)
//! - **`Dispatcher`**: reference run loop that translates on demand
//!
//! Nothing here fails in steady state. A full stack flushes, a mismatched or
//! unresolved return yields no prediction, and an IBTC miss returns the
//! dispatcher stub. Only construction can fail, with [`AccelError`].
//!
//! # Usage Pattern
//!
//! Generated block code (see `pico-dbt-codegen`) targets `ExecContext`:
//!
//! ```ignore
//! fn block_0x00000100(emu: &mut ExecContext) -> Result<NextStep, String> {
//!     // jal ra, 0x200
//!     emu.write_reg(1, 0x104);
//!     emu.shack_push(0x104);
//!     emu.pc = 0x200;
//!     return Ok(NextStep::Dispatch(0x200));
//! }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod ibtc;
pub mod logger;
pub mod shack;
pub mod stats;
pub mod types;

// Re-export core types
pub use config::AccelConfig;
pub use context::ExecContext;
pub use dispatch::{BlockLookup, CodeCache, Dispatcher, Translation, Translator};
pub use error::{AccelError, ConfigError, DispatchError};
pub use ibtc::{Ibtc, IbtcUpdateControl, SharedIbtc};
pub use shack::{ShadowEntry, ShadowStack, SlotHandle, StackLayout};
pub use stats::AccelStats;
pub use types::{BlockFn, GuestAddr, HostAddr, NextStep, TranslatedBlock};
