//! Control-Flow Code Generation for the Pico DBT
//!
//! Classifies RISC-V control transfers and emits the inline Rust sequences
//! that end translated blocks: shadow-stack pushes on calls, validated pops
//! on returns, and IBTC lookups on computed jumps. The emitted code targets
//! `pico_dbt_runtime::ExecContext`.

pub mod classify;
pub mod config;
pub mod constants;
pub mod emitter;
pub mod render;
pub mod types;

// Re-export key types for convenience
pub use classify::{classify, ControlTransfer};
pub use config::EmitConfig;
pub use emitter::{ControlFlowEmitter, FastPath};
pub use render::{block_fn_tokens, block_ident, render_block, render_file};
pub use types::{Instruction, Opcode};
