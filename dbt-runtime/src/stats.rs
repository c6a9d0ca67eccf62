//! Hit/miss counters for the shadow stack and the IBTC
//!
//! Counters are plain integers bumped on the paths they describe. They exist
//! for tuning capacity and cache size, and can be dumped as JSON.

use serde::{Deserialize, Serialize};

/// Shadow stack and registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShackStats {
    /// Entries recorded by `push`
    pub pushes: u64,
    /// Flushes, from overflow or explicit invalidation
    pub flushes: u64,
    /// Pops that produced a host address
    pub pop_hits: u64,
    /// Pops on an empty stack
    pub pop_empty: u64,
    /// Pops whose guest half did not match the expected return address
    pub pop_mismatch: u64,
    /// Pops that matched but whose target was not translated yet
    pub pop_unresolved: u64,
    /// Registry pairs created
    pub registry_inserts: u64,
    /// Registry clears caused by the pair limit
    pub registry_resets: u64,
}

impl ShackStats {
    /// Fraction of pops that produced a host address.
    pub fn hit_rate(&self) -> f64 {
        let pops = self.pop_hits + self.pop_empty + self.pop_mismatch + self.pop_unresolved;
        if pops == 0 {
            0.0
        } else {
            self.pop_hits as f64 / pops as f64
        }
    }
}

/// Indirect branch target cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbtcStats {
    pub hits: u64,
    pub misses: u64,
    pub updates: u64,
    /// Updates that replaced a different guest address
    pub evictions: u64,
    /// Updates skipped because updating was suppressed
    pub suppressed_updates: u64,
}

impl IbtcStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Snapshot of every counter of one execution context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelStats {
    pub shack: ShackStats,
    pub ibtc: IbtcStats,
    /// Blocks run by the dispatcher
    pub blocks_executed: u64,
    /// Dispatcher entries (slow path)
    pub dispatches: u64,
    /// Blocks produced by the translator
    pub translations: u64,
    /// Jumps to host handles whose block had been flushed
    pub stale_handles: u64,
}

impl AccelStats {
    /// Save counters to a JSON file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize stats: {}", e))?;
        std::fs::write(path, json)
            .map_err(|e| format!("Failed to write stats to {}: {}", path.display(), e))?;
        Ok(())
    }

    /// Log a one-line summary at info level.
    pub fn log_summary(&self) {
        log::info!(
            "shack: {} pushes, {} flushes, {:.1}% return hits; ibtc: {:.1}% hits, {} evictions; {} blocks, {} dispatches, {} translations",
            self.shack.pushes,
            self.shack.flushes,
            self.shack.hit_rate() * 100.0,
            self.ibtc.hit_rate() * 100.0,
            self.ibtc.evictions,
            self.blocks_executed,
            self.dispatches,
            self.translations,
        );
    }
}
