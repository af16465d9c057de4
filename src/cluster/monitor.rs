//! Host memory inspection used to size workers and to flag memory that is
//! already occupied before the cluster starts.

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Point-in-time view of system memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes() as f64 / self.total_bytes as f64
        }
    }
}

/// Reads memory figures from the operating system
pub struct MemoryMonitor {
    system: System,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }

    pub fn snapshot(&mut self) -> MemorySnapshot {
        self.system.refresh_memory();
        MemorySnapshot {
            total_bytes: self.system.total_memory(),
            available_bytes: self.system.available_memory(),
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the occupied fraction when it exceeds `warn_fraction`.
pub fn occupied_beyond(snapshot: &MemorySnapshot, warn_fraction: f64) -> Option<f64> {
    let used = snapshot.used_fraction();
    (used > warn_fraction).then_some(used)
}
