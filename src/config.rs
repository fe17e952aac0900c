//! Ambient runtime configuration, reshaped from a file-backed CLI
//! property store into a pure in-memory struct — embedding a runtime
//! core has no config file to read, so construction is always explicit
//! (`RuntimeConfig::default()` or the builder setters).

/// Collection strategy for [`crate::gc::Gc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Refcounting only; cycles are never reclaimed. Useful for
    /// short-lived embeddings that exit before cycles accumulate.
    RefcountOnly,
    /// Refcounting plus periodic mark-and-sweep cycle collection.
    MarkSweep,
}

/// Ambient configuration for one [`crate::scheduler::Runtime`]: GC
/// cadence, GIL quantum size, and the debug switch that gates verbose
/// diagnostics. Not derived from source text or bytecode, so it carries
/// no `PropDef` documentation table of its own — just the handful of
/// knobs this runtime core actually reads.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub gc_mode: GcMode,
    /// Number of opcodes a process executes per GIL acquisition before
    /// yielding to the scheduler, mirroring
    /// `scheduler::DEFAULT_QUANTUM`.
    pub gil_quantum: u32,
    /// Allocations between automatic mark-sweep passes; `0` disables
    /// the automatic trigger and leaves collection to explicit
    /// thread-pop/safepoint calls only.
    pub collect_every: u32,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            gc_mode: GcMode::MarkSweep,
            gil_quantum: crate::scheduler::DEFAULT_QUANTUM,
            collect_every: 4096,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gc_mode(mut self, mode: GcMode) -> Self {
        self.gc_mode = mode;
        self
    }

    pub fn with_gil_quantum(mut self, quantum: u32) -> Self {
        self.gil_quantum = quantum;
        self
    }

    pub fn with_collect_every(mut self, count: u32) -> Self {
        self.collect_every = count;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn mark_sweep_enabled(&self) -> bool {
        matches!(self.gc_mode, GcMode::MarkSweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_scheduler_quantum() {
        let config = RuntimeConfig::default();
        assert_eq!(config.gil_quantum, crate::scheduler::DEFAULT_QUANTUM);
        assert!(config.mark_sweep_enabled());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = RuntimeConfig::new()
            .with_gc_mode(GcMode::RefcountOnly)
            .with_gil_quantum(8)
            .with_collect_every(0)
            .with_debug(true);
        assert!(!config.mark_sweep_enabled());
        assert_eq!(config.gil_quantum, 8);
        assert_eq!(config.collect_every, 0);
        assert!(config.debug);
    }
}
