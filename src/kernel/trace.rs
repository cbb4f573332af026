//! Kernel instrumentation
//!
//! A ring buffer of recent kernel events plus aggregate counters, for
//! debugging and the CLI's shutdown summary. Disabled by default so the
//! hot path costs one branch.

use super::process::Pid;
use std::collections::VecDeque;

/// Maximum number of events kept in the ring buffer
const TRACE_BUFFER_SIZE: usize = 256;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCategory {
    /// Shell command handling
    Shell,
    /// File table operations
    File,
    /// Variable table and arena operations
    Memory,
    /// Process lifecycle
    Process,
    /// Scheduler passes
    Scheduler,
    /// Instruction execution
    Exec,
}

impl std::fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceCategory::Shell => write!(f, "SHELL"),
            TraceCategory::File => write!(f, "FILE"),
            TraceCategory::Memory => write!(f, "MEMORY"),
            TraceCategory::Process => write!(f, "PROCESS"),
            TraceCategory::Scheduler => write!(f, "SCHED"),
            TraceCategory::Exec => write!(f, "EXEC"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Kernel time in milliseconds
    pub timestamp: u32,
    pub category: TraceCategory,
    /// Event name
    pub name: String,
    /// Optional details
    pub detail: Option<String>,
    /// Associated process, if any
    pub pid: Option<Pid>,
}

/// Kernel-wide counters
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelStats {
    /// Scheduler passes completed
    pub ticks: u64,
    /// Bytecode instructions executed
    pub instructions: u64,
    /// Processes created
    pub processes_spawned: u64,
    /// Processes removed
    pub processes_exited: u64,
    /// Files written to the store
    pub files_stored: u64,
    /// Files erased from the store
    pub files_erased: u64,
    /// Errors surfaced to the console
    pub errors: u64,
}

/// The tracer: ring buffer plus counters
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    events: VecDeque<TraceEvent>,
    pub stats: KernelStats,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            enabled: false,
            events: VecDeque::with_capacity(TRACE_BUFFER_SIZE),
            stats: KernelStats::default(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an event (dropped when disabled; counters always run).
    pub fn event(
        &mut self,
        timestamp: u32,
        category: TraceCategory,
        name: &str,
        pid: Option<Pid>,
        detail: Option<String>,
    ) {
        if !self.enabled {
            return;
        }
        if self.events.len() >= TRACE_BUFFER_SIZE {
            self.events.pop_front();
        }
        self.events.push_back(TraceEvent {
            timestamp,
            category,
            name: name.to_string(),
            detail,
            pid,
        });
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> &VecDeque<TraceEvent> {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.stats = KernelStats::default();
    }

    /// A printable summary of the counters.
    pub fn summary(&self) -> TraceSummary {
        TraceSummary { stats: self.stats }
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter snapshot with a console-friendly rendering
#[derive(Debug, Clone, Copy)]
pub struct TraceSummary {
    pub stats: KernelStats,
}

impl std::fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Kernel statistics ===")?;
        writeln!(f, "Ticks: {}", self.stats.ticks)?;
        writeln!(f, "Instructions: {}", self.stats.instructions)?;
        writeln!(
            f,
            "Processes: {} spawned, {} exited",
            self.stats.processes_spawned, self.stats.processes_exited
        )?;
        writeln!(
            f,
            "Files: {} stored, {} erased",
            self.stats.files_stored, self.stats.files_erased
        )?;
        writeln!(f, "Errors: {}", self.stats.errors)?;
        Ok(())
    }
}
