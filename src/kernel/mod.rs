//! The kernel - tables, interpreter, and cooperative scheduler
//!
//! Core abstractions:
//! - FileTable: flat directory of named blobs in the persistent store
//! - VariableTable: typed per-process variables in one RAM arena
//! - ProcessTable: fixed-size table of process control blocks
//! - OperandStack: per-process tagged value stack
//! - Kernel: one value owning all of the above plus the platform

pub mod exec;
pub mod fat;
pub mod memory;
pub mod opcode;
pub mod process;
pub mod stack;
pub mod trace;
pub mod value;

pub use exec::{ExecError, Kernel};
pub use fat::{FatEntry, FatError, FileTable, MAX_FILES, RESERVED_PREFIX};
pub use memory::{MemoryError, VarEntry, VariableTable, ARENA_CAPACITY, MAX_VARIABLES};
pub use opcode::Opcode;
pub use process::{Pid, Process, ProcessError, ProcessState, ProcessTable, MAX_PROCESSES};
pub use stack::{OperandStack, StackError, STACK_CAPACITY};
pub use trace::{KernelStats, TraceCategory, TraceEvent, TraceSummary, Tracer};
pub use value::{Tag, Value};
