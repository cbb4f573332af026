//! emberos - a miniature cooperative multitasking OS
//!
//! Typed bytecode programs arrive over a serial console, persist to a
//! small byte-addressable store under named entries, and run concurrently
//! on a round-robin scheduler that executes one instruction per runnable
//! process per tick.
//!
//! Design principles:
//! - Everything fixed at build time: table sizes, stack depths, the arena
//! - One `Kernel` value owns every table; no global state
//! - Cooperative only: waiting is expressed as instruction-retry, never as
//!   blocking inside an instruction
//! - The platform (console, store, clock, pins) sits behind one trait, so
//!   the whole system runs deterministically under test

pub mod kernel;
pub mod platform;
pub mod shell;

pub use kernel::Kernel;
pub use platform::Platform;
pub use shell::Shell;
