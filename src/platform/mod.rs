//! Platform abstraction layer
//!
//! The kernel is platform-agnostic; everything it needs from the outside
//! world comes through the [`Platform`] trait:
//!
//! - Serial console: one byte in (non-blocking), bytes out
//! - Persistent store: byte-addressable read/write over a fixed capacity
//! - Wall clock: milliseconds since boot
//! - Hardware pins: mode and digital writes
//!
//! Implementations live in sibling modules: [`host`] drives a real terminal
//! and persists the store image between runs, [`sim`] is fully
//! deterministic and backs the test suite.

pub mod host;
pub mod sim;

pub use host::HostPlatform;
pub use sim::{PinEvent, SimPlatform};

/// Default persistent-store capacity in bytes
pub const DEFAULT_STORE_CAPACITY: usize = 1024;

/// The boundary between the kernel and its host environment.
///
/// All store offsets are absolute; callers are responsible for staying
/// inside `store_capacity()`.
pub trait Platform {
    // ===== Serial console =====

    /// Read one pending console byte, if any. Never blocks.
    fn console_read(&mut self) -> Option<u8>;

    /// Write raw bytes to the console.
    fn console_write(&mut self, bytes: &[u8]);

    /// Write a string to the console.
    fn console_write_str(&mut self, s: &str) {
        self.console_write(s.as_bytes());
    }

    /// Write a string followed by a newline.
    fn console_write_line(&mut self, s: &str) {
        self.console_write(s.as_bytes());
        self.console_write(b"\n");
    }

    // ===== Persistent store =====

    /// Total store capacity in bytes.
    fn store_capacity(&self) -> usize;

    /// Read one byte at `offset`.
    fn store_read(&self, offset: usize) -> u8;

    /// Write one byte at `offset`.
    fn store_write(&mut self, offset: usize, byte: u8);

    /// Read `len` bytes starting at `offset`.
    fn store_read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.store_read(offset + i)).collect()
    }

    /// Write a byte run starting at `offset`.
    fn store_write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.store_write(offset + i, b);
        }
    }

    /// Commit buffered store writes to stable storage. Called after each
    /// mutating shell command; a no-op where writes are already durable.
    fn store_flush(&mut self) {}

    // ===== Wall clock =====

    /// Milliseconds since boot.
    fn now_ms(&self) -> u32;

    // ===== Hardware pins =====

    /// Configure a pin's direction.
    fn pin_mode(&mut self, pin: i16, direction: i16);

    /// Drive a digital pin.
    fn digital_write(&mut self, pin: i16, value: i16);
}
