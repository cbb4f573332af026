//! Deterministic simulated platform
//!
//! Backs the test suite and scripted demos: console input is a queue the
//! test fills, console output is captured, the clock only moves when the
//! test advances it, and pin operations are recorded instead of performed.

use super::Platform;
use std::collections::VecDeque;

/// A recorded hardware-pin operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    Mode { pin: i16, direction: i16 },
    Write { pin: i16, value: i16 },
}

/// In-memory platform with a scripted console and a manual clock
pub struct SimPlatform {
    store: Vec<u8>,
    clock_ms: u32,
    input: VecDeque<u8>,
    output: Vec<u8>,
    pins: Vec<PinEvent>,
}

impl SimPlatform {
    /// A platform with the given store capacity, zero-filled.
    pub fn new(store_capacity: usize) -> Self {
        Self {
            store: vec![0; store_capacity],
            clock_ms: 0,
            input: VecDeque::new(),
            output: Vec::new(),
            pins: Vec::new(),
        }
    }

    /// Queue raw bytes as pending console input.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Queue a command line (a newline is appended).
    pub fn feed_line(&mut self, line: &str) {
        self.feed(line.as_bytes());
        self.feed(b"\n");
    }

    /// Move the clock forward.
    pub fn advance_ms(&mut self, ms: u32) {
        self.clock_ms = self.clock_ms.wrapping_add(ms);
    }

    /// Everything written to the console so far, lossily decoded.
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Drain and return the captured console output.
    pub fn take_output(&mut self) -> String {
        let s = self.output_str();
        self.output.clear();
        s
    }

    /// Recorded pin operations, oldest first.
    pub fn pin_events(&self) -> &[PinEvent] {
        &self.pins
    }

    /// Direct view of the store image (for layout assertions).
    pub fn store_bytes(&self) -> &[u8] {
        &self.store
    }
}

impl Platform for SimPlatform {
    fn console_read(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn console_write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn store_capacity(&self) -> usize {
        self.store.len()
    }

    fn store_read(&self, offset: usize) -> u8 {
        self.store[offset]
    }

    fn store_write(&mut self, offset: usize, byte: u8) {
        self.store[offset] = byte;
    }

    fn now_ms(&self) -> u32 {
        self.clock_ms
    }

    fn pin_mode(&mut self, pin: i16, direction: i16) {
        self.pins.push(PinEvent::Mode { pin, direction });
    }

    fn digital_write(&mut self, pin: i16, value: i16) {
        self.pins.push(PinEvent::Write { pin, value });
    }
}
