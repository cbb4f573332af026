//! Shell - the serial console front end
//!
//! Fed one console byte at a time by the event loop, which alternates one
//! byte of tokenisation with one scheduler pass. A completed line is
//! tokenised and dispatched to the built-in commands; after an accepted
//! `store` the input switches to raw mode and collects exactly the
//! announced number of payload bytes before returning to line mode.

pub mod builtins;
pub mod parser;

pub use builtins::{execute as execute_builtin, BuiltinOutcome, COMMANDS};
pub use parser::{parse, CommandLine, ParseError};

use crate::kernel::Kernel;
use crate::platform::Platform;

/// Raw-mode state: a `store` waiting for its payload
#[derive(Debug)]
struct PendingStore {
    name: String,
    size: usize,
    data: Vec<u8>,
}

/// Console input state machine
#[derive(Debug, Default)]
pub struct Shell {
    line: Vec<u8>,
    pending: Option<PendingStore>,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            line: Vec::new(),
            pending: None,
        }
    }

    /// Whether the shell is collecting raw payload bytes.
    pub fn collecting_payload(&self) -> bool {
        self.pending.is_some()
    }

    /// Service at most one pending console byte. Returns whether a byte
    /// was consumed (the event loop uses this to idle).
    pub fn pump<P: Platform>(&mut self, kernel: &mut Kernel<P>) -> bool {
        match kernel.platform_mut().console_read() {
            Some(byte) => {
                self.feed(kernel, byte);
                true
            }
            None => false,
        }
    }

    /// Feed one console byte into the state machine.
    pub fn feed<P: Platform>(&mut self, kernel: &mut Kernel<P>, byte: u8) {
        if let Some(pending) = self.pending.as_mut() {
            pending.data.push(byte);
            if pending.data.len() >= pending.size {
                if let Some(done) = self.pending.take() {
                    builtins::finish_store(kernel, &done.name, &done.data);
                }
            }
            return;
        }
        match byte {
            b'\r' => {}
            b'\n' => {
                let line = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                self.dispatch(kernel, &line);
            }
            _ => self.line.push(byte),
        }
    }

    /// Feed a whole line (plus terminator), as tests and demos do.
    pub fn feed_line<P: Platform>(&mut self, kernel: &mut Kernel<P>, line: &str) {
        for &byte in line.as_bytes() {
            self.feed(kernel, byte);
        }
        self.feed(kernel, b'\n');
    }

    fn dispatch<P: Platform>(&mut self, kernel: &mut Kernel<P>, line: &str) {
        let cmd = match parser::parse(line) {
            Ok(cmd) => cmd,
            Err(ParseError::Empty) => return,
            Err(e) => {
                kernel.platform_mut().console_write_line(&format!("Error. {}", e));
                return;
            }
        };
        match builtins::execute(kernel, &cmd) {
            BuiltinOutcome::Done => {}
            BuiltinOutcome::CollectPayload { name, size } => {
                self.pending = Some(PendingStore {
                    name,
                    size,
                    data: Vec::with_capacity(size),
                });
            }
        }
    }
}
