//! Native host platform
//!
//! Console I/O over stdin/stdout, a monotonic clock, and a store image
//! persisted as a single versioned JSON snapshot (written whole after each
//! mutating command, so a crash can lose at most the last command).
//!
//! Stdin has no portable non-blocking read, so a detached reader thread
//! pumps bytes into a channel and `console_read` drains it.

use super::{Platform, DEFAULT_STORE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the persistent store image
#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    /// Format version for future compatibility
    version: u32,
    /// Store capacity the image was created with
    capacity: usize,
    /// Raw image bytes
    bytes: Vec<u8>,
}

/// Platform implementation for a real terminal
pub struct HostPlatform {
    store: Vec<u8>,
    snapshot_path: Option<PathBuf>,
    boot: Instant,
    input: Receiver<u8>,
    eof: bool,
    gpio_echo: bool,
}

impl HostPlatform {
    /// A host platform with a fresh, zero-filled store.
    pub fn new() -> Self {
        Self::with_store(vec![0; DEFAULT_STORE_CAPACITY], None)
    }

    /// A host platform whose store image is loaded from (and saved back to)
    /// `path`. A missing or unreadable snapshot starts a fresh image.
    pub fn with_snapshot(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let store = Self::load_snapshot(&path)
            .unwrap_or_else(|| vec![0; DEFAULT_STORE_CAPACITY]);
        Self::with_store(store, Some(path))
    }

    fn with_store(store: Vec<u8>, snapshot_path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1];
            while let Ok(n) = stdin.read(&mut buf) {
                if n == 0 {
                    break;
                }
                if tx.send(buf[0]).is_err() {
                    break;
                }
            }
        });
        Self {
            store,
            snapshot_path,
            boot: Instant::now(),
            input: rx,
            eof: false,
            gpio_echo: true,
        }
    }

    /// Whether stdin has closed and its buffer has drained.
    pub fn console_eof(&self) -> bool {
        self.eof
    }

    /// Suppress the `gpio:` console lines for pin operations.
    pub fn quiet_gpio(mut self) -> Self {
        self.gpio_echo = false;
        self
    }

    fn load_snapshot(path: &Path) -> Option<Vec<u8>> {
        let data = std::fs::read(path).ok()?;
        let snap: StoreSnapshot = serde_json::from_slice(&data).ok()?;
        if snap.version != SNAPSHOT_VERSION || snap.bytes.len() != snap.capacity {
            return None;
        }
        Some(snap.bytes)
    }

    fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snap = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            capacity: self.store.len(),
            bytes: self.store.clone(),
        };
        if let Ok(data) = serde_json::to_vec(&snap) {
            // write to a sibling then rename, so a crash never truncates
            let tmp = path.with_extension("tmp");
            if std::fs::write(&tmp, data).is_ok() {
                let _ = std::fs::rename(&tmp, path);
            }
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn console_read(&mut self) -> Option<u8> {
        match self.input.try_recv() {
            Ok(b) => Some(b),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.eof = true;
                None
            }
        }
    }

    fn console_write(&mut self, bytes: &[u8]) {
        let mut out = io::stdout();
        let _ = out.write_all(bytes);
        let _ = out.flush();
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

    fn store_flush(&mut self) {
        self.save_snapshot();
    }

    fn now_ms(&self) -> u32 {
        self.boot.elapsed().as_millis() as u32
    }

    fn pin_mode(&mut self, pin: i16, direction: i16) {
        if self.gpio_echo {
            self.console_write_line(&format!("gpio: pin {} mode {}", pin, direction));
        }
    }

    fn digital_write(&mut self, pin: i16, value: i16) {
        if self.gpio_echo {
            self.console_write_line(&format!("gpio: pin {} <- {}", pin, value));
        }
    }
}
