//! File allocation table
//!
//! A flat directory of named byte blobs in the persistent store. The store
//! begins with a little-endian `u16` count followed by `MAX_FILES` fixed
//! 16-byte records; blob payloads live from `RESERVED_PREFIX` onward,
//! positioned by a first-fit allocator that never relocates existing files.
//!
//! The in-memory table is authoritative while a command runs; it is
//! re-read at the start of every command that touches it and rewritten to
//! the store whenever an entry is added or removed. Entries are kept
//! sorted by `begin`, which is also what the placement probes rely on.

use crate::platform::Platform;

/// Maximum number of directory entries
pub const MAX_FILES: usize = 10;

/// On-store width of the name field (11 bytes + terminating zero)
pub const NAME_FIELD: usize = 12;

/// On-store width of one directory record
pub const ENTRY_SIZE: usize = NAME_FIELD + 2 + 2;

/// First byte of the data area: the serialised header ends here
pub const RESERVED_PREFIX: usize = 2 + MAX_FILES * ENTRY_SIZE;

/// File-table failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatError {
    /// The table already holds `MAX_FILES` entries
    TableFull,
    /// An entry with this name already exists
    Duplicate(String),
    /// No entry with this name
    NotFound(String),
    /// No gap large enough for the requested size
    NoSpace(usize),
    /// Name longer than the 11-byte field allows
    NameTooLong(String),
}

impl std::fmt::Display for FatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatError::TableFull => write!(f, "file table is full"),
            FatError::Duplicate(name) => write!(f, "file '{}' already exists", name),
            FatError::NotFound(name) => write!(f, "file '{}' not found", name),
            FatError::NoSpace(size) => write!(f, "no space for {} bytes", size),
            FatError::NameTooLong(name) => write!(f, "file name '{}' too long", name),
        }
    }
}

impl std::error::Error for FatError {}

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatEntry {
    /// Up to 11 printable bytes
    pub name: String,
    /// Byte offset of the blob inside the store
    pub begin: u16,
    /// Blob size in bytes
    pub length: u16,
}

impl FatEntry {
    fn serialize(&self) -> [u8; ENTRY_SIZE] {
        let mut rec = [0u8; ENTRY_SIZE];
        let name = self.name.as_bytes();
        rec[..name.len()].copy_from_slice(name);
        rec[NAME_FIELD..NAME_FIELD + 2].copy_from_slice(&self.begin.to_le_bytes());
        rec[NAME_FIELD + 2..NAME_FIELD + 4].copy_from_slice(&self.length.to_le_bytes());
        rec
    }

    fn deserialize(rec: &[u8]) -> Self {
        let name_len = rec[..NAME_FIELD]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD - 1);
        Self {
            name: String::from_utf8_lossy(&rec[..name_len]).into_owned(),
            begin: u16::from_le_bytes([rec[NAME_FIELD], rec[NAME_FIELD + 1]]),
            length: u16::from_le_bytes([rec[NAME_FIELD + 2], rec[NAME_FIELD + 3]]),
        }
    }
}

/// In-RAM copy of the on-store directory
#[derive(Debug, Default)]
pub struct FileTable {
    entries: Vec<FatEntry>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Re-read the header from the store, replacing the in-memory copy.
    pub fn load<P: Platform>(&mut self, platform: &P) {
        let count = u16::from_le_bytes([platform.store_read(0), platform.store_read(1)]);
        let count = (count as usize).min(MAX_FILES);
        self.entries.clear();
        for i in 0..count {
            let rec = platform.store_read_bytes(2 + i * ENTRY_SIZE, ENTRY_SIZE);
            self.entries.push(FatEntry::deserialize(&rec));
        }
        self.sort();
    }

    /// Rewrite the header: count, the live entries, and zeroed padding out
    /// to `MAX_FILES` records.
    pub fn flush<P: Platform>(&self, platform: &mut P) {
        let count = self.entries.len() as u16;
        platform.store_write_bytes(0, &count.to_le_bytes());
        for i in 0..MAX_FILES {
            let rec = match self.entries.get(i) {
                Some(entry) => entry.serialize(),
                None => [0u8; ENTRY_SIZE],
            };
            platform.store_write_bytes(2 + i * ENTRY_SIZE, &rec);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_FILES
    }

    /// Entries in `begin` order.
    pub fn entries(&self) -> &[FatEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn find(&self, name: &str) -> Option<&FatEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.begin);
    }

    /// First-fit placement. Probes, in order: the gap between the reserved
    /// prefix and the first blob, each inter-blob gap, and the trailing gap
    /// up to `capacity`. An empty table places at the reserved prefix.
    pub fn place(&self, size: usize, capacity: usize) -> Result<u16, FatError> {
        if size == 0 {
            return Err(FatError::NoSpace(size));
        }
        if self.entries.is_empty() {
            if RESERVED_PREFIX + size <= capacity {
                return Ok(RESERVED_PREFIX as u16);
            }
            return Err(FatError::NoSpace(size));
        }
        if self.entries[0].begin as usize >= RESERVED_PREFIX + size {
            return Ok(RESERVED_PREFIX as u16);
        }
        for pair in self.entries.windows(2) {
            let gap_start = pair[0].begin as usize + pair[0].length as usize;
            let gap_end = pair[1].begin as usize;
            if gap_end.saturating_sub(gap_start) >= size {
                return Ok(gap_start as u16);
            }
        }
        if let Some(last) = self.entries.last() {
            let tail = last.begin as usize + last.length as usize;
            if capacity.saturating_sub(tail) >= size {
                return Ok(tail as u16);
            }
        }
        Err(FatError::NoSpace(size))
    }

    /// Insert a new entry, keeping `begin` order. The caller has already
    /// checked capacity, uniqueness, and placement.
    pub fn insert(&mut self, entry: FatEntry) {
        self.entries.push(entry);
        self.sort();
    }

    /// Remove an entry by name; the suffix shifts left. Payload bytes are
    /// not touched, they become part of the free region.
    pub fn remove(&mut self, name: &str) -> Result<FatEntry, FatError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| FatError::NotFound(name.to_string()))?;
        Ok(self.entries.remove(idx))
    }

    /// `capacity − reserved prefix − Σ lengths`
    pub fn free_space(&self, capacity: usize) -> usize {
        let used: usize = self.entries.iter().map(|e| e.length as usize).sum();
        capacity - RESERVED_PREFIX - used
    }

    /// Validate a candidate file name: 1..=11 printable bytes.
    pub fn validate_name(name: &str) -> Result<(), FatError> {
        if name.is_empty() || name.len() >= NAME_FIELD {
            return Err(FatError::NameTooLong(name.to_string()));
        }
        Ok(())
    }
}
