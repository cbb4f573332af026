//! RAM arena and variable table
//!
//! One contiguous arena hosts the payloads of every variable of every
//! process. The table maps `(name byte, owner pid)` to a typed region;
//! allocation is first-fit over the address-sorted table, the same shape
//! as the file-table allocator. A variable dies when its owner overwrites
//! it or terminates.

use super::process::Pid;
use super::value::{Tag, Value};

/// Arena capacity in bytes
pub const ARENA_CAPACITY: usize = 256;

/// Maximum number of live variables across all processes
pub const MAX_VARIABLES: usize = 20;

/// Variable-store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The variable table already holds `MAX_VARIABLES` entries
    TableFull,
    /// No arena gap large enough for the payload
    NoSpace(usize),
    /// No variable with this name for the running process
    NotFound(u8),
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::TableFull => write!(f, "variable table is full"),
            MemoryError::NoSpace(size) => write!(f, "no arena space for {} bytes", size),
            MemoryError::NotFound(name) => {
                write!(f, "variable '{}' does not exist", *name as char)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// Metadata for one live variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarEntry {
    /// Single-byte identifier from the bytecode
    pub name: u8,
    /// Owning process
    pub owner: Pid,
    /// Payload type
    pub tag: Tag,
    /// Payload size in bytes (STRING includes its terminating zero)
    pub length: usize,
    /// Offset inside the arena
    pub address: usize,
}

/// The arena plus its directory, kept sorted by address
#[derive(Debug)]
pub struct VariableTable {
    entries: Vec<VarEntry>,
    arena: [u8; ARENA_CAPACITY],
}

impl VariableTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            arena: [0; ARENA_CAPACITY],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries in address order.
    pub fn entries(&self) -> &[VarEntry] {
        &self.entries
    }

    /// Total payload bytes currently allocated.
    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.length).sum()
    }

    fn find(&self, name: u8, owner: Pid) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.owner == owner)
    }

    /// First-fit over the address-sorted table: the gap before the first
    /// region, each inter-region gap, then the tail of the arena.
    fn allocate(&self, size: usize) -> Result<usize, MemoryError> {
        if self.entries.is_empty() {
            if size <= ARENA_CAPACITY {
                return Ok(0);
            }
            return Err(MemoryError::NoSpace(size));
        }
        if self.entries[0].address >= size {
            return Ok(0);
        }
        for pair in self.entries.windows(2) {
            let gap_start = pair[0].address + pair[0].length;
            if pair[1].address.saturating_sub(gap_start) >= size {
                return Ok(gap_start);
            }
        }
        if let Some(last) = self.entries.last() {
            let tail = last.address + last.length;
            if ARENA_CAPACITY.saturating_sub(tail) >= size {
                return Ok(tail);
            }
        }
        Err(MemoryError::NoSpace(size))
    }

    /// Bind `(name, owner)` to `value`, replacing any earlier binding.
    pub fn set(&mut self, name: u8, owner: Pid, value: &Value) -> Result<(), MemoryError> {
        if let Some(idx) = self.find(name, owner) {
            self.entries.remove(idx);
        }
        if self.entries.len() >= MAX_VARIABLES {
            return Err(MemoryError::TableFull);
        }
        let length = value.width();
        let address = self.allocate(length)?;
        match value {
            Value::Char(c) => self.arena[address] = *c,
            Value::Int(i) => {
                self.arena[address..address + 2].copy_from_slice(&i.to_be_bytes());
            }
            Value::Str(s) => {
                self.arena[address..address + s.len()].copy_from_slice(s);
                self.arena[address + s.len()] = 0;
            }
            Value::Float(f) => {
                self.arena[address..address + 4].copy_from_slice(&f.to_be_bytes());
            }
        }
        self.entries.push(VarEntry {
            name,
            owner,
            tag: value.tag(),
            length,
            address,
        });
        self.entries.sort_by_key(|e| e.address);
        Ok(())
    }

    /// Reassemble the value bound to `(name, owner)`.
    pub fn get(&self, name: u8, owner: Pid) -> Result<Value, MemoryError> {
        let entry = &self.entries[self.find(name, owner).ok_or(MemoryError::NotFound(name))?];
        let a = entry.address;
        let value = match entry.tag {
            Tag::Char => Value::Char(self.arena[a]),
            Tag::Int => Value::Int(i16::from_be_bytes([self.arena[a], self.arena[a + 1]])),
            Tag::Str => {
                // stored length counts the terminating zero
                Value::Str(self.arena[a..a + entry.length - 1].to_vec())
            }
            Tag::Float => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.arena[a..a + 4]);
                Value::Float(f32::from_be_bytes(b))
            }
        };
        Ok(value)
    }

    /// Remove every variable owned by `owner`. Returns how many died.
    pub fn remove_owned(&mut self, owner: Pid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.owner != owner);
        before - self.entries.len()
    }
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P0: Pid = Pid(0);
    const P1: Pid = Pid(1);

    #[test]
    fn test_set_get_round_trip() {
        let mut vars = VariableTable::new();
        vars.set(b'c', P0, &Value::Char(b'!')).unwrap();
        vars.set(b'i', P0, &Value::Int(-1234)).unwrap();
        vars.set(b's', P0, &Value::Str(b"hi".to_vec())).unwrap();
        vars.set(b'f', P0, &Value::Float(2.5)).unwrap();

        assert_eq!(vars.get(b'c', P0).unwrap(), Value::Char(b'!'));
        assert_eq!(vars.get(b'i', P0).unwrap(), Value::Int(-1234));
        assert_eq!(vars.get(b's', P0).unwrap(), Value::Str(b"hi".to_vec()));
        assert_eq!(vars.get(b'f', P0).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_missing_variable() {
        let vars = VariableTable::new();
        assert_eq!(vars.get(b'x', P0), Err(MemoryError::NotFound(b'x')));
    }

    #[test]
    fn test_same_name_different_owner() {
        let mut vars = VariableTable::new();
        vars.set(b'x', P0, &Value::Int(1)).unwrap();
        vars.set(b'x', P1, &Value::Int(2)).unwrap();
        assert_eq!(vars.get(b'x', P0).unwrap(), Value::Int(1));
        assert_eq!(vars.get(b'x', P1).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_overwrite_same_width_keeps_arena_usage() {
        let mut vars = VariableTable::new();
        vars.set(b'x', P0, &Value::Int(1)).unwrap();
        let used = vars.used_bytes();
        let addr = vars.entries()[0].address;
        vars.set(b'x', P0, &Value::Int(99)).unwrap();
        assert_eq!(vars.used_bytes(), used);
        assert_eq!(vars.entries()[0].address, addr);
        assert_eq!(vars.get(b'x', P0).unwrap(), Value::Int(99));
    }

    #[test]
    fn test_overwrite_changes_type() {
        let mut vars = VariableTable::new();
        vars.set(b'x', P0, &Value::Int(1)).unwrap();
        vars.set(b'x', P0, &Value::Str(b"text".to_vec())).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get(b'x', P0).unwrap(), Value::Str(b"text".to_vec()));
    }

    #[test]
    fn test_first_fit_reuses_gap() {
        let mut vars = VariableTable::new();
        vars.set(b'a', P0, &Value::Float(0.0)).unwrap(); // 4 bytes at 0
        vars.set(b'b', P0, &Value::Float(0.0)).unwrap(); // 4 bytes at 4
        vars.set(b'c', P0, &Value::Float(0.0)).unwrap(); // 4 bytes at 8
        vars.set(b'b', P0, &Value::Float(1.0)).unwrap(); // back into 4..8
        let addrs: Vec<usize> = vars.entries().iter().map(|e| e.address).collect();
        assert_eq!(addrs, [0, 4, 8]);
    }

    #[test]
    fn test_no_overlap_invariant() {
        let mut vars = VariableTable::new();
        vars.set(b'a', P0, &Value::Str(b"aaaa".to_vec())).unwrap();
        vars.set(b'b', P0, &Value::Int(7)).unwrap();
        vars.set(b'c', P1, &Value::Char(b'c')).unwrap();
        for pair in vars.entries().windows(2) {
            assert!(pair[0].address + pair[0].length <= pair[1].address);
        }
        let last = vars.entries().last().unwrap();
        assert!(last.address + last.length <= ARENA_CAPACITY);
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut vars = VariableTable::new();
        let big = Value::Str(vec![b'x'; ARENA_CAPACITY]);
        assert!(matches!(
            vars.set(b'a', P0, &big),
            Err(MemoryError::NoSpace(_))
        ));
        assert!(vars.is_empty());
    }

    #[test]
    fn test_table_exhaustion() {
        let mut vars = VariableTable::new();
        for i in 0..MAX_VARIABLES {
            vars.set(b'a' + i as u8, P0, &Value::Char(b'v')).unwrap();
        }
        assert_eq!(
            vars.set(b'z', P1, &Value::Char(b'v')),
            Err(MemoryError::TableFull)
        );
        // overwriting an existing binding still works at a full table
        assert!(vars.set(b'a', P0, &Value::Char(b'w')).is_ok());
    }

    #[test]
    fn test_teardown_removes_only_owner() {
        let mut vars = VariableTable::new();
        vars.set(b'a', P0, &Value::Int(1)).unwrap();
        vars.set(b'b', P0, &Value::Int(2)).unwrap();
        vars.set(b'a', P1, &Value::Int(3)).unwrap();
        assert_eq!(vars.remove_owned(P0), 2);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get(b'a', P1).unwrap(), Value::Int(3));
        assert_eq!(vars.get(b'a', P0), Err(MemoryError::NotFound(b'a')));
    }

    #[test]
    fn test_string_stores_terminating_zero() {
        let mut vars = VariableTable::new();
        vars.set(b's', P0, &Value::Str(b"ab".to_vec())).unwrap();
        let entry = &vars.entries()[0];
        assert_eq!(entry.length, 3);
        assert_eq!(entry.tag, Tag::Str);
    }
}
