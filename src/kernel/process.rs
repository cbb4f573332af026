//! Process control blocks and the process table
//!
//! A fixed-size table of processes, visited in slot order by the
//! scheduler. Process identifiers come from a monotone counter and are
//! never reused during a boot; slot indices shift on removal, so the two
//! must never be conflated. Each slot owns its process's operand stack,
//! which starts empty and zeroed.

use super::stack::OperandStack;

/// Maximum number of concurrent processes
pub const MAX_PROCESSES: usize = 10;

/// Process identifier (monotone, distinct from the slot index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Eligible for one instruction per scheduler tick
    Running,
    /// Skipped by the scheduler until resumed
    Paused,
    /// Awaiting removal from the table
    Terminated,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Paused => write!(f, "PAUSED"),
            ProcessState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Process-table failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The table already holds `MAX_PROCESSES` entries
    TableFull,
    /// No process with this pid was ever created
    Unknown(Pid),
    /// The pid existed but its process has already ended
    AlreadyEnded(Pid),
    /// The process is already in the requested state
    AlreadyInState(Pid, ProcessState),
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "process table is full"),
            ProcessError::Unknown(pid) => write!(f, "pid {} does not exist", pid),
            ProcessError::AlreadyEnded(pid) => write!(f, "process {} already ended", pid),
            ProcessError::AlreadyInState(pid, state) => {
                write!(f, "process {} is already {}", pid, state)
            }
        }
    }
}

impl std::error::Error for ProcessError {}

/// One process control block
#[derive(Debug)]
pub struct Process {
    /// Copy of the launched file's name
    pub name: String,
    pub pid: Pid,
    pub state: ProcessState,
    /// Offset of the next opcode, relative to `base`
    pub pc: u16,
    /// Frame pointer, reserved for future scoping
    pub fp: u16,
    /// Store offset where the program bytes begin
    pub base: u16,
    /// Key into the kernel's program-handle table
    pub handle: usize,
    /// The slot-owned operand stack; its depth is the process's `sp`
    pub stack: OperandStack,
}

impl Process {
    fn new(name: String, pid: Pid, base: u16, handle: usize) -> Self {
        Self {
            name,
            pid,
            state: ProcessState::Running,
            pc: 0,
            fp: 0,
            base,
            handle,
            stack: OperandStack::new(),
        }
    }
}

/// Fixed-size table of process control blocks
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: Vec<Process>,
    next_pid: u32,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            procs: Vec::new(),
            next_pid: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Processes in slot order.
    pub fn slots(&self) -> &[Process] {
        &self.procs
    }

    pub fn slot(&self, idx: usize) -> Option<&Process> {
        self.procs.get(idx)
    }

    pub fn slot_mut(&mut self, idx: usize) -> Option<&mut Process> {
        self.procs.get_mut(idx)
    }

    /// Create a RUNNING process in the first free slot.
    pub fn spawn(&mut self, name: &str, base: u16, handle: usize) -> Result<Pid, ProcessError> {
        if self.procs.len() >= MAX_PROCESSES {
            return Err(ProcessError::TableFull);
        }
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.procs.push(Process::new(name.to_string(), pid, base, handle));
        Ok(pid)
    }

    /// Slot index of a pid, if it is still in the table.
    pub fn slot_of(&self, pid: Pid) -> Option<usize> {
        self.procs.iter().position(|p| p.pid == pid)
    }

    pub fn by_pid(&self, pid: Pid) -> Option<&Process> {
        self.procs.iter().find(|p| p.pid == pid)
    }

    pub fn by_pid_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.iter_mut().find(|p| p.pid == pid)
    }

    /// Distinguish a pid that never existed from one whose process is gone.
    fn lookup(&mut self, pid: Pid) -> Result<&mut Process, ProcessError> {
        if pid.0 >= self.next_pid {
            return Err(ProcessError::Unknown(pid));
        }
        self.procs
            .iter_mut()
            .find(|p| p.pid == pid)
            .ok_or(ProcessError::AlreadyEnded(pid))
    }

    /// Move a process to `state`; re-entering the current state is an
    /// error, as is touching a terminated process.
    pub fn set_state(&mut self, pid: Pid, state: ProcessState) -> Result<(), ProcessError> {
        let proc = self.lookup(pid)?;
        if proc.state == ProcessState::Terminated {
            return Err(ProcessError::AlreadyEnded(pid));
        }
        if proc.state == state {
            return Err(ProcessError::AlreadyInState(pid, state));
        }
        proc.state = state;
        Ok(())
    }

    /// Mark a process terminated (removal happens separately so the caller
    /// can run teardown first).
    pub fn terminate(&mut self, pid: Pid) -> Result<(), ProcessError> {
        let proc = self.lookup(pid)?;
        proc.state = ProcessState::Terminated;
        Ok(())
    }

    /// Remove a slot; the suffix shifts left. Returns the evicted block.
    pub fn remove_slot(&mut self, idx: usize) -> Process {
        self.procs.remove(idx)
    }

    /// Put a block back into `idx`, shifting the suffix right. Used by the
    /// scheduler, which takes a block out of its slot for the duration of
    /// one instruction.
    pub fn insert_slot(&mut self, idx: usize, proc: Process) {
        self.procs.insert(idx, proc);
    }

    /// Remove by pid.
    pub fn remove_pid(&mut self, pid: Pid) -> Option<Process> {
        let idx = self.slot_of(pid)?;
        Some(self.procs.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_are_monotone() {
        let mut table = ProcessTable::new();
        let a = table.spawn("a", 0, 0).unwrap();
        let b = table.spawn("b", 0, 1).unwrap();
        table.remove_pid(a).unwrap();
        let c = table.spawn("c", 0, 2).unwrap();
        assert_eq!((a, b, c), (Pid(0), Pid(1), Pid(2)));
    }

    #[test]
    fn test_spawn_starts_running_with_clean_state() {
        let mut table = ProcessTable::new();
        let pid = table.spawn("prog", 162, 5).unwrap();
        let proc = table.by_pid(pid).unwrap();
        assert_eq!(proc.state, ProcessState::Running);
        assert_eq!(proc.pc, 0);
        assert_eq!(proc.fp, 0);
        assert_eq!(proc.base, 162);
        assert_eq!(proc.handle, 5);
        assert!(proc.stack.is_empty());
    }

    #[test]
    fn test_table_full() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.spawn("p", 0, 0).unwrap();
        }
        assert_eq!(table.spawn("p", 0, 0), Err(ProcessError::TableFull));
    }

    #[test]
    fn test_slot_shift_on_removal() {
        let mut table = ProcessTable::new();
        let a = table.spawn("a", 0, 0).unwrap();
        let b = table.spawn("b", 0, 0).unwrap();
        let c = table.spawn("c", 0, 0).unwrap();
        table.remove_pid(b).unwrap();
        assert_eq!(table.slots()[0].pid, a);
        assert_eq!(table.slots()[1].pid, c);
        // pid lookup survives the shift
        assert_eq!(table.slot_of(c), Some(1));
    }

    #[test]
    fn test_state_transitions() {
        let mut table = ProcessTable::new();
        let pid = table.spawn("p", 0, 0).unwrap();
        table.set_state(pid, ProcessState::Paused).unwrap();
        assert_eq!(
            table.set_state(pid, ProcessState::Paused),
            Err(ProcessError::AlreadyInState(pid, ProcessState::Paused))
        );
        table.set_state(pid, ProcessState::Running).unwrap();
        assert_eq!(table.by_pid(pid).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_unknown_vs_already_ended() {
        let mut table = ProcessTable::new();
        let pid = table.spawn("p", 0, 0).unwrap();
        table.remove_pid(pid).unwrap();
        assert_eq!(
            table.set_state(pid, ProcessState::Paused),
            Err(ProcessError::AlreadyEnded(pid))
        );
        assert_eq!(
            table.set_state(Pid(99), ProcessState::Paused),
            Err(ProcessError::Unknown(Pid(99)))
        );
    }
}
