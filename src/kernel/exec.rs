//! The kernel: one value owning every table, plus the interpreter and the
//! cooperative scheduler.
//!
//! `tick()` walks the process table in slot order and executes exactly one
//! bytecode instruction per RUNNING process. There is no preemption and no
//! priority; suspension points are exactly the boundaries between
//! instructions. Opcodes that wait for something (`DELAYUNTIL`,
//! `WAITUNTILDONE`) never loop inside an instruction: they rewind the
//! program counter, re-push what they popped, and hand control back to the
//! scheduler.
//!
//! Program bytes are read from the persistent store through handles: each
//! running process owns one entry in the handle table, released when the
//! process is removed.

use slab::Slab;

use super::fat::{FatEntry, FatError, FileTable};
use super::memory::{MemoryError, VariableTable};
use super::opcode::Opcode;
use super::process::{
    Pid, Process, ProcessError, ProcessState, ProcessTable, MAX_PROCESSES,
};
use super::stack::StackError;
use super::trace::{TraceCategory, Tracer};
use super::value::{widen, Tag, Value};
use crate::platform::Platform;

/// Kernel-level failure, surfaced to the console and never further
#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    Fat(FatError),
    Memory(MemoryError),
    Process(ProcessError),
    Stack(StackError),
    /// An operation popped a value of the wrong type
    TypeMismatch { expected: &'static str, found: Tag },
    /// The program counter ran past the end of the file
    PcOutOfRange,
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Fat(e) => write!(f, "{}", e),
            ExecError::Memory(e) => write!(f, "{}", e),
            ExecError::Process(e) => write!(f, "{}", e),
            ExecError::Stack(e) => write!(f, "{}", e),
            ExecError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            ExecError::PcOutOfRange => write!(f, "program counter ran past end of file"),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<FatError> for ExecError {
    fn from(e: FatError) -> Self {
        ExecError::Fat(e)
    }
}

impl From<MemoryError> for ExecError {
    fn from(e: MemoryError) -> Self {
        ExecError::Memory(e)
    }
}

impl From<ProcessError> for ExecError {
    fn from(e: ProcessError) -> Self {
        ExecError::Process(e)
    }
}

impl From<StackError> for ExecError {
    fn from(e: StackError) -> Self {
        ExecError::Stack(e)
    }
}

/// What an instruction did to its process
enum StepOutcome {
    /// Keep running
    Continue,
    /// The process executed STOP
    Stopped,
}

/// A read handle on one program's bytes in the store
#[derive(Debug, Clone, Copy)]
struct ProgramHandle {
    begin: u16,
    length: u16,
}

/// The operating system core: all tables, the arena, and the platform.
///
/// Initialised once at boot; every entry point (the scheduler tick and the
/// shell command handlers) operates on one mutable reference to it.
pub struct Kernel<P: Platform> {
    platform: P,
    files: FileTable,
    vars: VariableTable,
    procs: ProcessTable,
    handles: Slab<ProgramHandle>,
    tracer: Tracer,
}

impl<P: Platform> Kernel<P> {
    /// Boot: take ownership of the platform and read the file table.
    pub fn new(platform: P) -> Self {
        let mut kernel = Self {
            platform,
            files: FileTable::new(),
            vars: VariableTable::new(),
            procs: ProcessTable::new(),
            handles: Slab::new(),
            tracer: Tracer::new(),
        };
        kernel.files.load(&kernel.platform);
        kernel
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn vars(&self) -> &VariableTable {
        &self.vars
    }

    pub fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    fn trace(&mut self, category: TraceCategory, name: &str, pid: Option<Pid>) {
        let now = self.platform.now_ms();
        self.tracer.event(now, category, name, pid, None);
    }

    // ===== File operations (shell-facing) =====

    /// Persist `data` under `name`. The in-memory table is re-read first;
    /// the header and payload are written back on success.
    pub fn store_file(&mut self, name: &str, data: &[u8]) -> Result<(), ExecError> {
        FileTable::validate_name(name)?;
        self.files.load(&self.platform);
        if self.files.is_full() {
            return Err(FatError::TableFull.into());
        }
        if self.files.find(name).is_some() {
            return Err(FatError::Duplicate(name.to_string()).into());
        }
        let begin = self.files.place(data.len(), self.platform.store_capacity())?;
        self.files.insert(FatEntry {
            name: name.to_string(),
            begin,
            length: data.len() as u16,
        });
        self.files.flush(&mut self.platform);
        self.platform.store_write_bytes(begin as usize, data);
        self.platform.store_flush();
        self.tracer.stats.files_stored += 1;
        self.trace(TraceCategory::File, "store", None);
        Ok(())
    }

    /// Read a file's payload byte-for-byte.
    pub fn retrieve_file(&mut self, name: &str) -> Result<Vec<u8>, ExecError> {
        self.files.load(&self.platform);
        let entry = self
            .files
            .find(name)
            .ok_or_else(|| FatError::NotFound(name.to_string()))?;
        Ok(self
            .platform
            .store_read_bytes(entry.begin as usize, entry.length as usize))
    }

    /// Remove a file's directory entry. Payload bytes are left in place
    /// and become part of the free region.
    pub fn erase_file(&mut self, name: &str) -> Result<(), ExecError> {
        self.files.load(&self.platform);
        self.files.remove(name)?;
        self.files.flush(&mut self.platform);
        self.platform.store_flush();
        self.tracer.stats.files_erased += 1;
        self.trace(TraceCategory::File, "erase", None);
        Ok(())
    }

    /// Directory entries in `begin` order.
    pub fn list_files(&mut self) -> Vec<FatEntry> {
        self.files.load(&self.platform);
        self.files.entries().to_vec()
    }

    /// Unallocated data-area bytes.
    pub fn free_space(&mut self) -> usize {
        self.files.load(&self.platform);
        self.files.free_space(self.platform.store_capacity())
    }

    // ===== Process operations (shell-facing) =====

    /// Launch a file as a new RUNNING process.
    pub fn run_program(&mut self, name: &str) -> Result<Pid, ExecError> {
        self.files.load(&self.platform);
        let entry = self
            .files
            .find(name)
            .ok_or_else(|| FatError::NotFound(name.to_string()))?
            .clone();
        let handle = self.handles.insert(ProgramHandle {
            begin: entry.begin,
            length: entry.length,
        });
        match self.procs.spawn(name, entry.begin, handle) {
            Ok(pid) => {
                self.tracer.stats.processes_spawned += 1;
                self.trace(TraceCategory::Process, "spawn", Some(pid));
                Ok(pid)
            }
            Err(e) => {
                self.handles.remove(handle);
                Err(e.into())
            }
        }
    }

    /// Mark a process PAUSED.
    pub fn suspend(&mut self, pid: Pid) -> Result<(), ExecError> {
        self.procs.set_state(pid, ProcessState::Paused)?;
        self.trace(TraceCategory::Process, "suspend", Some(pid));
        Ok(())
    }

    /// Mark a process RUNNING again.
    pub fn resume(&mut self, pid: Pid) -> Result<(), ExecError> {
        self.procs.set_state(pid, ProcessState::Running)?;
        self.trace(TraceCategory::Process, "resume", Some(pid));
        Ok(())
    }

    /// Terminate a process and remove it, tearing down its variables.
    pub fn kill(&mut self, pid: Pid) -> Result<(), ExecError> {
        self.procs.terminate(pid)?;
        if let Some(proc) = self.procs.remove_pid(pid) {
            self.teardown(proc);
        }
        Ok(())
    }

    // ===== Scheduler =====

    /// One scheduler pass: exactly one instruction per RUNNING process, in
    /// slot order. Terminated processes are reaped eagerly, and removal
    /// never skips the process shifted into the vacated slot.
    pub fn tick(&mut self) {
        self.tracer.stats.ticks += 1;
        let mut slot = 0;
        while slot < self.procs.len() {
            let state = match self.procs.slot(slot) {
                Some(proc) => proc.state,
                None => break,
            };
            match state {
                ProcessState::Paused => slot += 1,
                ProcessState::Terminated => {
                    let proc = self.procs.remove_slot(slot);
                    self.teardown(proc);
                }
                ProcessState::Running => {
                    if self.step(slot) {
                        slot += 1;
                    }
                }
            }
        }
    }

    /// Execute one instruction for the process at `slot`. Returns whether
    /// the process is still in the table afterwards.
    fn step(&mut self, slot: usize) -> bool {
        // Take the block out of its slot so the instruction can borrow the
        // stack, the platform, and the tables at the same time; re-insert
        // unless the process ended.
        let mut proc = self.procs.remove_slot(slot);
        self.tracer.stats.instructions += 1;
        match self.exec_instruction(&mut proc) {
            Ok(StepOutcome::Continue) => {
                self.procs.insert_slot(slot, proc);
                true
            }
            Ok(StepOutcome::Stopped) => {
                self.platform
                    .console_write_line(&format!("Process {} finished.", proc.pid));
                self.teardown(proc);
                false
            }
            Err(e) => {
                self.platform
                    .console_write_line(&format!("Process {} terminated: {}", proc.pid, e));
                self.tracer.stats.errors += 1;
                self.teardown(proc);
                false
            }
        }
    }

    /// Release everything a dead process owned.
    fn teardown(&mut self, proc: Process) {
        self.vars.remove_owned(proc.pid);
        self.handles.remove(proc.handle);
        self.tracer.stats.processes_exited += 1;
        self.trace(TraceCategory::Process, "exit", Some(proc.pid));
    }

    /// Report a non-fatal execution problem.
    fn report(&mut self, pid: Pid, what: &str) {
        self.platform
            .console_write_line(&format!("Process {}: {}", pid, what));
        self.tracer.stats.errors += 1;
    }

    // ===== Interpreter =====

    /// Read the next program byte, advancing `pc`.
    fn fetch(&self, prog: ProgramHandle, proc: &mut Process) -> Result<u8, ExecError> {
        if proc.pc >= prog.length {
            return Err(ExecError::PcOutOfRange);
        }
        let b = self
            .platform
            .store_read(prog.begin as usize + proc.pc as usize);
        proc.pc += 1;
        Ok(b)
    }

    fn exec_instruction(&mut self, proc: &mut Process) -> Result<StepOutcome, ExecError> {
        let prog = self.handles[proc.handle];
        let pid = proc.pid;
        let op_byte = self.fetch(prog, proc)?;
        let Some(op) = Opcode::from_byte(op_byte) else {
            // Reference behaviour: report, skip the byte, keep running.
            self.report(pid, &format!("unknown opcode 0x{:02X}, skipping", op_byte));
            return Ok(StepOutcome::Continue);
        };

        match op {
            Opcode::Char => {
                let b = self.fetch(prog, proc)?;
                proc.stack.push_value(&Value::Char(b))?;
            }
            Opcode::Int => {
                let hi = self.fetch(prog, proc)?;
                let lo = self.fetch(prog, proc)?;
                proc.stack.push_value(&Value::Int(i16::from_be_bytes([hi, lo])))?;
            }
            Opcode::Str => {
                let mut bytes = Vec::new();
                loop {
                    let b = self.fetch(prog, proc)?;
                    if b == 0 {
                        break;
                    }
                    bytes.push(b);
                }
                proc.stack.push_value(&Value::Str(bytes))?;
            }
            Opcode::Float => {
                let mut b = [0u8; 4];
                for slot in b.iter_mut() {
                    *slot = self.fetch(prog, proc)?;
                }
                proc.stack.push_value(&Value::Float(f32::from_be_bytes(b)))?;
            }
            Opcode::Set => {
                let name = self.fetch(prog, proc)?;
                let value = proc.stack.pop_value()?;
                if let Err(e) = self.vars.set(name, pid, &value) {
                    // value consumed, binding absent; the process goes on
                    self.report(pid, &format!("set '{}': {}", name as char, e));
                }
            }
            Opcode::Get => {
                let name = self.fetch(prog, proc)?;
                match self.vars.get(name, pid) {
                    Ok(value) => proc.stack.push_value(&value)?,
                    Err(e) => self.report(pid, &e.to_string()),
                }
            }
            Opcode::Increment => {
                let value = proc.stack.pop_value()?;
                proc.stack.push_value(&unary_add(&value, 1)?)?;
            }
            Opcode::Decrement => {
                let value = proc.stack.pop_value()?;
                proc.stack.push_value(&unary_add(&value, -1)?)?;
            }
            Opcode::Plus => {
                let y = proc.stack.pop_value()?;
                let x = proc.stack.pop_value()?;
                proc.stack.push_value(&binary_arith(&x, &y, false)?)?;
            }
            Opcode::Minus => {
                let y = proc.stack.pop_value()?;
                let x = proc.stack.pop_value()?;
                proc.stack.push_value(&binary_arith(&x, &y, true)?)?;
            }
            Opcode::Delay => {
                // reserved
            }
            Opcode::DelayUntil => {
                let deadline = pop_int(&mut proc.stack)?;
                let now = self.platform.now_ms() as i16;
                if now < deadline {
                    // retry on the next scheduler visit
                    proc.pc -= 1;
                    proc.stack.push_value(&Value::Int(deadline))?;
                }
            }
            Opcode::Millis => {
                let now = self.platform.now_ms() as i16;
                proc.stack.push_value(&Value::Int(now))?;
            }
            Opcode::PinMode => {
                let direction = pop_int(&mut proc.stack)?;
                let pin = pop_int(&mut proc.stack)?;
                self.platform.pin_mode(pin, direction);
            }
            Opcode::DigitalWrite => {
                let value = pop_int(&mut proc.stack)?;
                let pin = pop_int(&mut proc.stack)?;
                self.platform.digital_write(pin, value);
            }
            Opcode::Print | Opcode::Println => {
                let value = proc.stack.pop_value()?;
                self.platform.console_write_str(&value.render());
                if op == Opcode::Println {
                    self.platform.console_write(b"\n");
                }
            }
            Opcode::Fork => {
                let value = proc.stack.pop_value()?;
                let Value::Str(name_bytes) = value else {
                    return Err(ExecError::TypeMismatch {
                        expected: "STRING",
                        found: value.tag(),
                    });
                };
                let name = String::from_utf8_lossy(&name_bytes).into_owned();
                // the caller is out of its slot, so reserve room for it
                if self.procs.len() + 1 >= MAX_PROCESSES {
                    return Err(ProcessError::TableFull.into());
                }
                let child = self.run_program(&name)?;
                proc.stack.push_value(&Value::Int(child.0 as i16))?;
            }
            Opcode::WaitUntilDone => {
                let raw = pop_int(&mut proc.stack)?;
                let alive = raw >= 0
                    && self
                        .procs
                        .by_pid(Pid(raw as u32))
                        .is_some_and(|p| p.state != ProcessState::Terminated);
                if alive {
                    proc.pc -= 1;
                    proc.stack.push_value(&Value::Int(raw))?;
                }
            }
            Opcode::Stop => {
                return Ok(StepOutcome::Stopped);
            }
        }
        Ok(StepOutcome::Continue)
    }
}

/// Pop a value that must be an INT.
fn pop_int(stack: &mut super::stack::OperandStack) -> Result<i16, ExecError> {
    let value = stack.pop_value()?;
    match value {
        Value::Int(i) => Ok(i),
        other => Err(ExecError::TypeMismatch {
            expected: "INT",
            found: other.tag(),
        }),
    }
}

/// INCREMENT/DECREMENT: same tag in, same tag out, wrapping.
fn unary_add(value: &Value, delta: i16) -> Result<Value, ExecError> {
    Ok(match value {
        Value::Char(c) => Value::Char(c.wrapping_add(delta as u8)),
        Value::Int(i) => Value::Int(i.wrapping_add(delta)),
        Value::Float(f) => Value::Float(f + delta as f32),
        Value::Str(_) => {
            return Err(ExecError::TypeMismatch {
                expected: "CHAR, INT or FLOAT",
                found: Tag::Str,
            })
        }
    })
}

/// PLUS/MINUS: result takes the widest input tag (CHAR < INT < FLOAT);
/// integer overflow wraps; STRING is rejected.
fn binary_arith(x: &Value, y: &Value, subtract: bool) -> Result<Value, ExecError> {
    let out = widen(x.tag(), y.tag()).ok_or(ExecError::TypeMismatch {
        expected: "CHAR, INT or FLOAT",
        found: Tag::Str,
    })?;
    Ok(match out {
        Tag::Char => {
            let (a, b) = (as_i16(x), as_i16(y));
            let r = if subtract {
                a.wrapping_sub(b)
            } else {
                a.wrapping_add(b)
            };
            Value::Char(r as u8)
        }
        Tag::Int => {
            let (a, b) = (as_i16(x), as_i16(y));
            Value::Int(if subtract {
                a.wrapping_sub(b)
            } else {
                a.wrapping_add(b)
            })
        }
        Tag::Float | Tag::Str => {
            // widen never yields STRING, so this is the FLOAT arm
            let (a, b) = (as_f32(x), as_f32(y));
            Value::Float(if subtract { a - b } else { a + b })
        }
    })
}

fn as_i16(v: &Value) -> i16 {
    match v {
        Value::Char(c) => *c as i16,
        Value::Int(i) => *i,
        Value::Float(f) => *f as i16,
        Value::Str(_) => 0,
    }
}

fn as_f32(v: &Value) -> f32 {
    match v {
        Value::Char(c) => *c as f32,
        Value::Int(i) => *i as f32,
        Value::Float(f) => *f,
        Value::Str(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::opcode::Opcode as Op;
    use crate::platform::SimPlatform;

    fn kernel() -> Kernel<SimPlatform> {
        Kernel::new(SimPlatform::new(1024))
    }

    /// Build program bytes from opcode/operand pieces.
    fn program(pieces: &[&[u8]]) -> Vec<u8> {
        pieces.concat()
    }

    fn launch(kernel: &mut Kernel<SimPlatform>, name: &str, bytes: &[u8]) -> Pid {
        kernel.store_file(name, bytes).unwrap();
        kernel.run_program(name).unwrap()
    }

    /// Tick until the table drains (bounded, so a broken retry loops the
    /// test failure instead of the suite).
    fn drain(kernel: &mut Kernel<SimPlatform>, max_ticks: usize) {
        for _ in 0..max_ticks {
            if kernel.procs().is_empty() {
                return;
            }
            kernel.tick();
            kernel.platform_mut().advance_ms(1);
        }
        panic!("process table did not drain");
    }

    #[test]
    fn test_store_retrieve_round_trip() {
        let mut k = kernel();
        k.store_file("foo", b"HELLO").unwrap();
        assert_eq!(k.retrieve_file("foo").unwrap(), b"HELLO");
        assert_eq!(k.free_space(), 1024 - 162 - 5);
    }

    #[test]
    fn test_store_duplicate_and_missing() {
        let mut k = kernel();
        k.store_file("foo", b"x").unwrap();
        assert!(matches!(
            k.store_file("foo", b"y"),
            Err(ExecError::Fat(FatError::Duplicate(_)))
        ));
        assert!(matches!(
            k.retrieve_file("bar"),
            Err(ExecError::Fat(FatError::NotFound(_)))
        ));
    }

    #[test]
    fn test_table_full_leaves_store_unmodified() {
        let mut k = kernel();
        for i in 0..10 {
            k.store_file(&format!("f{}", i), b"abc").unwrap();
        }
        let before = k.platform().store_bytes().to_vec();
        assert!(matches!(
            k.store_file("extra", b"abc"),
            Err(ExecError::Fat(FatError::TableFull))
        ));
        assert_eq!(k.platform().store_bytes(), &before[..]);
    }

    #[test]
    fn test_erase_gap_is_refilled() {
        let mut k = kernel();
        k.store_file("a", b"aaa").unwrap();
        k.store_file("b", b"bbb").unwrap();
        k.store_file("c", b"ccc").unwrap();
        k.erase_file("b").unwrap();
        k.store_file("d", b"ddd").unwrap();
        let entries = k.list_files();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "d", "c"]);
        assert_eq!(entries[1].begin, entries[0].begin + 3);
    }

    #[test]
    fn test_run_missing_file() {
        let mut k = kernel();
        assert!(matches!(
            k.run_program("missing"),
            Err(ExecError::Fat(FatError::NotFound(_)))
        ));
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_add_and_println() {
        // INT 5, INT 7, PLUS, PRINTLN, STOP
        let bytes = program(&[
            &[Op::Int.byte(), 0x00, 0x05],
            &[Op::Int.byte(), 0x00, 0x07],
            &[Op::Plus.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "add", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.starts_with("12\n"), "unexpected output: {:?}", out);
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_set_get_string_and_teardown() {
        // STRING "hi", SET 'x', GET 'x', PRINTLN, STOP
        let bytes = program(&[
            &[Op::Str.byte()],
            b"hi\0",
            &[Op::Set.byte(), b'x'],
            &[Op::Get.byte(), b'x'],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "greet", &bytes);
        k.tick(); // STRING push
        k.tick(); // SET
        assert_eq!(k.vars().len(), 1);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("hi\n"));
        // STOP tears the variable down
        assert!(k.vars().is_empty());
    }

    #[test]
    fn test_char_and_float_printing() {
        let bytes = program(&[
            &[Op::Char.byte(), b'A'],
            &[Op::Print.byte()],
            &[Op::Float.byte()],
            &1.5f32.to_be_bytes()[..],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "p", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("A1.50000\n"));
    }

    #[test]
    fn test_widening_char_plus_int() {
        // CHAR 1, INT 2, PLUS -> INT 3
        let bytes = program(&[
            &[Op::Char.byte(), 1],
            &[Op::Int.byte(), 0, 2],
            &[Op::Plus.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "w", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("3\n"));
    }

    #[test]
    fn test_widening_int_plus_float() {
        let bytes = program(&[
            &[Op::Int.byte(), 0, 2],
            &[Op::Float.byte()],
            &0.5f32.to_be_bytes()[..],
            &[Op::Plus.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "wf", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("2.50000\n"));
    }

    #[test]
    fn test_integer_overflow_wraps() {
        // INT 0x7FFF, INCREMENT -> -0x8000
        let bytes = program(&[
            &[Op::Int.byte(), 0x7F, 0xFF],
            &[Op::Increment.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "wrap", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("-32768\n"));
    }

    #[test]
    fn test_minus_order() {
        // 10 - 3 = 7
        let bytes = program(&[
            &[Op::Int.byte(), 0, 10],
            &[Op::Int.byte(), 0, 3],
            &[Op::Minus.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "sub", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("7\n"));
    }

    #[test]
    fn test_string_arithmetic_terminates_process() {
        let bytes = program(&[
            &[Op::Str.byte()],
            b"no\0",
            &[Op::Int.byte(), 0, 1],
            &[Op::Plus.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "bad", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("type mismatch"), "{:?}", out);
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        let bytes = program(&[
            &[0xEE], // not an opcode
            &[Op::Int.byte(), 0, 9],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "junk", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("unknown opcode 0xEE"));
        // the process kept going
        assert!(out.contains("9\n"));
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_stack_overflow_terminates_process() {
        // push a 40-byte string twice into a 64-byte stack
        let mut text = vec![b'x'; 40];
        text.push(0);
        let bytes = program(&[
            &[Op::Str.byte()],
            &text,
            &[Op::Str.byte()],
            &text,
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "deep", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("stack overflow"), "{:?}", out);
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_missing_variable_is_not_fatal() {
        let bytes = program(&[
            &[Op::Get.byte(), b'q'],
            &[Op::Int.byte(), 0, 4],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "miss", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("does not exist"));
        assert!(out.contains("4\n"));
    }

    #[test]
    fn test_delayuntil_yields_until_deadline() {
        // clock starts at 0; deadline 3 -> retried while now < 3
        let bytes = program(&[
            &[Op::Int.byte(), 0, 3],
            &[Op::DelayUntil.byte()],
            &[Op::Int.byte(), 0, 1],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "wait", &bytes);
        k.tick(); // push deadline
        // clock at 0: three retry visits while now < 3
        for expected_pc in [3u16, 3, 3] {
            k.tick();
            assert_eq!(k.procs().slots()[0].pc, expected_pc);
            k.platform_mut().advance_ms(1);
        }
        // now == 3: the instruction completes
        k.tick();
        assert_eq!(k.procs().slots()[0].pc, 4);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().contains("1\n"));
    }

    #[test]
    fn test_millis_pushes_clock() {
        let bytes = program(&[
            &[Op::Millis.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        k.platform_mut().advance_ms(777);
        launch(&mut k, "clock", &bytes);
        drain(&mut k, 20);
        assert!(k.platform_mut().take_output().starts_with("777\n"));
    }

    #[test]
    fn test_pin_opcodes_reach_platform() {
        use crate::platform::PinEvent;
        // pin 13 OUTPUT(1); pin 13 HIGH(1)
        let bytes = program(&[
            &[Op::Int.byte(), 0, 13],
            &[Op::Int.byte(), 0, 1],
            &[Op::PinMode.byte()],
            &[Op::Int.byte(), 0, 13],
            &[Op::Int.byte(), 0, 1],
            &[Op::DigitalWrite.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "blink", &bytes);
        drain(&mut k, 20);
        assert_eq!(
            k.platform().pin_events(),
            &[
                PinEvent::Mode { pin: 13, direction: 1 },
                PinEvent::Write { pin: 13, value: 1 },
            ]
        );
    }

    #[test]
    fn test_fork_and_waituntildone() {
        let mut k = kernel();
        // child: STOP immediately
        k.store_file("child", &[Op::Stop.byte()]).unwrap();
        // parent: STRING "child", FORK, WAITUNTILDONE, STOP
        let parent = program(&[
            &[Op::Str.byte()],
            b"child\0",
            &[Op::Fork.byte()],
            &[Op::WaitUntilDone.byte()],
            &[Op::Stop.byte()],
        ]);
        k.store_file("parent", &parent).unwrap();
        let parent_pid = k.run_program("parent").unwrap();

        k.tick(); // parent pushes the name
        k.tick(); // parent forks; child runs its STOP in the same tick
        assert_eq!(k.procs().len(), 1);
        assert_eq!(k.procs().slots()[0].pid, parent_pid);
        // child is gone, so the wait completes, then the parent stops
        drain(&mut k, 20);
        assert!(k.procs().is_empty());
        let out = k.platform_mut().take_output();
        assert!(out.contains("finished."));
    }

    #[test]
    fn test_fork_pushes_child_pid() {
        let mut k = kernel();
        k.store_file("child", &[Op::Stop.byte()]).unwrap();
        let parent = program(&[
            &[Op::Str.byte()],
            b"child\0",
            &[Op::Fork.byte()],
            &[Op::Println.byte()],
            &[Op::Stop.byte()],
        ]);
        k.store_file("parent", &parent).unwrap();
        let parent_pid = k.run_program("parent").unwrap();
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        // the child pid is the next counter value
        let child = parent_pid.0 + 1;
        assert!(out.contains(&format!("{}\n", child)), "{:?}", out);
    }

    #[test]
    fn test_fork_missing_file_terminates_parent() {
        let parent = program(&[
            &[Op::Str.byte()],
            b"ghost\0",
            &[Op::Fork.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        launch(&mut k, "parent", &parent);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("not found"), "{:?}", out);
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_suspend_resume_kill() {
        let bytes = program(&[
            &[Op::Int.byte(), 0, 1],
            &[Op::Int.byte(), 0, 1],
            &[Op::Plus.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        let pid = launch(&mut k, "p", &bytes);
        k.suspend(pid).unwrap();
        k.tick();
        assert_eq!(k.procs().slots()[0].pc, 0); // paused, no progress
        assert!(matches!(
            k.suspend(pid),
            Err(ExecError::Process(ProcessError::AlreadyInState(_, _)))
        ));
        k.resume(pid).unwrap();
        k.tick();
        assert_eq!(k.procs().slots()[0].pc, 3);
        k.kill(pid).unwrap();
        assert!(k.procs().is_empty());
        assert!(matches!(
            k.kill(pid),
            Err(ExecError::Process(ProcessError::AlreadyEnded(_)))
        ));
        assert!(matches!(
            k.kill(Pid(42)),
            Err(ExecError::Process(ProcessError::Unknown(_)))
        ));
    }

    #[test]
    fn test_kill_tears_down_variables() {
        let bytes = program(&[
            &[Op::Int.byte(), 0, 5],
            &[Op::Set.byte(), b'v'],
            &[Op::Delay.byte()],
            &[Op::Stop.byte()],
        ]);
        let mut k = kernel();
        let pid = launch(&mut k, "v", &bytes);
        k.tick();
        k.tick();
        assert_eq!(k.vars().len(), 1);
        k.kill(pid).unwrap();
        assert!(k.vars().is_empty());
    }

    #[test]
    fn test_round_robin_is_slot_ordered() {
        let mut k = kernel();
        let a = program(&[&[Op::Char.byte(), b'a'], &[Op::Print.byte()], &[Op::Stop.byte()]]);
        let b = program(&[&[Op::Char.byte(), b'b'], &[Op::Print.byte()], &[Op::Stop.byte()]]);
        k.store_file("a", &a).unwrap();
        k.store_file("b", &b).unwrap();
        k.run_program("a").unwrap();
        k.run_program("b").unwrap();
        k.tick();
        k.tick();
        let out = k.platform_mut().take_output();
        // within every tick, slot 0 executes before slot 1
        assert!(out.starts_with("ab"), "{:?}", out);
    }

    #[test]
    fn test_pc_out_of_range_terminates() {
        // no STOP: the program runs off its end
        let bytes = program(&[&[Op::Char.byte(), b'x'], &[Op::Print.byte()]]);
        let mut k = kernel();
        launch(&mut k, "runoff", &bytes);
        drain(&mut k, 20);
        let out = k.platform_mut().take_output();
        assert!(out.contains("ran past end"), "{:?}", out);
        assert!(k.procs().is_empty());
    }

    #[test]
    fn test_stats_count_work() {
        let bytes = program(&[&[Op::Stop.byte()]]);
        let mut k = kernel();
        launch(&mut k, "s", &bytes);
        drain(&mut k, 20);
        let stats = k.tracer().stats;
        assert_eq!(stats.processes_spawned, 1);
        assert_eq!(stats.processes_exited, 1);
        assert_eq!(stats.files_stored, 1);
        assert!(stats.instructions >= 1);
    }
}
