//! The shell commands
//!
//! Ten commands with fixed arity, dispatched onto kernel operations. All
//! output goes to the platform console; an error aborts only the command
//! it occurred in.

use super::parser::{is_numeric, CommandLine};
use crate::kernel::{ExecError, FatError, Kernel, Pid, ProcessState};
use crate::platform::Platform;

/// One entry in the command table
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: usize,
}

/// The known commands and their argument counts
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "store", arity: 2 },
    CommandSpec { name: "retrieve", arity: 1 },
    CommandSpec { name: "erase", arity: 1 },
    CommandSpec { name: "files", arity: 0 },
    CommandSpec { name: "freespace", arity: 0 },
    CommandSpec { name: "run", arity: 1 },
    CommandSpec { name: "list", arity: 0 },
    CommandSpec { name: "suspend", arity: 1 },
    CommandSpec { name: "resume", arity: 1 },
    CommandSpec { name: "kill", arity: 1 },
];

/// What the dispatcher asks of the caller next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinOutcome {
    /// The command is finished
    Done,
    /// `store` was accepted: collect this many raw console bytes, then
    /// call [`finish_store`]
    CollectPayload { name: String, size: usize },
}

/// Execute one tokenised command.
pub fn execute<P: Platform>(kernel: &mut Kernel<P>, cmd: &CommandLine) -> BuiltinOutcome {
    let Some(spec) = COMMANDS.iter().find(|s| s.name == cmd.name) else {
        let platform = kernel.platform_mut();
        platform.console_write_line(&format!(
            "Command '{}' is not a known command.",
            cmd.name
        ));
        platform.console_write_line("Available commands:");
        for spec in COMMANDS {
            platform.console_write_line(spec.name);
        }
        return BuiltinOutcome::Done;
    };
    if cmd.args.len() != spec.arity {
        kernel
            .platform_mut()
            .console_write_line(&format!("{} arguments required", spec.arity));
        return BuiltinOutcome::Done;
    }
    match spec.name {
        "store" => store(kernel, &cmd.args[0], &cmd.args[1]),
        "retrieve" => {
            retrieve(kernel, &cmd.args[0]);
            BuiltinOutcome::Done
        }
        "erase" => {
            erase(kernel, &cmd.args[0]);
            BuiltinOutcome::Done
        }
        "files" => {
            files(kernel);
            BuiltinOutcome::Done
        }
        "freespace" => {
            let free = kernel.free_space();
            kernel
                .platform_mut()
                .console_write_line(&format!("Available space: {}", free));
            BuiltinOutcome::Done
        }
        "run" => {
            run(kernel, &cmd.args[0]);
            BuiltinOutcome::Done
        }
        "list" => {
            list(kernel);
            BuiltinOutcome::Done
        }
        "suspend" => {
            with_pid(kernel, &cmd.args[0], |kernel, pid| {
                kernel.suspend(pid)?;
                Ok(format!("Process {} has been suspended.", pid))
            });
            BuiltinOutcome::Done
        }
        "resume" => {
            with_pid(kernel, &cmd.args[0], |kernel, pid| {
                kernel.resume(pid)?;
                Ok(format!("Process {} has been resumed.", pid))
            });
            BuiltinOutcome::Done
        }
        "kill" => {
            with_pid(kernel, &cmd.args[0], |kernel, pid| {
                kernel.kill(pid)?;
                Ok(format!("Process {} has been killed.", pid))
            });
            BuiltinOutcome::Done
        }
        _ => BuiltinOutcome::Done,
    }
}

fn store<P: Platform>(kernel: &mut Kernel<P>, name: &str, size: &str) -> BuiltinOutcome {
    if !is_numeric(size) {
        kernel
            .platform_mut()
            .console_write_line("Error. Invalid file size.");
        return BuiltinOutcome::Done;
    }
    let size: usize = match size.parse() {
        Ok(n) if n > 0 => n,
        _ => {
            kernel
                .platform_mut()
                .console_write_line("Error. Invalid file size.");
            return BuiltinOutcome::Done;
        }
    };
    kernel
        .platform_mut()
        .console_write_line("Give input for file:");
    BuiltinOutcome::CollectPayload {
        name: name.to_string(),
        size,
    }
}

/// Complete a `store` once its payload bytes have arrived.
pub fn finish_store<P: Platform>(kernel: &mut Kernel<P>, name: &str, data: &[u8]) {
    let message = match kernel.store_file(name, data) {
        Ok(()) => "File has been stored.".to_string(),
        Err(ExecError::Fat(FatError::TableFull)) => {
            "File cannot be stored, limit reached.".to_string()
        }
        Err(ExecError::Fat(FatError::Duplicate(_))) => {
            "File cannot be stored, given name already exists.".to_string()
        }
        Err(ExecError::Fat(FatError::NoSpace(_))) => {
            "Error: No space left for file.".to_string()
        }
        Err(e) => format!("Error: {}", e),
    };
    kernel.platform_mut().console_write_line(&message);
}

fn retrieve<P: Platform>(kernel: &mut Kernel<P>, name: &str) {
    match kernel.retrieve_file(name) {
        Ok(data) => {
            let platform = kernel.platform_mut();
            platform.console_write(&data);
            platform.console_write(b"\n");
        }
        Err(_) => {
            kernel.platform_mut().console_write_line("File not found.");
        }
    }
}

fn erase<P: Platform>(kernel: &mut Kernel<P>, name: &str) {
    match kernel.erase_file(name) {
        Ok(()) => kernel
            .platform_mut()
            .console_write_line(&format!("Erased: {}", name)),
        Err(_) => kernel.platform_mut().console_write_line("File not found."),
    }
}

fn files<P: Platform>(kernel: &mut Kernel<P>) {
    let entries = kernel.list_files();
    let platform = kernel.platform_mut();
    platform.console_write_line(&format!("{} files found", entries.len()));
    for (i, entry) in entries.iter().enumerate() {
        platform.console_write_line(&format!(
            "File {}: name={} begin={} length={}",
            i, entry.name, entry.begin, entry.length
        ));
    }
}

fn run<P: Platform>(kernel: &mut Kernel<P>, name: &str) {
    match kernel.run_program(name) {
        Ok(pid) => kernel
            .platform_mut()
            .console_write_line(&format!("Process {} has been started.", pid)),
        Err(ExecError::Fat(FatError::NotFound(_))) => {
            kernel.platform_mut().console_write_line("File does not exist.");
        }
        Err(e) => {
            kernel
                .platform_mut()
                .console_write_line(&format!("Error: {}", e));
        }
    }
}

fn list<P: Platform>(kernel: &mut Kernel<P>) {
    let rows: Vec<(Pid, ProcessState, String)> = kernel
        .procs()
        .slots()
        .iter()
        .filter(|p| p.state != ProcessState::Terminated)
        .map(|p| (p.pid, p.state, p.name.clone()))
        .collect();
    let platform = kernel.platform_mut();
    platform.console_write_line("List of active processes:");
    for (pid, state, name) in rows {
        platform.console_write_line(&format!(
            "PID: {} - Status: {} - Name: {}",
            pid, state, name
        ));
    }
}

/// Parse and validate a pid argument, then run `op` and print its message.
fn with_pid<P, F>(kernel: &mut Kernel<P>, arg: &str, op: F)
where
    P: Platform,
    F: FnOnce(&mut Kernel<P>, Pid) -> Result<String, ExecError>,
{
    if !is_numeric(arg) {
        kernel
            .platform_mut()
            .console_write_line("Error. Invalid process ID.");
        return;
    }
    let pid = match arg.parse::<u32>() {
        Ok(n) => Pid(n),
        Err(_) => {
            kernel
                .platform_mut()
                .console_write_line("Error. Invalid process ID.");
            return;
        }
    };
    let message = match op(kernel, pid) {
        Ok(message) => message,
        Err(e) => format!("Error: {}", e),
    };
    kernel.platform_mut().console_write_line(&message);
}
