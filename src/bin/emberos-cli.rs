//! emberos CLI - native entry point
//!
//! Boots the kernel on the host platform and runs the event loop: one
//! console byte, one scheduler pass, repeat. Pass a path to persist the
//! store image between runs:
//!
//!   emberos-cli [store-image.json]
//!
//! Ctrl-D ends the session once all processes have drained; the kernel
//! statistics summary is printed on the way out.

use emberos::kernel::Kernel;
use emberos::platform::{HostPlatform, Platform};
use emberos::shell::Shell;
use std::time::Duration;

fn main() {
    let platform = match std::env::args().nth(1) {
        Some(path) => HostPlatform::with_snapshot(path),
        None => HostPlatform::new(),
    };
    let mut kernel = Kernel::new(platform);
    kernel.tracer_mut().enable();
    let mut shell = Shell::new();

    kernel
        .platform_mut()
        .console_write_line("emberos 0.1.0 ready.");

    loop {
        let busy = shell.pump(&mut kernel);
        kernel.tick();

        if kernel.platform().console_eof() && kernel.procs().is_empty() {
            break;
        }
        if !busy && kernel.procs().is_empty() {
            // nothing to run, nothing to read: don't spin the host CPU
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    let summary = kernel.tracer().summary();
    kernel
        .platform_mut()
        .console_write_str(&summary.to_string());
}
