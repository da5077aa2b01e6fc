//! Commands that name an executable: classification, spawning and reporting.

use crate::command::{ExitCode, FAILURE};
use crate::io_adapters::Console;
use crate::syscall::Kernel;
use anyhow::Result;
use std::io::Write;
use tracing::{info, warn};

/// Prefixes that mark a command as a path to an executable, in priority order.
pub const DEFAULT_PREFIXES: [&str; 3] = ["./", "../", "/"];

/// Room for the widest `i32`, its sign and a terminator.
pub const EXIT_CODE_LEN: usize = 12;

/// The set of prefixes that make a first word an executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutablePrefixes {
    prefixes: Vec<String>,
}

impl Default for ExecutablePrefixes {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIXES)
    }
}

impl ExecutablePrefixes {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// The first prefix, in priority order, that `token` starts with.
    pub fn matching(&self, token: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .map(String::as_str)
            .find(|prefix| token.starts_with(prefix))
    }

    pub fn is_executable(&self, token: &str) -> bool {
        self.matching(token).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }
}

/// Whether `first_token` names an executable under the default prefixes.
pub fn is_executable(first_token: &str) -> bool {
    DEFAULT_PREFIXES
        .iter()
        .any(|prefix| first_token.starts_with(prefix))
}

/// Spawn `argv[0]` with `argv`, wait for it and report how it ended.
///
/// Failures to spawn or to wait are reported on the console and yield [`FAILURE`]; the
/// returned error is reserved for a console that can no longer be written.
pub fn handle_executable(kernel: &mut dyn Kernel, argv: &[&str]) -> Result<ExitCode> {
    let Some(&program) = argv.first() else {
        return Ok(FAILURE);
    };

    let pid = match kernel.exec(program, argv) {
        Ok(pid) => pid,
        Err(err) => {
            warn!(program, %err, "spawn failed");
            writeln!(Console::new(kernel), "{program}: failed to execute")?;
            return Ok(FAILURE);
        }
    };
    info!(program, pid = pid.raw(), "spawned");

    let status = match kernel.waitpid(pid) {
        Ok(status) => status,
        Err(err) => {
            warn!(program, pid = pid.raw(), %err, "wait failed");
            writeln!(
                Console::new(kernel),
                "{program}: failed to wait for process {}",
                pid.raw()
            )?;
            return Ok(FAILURE);
        }
    };
    info!(program, pid = pid.raw(), status, "exited");

    let mut buf = [0u8; EXIT_CODE_LEN];
    let code = format_exit_code(status, &mut buf);
    let mut console = Console::new(kernel);
    console.write_all(program.as_bytes())?;
    console.write_all(b" exited with code ")?;
    console.write_all(code.as_bytes())?;
    console.write_all(b"\n")?;
    Ok(status)
}

/// Render `code` in decimal into `buf`, without touching the heap.
///
/// The digits end right before the last byte of `buf`, which is left as a NUL terminator.
pub fn format_exit_code(code: ExitCode, buf: &mut [u8; EXIT_CODE_LEN]) -> &str {
    let end = EXIT_CODE_LEN - 1;
    buf[end] = 0;
    let mut start = end;
    let mut value = code.unsigned_abs();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    if code < 0 {
        start -= 1;
        buf[start] = b'-';
    }
    std::str::from_utf8(&buf[start..end]).unwrap_or_default()
}
