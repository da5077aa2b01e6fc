use crate::syscall::Kernel;
use anyhow::Result;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

pub const SUCCESS: ExitCode = 0;
pub const FAILURE: ExitCode = 1;
/// Reported when no builtin matches the command name.
pub const NOT_FOUND: ExitCode = 127;

/// Object-safe trait for any command the shell runs in-process.
///
/// Implemented by builtins via a blanket impl. A command reaches the console and the
/// filesystem only through `kernel`.
pub trait ExecutableCommand {
    fn execute(self: Box<Self>, kernel: &mut dyn Kernel) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
