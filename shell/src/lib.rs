//! A line-oriented shell for a minimal operating system, and the syscall surface it runs on.
//!
//! The shell reads a line, splits it into words and either runs a builtin in-process or
//! spawns the named executable and reports how it exited. Everything it does goes through
//! a [`Kernel`]: [`HostKernel`] serves the syscalls from the host OS, [`SimKernel`] from an
//! in-memory filesystem and process table with the bundled user programs installed.
//!
//! The main entry point is [`Shell`]. The public modules [`command`] and [`syscall`]
//! expose the traits for writing your own builtins and kernels.

mod builtin;
pub mod command;
mod external;
pub mod heap;
mod host;
mod interpreter;
mod io_adapters;
mod lexer;
pub mod path;
pub mod programs;
mod reader;
mod sim;
pub mod syscall;

pub use builtin::{Builtins, Cd, Pwd, handle_builtin};
pub use external::{
    DEFAULT_PREFIXES, EXIT_CODE_LEN, ExecutablePrefixes, format_exit_code, handle_executable,
    is_executable,
};
pub use host::HostKernel;
pub use interpreter::{Config, Outcome, READ_FAILED, Shell};
pub use io_adapters::{Console, MemReader, MemWriter};
pub use lexer::{Token, TokenArray, count_words, parse_command};
pub use reader::{ConsoleReader, EditorReader, Line, LineSource, ReadError};
pub use sim::SimKernel;
pub use syscall::{DirEntry, Fd, Kernel, Pid, Stat, SysError, Syscall};
