use crate::command::{
    CommandFactory, ExecutableCommand, ExitCode, FAILURE, NOT_FOUND, SUCCESS,
};
use crate::io_adapters::Console;
use crate::syscall::Kernel;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::io::Write;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, kernel: &mut dyn Kernel) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, kernel: &mut dyn Kernel) -> Result<ExitCode> {
        match T::execute(*self, kernel) {
            Ok(x) => Ok(x),
            Err(e) => {
                warn!(command = T::name(), error = %e, "builtin failed");
                writeln!(Console::new(kernel), "{e}")?;
                Ok(FAILURE)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, kernel: &mut dyn Kernel) -> Result<ExitCode> {
        writeln!(Console::new(kernel), "{}", self.output.trim_end())?;
        Ok(if self.is_error { FAILURE } else { SUCCESS })
    }
}

/// Creates instances of one builtin by name.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to, absolute or relative to the current directory.
    pub operands: Vec<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, kernel: &mut dyn Kernel) -> Result<ExitCode> {
        let Some(target) = self.operands.first() else {
            anyhow::bail!("cd: missing operand");
        };
        kernel
            .chdir(target)
            .with_context(|| format!("cd: {target}: no such directory"))?;
        debug!(target = target.as_str(), "changed directory");
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Print the current working directory.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, kernel: &mut dyn Kernel) -> Result<ExitCode> {
        let dir = kernel
            .get_current_dir_name()
            .context("pwd: cannot determine the working directory")?;
        writeln!(Console::new(kernel), "{dir}")?;
        Ok(SUCCESS)
    }
}

/// The table of built-in commands, queried in order.
pub struct Builtins {
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new(vec![
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Pwd>::default()),
        ])
    }
}

impl Builtins {
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self { commands }
    }

    pub fn register(&mut self, factory: Box<dyn CommandFactory>) {
        self.commands.push(factory);
    }

    /// Run `argv[0]` with the remaining words as its arguments.
    ///
    /// A name no factory recognizes is reported on the console and yields [`NOT_FOUND`].
    pub fn dispatch(&self, kernel: &mut dyn Kernel, argv: &[&str]) -> Result<ExitCode> {
        let Some((&name, args)) = argv.split_first() else {
            return Ok(SUCCESS);
        };
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(name, args) {
                debug!(name, "builtin");
                return cmd.execute(kernel);
            }
        }
        warn!(name, "command not found");
        writeln!(Console::new(kernel), "{name}: command not found")?;
        Ok(NOT_FOUND)
    }
}

/// Run `argv` against the default builtin table.
pub fn handle_builtin(kernel: &mut dyn Kernel, argv: &[&str]) -> Result<ExitCode> {
    Builtins::default().dispatch(kernel, argv)
}
