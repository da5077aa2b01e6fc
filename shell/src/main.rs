use anyhow::{Context, Result};
use argh::FromArgs;
use std::io;
use yos_shell::{
    Config, ConsoleReader, EditorReader, ExecutablePrefixes, HostKernel, Kernel, LineSource,
    Shell, SimKernel,
};

#[derive(FromArgs)]
/// Interactive shell for the yos syscall surface.
struct Args {
    /// prompt printed before every command
    #[argh(option, default = "String::from(\"$ \")")]
    prompt: String,

    /// prefix marking a command as an executable path; repeat to replace the defaults
    #[argh(option)]
    exec_prefix: Vec<String>,

    /// bytes requested from the console per read
    #[argh(option, default = "64")]
    read_chunk: usize,

    /// read commands through a line editor with history
    #[argh(switch)]
    edit: bool,

    /// run against the in-memory kernel with the bundled programs installed
    #[argh(switch)]
    sim: bool,

    /// log level written to stderr
    #[argh(option, default = "tracing::Level::WARN")]
    log: tracing::Level,
}

impl Args {
    fn config(&self) -> Config {
        let executable_prefixes = if self.exec_prefix.is_empty() {
            ExecutablePrefixes::default()
        } else {
            ExecutablePrefixes::new(self.exec_prefix.iter().cloned())
        };
        Config {
            prompt: self.prompt.clone(),
            executable_prefixes,
            read_chunk: self.read_chunk,
        }
    }

    fn input(&self) -> Result<Box<dyn LineSource>> {
        Ok(if self.edit {
            Box::new(EditorReader::new().context("cannot start the line editor")?)
        } else {
            Box::new(ConsoleReader::new(self.read_chunk))
        })
    }
}

fn run<K: Kernel>(kernel: K, args: &Args) -> Result<()> {
    let mut shell = Shell::new(kernel, args.config()).with_input(args.input()?);
    shell.run();
    shell.into_kernel().exit(0)
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(args.log)
        .init();

    if args.sim {
        run(SimKernel::booted(io::stdin(), io::stdout()), &args)
    } else {
        run(HostKernel::new().context("cannot open the host kernel")?, &args)
    }
}
